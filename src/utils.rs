// Copyright (C) 2020 Matthew Waters <matthew@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::sync::{Arc, Mutex};

/// Logs `msg` when dropped, marking the end of a task however it exits
pub(crate) struct DropLogger {
    msg: &'static str,
}

impl DropLogger {
    pub(crate) fn new(msg: &'static str) -> Self {
        Self { msg }
    }
}

impl Drop for DropLogger {
    fn drop(&mut self) {
        info!("{}", self.msg);
    }
}

#[derive(Clone)]
struct Named<T>(&'static str, T);

impl<T> std::fmt::Debug for Named<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<T> std::ops::Deref for Named<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.1
    }
}

type Filter<T> = Arc<dyn Fn(&T) -> bool + Send + Sync + 'static>;

#[derive(Debug, Clone)]
struct Listener<T: std::fmt::Debug> {
    sender: async_channel::Sender<T>,
    filter: Named<Filter<T>>,
}

/// Fans every message out to all listeners.  Listeners whose receiver has
/// been dropped are forgotten on the next broadcast.
#[derive(Debug)]
pub(crate) struct ChannelBroadcast<T: std::fmt::Debug> {
    listeners: Named<Mutex<Vec<Listener<T>>>>,
}

impl<T> Default for ChannelBroadcast<T>
where
    T: std::fmt::Debug,
{
    fn default() -> Self {
        Self {
            listeners: Named("...", Mutex::new(vec![])),
        }
    }
}

impl<T> ChannelBroadcast<T>
where
    T: Clone + std::fmt::Debug,
{
    // only sends when @filter returns true
    pub(crate) fn channel_with_filter(
        &self,
        filter: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> async_channel::Receiver<T> {
        let (send, recv) = async_channel::bounded(16);
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(Listener {
                sender: send,
                filter: Named("ChannelFilter", Arc::new(filter)),
            });
        }
        recv
    }

    pub(crate) fn channel(&self) -> async_channel::Receiver<T> {
        self.channel_with_filter(|_| true)
    }

    pub(crate) async fn broadcast(&self, data: T) {
        let listeners = match self.listeners.lock() {
            Ok(listeners) => listeners.clone(),
            Err(_) => return,
        };

        trace!("sending {:?} to {} listeners", data, listeners.len());
        let mut closed = false;
        for listener in listeners.iter() {
            if (listener.filter)(&data) && listener.sender.send(data.clone()).await.is_err() {
                closed = true;
            }
        }

        if closed {
            if let Ok(mut listeners) = self.listeners.lock() {
                listeners.retain(|listener| !listener.sender.is_closed());
                trace!("{} listeners remaining", listeners.len());
            }
        }
    }

    #[cfg(test)]
    fn n_listeners(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }
}
