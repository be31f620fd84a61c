// Copyright (C) 2020 Matthew Waters <matthew@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_std::net::UdpSocket;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use tracing_subscriber::EnvFilter;

use librice_conncheck::agent::*;
use librice_conncheck::candidate::{Candidate, CandidateType, TransportType};
use librice_conncheck::conncheck::{Credentials, Transmit};
use librice_conncheck::session::Session;

static TRACING: Lazy<()> = Lazy::new(|| {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
});

pub fn debug_init() {
    Lazy::force(&TRACING);
}

pub fn host(addr: SocketAddr) -> Candidate {
    Candidate::builder(1, CandidateType::Host, TransportType::Udp, "0", addr).build()
}

/// A session with a single stream between `local` and `remote`
pub fn session(
    builder: librice_conncheck::session::SessionBuilder,
    local: (Credentials, SocketAddr),
    remote: (Credentials, SocketAddr),
) -> Session {
    let mut session = builder.build();
    let stream = session.add_stream(local.0, remote.0);
    let list = session.stream_mut(stream).unwrap();
    list.add_local_candidate(host(local.1)).unwrap();
    list.add_remote_candidate(host(remote.1)).unwrap();
    session
}

/// Sends checks over a real UDP socket
#[derive(Debug)]
pub struct UdpTransport {
    pub socket: Arc<UdpSocket>,
}

#[async_trait]
impl CheckTransport for UdpTransport {
    async fn send(&self, transmit: Transmit) -> Result<(), AgentError> {
        self.socket.send_to(&transmit.data, transmit.to).await?;
        Ok(())
    }
}

/// Feed everything received on `socket` into `agent` until the socket fails
pub async fn udp_receive_loop(agent: Arc<Agent>, socket: Arc<UdpSocket>) {
    let local = match socket.local_addr() {
        Ok(addr) => addr,
        Err(_) => return,
    };
    let mut buf = [0; 1500];
    while let Ok((len, from)) = socket.recv_from(&mut buf).await {
        if let Err(e) = agent.handle_incoming(from, local, &buf[..len]).await {
            warn!("failed to handle data from {}: {:?}", from, e);
        }
    }
}

/// In-memory delivery of transmits between addresses
#[derive(Debug, Default)]
pub struct Router {
    routes: Mutex<HashMap<SocketAddr, async_channel::Sender<Transmit>>>,
}

impl Router {
    pub fn add_route(&self, addr: SocketAddr) -> async_channel::Receiver<Transmit> {
        let (send, recv) = async_channel::unbounded();
        self.routes.lock().unwrap().insert(addr, send);
        recv
    }
}

#[derive(Debug)]
pub struct RouterTransport {
    pub router: Arc<Router>,
}

#[async_trait]
impl CheckTransport for RouterTransport {
    async fn send(&self, transmit: Transmit) -> Result<(), AgentError> {
        let sender = self
            .router
            .routes
            .lock()
            .unwrap()
            .get(&transmit.to)
            .cloned()
            .ok_or(AgentError::ResourceNotFound)?;
        sender
            .send(transmit)
            .await
            .map_err(|_| AgentError::ConnectionClosed)
    }
}

pub async fn router_receive_loop(agent: Arc<Agent>, recv: async_channel::Receiver<Transmit>) {
    while let Ok(transmit) = recv.recv().await {
        if let Err(e) = agent
            .handle_incoming(transmit.from, transmit.to, &transmit.data)
            .await
        {
            warn!("failed to handle data from {}: {:?}", transmit.from, e);
        }
    }
}
