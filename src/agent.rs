// Copyright (C) 2020 Matthew Waters <matthew@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! An async driver running a [`Session`] against a real transport

use std::error::Error;
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_std::sync::Mutex;
use async_trait::async_trait;
use futures::future::{self, Either};
use futures::pin_mut;
use tracing_futures::Instrument;

use crate::candidate::Candidate;
use crate::clock::{self, Clock};
use crate::component::ComponentState;
use crate::conncheck::Transmit;
use crate::session::{Session, SessionEvent, SessionPollRet};
use crate::utils::{ChannelBroadcast, DropLogger};

#[derive(Debug)]
pub enum AgentError {
    AlreadyExists,
    AlreadyInProgress,
    ResourceNotFound,
    NotEnoughData,
    InvalidSize,
    Malformed,
    NotStun,
    WrongImplementation,
    TooBig,
    ConnectionClosed,
    IntegrityCheckFailed,
    TimedOut,
    /// A check was requested on a pair that was never armed
    NotArmed,
    /// Every attempt of the current check has been sent
    RetriesExhausted,
    IoError(std::io::Error),
}

impl Error for AgentError {}

impl Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<std::io::Error> for AgentError {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e)
    }
}

/// Sends the datagrams produced by the checks
#[async_trait]
pub trait CheckTransport: std::fmt::Debug + Send + Sync {
    async fn send(&self, transmit: Transmit) -> Result<(), AgentError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentMessage {
    ComponentStateChange {
        stream: usize,
        component: usize,
        state: ComponentState,
    },
    SelectedPair {
        stream: usize,
        component: usize,
        local: Candidate,
        remote: Candidate,
    },
    RoleChange {
        controlling: bool,
    },
    ChecksSucceeded,
    ChecksFailed,
}

impl From<SessionEvent> for AgentMessage {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::ComponentStateChange {
                stream,
                component,
                state,
            } => AgentMessage::ComponentStateChange {
                stream,
                component,
                state,
            },
            SessionEvent::SelectedPair {
                stream,
                component,
                local,
                remote,
            } => AgentMessage::SelectedPair {
                stream,
                component,
                local,
                remote,
            },
            SessionEvent::RoleChange { controlling } => AgentMessage::RoleChange { controlling },
            SessionEvent::ChecksSucceeded => AgentMessage::ChecksSucceeded,
            SessionEvent::ChecksFailed => AgentMessage::ChecksFailed,
        }
    }
}

#[derive(Debug)]
pub struct Agent {
    session: Arc<Mutex<Session>>,
    broadcast: Arc<ChannelBroadcast<AgentMessage>>,
    transport: Arc<dyn CheckTransport>,
    clock: Arc<dyn Clock>,
    wakeup_send: async_channel::Sender<()>,
    wakeup_recv: async_channel::Receiver<()>,
}

impl Agent {
    /// Drive `session` over `transport`
    ///
    /// # Examples
    ///
    /// ```
    /// # use std::sync::Arc;
    /// # use librice_conncheck::agent::{Agent, AgentError, CheckTransport};
    /// # use librice_conncheck::conncheck::Transmit;
    /// # use librice_conncheck::session::Session;
    /// #[derive(Debug)]
    /// struct Discard;
    ///
    /// #[async_trait::async_trait]
    /// impl CheckTransport for Discard {
    ///     async fn send(&self, _transmit: Transmit) -> Result<(), AgentError> {
    ///         Ok(())
    ///     }
    /// }
    ///
    /// let agent = Agent::new(Session::builder().controlling(true).build(), Arc::new(Discard));
    /// ```
    pub fn new(session: Session, transport: Arc<dyn CheckTransport>) -> Self {
        Self::with_clock(session, transport, clock::system_clock())
    }

    pub fn with_clock(
        session: Session,
        transport: Arc<dyn CheckTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (wakeup_send, wakeup_recv) = async_channel::bounded(1);
        Self {
            session: Arc::new(Mutex::new(session)),
            broadcast: Arc::new(ChannelBroadcast::default()),
            transport,
            clock,
            wakeup_send,
            wakeup_recv,
        }
    }

    /// Run `f` with exclusive access to the session, e.g. to add streams and
    /// candidates
    pub async fn with_session<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut session = self.session.lock().await;
        let ret = f(&mut *session);
        drop(session);
        self.wake();
        ret
    }

    pub async fn controlling(&self) -> bool {
        self.session.lock().await.controlling()
    }

    pub async fn start_checks(&self) -> Result<(), AgentError> {
        self.session.lock().await.start_checks()?;
        self.wake();
        Ok(())
    }

    fn wake(&self) {
        // a full channel already has a wakeup pending
        let _ = self.wakeup_send.try_send(());
    }

    pub fn message_channel(&self) -> impl futures::Stream<Item = AgentMessage> {
        self.broadcast.channel()
    }

    /// Feed a datagram received on the local address `to` into the session
    /// and send any response
    pub async fn handle_incoming(
        &self,
        from: SocketAddr,
        to: SocketAddr,
        data: &[u8],
    ) -> Result<(), AgentError> {
        let now = self.clock.now();
        let reply = self
            .session
            .lock()
            .await
            .handle_incoming(now, from, to, data);
        self.wake();
        if let Some(transmit) = reply? {
            trace!("sending response to {}", transmit.to);
            self.transport.send(transmit).await?;
        }
        Ok(())
    }

    // false when the agent has been closed
    async fn wait(&self, until: Option<Instant>) -> bool {
        let wakeup = self.wakeup_recv.recv();
        pin_mut!(wakeup);
        match until {
            Some(until) => {
                let delay = self.clock.delay_until(until);
                match future::select(delay, wakeup).await {
                    Either::Left(_) => true,
                    Either::Right((res, _)) => res.is_ok(),
                }
            }
            None => wakeup.await.is_ok(),
        }
    }

    /// Run the agent loop until the checks complete or the agent is closed
    pub async fn run_loop(&self) -> Result<(), AgentError> {
        let _drop_log = DropLogger::new("agent loop exited");
        async move {
            loop {
                let now = self.clock.now();
                let ret = self.session.lock().await.poll(now);
                match ret {
                    SessionPollRet::Transmit(transmit) => {
                        trace!("sending check to {}", transmit.to);
                        if let Err(e) = self.transport.send(transmit).await {
                            warn!("failed to send check: {:?}", e);
                        }
                    }
                    SessionPollRet::Event(event) => {
                        debug!("{:?}", event);
                        self.broadcast.broadcast(event.into()).await;
                    }
                    SessionPollRet::WaitUntil(until) => {
                        if !self.wait(Some(until)).await {
                            return Ok(());
                        }
                    }
                    SessionPollRet::Idle => {
                        if !self.wait(None).await {
                            return Ok(());
                        }
                    }
                    SessionPollRet::Completed => {
                        info!("checks completed");
                        return Ok(());
                    }
                }
            }
        }
        .instrument(debug_span!("agent_loop"))
        .await
    }

    /// Stop the agent loop
    pub fn close(&self) {
        info!("closing agent");
        self.wakeup_send.close();
    }
}
