// Copyright (C) 2020 Matthew Waters <matthew@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The connectivity check session: role, pacing and the streams being checked.
//!
//! A [`Session`] performs no I/O.  The caller feeds it received datagrams with
//! [`Session::handle_incoming`] and repeatedly calls [`Session::poll`] to
//! retrieve datagrams to send, events and the next time it needs attention.

use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rand::prelude::*;

use crate::agent::AgentError;
use crate::candidate::Candidate;
use crate::checklist::{CheckConfig, CheckEvent, Checklist, ChecklistState, StreamEvent};
use crate::component::ComponentState;
use crate::conncheck::*;
use crate::pair::{PairId, PairState};
use crate::retry::RetryPolicy;
use crate::stun::attribute::*;
use crate::stun::message::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    CandidatesGathered,
    ChecksRunning,
    ChecksSucceeded,
    ProcessingFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
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

/// What the caller should do next
#[derive(Debug)]
pub enum SessionPollRet {
    Transmit(Transmit),
    Event(SessionEvent),
    /// Call `poll` again at this instant or when new data arrives
    WaitUntil(Instant),
    /// Nothing to do until checks are started
    Idle,
    /// Checks have finished, successfully or not
    Completed,
}

#[derive(Debug, Clone)]
pub struct SessionBuilder {
    controlling: bool,
    aggressive_nomination: bool,
    tie_breaker: Option<u64>,
    pacing_interval: Duration,
    retry_policy: RetryPolicy,
    max_pairs: usize,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self {
            controlling: false,
            aggressive_nomination: false,
            tie_breaker: None,
            pacing_interval: Duration::from_millis(500),
            retry_policy: RetryPolicy::default(),
            max_pairs: 100,
        }
    }
}

impl SessionBuilder {
    pub fn controlling(mut self, controlling: bool) -> Self {
        self.controlling = controlling;
        self
    }

    pub fn aggressive_nomination(mut self, aggressive: bool) -> Self {
        self.aggressive_nomination = aggressive;
        self
    }

    /// Use a fixed tie breaker instead of a random one
    pub fn tie_breaker(mut self, tie_breaker: u64) -> Self {
        self.tie_breaker = Some(tie_breaker);
        self
    }

    /// The minimum interval between two checks across all streams
    pub fn pacing_interval(mut self, interval: Duration) -> Self {
        self.pacing_interval = interval;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// The maximum number of pairs, shared equally between streams
    pub fn max_pairs(mut self, max_pairs: usize) -> Self {
        self.max_pairs = max_pairs.max(1);
        self
    }

    pub fn build(self) -> Session {
        let tie_breaker = self
            .tie_breaker
            .unwrap_or_else(|| rand::thread_rng().gen::<u64>());
        Session {
            controlling: self.controlling,
            tie_breaker,
            aggressive_nomination: self.aggressive_nomination,
            pacing_interval: self.pacing_interval,
            retry_policy: self.retry_policy,
            max_pairs: self.max_pairs,
            state: SessionState::CandidatesGathered,
            checklists: vec![],
            thawed_foundations: HashSet::new(),
            next_list: 0,
            last_send: None,
            events: VecDeque::new(),
        }
    }
}

#[derive(Debug)]
pub struct Session {
    controlling: bool,
    tie_breaker: u64,
    aggressive_nomination: bool,
    pacing_interval: Duration,
    retry_policy: RetryPolicy,
    max_pairs: usize,
    state: SessionState,
    checklists: Vec<Checklist>,
    thawed_foundations: HashSet<String>,
    // round robin position for pacing
    next_list: usize,
    last_send: Option<Instant>,
    events: VecDeque<SessionEvent>,
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    pub fn controlling(&self) -> bool {
        self.controlling
    }

    pub fn tie_breaker(&self) -> u64 {
        self.tie_breaker
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn check_config(&self) -> CheckConfig {
        CheckConfig {
            controlling: self.controlling,
            tie_breaker: self.tie_breaker,
            aggressive_nomination: self.aggressive_nomination,
            retry_policy: self.retry_policy,
        }
    }

    /// Add a stream checked with the given credentials, returning its id
    ///
    /// # Examples
    ///
    /// ```
    /// # use librice_conncheck::conncheck::Credentials;
    /// # use librice_conncheck::session::Session;
    /// let mut session = Session::builder().controlling(true).build();
    /// let id = session.add_stream(
    ///     Credentials::new("luser", "lpass"),
    ///     Credentials::new("ruser", "rpass"),
    /// );
    /// assert_eq!(session.stream(id).unwrap().id(), id);
    /// ```
    pub fn add_stream(&mut self, local_credentials: Credentials, remote_credentials: Credentials) -> usize {
        let id = self.checklists.len();
        debug!(stream.id = id, "adding stream");
        self.checklists
            .push(Checklist::new(id, local_credentials, remote_credentials));
        id
    }

    pub fn stream(&self, id: usize) -> Option<&Checklist> {
        self.checklists.get(id)
    }

    pub fn stream_mut(&mut self, id: usize) -> Option<&mut Checklist> {
        self.checklists.get_mut(id)
    }

    pub fn streams(&self) -> impl Iterator<Item = &Checklist> + '_ {
        self.checklists.iter()
    }

    #[tracing::instrument(name = "set_session_state", level = "debug", skip(self, state))]
    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!(old_state = ?self.state, new_state = ?state, "setting");
            self.state = state;
        }
    }

    /// Form the pairs of every stream and begin checking them
    pub fn start_checks(&mut self) -> Result<(), AgentError> {
        if self.state != SessionState::CandidatesGathered {
            return Err(AgentError::AlreadyInProgress);
        }
        if self.checklists.is_empty() {
            return Err(AgentError::ResourceNotFound);
        }
        info!(
            controlling = self.controlling,
            streams = self.checklists.len(),
            "starting checks"
        );
        let config = self.check_config();
        let limit = (self.max_pairs / self.checklists.len()).max(1);
        self.thawed_foundations.clear();
        for list in self.checklists.iter_mut() {
            list.start(&config, limit, &mut self.thawed_foundations);
        }
        self.next_list = 0;
        self.last_send = None;
        self.set_state(SessionState::ChecksRunning);
        Ok(())
    }

    /// Stop all checks.  Outstanding transactions are canceled and checks can
    /// be started again.
    pub fn cancel_checks(&mut self) {
        info!("canceling checks");
        for list in self.checklists.iter_mut() {
            list.cancel_all();
        }
        self.thawed_foundations.clear();
        self.set_state(SessionState::CandidatesGathered);
    }

    /// Change role after a role conflict.  Every pair still being checked is
    /// re-armed with a new tie breaker.
    #[tracing::instrument(level = "debug", skip(self))]
    pub(crate) fn swap_controlling_agent(&mut self) {
        self.controlling = !self.controlling;
        self.tie_breaker = rand::thread_rng().gen::<u64>();
        info!(controlling = self.controlling, "role changed");
        let config = self.check_config();
        for list in self.checklists.iter_mut() {
            list.rearm(&config);
        }
        self.events.push_back(SessionEvent::RoleChange {
            controlling: self.controlling,
        });
    }

    fn collect_stream_events(&mut self) {
        let mut succeeded = vec![];
        let mut completed = vec![];
        for list in self.checklists.iter_mut() {
            let stream = list.id();
            while let Some(event) = list.take_event() {
                match event {
                    StreamEvent::ComponentState { component, state } => {
                        self.events.push_back(SessionEvent::ComponentStateChange {
                            stream,
                            component,
                            state,
                        })
                    }
                    StreamEvent::SelectedPair {
                        component,
                        local,
                        remote,
                        ..
                    } => self.events.push_back(SessionEvent::SelectedPair {
                        stream,
                        component,
                        local,
                        remote,
                    }),
                    StreamEvent::FoundationSucceeded(foundation) => {
                        succeeded.push((stream, foundation))
                    }
                    StreamEvent::StateChanged(ChecklistState::Completed) => completed.push(stream),
                    StreamEvent::StateChanged(state) => {
                        trace!(stream.id = stream, "stream state {:?}", state)
                    }
                }
            }
        }
        for (stream, foundation) in succeeded {
            for list in self.checklists.iter_mut().filter(|list| list.id() != stream) {
                list.unfreeze_foundation(&foundation);
            }
        }
        for stream in completed {
            for list in self.checklists.iter_mut().filter(|list| {
                list.id() != stream && list.state() == ChecklistState::Running
            }) {
                list.set_pairs_waiting(&mut HashSet::new());
            }
        }
    }

    /// Aggregate the state of every stream into the session state.  The
    /// outcome is reported exactly once.
    pub(crate) fn update_ice_stream_states(&mut self) {
        if self.state != SessionState::ChecksRunning || self.checklists.is_empty() {
            return;
        }
        let all_completed = self
            .checklists
            .iter()
            .all(|list| list.state() == ChecklistState::Completed);
        let any_failed = self
            .checklists
            .iter()
            .any(|list| list.state() == ChecklistState::Failed);
        let any_running = self
            .checklists
            .iter()
            .any(|list| list.state() == ChecklistState::Running);
        if all_completed {
            info!("all streams completed");
            self.set_state(SessionState::ChecksSucceeded);
            self.events.push_back(SessionEvent::ChecksSucceeded);
        } else if any_failed && !any_running {
            warn!("connectivity checks failed");
            self.set_state(SessionState::ProcessingFailed);
            self.events.push_back(SessionEvent::ChecksFailed);
        }
    }

    /// Advance the session to `now`
    pub fn poll(&mut self, now: Instant) -> SessionPollRet {
        if self.state == SessionState::ChecksRunning {
            for list in self.checklists.iter_mut() {
                list.update_state(now);
            }
        }
        self.collect_stream_events();
        self.update_ice_stream_states();
        if let Some(event) = self.events.pop_front() {
            return SessionPollRet::Event(event);
        }

        match self.state {
            SessionState::CandidatesGathered => return SessionPollRet::Idle,
            SessionState::ChecksSucceeded | SessionState::ProcessingFailed => {
                return SessionPollRet::Completed
            }
            SessionState::ChecksRunning => (),
        }

        if let Some(transmit) = self.next_transmit(now) {
            return SessionPollRet::Transmit(transmit);
        }
        SessionPollRet::WaitUntil(self.next_wakeup(now))
    }

    // one check per pacing interval across all streams
    fn next_transmit(&mut self, now: Instant) -> Option<Transmit> {
        if let Some(last) = self.last_send {
            if now < last + self.pacing_interval {
                return None;
            }
        }
        let active: HashSet<String> = self
            .checklists
            .iter()
            .flat_map(|list| list.active_foundations().map(str::to_owned))
            .collect();
        let n_lists = self.checklists.len();
        for offset in 0..n_lists {
            let idx = (self.next_list + offset) % n_lists;
            let list = &mut self.checklists[idx];
            if let Some(pair) = list.next_check(now, &active) {
                match list.check_pair(pair, self.controlling, now) {
                    Ok(transmit) => {
                        self.last_send = Some(now);
                        self.next_list = (idx + 1) % n_lists;
                        return Some(transmit);
                    }
                    Err(e) => warn!(stream.id = idx, pair.id = %pair, "failed to build check: {:?}", e),
                }
            }
        }
        None
    }

    fn next_wakeup(&self, now: Instant) -> Instant {
        let tick = match self.last_send {
            Some(last) if last + self.pacing_interval > now => last + self.pacing_interval,
            _ => now + self.pacing_interval,
        };
        self.checklists
            .iter()
            .filter_map(|list| list.next_deadline())
            .filter(|deadline| *deadline > now)
            .fold(tick, |earliest, deadline| earliest.min(deadline))
    }

    /// Process a datagram received on the local address `to` from `from`.
    /// Returns the response to send, if any.
    #[tracing::instrument(
        name = "session_incoming",
        level = "trace",
        skip(self, now, data),
        fields(len = data.len())
    )]
    pub fn handle_incoming(
        &mut self,
        now: Instant,
        from: SocketAddr,
        to: SocketAddr,
        data: &[u8],
    ) -> Result<Option<Transmit>, AgentError> {
        let msg = Message::from_bytes(data)?;
        if msg.method() != BINDING {
            debug!("ignoring message with method {:#x}", msg.method());
            return Ok(None);
        }
        match msg.class() {
            MessageClass::Request => self.handle_request(now, from, to, &msg, data),
            MessageClass::Success | MessageClass::Error => {
                self.handle_response(now, from, to, &msg, data)?;
                Ok(None)
            }
            MessageClass::Indication => Ok(None),
        }
    }

    fn reply(from: SocketAddr, to: SocketAddr, response: Message) -> Transmit {
        Transmit {
            from: to,
            to: from,
            path: TransmitPath::Direct,
            data: response.to_bytes(),
        }
    }

    fn handle_request(
        &mut self,
        now: Instant,
        from: SocketAddr,
        to: SocketAddr,
        msg: &Message,
        data: &[u8],
    ) -> Result<Option<Transmit>, AgentError> {
        let username = msg.attribute::<Username>(USERNAME).ok().flatten();
        let controlling = self.controlling;
        let idx = username
            .and_then(|username| {
                self.checklists.iter().position(|list| {
                    list.check_context(controlling).incoming_username() == username.username()
                })
            })
            .unwrap_or(0);
        let list = match self.checklists.get(idx) {
            Some(list) => list,
            None => return Ok(None),
        };
        let local_credentials = list.local_credentials().clone();
        let check = match validate_request(msg, data, &list.check_context(controlling))? {
            IncomingRequest::Check(check) => check,
            IncomingRequest::Reply(response) => return Ok(Some(Self::reply(from, to, response))),
            IncomingRequest::Ignore => return Ok(None),
        };

        // RFC 8445 7.3.1.1
        match (self.controlling, check.role) {
            (true, PeerRole::Controlling(theirs)) => {
                if self.tie_breaker >= theirs {
                    debug!("role conflict, peer must switch");
                    let response = signed_error(msg, ROLE_CONFLICT, &local_credentials)?;
                    return Ok(Some(Self::reply(from, to, response)));
                }
                self.swap_controlling_agent();
            }
            (false, PeerRole::Controlled(theirs)) => {
                if self.tie_breaker < theirs {
                    debug!("role conflict, peer must switch");
                    let response = signed_error(msg, ROLE_CONFLICT, &local_credentials)?;
                    return Ok(Some(Self::reply(from, to, response)));
                }
                self.swap_controlling_agent();
            }
            _ => (),
        }

        if self.state == SessionState::ChecksRunning {
            let config = self.check_config();
            if let Some(list) = self.checklists.get_mut(idx) {
                list.handle_incoming_check(&check, from, to, &config, now);
            }
        }
        let response = success_response(msg, from, &local_credentials)?;
        Ok(Some(Self::reply(from, to, response)))
    }

    fn handle_response(
        &mut self,
        now: Instant,
        from: SocketAddr,
        to: SocketAddr,
        msg: &Message,
        data: &[u8],
    ) -> Result<(), AgentError> {
        if self.state != SessionState::ChecksRunning {
            debug!("dropping response while checks are not running");
            return Ok(());
        }
        let transaction = msg.transaction_id();
        let found = self.checklists.iter().enumerate().find_map(|(idx, list)| {
            list.match_response(transaction)
                .map(|(pair, live)| (idx, pair, live))
        });
        let (idx, pair_id, live) = match found {
            Some(found) => found,
            None => {
                debug!("response for unknown transaction {:#x}", transaction);
                return Ok(());
            }
        };
        let list = &self.checklists[idx];
        let pair = list.pair(pair_id).ok_or(AgentError::ResourceNotFound)?;
        // a canceled check is only answered while its triggered replacement
        // is unsent
        if !live && !(pair.state() == PairState::Waiting && pair.is_triggered()) {
            debug!(pair.id = %pair_id, "dropping late response for canceled transaction");
            return Ok(());
        }
        let response = match parse_response(msg, data, list.remote_credentials()) {
            Ok(response) => response,
            Err(e) => {
                warn!(pair.id = %pair_id, "dropping invalid response: {:?}", e);
                return Ok(());
            }
        };
        let symmetric = from == pair.remote().address && to == pair.local().send_address();
        let nominating = pair
            .get_check_retry_by_transaction(transaction)
            .map_or(false, |retry| retry.use_candidate());
        let controlling = self.controlling;
        if !live {
            // only the first answer to a canceled transaction counts
            self.checklists[idx].take_canceled(pair_id);
        }
        match response {
            CheckResponse::Success(mapped) => {
                let event = if symmetric {
                    CheckEvent::Succeeded { mapped, nominating }
                } else {
                    warn!(pair.id = %pair_id, "non-symmetric response from {} to {}", from, to);
                    CheckEvent::Failed
                };
                self.checklists[idx].process_check_event(pair_id, event, controlling, now);
            }
            CheckResponse::RoleConflict => self.handle_role_conflict(idx, pair_id),
            CheckResponse::Failure(code) => {
                debug!(pair.id = %pair_id, "check failed with error {}", code);
                self.checklists[idx].process_check_event(pair_id, CheckEvent::Failed, controlling, now);
            }
        }
        Ok(())
    }

    // RFC 8445 7.2.5.1
    fn handle_role_conflict(&mut self, idx: usize, pair_id: PairId) {
        let checked_as = self.checklists[idx]
            .pair(pair_id)
            .and_then(|pair| pair.checked_as_controlling());
        if checked_as == Some(self.controlling) {
            self.swap_controlling_agent();
        } else {
            debug!(pair.id = %pair_id, "role already changed since the check was sent");
        }
        self.checklists[idx].retrigger(pair_id);
    }
}
