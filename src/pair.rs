// Copyright (C) 2020 Matthew Waters <matthew@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A candidate pair and the state of the connectivity check running over it.
//!
//! Pairs are owned by their `Checklist` and referred to by [`PairId`].  A pair
//! owns at most two transactions: the live one being (re)transmitted and the
//! most recently canceled one, kept so that a late response can be
//! recognised and dropped.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Instant;

use crate::agent::AgentError;
use crate::candidate::{pair_foundation, pair_priority, Candidate};
use crate::conncheck::{binding_request, BindingRequest, CheckContext, Transmit};
use crate::retry::{CheckRetry, RetryPolicy};

/// Index of a pair inside its checklist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairId(usize);

impl PairId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    pub(crate) fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for PairId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pair-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairState {
    Frozen,
    Waiting,
    InProgress,
    Succeeded,
    Failed,
}

impl PairState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PairState::Succeeded | PairState::Failed)
    }
}

/// Notifications a pair raises towards its checklist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PairEvent {
    /// The final attempt expired without a response
    CheckTimeout(PairId),
    /// The pair became nominated
    Nominated(PairId),
    /// A re-check carrying USE-CANDIDATE must be queued as a triggered check
    RecheckScheduled(PairId),
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct CandidatePair {
    id: PairId,
    local: Candidate,
    remote: Candidate,
    foundation: String,
    priority: u64,
    state: PairState,
    is_valid: bool,
    is_default: bool,
    is_nominated: bool,
    is_nominated_contingent: bool,
    regularly_nominated: bool,
    use_aggressive_nomination: bool,
    is_triggered: bool,
    control_tie_breaker: u64,
    bind_request_priority: u32,
    check_retry: Option<CheckRetry>,
    canceled_retry: Option<CheckRetry>,
    #[derivative(Debug = "ignore")]
    retry_policy: RetryPolicy,
    // the role the live transaction was sent with
    checked_as_controlling: Option<bool>,
    mapped_address: Option<SocketAddr>,
    #[derivative(Debug = "ignore")]
    timeout_reported: bool,
}

impl CandidatePair {
    /// A new Frozen pair.  The priority is fixed here from the role at
    /// creation and never recomputed.
    pub(crate) fn new(
        id: PairId,
        local: Candidate,
        remote: Candidate,
        controlling: bool,
        retry_policy: RetryPolicy,
    ) -> Self {
        let priority = Self::calculate_priority(&local, &remote, controlling);
        Self {
            id,
            foundation: pair_foundation(&local.foundation, &remote.foundation),
            local,
            remote,
            priority,
            state: PairState::Frozen,
            is_valid: false,
            is_default: false,
            is_nominated: false,
            is_nominated_contingent: false,
            regularly_nominated: false,
            use_aggressive_nomination: false,
            is_triggered: false,
            control_tie_breaker: 0,
            bind_request_priority: 0,
            check_retry: None,
            canceled_retry: None,
            retry_policy,
            checked_as_controlling: None,
            mapped_address: None,
            timeout_reported: false,
        }
    }

    pub(crate) fn calculate_priority(local: &Candidate, remote: &Candidate, controlling: bool) -> u64 {
        if controlling {
            pair_priority(local.priority, remote.priority)
        } else {
            pair_priority(remote.priority, local.priority)
        }
    }

    pub fn id(&self) -> PairId {
        self.id
    }

    pub fn local(&self) -> &Candidate {
        &self.local
    }

    pub fn remote(&self) -> &Candidate {
        &self.remote
    }

    pub fn component_id(&self) -> usize {
        self.local.component_id
    }

    pub fn foundation(&self) -> &str {
        &self.foundation
    }

    pub fn priority(&self) -> u64 {
        self.priority
    }

    pub fn state(&self) -> PairState {
        self.state
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }

    pub(crate) fn set_default(&mut self, is_default: bool) {
        self.is_default = is_default;
    }

    pub fn is_nominated(&self) -> bool {
        self.is_nominated
    }

    pub fn is_nominated_contingent(&self) -> bool {
        self.is_nominated_contingent
    }

    pub(crate) fn set_nominated_contingent(&mut self) {
        self.is_nominated_contingent = true;
    }

    pub fn regularly_nominated(&self) -> bool {
        self.regularly_nominated
    }

    pub fn is_triggered(&self) -> bool {
        self.is_triggered
    }

    pub fn mapped_address(&self) -> Option<SocketAddr> {
        self.mapped_address
    }

    pub fn check_retry(&self) -> Option<&CheckRetry> {
        self.check_retry.as_ref()
    }

    pub(crate) fn checked_as_controlling(&self) -> Option<bool> {
        self.checked_as_controlling
    }

    #[tracing::instrument(
        name = "set_pair_state",
        level = "debug",
        skip(self, state),
        fields(pair.id = %self.id, foundation = %self.foundation)
    )]
    pub(crate) fn set_state(&mut self, state: PairState) {
        if self.state != state {
            debug!(old_state = ?self.state, new_state = ?state, "setting");
            self.state = state;
        }
    }

    fn used_transactions(&self) -> Vec<u128> {
        self.check_retry
            .iter()
            .chain(self.canceled_retry.iter())
            .map(|retry| retry.transaction_id())
            .collect()
    }

    fn fresh_retry(&self) -> CheckRetry {
        CheckRetry::new(self.retry_policy, &self.used_transactions())
    }

    /// (Re)arm the pair for a new logical check.  Any previous live transaction
    /// is discarded and the canceled slot is cleared.
    pub(crate) fn init_checker(
        &mut self,
        tie_breaker: u64,
        use_aggressive_nomination: bool,
        bind_request_priority: u32,
    ) {
        let retry = self.fresh_retry();
        trace!(
            pair.id = %self.id,
            transaction = retry.transaction_id(),
            "arming check"
        );
        self.check_retry = Some(retry);
        self.canceled_retry = None;
        self.control_tie_breaker = tie_breaker;
        self.use_aggressive_nomination = use_aggressive_nomination;
        self.bind_request_priority = bind_request_priority;
        self.checked_as_controlling = None;
        self.timeout_reported = false;
        if self.state == PairState::InProgress {
            self.set_state(PairState::Waiting);
        }
    }

    /// Build the next attempt of the armed check and hand it back for sending.
    /// A failure to build the message leaves the pair untouched.
    pub(crate) fn check(
        &mut self,
        ctx: &CheckContext,
        now: Instant,
    ) -> Result<Transmit, AgentError> {
        let transaction = match &self.check_retry {
            None => return Err(AgentError::NotArmed),
            Some(retry) if !retry.has_unsent_attempts() => {
                return Err(AgentError::RetriesExhausted)
            }
            Some(retry) => retry.transaction_id(),
        };
        let request = BindingRequest {
            transaction,
            priority: self.bind_request_priority,
            tie_breaker: self.control_tie_breaker,
            use_candidate: ctx.controlling
                && (self.use_aggressive_nomination || self.regularly_nominated),
        };
        let msg = binding_request(&request, ctx)?;
        let attempt = self
            .increment_retry_attempt()
            .ok_or(AgentError::RetriesExhausted)?;
        if let Some(retry) = self.check_retry.as_mut() {
            retry.record_send(now, request.use_candidate);
        }
        debug!(
            pair.id = %self.id,
            attempt,
            use_candidate = request.use_candidate,
            "sending check {} -> {}",
            self.local.address,
            self.remote.address
        );
        self.checked_as_controlling = Some(ctx.controlling);
        self.set_state(PairState::InProgress);
        Ok(Transmit::for_pair(&self.local, &self.remote, msg.to_bytes()))
    }

    /// Whether this pair may still produce a result.  Reports `CheckTimeout`
    /// exactly once when the final attempt expires.
    pub(crate) fn is_work_remaining(
        &mut self,
        now: Instant,
        events: &mut VecDeque<PairEvent>,
    ) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        let retry = match &self.check_retry {
            Some(retry) => retry,
            None => return false,
        };
        if retry.has_unsent_attempts() {
            return true;
        }
        if retry.is_timed_out(now) {
            if !self.timeout_reported {
                debug!(pair.id = %self.id, "check timed out");
                self.timeout_reported = true;
                events.push_back(PairEvent::CheckTimeout(self.id));
            }
            return false;
        }
        true
    }

    pub(crate) fn increment_retry_attempt(&mut self) -> Option<u32> {
        self.check_retry
            .as_mut()
            .and_then(|retry| retry.increment_retry_attempt())
    }

    /// Whether an attempt of this pair may be sent now
    pub(crate) fn retransmit_due(&self, now: Instant) -> bool {
        self.state == PairState::InProgress
            && self
                .check_retry
                .as_ref()
                .map_or(false, |retry| retry.retransmit_due(now))
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        if self.state != PairState::InProgress {
            return None;
        }
        self.check_retry.as_ref().and_then(|retry| retry.deadline())
    }

    pub(crate) fn cease_retransmissions(&mut self) {
        if let Some(retry) = self.check_retry.as_mut() {
            retry.cease_retransmissions();
        }
    }

    /// Record a successful check
    pub(crate) fn succeeded(&mut self, mapped_address: SocketAddr) {
        self.is_valid = true;
        self.is_triggered = false;
        self.mapped_address = Some(mapped_address);
        self.set_state(PairState::Succeeded);
    }

    pub(crate) fn failed(&mut self) {
        self.is_triggered = false;
        self.set_state(PairState::Failed);
    }

    /// Apply the nomination rules after a successful check.
    ///
    /// `nominating` is whether the answered transaction carried
    /// USE-CANDIDATE.  The controlling agent nominates only on such a success,
    /// otherwise the pair is re-checked with USE-CANDIDATE.  The controlled
    /// agent only follows a USE-CANDIDATE it received for this pair.
    pub(crate) fn update_nominated_flag(
        &mut self,
        controlling: bool,
        nominating: bool,
        events: &mut VecDeque<PairEvent>,
    ) {
        if controlling {
            if nominating {
                self.nominate(events);
            } else {
                debug!(pair.id = %self.id, "scheduling nominating re-check");
                self.regularly_nominated = true;
                self.add_triggered();
                events.push_back(PairEvent::RecheckScheduled(self.id));
            }
        } else if self.is_nominated_contingent {
            self.nominate(events);
        }
    }

    fn nominate(&mut self, events: &mut VecDeque<PairEvent>) {
        if !self.is_nominated {
            info!(pair.id = %self.id, foundation = %self.foundation, "nominated");
            self.is_nominated = true;
            events.push_back(PairEvent::Nominated(self.id));
        }
    }

    /// Queue this pair for a triggered check with a fresh transaction
    pub(crate) fn add_triggered(&mut self) {
        self.is_triggered = true;
        self.check_retry = Some(self.fresh_retry());
        self.checked_as_controlling = None;
        self.timeout_reported = false;
        self.set_state(PairState::Waiting);
    }

    /// Move the live transaction to the canceled slot
    pub(crate) fn set_canceled(&mut self) {
        if let Some(mut retry) = self.check_retry.take() {
            trace!(
                pair.id = %self.id,
                transaction = retry.transaction_id(),
                "canceling transaction"
            );
            retry.invalidate();
            self.canceled_retry = Some(retry);
        }
    }

    /// Forget the canceled transaction once its response has been handled
    pub(crate) fn take_canceled(&mut self) -> Option<CheckRetry> {
        self.canceled_retry.take()
    }

    /// Find which of this pair's transactions `transaction` refers to
    pub fn get_check_retry_by_transaction(&self, transaction: u128) -> Option<&CheckRetry> {
        self.check_retry
            .iter()
            .chain(self.canceled_retry.iter())
            .find(|retry| retry.transaction_id() == transaction)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::candidate::{CandidateType, TransportType};
    use crate::conncheck::Credentials;
    use crate::stun::attribute::*;
    use crate::stun::message::Message;
    use std::time::Duration;

    fn init() {
        crate::tests::test_init_log();
    }

    pub(crate) fn candidate(foundation: &str, addr: &str, priority: u32) -> Candidate {
        Candidate::builder(
            1,
            CandidateType::Host,
            TransportType::Udp,
            foundation,
            addr.parse().unwrap(),
        )
        .priority(priority)
        .build()
    }

    fn pair(controlling: bool) -> CandidatePair {
        CandidatePair::new(
            PairId::new(0),
            candidate("A", "192.168.0.1:1000", 100),
            candidate("B", "192.168.0.2:2000", 200),
            controlling,
            RetryPolicy::default(),
        )
    }

    struct Creds {
        local: Credentials,
        remote: Credentials,
    }

    impl Creds {
        fn new() -> Self {
            Self {
                local: Credentials::new("lu", "lpass"),
                remote: Credentials::new("ru", "rpass"),
            }
        }

        fn ctx(&self, controlling: bool) -> CheckContext {
            CheckContext {
                controlling,
                local_credentials: &self.local,
                remote_credentials: &self.remote,
            }
        }
    }

    fn transaction_of(transmit: &Transmit) -> u128 {
        Message::from_bytes(&transmit.data).unwrap().transaction_id()
    }

    #[test]
    fn foundation_and_priority() {
        init();
        let mut pair = pair(true);
        assert_eq!(pair.foundation(), "A:B");
        assert_eq!(pair.state(), PairState::Frozen);
        let priority = pair.priority();
        assert_eq!(priority, pair_priority(100, 200));
        pair.init_checker(1, false, 5);
        pair.add_triggered();
        pair.init_checker(2, true, 6);
        assert_eq!(pair.priority(), priority);
    }

    #[test]
    fn unarmed_check() {
        init();
        let creds = Creds::new();
        let mut pair = pair(true);
        assert!(matches!(
            pair.check(&creds.ctx(true), Instant::now()),
            Err(AgentError::NotArmed)
        ));
        assert_eq!(pair.state(), PairState::Frozen);
    }

    #[test]
    fn retransmit_keeps_transaction() {
        init();
        let creds = Creds::new();
        let mut pair = pair(true);
        pair.init_checker(1, false, 5);
        let now = Instant::now();
        let first = pair.check(&creds.ctx(true), now).unwrap();
        assert_eq!(pair.state(), PairState::InProgress);
        let second = pair
            .check(&creds.ctx(true), now + Duration::from_millis(500))
            .unwrap();
        assert_eq!(transaction_of(&first), transaction_of(&second));
        assert_eq!(pair.check_retry().unwrap().attempts(), 2);

        pair.init_checker(1, false, 5);
        let third = pair.check(&creds.ctx(true), now).unwrap();
        assert_ne!(transaction_of(&first), transaction_of(&third));
    }

    #[test]
    fn check_contents() {
        init();
        let creds = Creds::new();
        let mut pair = pair(true);
        pair.init_checker(0xabcd, true, 1234);
        let transmit = pair.check(&creds.ctx(true), Instant::now()).unwrap();
        assert_eq!(transmit.from, pair.local().address);
        assert_eq!(transmit.to, pair.remote().address);
        let msg = Message::from_bytes(&transmit.data).unwrap();
        let prio = msg.attribute::<Priority>(PRIORITY).unwrap().unwrap();
        assert_eq!(prio.priority(), 1234);
        let role = msg
            .attribute::<IceControlling>(ICE_CONTROLLING)
            .unwrap()
            .unwrap();
        assert_eq!(role.tie_breaker(), 0xabcd);
        // aggressive nomination always carries USE-CANDIDATE
        assert!(msg.has_attribute(USE_CANDIDATE));
        let transport = msg
            .attribute::<RequestedTransport>(REQUESTED_TRANSPORT)
            .unwrap()
            .unwrap();
        assert_eq!(transport.protocol(), TRANSPORT_UDP);
    }

    #[test]
    fn transaction_lookup() {
        init();
        let creds = Creds::new();
        let mut pair = pair(true);
        pair.init_checker(1, false, 5);
        let canceled = transaction_of(&pair.check(&creds.ctx(true), Instant::now()).unwrap());
        pair.set_canceled();
        assert!(pair.check_retry().is_none());
        pair.add_triggered();
        let live = pair.check_retry().unwrap().transaction_id();
        assert_ne!(live, canceled);

        let found = pair.get_check_retry_by_transaction(live).unwrap();
        assert!(found.is_valid());
        let found = pair.get_check_retry_by_transaction(canceled).unwrap();
        assert!(!found.is_valid());
        let unknown = CheckRetry::new(RetryPolicy::default(), &[live, canceled]);
        assert!(pair
            .get_check_retry_by_transaction(unknown.transaction_id())
            .is_none());

        // a handled canceled transaction is forgotten
        assert!(pair.take_canceled().is_some());
        assert!(pair.get_check_retry_by_transaction(canceled).is_none());
        assert!(pair.get_check_retry_by_transaction(live).is_some());

        // re-arming forgets the canceled transaction
        pair.set_canceled();
        assert!(pair.get_check_retry_by_transaction(live).is_some());
        pair.init_checker(1, false, 5);
        assert!(pair.get_check_retry_by_transaction(live).is_none());
    }

    #[test]
    fn exhausted_check_fails() {
        init();
        let creds = Creds::new();
        let policy = RetryPolicy::builder().max_attempts(1).build();
        let mut pair = CandidatePair::new(
            PairId::new(1),
            candidate("A", "192.168.0.1:1000", 100),
            candidate("B", "192.168.0.2:2000", 200),
            true,
            policy,
        );
        pair.init_checker(1, false, 5);
        pair.check(&creds.ctx(true), Instant::now()).unwrap();
        assert_eq!(pair.increment_retry_attempt(), None);
        assert!(matches!(
            pair.check(&creds.ctx(true), Instant::now()),
            Err(AgentError::RetriesExhausted)
        ));
        assert_eq!(pair.state(), PairState::InProgress);
    }

    #[test]
    fn canceled_in_progress_pair_rechecks() {
        init();
        let creds = Creds::new();
        let mut pair = pair(false);
        pair.init_checker(1, false, 5);
        pair.check(&creds.ctx(false), Instant::now()).unwrap();
        pair.set_canceled();
        pair.add_triggered();
        assert!(pair.is_triggered());
        assert_eq!(pair.state(), PairState::Waiting);
        assert_eq!(pair.check_retry().unwrap().attempts(), 0);
        assert_eq!(pair.checked_as_controlling(), None);
    }

    #[test]
    fn regular_nomination_needs_two_successes() {
        init();
        let creds = Creds::new();
        let mut pair = pair(true);
        let mut events = VecDeque::new();
        pair.init_checker(1, false, 5);
        let now = Instant::now();

        let first = pair.check(&creds.ctx(true), now).unwrap();
        let msg = Message::from_bytes(&first.data).unwrap();
        assert!(!msg.has_attribute(USE_CANDIDATE));
        pair.succeeded(first.from);
        assert!(!pair.check_retry().unwrap().use_candidate());
        pair.update_nominated_flag(true, false, &mut events);
        assert!(!pair.is_nominated());
        assert!(pair.regularly_nominated());
        assert!(pair.is_triggered());
        assert_eq!(pair.state(), PairState::Waiting);
        assert_eq!(events.pop_front(), Some(PairEvent::RecheckScheduled(pair.id())));
        assert!(events.is_empty());

        let second = pair.check(&creds.ctx(true), now).unwrap();
        assert_ne!(transaction_of(&first), transaction_of(&second));
        let msg = Message::from_bytes(&second.data).unwrap();
        assert!(msg.has_attribute(USE_CANDIDATE));
        pair.succeeded(second.from);
        assert!(pair.check_retry().unwrap().use_candidate());
        pair.update_nominated_flag(true, true, &mut events);
        assert!(pair.is_nominated());
        assert_eq!(events.pop_front(), Some(PairEvent::Nominated(pair.id())));
        // nominating again is a no-op
        pair.update_nominated_flag(true, true, &mut events);
        assert!(events.is_empty());
    }

    #[test]
    fn aggressive_nomination() {
        init();
        let creds = Creds::new();
        let mut pair = pair(true);
        let mut events = VecDeque::new();
        pair.init_checker(1, true, 5);
        let transmit = pair.check(&creds.ctx(true), Instant::now()).unwrap();
        assert!(pair.check_retry().unwrap().use_candidate());
        pair.succeeded(transmit.from);
        pair.update_nominated_flag(true, true, &mut events);
        assert!(pair.is_nominated());
        assert_eq!(events.pop_front(), Some(PairEvent::Nominated(pair.id())));
    }

    #[test]
    fn success_without_use_candidate_never_nominates() {
        init();
        let creds = Creds::new();
        let mut pair = pair(true);
        let mut events = VecDeque::new();
        // checked while controlled, answered after becoming controlling
        pair.init_checker(1, true, 5);
        pair.check(&creds.ctx(false), Instant::now()).unwrap();
        assert!(!pair.check_retry().unwrap().use_candidate());
        pair.succeeded("192.168.0.1:1000".parse().unwrap());
        pair.update_nominated_flag(true, false, &mut events);
        assert!(!pair.is_nominated());
        assert!(pair.is_triggered());
        assert_eq!(events.pop_front(), Some(PairEvent::RecheckScheduled(pair.id())));
        let recheck = pair.check(&creds.ctx(true), Instant::now()).unwrap();
        let msg = Message::from_bytes(&recheck.data).unwrap();
        assert!(msg.has_attribute(USE_CANDIDATE));
    }

    #[test]
    fn controlled_needs_contingent() {
        init();
        let mut pair = pair(false);
        let mut events = VecDeque::new();
        pair.init_checker(1, true, 5);
        pair.succeeded("192.168.0.1:1000".parse().unwrap());
        pair.update_nominated_flag(false, false, &mut events);
        assert!(!pair.is_nominated());
        assert!(events.is_empty());
        pair.set_nominated_contingent();
        pair.update_nominated_flag(false, false, &mut events);
        assert!(pair.is_nominated());
        assert_eq!(events.pop_front(), Some(PairEvent::Nominated(pair.id())));
    }

    #[test]
    fn work_remaining_and_single_timeout() {
        init();
        let creds = Creds::new();
        let policy = RetryPolicy::builder()
            .initial_timeout(Duration::from_millis(100))
            .max_attempts(2)
            .final_timeout_multiplier(2)
            .build();
        let mut pair = CandidatePair::new(
            PairId::new(3),
            candidate("A", "192.168.0.1:1000", 100),
            candidate("B", "192.168.0.2:2000", 200),
            true,
            policy,
        );
        let mut events = VecDeque::new();
        pair.init_checker(1, false, 5);
        let now = Instant::now();
        // unsent attempts remain
        assert!(pair.is_work_remaining(now, &mut events));
        pair.check(&creds.ctx(true), now).unwrap();
        assert!(pair.is_work_remaining(now, &mut events));
        let later = now + Duration::from_millis(100);
        assert!(pair.retransmit_due(later));
        pair.check(&creds.ctx(true), later).unwrap();
        // last attempt outstanding
        assert!(pair.is_work_remaining(later, &mut events));
        assert!(events.is_empty());
        assert!(matches!(
            pair.check(&creds.ctx(true), later),
            Err(AgentError::RetriesExhausted)
        ));
        let expired = later + Duration::from_millis(200);
        assert!(!pair.is_work_remaining(expired, &mut events));
        assert!(!pair.is_work_remaining(expired, &mut events));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], PairEvent::CheckTimeout(PairId::new(3)));

        pair.failed();
        assert!(!pair.is_work_remaining(expired, &mut events));
        assert_eq!(events.len(), 1);
    }
}
