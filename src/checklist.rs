// Copyright (C) 2020 Matthew Waters <matthew@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The pairs of one stream and the order they are checked in.

use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::time::Instant;

use crate::agent::AgentError;
use crate::candidate::{Candidate, CandidateType, TransportType};
use crate::component::{Component, ComponentState};
use crate::conncheck::{CheckContext, Credentials, IncomingCheck, Transmit};
use crate::pair::{CandidatePair, PairEvent, PairId, PairState};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecklistState {
    /// Checks have not been started
    Frozen,
    Running,
    Completed,
    Failed,
}

/// Session wide parameters a checklist needs when arming its pairs
#[derive(Debug, Clone, Copy)]
pub(crate) struct CheckConfig {
    pub controlling: bool,
    pub tie_breaker: u64,
    pub aggressive_nomination: bool,
    pub retry_policy: RetryPolicy,
}

/// The outcome of a check, fed back into the checklist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CheckEvent {
    /// `nominating` when the answered request carried USE-CANDIDATE
    Succeeded { mapped: SocketAddr, nominating: bool },
    Failed,
    Timeout,
}

/// Things the session must act on or report
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StreamEvent {
    ComponentState {
        component: usize,
        state: ComponentState,
    },
    SelectedPair {
        component: usize,
        pair: PairId,
        local: Candidate,
        remote: Candidate,
    },
    /// A pair of this foundation succeeded, frozen pairs of it may be checked
    FoundationSucceeded(String),
    StateChanged(ChecklistState),
}

#[derive(Debug)]
pub struct Checklist {
    id: usize,
    state: ChecklistState,
    // indexed by PairId
    pairs: Vec<CandidatePair>,
    // pairs that may still be scheduled, highest priority first
    ordered: Vec<PairId>,
    triggered: VecDeque<PairId>,
    valid: Vec<PairId>,
    components: Vec<Component>,
    local_candidates: Vec<Candidate>,
    remote_candidates: Vec<Candidate>,
    local_credentials: Credentials,
    remote_credentials: Credentials,
    events: VecDeque<StreamEvent>,
    pair_events: VecDeque<PairEvent>,
    peer_reflexive_count: usize,
}

impl Checklist {
    pub(crate) fn new(id: usize, local_credentials: Credentials, remote_credentials: Credentials) -> Self {
        Self {
            id,
            state: ChecklistState::Frozen,
            pairs: vec![],
            ordered: vec![],
            triggered: VecDeque::new(),
            valid: vec![],
            components: vec![],
            local_candidates: vec![],
            remote_candidates: vec![],
            local_credentials,
            remote_credentials,
            events: VecDeque::new(),
            pair_events: VecDeque::new(),
            peer_reflexive_count: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> ChecklistState {
        self.state
    }

    pub fn local_credentials(&self) -> &Credentials {
        &self.local_credentials
    }

    pub fn remote_credentials(&self) -> &Credentials {
        &self.remote_credentials
    }

    pub(crate) fn check_context(&self, controlling: bool) -> CheckContext {
        CheckContext {
            controlling,
            local_credentials: &self.local_credentials,
            remote_credentials: &self.remote_credentials,
        }
    }

    /// Add a component, returning the existing one if `component_id` is
    /// already present
    pub fn add_component(&mut self, component_id: usize) -> &mut Component {
        let idx = match self.components.iter().position(|c| c.id == component_id) {
            Some(idx) => idx,
            None => {
                debug!(checklist.id = self.id, component.id = component_id, "adding component");
                self.components.push(Component::new(component_id));
                self.components.len() - 1
            }
        };
        &mut self.components[idx]
    }

    pub fn component(&self, component_id: usize) -> Option<&Component> {
        self.components.iter().find(|c| c.id == component_id)
    }

    pub fn components(&self) -> impl Iterator<Item = &Component> + '_ {
        self.components.iter()
    }

    fn component_mut(&mut self, component_id: usize) -> Option<&mut Component> {
        self.components.iter_mut().find(|c| c.id == component_id)
    }

    /// Add a local candidate.  Candidates can only be added before checks start.
    pub fn add_local_candidate(&mut self, candidate: Candidate) -> Result<(), AgentError> {
        if self.state != ChecklistState::Frozen {
            return Err(AgentError::AlreadyInProgress);
        }
        if self.local_candidates.contains(&candidate) {
            return Err(AgentError::AlreadyExists);
        }
        trace!(checklist.id = self.id, "adding local candidate {}", candidate);
        self.add_component(candidate.component_id)
            .consider_default_candidate(&candidate);
        self.local_candidates.push(candidate);
        Ok(())
    }

    /// Add a remote candidate.  Candidates can only be added before checks start.
    pub fn add_remote_candidate(&mut self, candidate: Candidate) -> Result<(), AgentError> {
        if self.state != ChecklistState::Frozen {
            return Err(AgentError::AlreadyInProgress);
        }
        if self.remote_candidates.contains(&candidate) {
            return Err(AgentError::AlreadyExists);
        }
        trace!(checklist.id = self.id, "adding remote candidate {}", candidate);
        self.remote_candidates.push(candidate);
        Ok(())
    }

    pub fn local_candidates(&self) -> &[Candidate] {
        &self.local_candidates
    }

    pub fn remote_candidates(&self) -> &[Candidate] {
        &self.remote_candidates
    }

    pub fn pair(&self, id: PairId) -> Option<&CandidatePair> {
        self.pairs.get(id.index())
    }

    /// Every pair ever formed, including pruned ones
    pub fn pairs(&self) -> impl Iterator<Item = &CandidatePair> + '_ {
        self.pairs.iter()
    }

    /// Pairs that can still be scheduled, highest priority first
    pub fn scheduled_pairs(&self) -> impl Iterator<Item = &CandidatePair> + '_ {
        self.ordered.iter().filter_map(move |id| self.pair(*id))
    }

    pub fn valid_pairs(&self) -> impl Iterator<Item = &CandidatePair> + '_ {
        self.valid.iter().filter_map(move |id| self.pair(*id))
    }

    fn is_scheduled(&self, id: PairId) -> bool {
        self.ordered.contains(&id)
    }

    fn push_event(&mut self, event: StreamEvent) {
        trace!(checklist.id = self.id, "event {:?}", event);
        self.events.push_back(event);
    }

    pub(crate) fn take_event(&mut self) -> Option<StreamEvent> {
        self.events.pop_front()
    }

    #[tracing::instrument(
        name = "set_checklist_state",
        level = "debug",
        skip(self, state),
        fields(checklist.id = self.id)
    )]
    fn set_state(&mut self, state: ChecklistState) {
        if self.state != state {
            debug!(old_state = ?self.state, new_state = ?state, "setting");
            self.state = state;
            self.push_event(StreamEvent::StateChanged(state));
        }
    }

    fn set_component_state(&mut self, component_id: usize, state: ComponentState) {
        let changed = self
            .component_mut(component_id)
            .map_or(false, |component| component.set_state(state));
        if changed {
            self.push_event(StreamEvent::ComponentState {
                component: component_id,
                state,
            });
        }
    }

    fn next_pair_id(&self) -> PairId {
        PairId::new(self.pairs.len())
    }

    fn insert_ordered(&mut self, id: PairId) {
        let priority = match self.pair(id) {
            Some(pair) => pair.priority(),
            None => return,
        };
        let pairs = &self.pairs;
        let pos = self
            .ordered
            .iter()
            .position(|other| pairs[other.index()].priority() < priority)
            .unwrap_or(self.ordered.len());
        self.ordered.insert(pos, id);
    }

    fn add_pair(&mut self, local: Candidate, remote: Candidate, config: &CheckConfig) -> PairId {
        let id = self.next_pair_id();
        let is_default = self
            .component(local.component_id)
            .and_then(|component| component.default_candidate())
            .map_or(false, |default| default == &local);
        let bind_priority = local.peer_reflexive_priority();
        let mut pair = CandidatePair::new(id, local, remote, config.controlling, config.retry_policy);
        pair.set_default(is_default);
        pair.init_checker(config.tie_breaker, config.aggressive_nomination, bind_priority);
        debug!(
            checklist.id = self.id,
            pair.id = %id,
            foundation = pair.foundation(),
            priority = pair.priority(),
            "new pair {} -> {}",
            pair.local().address,
            pair.remote().address
        );
        self.pairs.push(pair);
        self.insert_ordered(id);
        id
    }

    /// Form, sort and prune the pairs of this stream (RFC 8445 6.1.2)
    #[tracing::instrument(level = "debug", skip(self, config), fields(checklist.id = self.id))]
    pub(crate) fn form_pairs(&mut self, config: &CheckConfig, limit: usize) {
        let mut candidates = vec![];
        for local in self.local_candidates.iter() {
            for remote in self.remote_candidates.iter() {
                if local.can_pair_with(remote) {
                    let priority = CandidatePair::calculate_priority(local, remote, config.controlling);
                    candidates.push((priority, local.clone(), remote.clone()));
                }
            }
        }
        candidates.sort_by(|a, b| b.0.cmp(&a.0));

        let mut kept: Vec<(u64, Candidate, Candidate)> = vec![];
        for (priority, local, remote) in candidates {
            let redundant = kept.iter().any(|(_, kept_local, kept_remote)| {
                kept_remote == &remote && kept_local.pair_prune_address() == local.pair_prune_address()
            });
            if redundant {
                trace!("pruning redundant pair {} -> {}", local.address, remote.address);
                continue;
            }
            kept.push((priority, local, remote));
        }
        if kept.len() > limit {
            debug!("limiting {} pairs to {}", kept.len(), limit);
            kept.truncate(limit);
        }
        for (_, local, remote) in kept {
            self.add_pair(local, remote, config);
        }
    }

    /// Set the initial Waiting pairs (RFC 8445 6.1.2.6).  For every foundation
    /// not already in `thawed`, the pair with the lowest component id and then
    /// highest priority is unfrozen.
    pub(crate) fn set_pairs_waiting(&mut self, thawed: &mut HashSet<String>) {
        let mut best: Vec<PairId> = vec![];
        for id in self.ordered.iter() {
            let pair = &self.pairs[id.index()];
            if pair.state() != PairState::Frozen || thawed.contains(pair.foundation()) {
                continue;
            }
            match best
                .iter_mut()
                .find(|other| self.pairs[other.index()].foundation() == pair.foundation())
            {
                Some(other) => {
                    // ordered is sorted by priority so only a lower component wins
                    if pair.component_id() < self.pairs[other.index()].component_id() {
                        *other = *id;
                    }
                }
                None => best.push(*id),
            }
        }
        for id in best {
            let pair = &mut self.pairs[id.index()];
            thawed.insert(pair.foundation().to_owned());
            pair.set_state(PairState::Waiting);
        }
    }

    /// Start checking this stream
    pub(crate) fn start(
        &mut self,
        config: &CheckConfig,
        limit: usize,
        thawed: &mut HashSet<String>,
    ) {
        if self.pairs.is_empty() {
            self.form_pairs(config, limit);
        } else {
            // restarting after cancel_all()
            self.rearm(config);
        }
        self.set_pairs_waiting(thawed);
        let component_ids: Vec<_> = self.components.iter().map(|c| c.id).collect();
        for component_id in component_ids {
            self.set_component_state(component_id, ComponentState::Connecting);
        }
        self.set_state(ChecklistState::Running);
    }

    /// Re-arm every pair that has not reached a final state, e.g. after a role
    /// change
    pub(crate) fn rearm(&mut self, config: &CheckConfig) {
        for pair in self.pairs.iter_mut() {
            if !pair.state().is_terminal() {
                let bind_priority = pair.local().peer_reflexive_priority();
                pair.init_checker(config.tie_breaker, config.aggressive_nomination, bind_priority);
            }
        }
    }

    /// Stop every outstanding transaction.  Late responses are recognised and
    /// dropped.
    pub(crate) fn cancel_all(&mut self) {
        for pair in self.pairs.iter_mut() {
            pair.set_canceled();
        }
        self.triggered.clear();
        self.set_state(ChecklistState::Frozen);
    }

    /// Foundations with a pair waiting for or undergoing a check
    pub(crate) fn active_foundations(&self) -> impl Iterator<Item = &str> + '_ {
        self.scheduled_pairs()
            .filter(|pair| matches!(pair.state(), PairState::Waiting | PairState::InProgress))
            .map(|pair| pair.foundation())
    }

    /// Unfreeze the pairs sharing a foundation with a pair that succeeded
    pub(crate) fn unfreeze_foundation(&mut self, foundation: &str) {
        for id in self.ordered.iter() {
            let pair = &mut self.pairs[id.index()];
            if pair.state() == PairState::Frozen && pair.foundation() == foundation {
                pair.set_state(PairState::Waiting);
            }
        }
    }

    /// Pick the pair that should be checked next (RFC 8445 6.1.4.2)
    pub(crate) fn next_check(
        &mut self,
        now: Instant,
        active_foundations: &HashSet<String>,
    ) -> Option<PairId> {
        if self.state != ChecklistState::Running {
            return None;
        }

        while let Some(id) = self.triggered.pop_front() {
            if self.is_scheduled(id) && self.pairs[id.index()].state() == PairState::Waiting {
                trace!(checklist.id = self.id, pair.id = %id, "next check is triggered");
                return Some(id);
            }
        }

        let due = self
            .ordered
            .iter()
            .filter(|id| self.pairs[id.index()].retransmit_due(now))
            .min_by_key(|id| self.pairs[id.index()].next_deadline());
        if let Some(id) = due {
            trace!(checklist.id = self.id, pair.id = %id, "next check is a retransmission");
            return Some(*id);
        }

        let waiting = self
            .ordered
            .iter()
            .find(|id| self.pairs[id.index()].state() == PairState::Waiting);
        if let Some(id) = waiting {
            return Some(*id);
        }

        let frozen = self.ordered.iter().copied().find(|id| {
            let pair = &self.pairs[id.index()];
            pair.state() == PairState::Frozen && !active_foundations.contains(pair.foundation())
        });
        if let Some(id) = frozen {
            debug!(checklist.id = self.id, pair.id = %id, "unfreezing pair");
            self.pairs[id.index()].set_state(PairState::Waiting);
            return Some(id);
        }
        None
    }

    /// Send the next attempt of the check on `id`
    pub(crate) fn check_pair(
        &mut self,
        id: PairId,
        controlling: bool,
        now: Instant,
    ) -> Result<Transmit, AgentError> {
        let ctx = CheckContext {
            controlling,
            local_credentials: &self.local_credentials,
            remote_credentials: &self.remote_credentials,
        };
        let pair = self
            .pairs
            .get_mut(id.index())
            .ok_or(AgentError::ResourceNotFound)?;
        pair.check(&ctx, now)
    }

    /// The pair a response transaction belongs to and whether that
    /// transaction is still live
    pub(crate) fn match_response(&self, transaction: u128) -> Option<(PairId, bool)> {
        self.pairs.iter().find_map(|pair| {
            pair.get_check_retry_by_transaction(transaction)
                .map(|retry| (pair.id(), retry.is_valid()))
        })
    }

    /// Forget the canceled transaction of `id` after its response was accepted
    pub(crate) fn take_canceled(&mut self, id: PairId) {
        if let Some(pair) = self.pairs.get_mut(id.index()) {
            if let Some(retry) = pair.take_canceled() {
                trace!(pair.id = %id, transaction = retry.transaction_id(), "canceled transaction answered");
            }
        }
    }

    fn add_triggered(&mut self, id: PairId) {
        if let Some(pair) = self.pairs.get_mut(id.index()) {
            pair.add_triggered();
            if !self.triggered.contains(&id) {
                self.triggered.push_back(id);
            }
        }
    }

    /// Schedule a new triggered check on `id`, e.g. after a role conflict
    pub(crate) fn retrigger(&mut self, id: PairId) {
        if self.is_scheduled(id) {
            self.add_triggered(id);
        }
    }

    /// Apply the result of a check to its pair (RFC 8445 7.2.5.3)
    #[tracing::instrument(
        level = "debug",
        skip(self, now),
        fields(checklist.id = self.id)
    )]
    pub(crate) fn process_check_event(
        &mut self,
        id: PairId,
        event: CheckEvent,
        controlling: bool,
        now: Instant,
    ) {
        let pair = match self.pairs.get_mut(id.index()) {
            Some(pair) => pair,
            None => return,
        };
        match event {
            CheckEvent::Succeeded { mapped, nominating } => {
                pair.succeeded(mapped);
                let foundation = pair.foundation().to_owned();
                pair.update_nominated_flag(controlling, nominating, &mut self.pair_events);
                if !self.valid.contains(&id) {
                    self.valid.push(id);
                }
                self.unfreeze_foundation(&foundation);
                self.push_event(StreamEvent::FoundationSucceeded(foundation));
            }
            CheckEvent::Failed | CheckEvent::Timeout => self.pair_failed(id),
        }
        self.process_pair_events();
        self.update_state(now);
    }

    fn process_pair_events(&mut self) {
        while let Some(event) = self.pair_events.pop_front() {
            match event {
                PairEvent::CheckTimeout(id) => self.pair_failed(id),
                PairEvent::RecheckScheduled(id) => {
                    if !self.triggered.contains(&id) {
                        self.triggered.push_back(id);
                    }
                }
                PairEvent::Nominated(id) => self.pair_nominated(id),
            }
        }
    }

    // a valid pair whose nominating re-check fails can no longer be selected
    fn pair_failed(&mut self, id: PairId) {
        if let Some(pair) = self.pairs.get_mut(id.index()) {
            pair.failed();
        }
        self.triggered.retain(|other| *other != id);
        if self.valid.contains(&id) {
            debug!(checklist.id = self.id, pair.id = %id, "removing failed pair from the valid list");
            self.valid.retain(|other| *other != id);
        }
    }

    fn pair_nominated(&mut self, id: PairId) {
        let pair = &self.pairs[id.index()];
        let component_id = pair.component_id();
        let priority = pair.priority();
        let selected = match self
            .components
            .iter_mut()
            .find(|component| component.id == component_id)
        {
            Some(component) => component.set_selected_if_higher_priority(pair),
            None => false,
        };
        if selected {
            let event = StreamEvent::SelectedPair {
                component: component_id,
                pair: id,
                local: pair.local().clone(),
                remote: pair.remote().clone(),
            };
            self.push_event(event);
            self.set_component_state(component_id, ComponentState::Connected);
        }

        if self.state != ChecklistState::Running {
            return;
        }
        // RFC 8445 8.1.2: no new checks for a component once it is nominated
        let pairs = &mut self.pairs;
        self.ordered.retain(|other| {
            let other = &pairs[other.index()];
            other.component_id() != component_id
                || !matches!(other.state(), PairState::Waiting | PairState::Frozen)
        });
        for other in self.ordered.iter() {
            let other = &mut pairs[other.index()];
            if other.component_id() == component_id
                && other.state() == PairState::InProgress
                && other.priority() < priority
            {
                trace!(pair.id = %other.id(), "ceasing retransmissions");
                other.cease_retransmissions();
            }
        }
        let ordered = &self.ordered;
        self.triggered.retain(|other| ordered.contains(other));
    }

    /// Handle an authenticated Binding request from the peer (RFC 8445 7.3.1)
    #[tracing::instrument(
        level = "debug",
        skip(self, check, config, now),
        fields(checklist.id = self.id)
    )]
    pub(crate) fn handle_incoming_check(
        &mut self,
        check: &IncomingCheck,
        from: SocketAddr,
        to: SocketAddr,
        config: &CheckConfig,
        now: Instant,
    ) {
        if self.state != ChecklistState::Running {
            debug!("checks not running, answering only");
            return;
        }
        let local = match self
            .local_candidates
            .iter()
            .find(|cand| cand.send_address() == to)
        {
            Some(local) => local.clone(),
            None => {
                warn!("no local candidate for {}", to);
                return;
            }
        };
        let remote = match self
            .remote_candidates
            .iter()
            .find(|cand| cand.address == from && cand.component_id == local.component_id)
        {
            Some(remote) => remote.clone(),
            None => {
                // RFC 8445 7.3.1.3
                self.peer_reflexive_count += 1;
                let remote = Candidate::builder(
                    local.component_id,
                    CandidateType::PeerReflexive,
                    TransportType::Udp,
                    &format!("prflx{}", self.peer_reflexive_count),
                    from,
                )
                .priority(check.priority)
                .build();
                info!("new peer reflexive remote candidate {}", remote);
                self.remote_candidates.push(remote.clone());
                remote
            }
        };

        let existing = self.pairs.iter().find(|pair| {
            pair.local().address == local.address && pair.remote().address == remote.address
        });
        let id = match existing {
            Some(pair) => {
                let id = pair.id();
                let state = pair.state();
                if !self.is_scheduled(id) {
                    trace!(pair.id = %id, "pair no longer scheduled");
                } else {
                    match state {
                        PairState::Succeeded => (),
                        PairState::InProgress => {
                            if let Some(pair) = self.pairs.get_mut(id.index()) {
                                pair.set_canceled();
                            }
                            self.add_triggered(id);
                        }
                        PairState::Waiting | PairState::Frozen | PairState::Failed => {
                            self.add_triggered(id)
                        }
                    }
                }
                id
            }
            None => {
                let id = self.add_pair(local, remote, config);
                self.add_triggered(id);
                id
            }
        };

        if check.use_candidate && !config.controlling {
            if let Some(pair) = self.pairs.get_mut(id.index()) {
                pair.set_nominated_contingent();
                if pair.state() == PairState::Succeeded {
                    pair.update_nominated_flag(false, false, &mut self.pair_events);
                }
            }
        }
        self.process_pair_events();
        self.update_state(now);
    }

    /// Whether any scheduled pair may still produce a result
    pub(crate) fn is_work_remaining(&mut self, now: Instant) -> bool {
        let mut remaining = false;
        for id in self.ordered.iter() {
            if self.pairs[id.index()].is_work_remaining(now, &mut self.pair_events) {
                remaining = true;
            }
        }
        remaining
    }

    /// Process timeouts and recompute the state of this stream
    pub(crate) fn update_state(&mut self, now: Instant) {
        if self.state != ChecklistState::Running {
            return;
        }
        let work_remaining = self.is_work_remaining(now);
        self.process_pair_events();

        let all_selected = !self.components.is_empty()
            && self
                .components
                .iter()
                .all(|component| component.selected_pair().is_some());
        if all_selected {
            info!(checklist.id = self.id, "all components nominated");
            self.triggered.clear();
            self.set_state(ChecklistState::Completed);
            return;
        }

        if work_remaining {
            return;
        }
        let lacking: Vec<usize> = self
            .components
            .iter()
            .filter(|component| {
                !self
                    .valid_pairs()
                    .any(|pair| pair.component_id() == component.id)
            })
            .map(|component| component.id)
            .collect();
        if self.components.is_empty() || !lacking.is_empty() {
            warn!(checklist.id = self.id, "no valid pair for components {:?}", lacking);
            let unselected: Vec<usize> = self
                .components
                .iter()
                .filter(|component| component.selected_pair().is_none())
                .map(|component| component.id)
                .collect();
            for component_id in unselected {
                self.set_component_state(component_id, ComponentState::Failed);
            }
            self.set_state(ChecklistState::Failed);
        }
    }

    /// The next instant a scheduled pair needs attention
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.scheduled_pairs()
            .filter_map(|pair| pair.next_deadline())
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conncheck::PeerRole;
    use crate::pair::tests::candidate;
    use crate::stun::attribute::USE_CANDIDATE;
    use crate::stun::message::{Message, BINDING};
    use std::time::Duration;

    fn init() {
        crate::tests::test_init_log();
    }

    fn config(controlling: bool) -> CheckConfig {
        CheckConfig {
            controlling,
            tie_breaker: 42,
            aggressive_nomination: false,
            retry_policy: RetryPolicy::default(),
        }
    }

    fn checklist() -> Checklist {
        Checklist::new(
            0,
            Credentials::new("lu", "lpass"),
            Credentials::new("ru", "rpass"),
        )
    }

    fn component_candidate(component_id: usize, foundation: &str, addr: &str, priority: u32) -> Candidate {
        let mut cand = candidate(foundation, addr, priority);
        cand.component_id = component_id;
        cand
    }

    fn success(transmit: &Transmit) -> CheckEvent {
        let msg = Message::from_bytes(&transmit.data).unwrap();
        CheckEvent::Succeeded {
            mapped: transmit.from,
            nominating: msg.has_attribute(USE_CANDIDATE),
        }
    }

    fn incoming(priority: u32, use_candidate: bool) -> IncomingCheck {
        IncomingCheck {
            request: Message::new_request(BINDING, 1),
            priority,
            use_candidate,
            role: PeerRole::Controlling(1),
        }
    }

    #[test]
    fn pairs_sorted_and_pruned() {
        init();
        let mut list = checklist();
        let base: SocketAddr = "192.168.0.1:1000".parse().unwrap();
        list.add_local_candidate(candidate("0", "192.168.0.1:1000", 1000))
            .unwrap();
        let srflx = Candidate::builder(
            1,
            CandidateType::ServerReflexive,
            TransportType::Udp,
            "1",
            "1.2.3.4:5000".parse().unwrap(),
        )
        .priority(500)
        .base_address(base)
        .build();
        list.add_local_candidate(srflx).unwrap();
        list.add_remote_candidate(candidate("2", "192.168.0.2:2000", 900))
            .unwrap();
        list.add_remote_candidate(candidate("3", "192.168.0.3:3000", 2000))
            .unwrap();
        list.form_pairs(&config(true), 100);

        // the srflx pairs share a base with the host pairs and are pruned
        let pairs: Vec<_> = list.scheduled_pairs().collect();
        assert_eq!(pairs.len(), 2);
        assert!(pairs[0].priority() > pairs[1].priority());
        assert_eq!(pairs[0].foundation(), "0:3");
        assert_eq!(pairs[1].foundation(), "0:2");
        assert!(pairs.iter().all(|pair| pair.state() == PairState::Frozen));
        assert!(pairs.iter().all(|pair| pair.check_retry().is_some()));
        // the srflx local candidate is the default one
        assert!(pairs.iter().all(|pair| !pair.is_default()));
    }

    #[test]
    fn pair_limit() {
        init();
        let mut list = checklist();
        list.add_local_candidate(candidate("0", "192.168.0.1:1000", 1000))
            .unwrap();
        for i in 0..5 {
            list.add_remote_candidate(candidate(
                &i.to_string(),
                &format!("192.168.0.2:{}", 2000 + i),
                100 + i as u32,
            ))
            .unwrap();
        }
        list.form_pairs(&config(true), 3);
        assert_eq!(list.scheduled_pairs().count(), 3);
    }

    #[test]
    fn candidates_fixed_once_running() {
        init();
        let mut list = checklist();
        list.add_local_candidate(candidate("0", "192.168.0.1:1000", 1000))
            .unwrap();
        assert!(matches!(
            list.add_local_candidate(candidate("0", "192.168.0.1:1000", 1000)),
            Err(AgentError::AlreadyExists)
        ));
        list.start(&config(true), 100, &mut HashSet::new());
        assert!(matches!(
            list.add_remote_candidate(candidate("1", "192.168.0.2:2000", 1000)),
            Err(AgentError::AlreadyInProgress)
        ));
    }

    #[test]
    fn initial_thaw_per_foundation() {
        init();
        let mut list = checklist();
        for component_id in [1, 2] {
            list.add_local_candidate(component_candidate(
                component_id,
                "0",
                &format!("192.168.0.1:{}", 1000 + component_id),
                1000 - component_id as u32,
            ))
            .unwrap();
            list.add_remote_candidate(component_candidate(
                component_id,
                "1",
                &format!("192.168.0.2:{}", 2000 + component_id),
                1000 - component_id as u32,
            ))
            .unwrap();
        }
        let mut thawed = HashSet::new();
        list.start(&config(true), 100, &mut thawed);
        let waiting: Vec<_> = list
            .scheduled_pairs()
            .filter(|pair| pair.state() == PairState::Waiting)
            .collect();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].component_id(), 1);
        assert!(thawed.contains("0:1"));

        // a second stream with the same foundation stays frozen
        let mut other = checklist();
        other
            .add_local_candidate(candidate("0", "10.0.0.1:1000", 1000))
            .unwrap();
        other
            .add_remote_candidate(candidate("1", "10.0.0.2:1000", 1000))
            .unwrap();
        other.start(&config(true), 100, &mut thawed);
        assert!(other
            .scheduled_pairs()
            .all(|pair| pair.state() == PairState::Frozen));
    }

    #[test]
    fn scheduling_order() {
        init();
        let mut list = checklist();
        list.add_local_candidate(candidate("0", "192.168.0.1:1000", 1000))
            .unwrap();
        list.add_remote_candidate(candidate("1", "192.168.0.2:2000", 2000))
            .unwrap();
        list.add_remote_candidate(candidate("2", "192.168.0.3:3000", 1000))
            .unwrap();
        list.start(&config(true), 100, &mut HashSet::new());
        let ids: Vec<_> = list.scheduled_pairs().map(|pair| pair.id()).collect();
        let (high, low) = (ids[0], ids[1]);
        let now = Instant::now();

        // both foundations are thawed, highest priority first
        assert_eq!(list.next_check(now, &HashSet::new()), Some(high));
        list.check_pair(high, true, now).unwrap();
        assert_eq!(list.next_check(now, &HashSet::new()), Some(low));

        // a triggered check jumps the queue
        list.retrigger(high);
        assert_eq!(list.next_check(now, &HashSet::new()), Some(high));
        list.check_pair(high, true, now).unwrap();

        // retransmissions of overdue checks come before waiting pairs
        let later = now + Duration::from_millis(500);
        assert_eq!(list.next_check(later, &HashSet::new()), Some(high));
    }

    #[test]
    fn frozen_pair_unfrozen_when_nothing_waits() {
        init();
        let mut list = checklist();
        list.add_local_candidate(candidate("0", "192.168.0.1:1000", 1000))
            .unwrap();
        list.add_remote_candidate(candidate("1", "192.168.0.2:2000", 1000))
            .unwrap();
        let mut thawed = HashSet::new();
        thawed.insert("0:1".to_owned());
        list.start(&config(true), 100, &mut thawed);
        let id = list.scheduled_pairs().next().unwrap().id();
        let now = Instant::now();

        let mut active = HashSet::new();
        active.insert("0:1".to_owned());
        assert_eq!(list.next_check(now, &active), None);
        assert_eq!(list.next_check(now, &HashSet::new()), Some(id));
        assert_eq!(list.pair(id).unwrap().state(), PairState::Waiting);
    }

    #[test]
    fn success_unfreezes_foundation_and_nominates() {
        init();
        let mut list = checklist();
        let mut cfg = config(true);
        cfg.aggressive_nomination = true;
        for component_id in [1, 2] {
            list.add_local_candidate(component_candidate(
                component_id,
                "0",
                &format!("192.168.0.1:{}", 1000 + component_id),
                1000,
            ))
            .unwrap();
            list.add_remote_candidate(component_candidate(
                component_id,
                "1",
                &format!("192.168.0.2:{}", 2000 + component_id),
                1000,
            ))
            .unwrap();
        }
        list.start(&cfg, 100, &mut HashSet::new());
        while list.take_event().is_some() {}
        let rtp = list
            .scheduled_pairs()
            .find(|pair| pair.component_id() == 1)
            .unwrap()
            .id();
        let rtcp = list
            .scheduled_pairs()
            .find(|pair| pair.component_id() == 2)
            .unwrap()
            .id();
        assert_eq!(list.pair(rtcp).unwrap().state(), PairState::Frozen);

        let now = Instant::now();
        let transmit = list.check_pair(rtp, true, now).unwrap();
        list.process_check_event(rtp, success(&transmit), true, now);
        assert_eq!(list.pair(rtp).unwrap().state(), PairState::Succeeded);
        assert!(list.pair(rtp).unwrap().is_nominated());
        assert_eq!(list.pair(rtcp).unwrap().state(), PairState::Waiting);
        assert_eq!(list.valid_pairs().count(), 1);

        let events: Vec<_> = std::iter::from_fn(|| list.take_event()).collect();
        assert!(events.contains(&StreamEvent::FoundationSucceeded("0:1".to_owned())));
        assert!(events.iter().any(|ev| matches!(
            ev,
            StreamEvent::SelectedPair { component: 1, .. }
        )));
        assert!(events.contains(&StreamEvent::ComponentState {
            component: 1,
            state: ComponentState::Connected
        }));
        assert_eq!(list.state(), ChecklistState::Running);

        let transmit = list.check_pair(rtcp, true, now).unwrap();
        list.process_check_event(rtcp, success(&transmit), true, now);
        assert_eq!(list.state(), ChecklistState::Completed);
    }

    #[test]
    fn failure_when_no_valid_pair() {
        init();
        let mut list = checklist();
        list.add_local_candidate(candidate("0", "192.168.0.1:1000", 1000))
            .unwrap();
        list.add_remote_candidate(candidate("1", "192.168.0.2:2000", 1000))
            .unwrap();
        list.start(&config(true), 100, &mut HashSet::new());
        let id = list.scheduled_pairs().next().unwrap().id();
        let now = Instant::now();
        list.check_pair(id, true, now).unwrap();
        list.process_check_event(id, CheckEvent::Failed, true, now);
        assert_eq!(list.pair(id).unwrap().state(), PairState::Failed);
        assert_eq!(list.state(), ChecklistState::Failed);
        assert_eq!(list.component(1).unwrap().state(), ComponentState::Failed);
    }

    #[test]
    fn timeout_fails_pair_once() {
        init();
        let mut list = checklist();
        let mut cfg = config(true);
        cfg.retry_policy = RetryPolicy::builder()
            .initial_timeout(Duration::from_millis(10))
            .max_attempts(1)
            .final_timeout_multiplier(1)
            .build();
        list.add_local_candidate(candidate("0", "192.168.0.1:1000", 1000))
            .unwrap();
        list.add_remote_candidate(candidate("1", "192.168.0.2:2000", 1000))
            .unwrap();
        list.start(&cfg, 100, &mut HashSet::new());
        let id = list.scheduled_pairs().next().unwrap().id();
        let now = Instant::now();
        list.check_pair(id, true, now).unwrap();
        list.update_state(now);
        assert_eq!(list.state(), ChecklistState::Running);
        assert_eq!(list.next_deadline(), Some(now + Duration::from_millis(10)));

        list.update_state(now + Duration::from_millis(10));
        assert_eq!(list.pair(id).unwrap().state(), PairState::Failed);
        assert_eq!(list.state(), ChecklistState::Failed);
        assert_eq!(list.next_check(now + Duration::from_secs(1), &HashSet::new()), None);
    }

    #[test]
    fn incoming_check_rules() {
        init();
        let mut list = checklist();
        let local = candidate("0", "192.168.0.1:1000", 1000);
        let remote = candidate("1", "192.168.0.2:2000", 1000);
        list.add_local_candidate(local.clone()).unwrap();
        list.add_remote_candidate(remote.clone()).unwrap();
        let cfg = config(false);
        let now = Instant::now();

        // not running yet, nothing changes
        list.handle_incoming_check(&incoming(10, false), remote.address, local.address, &cfg, now);
        assert_eq!(list.pairs().count(), 0);

        list.start(&cfg, 100, &mut HashSet::new());
        let id = list.scheduled_pairs().next().unwrap().id();
        let transmit = list.check_pair(id, false, now).unwrap();
        let first = Message::from_bytes(&transmit.data).unwrap().transaction_id();

        // in progress: cancel and trigger, the old transaction is still known
        list.handle_incoming_check(&incoming(10, true), remote.address, local.address, &cfg, now);
        let pair = list.pair(id).unwrap();
        assert_eq!(pair.state(), PairState::Waiting);
        assert!(pair.is_triggered());
        assert!(pair.is_nominated_contingent());
        assert!(!pair.is_nominated());
        assert_eq!(list.match_response(first), Some((id, false)));

        // the triggered check succeeds and nominates the contingent pair
        assert_eq!(list.next_check(now, &HashSet::new()), Some(id));
        let transmit = list.check_pair(id, false, now).unwrap();
        let second = Message::from_bytes(&transmit.data).unwrap().transaction_id();
        assert_eq!(list.match_response(second), Some((id, true)));
        list.process_check_event(id, success(&transmit), false, now);
        assert!(list.pair(id).unwrap().is_nominated());
        assert_eq!(list.state(), ChecklistState::Completed);
    }

    #[test]
    fn incoming_check_on_succeeded_pair_nominates() {
        init();
        let mut list = checklist();
        let local = candidate("0", "192.168.0.1:1000", 1000);
        let remote = candidate("1", "192.168.0.2:2000", 1000);
        list.add_local_candidate(local.clone()).unwrap();
        list.add_remote_candidate(remote.clone()).unwrap();
        let cfg = config(false);
        let now = Instant::now();
        list.start(&cfg, 100, &mut HashSet::new());
        let id = list.scheduled_pairs().next().unwrap().id();
        let transmit = list.check_pair(id, false, now).unwrap();
        list.process_check_event(id, success(&transmit), false, now);
        assert!(!list.pair(id).unwrap().is_nominated());
        assert_eq!(list.state(), ChecklistState::Running);

        list.handle_incoming_check(&incoming(10, false), remote.address, local.address, &cfg, now);
        // succeeded pairs are left alone
        assert!(!list.pair(id).unwrap().is_triggered());

        list.handle_incoming_check(&incoming(10, true), remote.address, local.address, &cfg, now);
        assert!(list.pair(id).unwrap().is_nominated());
        assert_eq!(list.state(), ChecklistState::Completed);
    }

    #[test]
    fn peer_reflexive_remote() {
        init();
        let mut list = checklist();
        let local = candidate("0", "192.168.0.1:1000", 1000);
        list.add_local_candidate(local.clone()).unwrap();
        list.add_remote_candidate(candidate("1", "192.168.0.2:2000", 1000))
            .unwrap();
        let cfg = config(true);
        list.start(&cfg, 100, &mut HashSet::new());
        let from: SocketAddr = "192.168.0.9:9000".parse().unwrap();
        list.handle_incoming_check(&incoming(12345, false), from, local.address, &cfg, Instant::now());

        let remote = list
            .remote_candidates()
            .iter()
            .find(|cand| cand.address == from)
            .unwrap();
        assert_eq!(remote.candidate_type, CandidateType::PeerReflexive);
        assert_eq!(remote.priority, 12345);
        let pair = list
            .scheduled_pairs()
            .find(|pair| pair.remote().address == from)
            .unwrap();
        assert!(pair.is_triggered());
        assert_eq!(pair.state(), PairState::Waiting);
    }

    #[test]
    fn cancel_keeps_late_responses_recognisable() {
        init();
        let mut list = checklist();
        list.add_local_candidate(candidate("0", "192.168.0.1:1000", 1000))
            .unwrap();
        list.add_remote_candidate(candidate("1", "192.168.0.2:2000", 1000))
            .unwrap();
        let cfg = config(true);
        list.start(&cfg, 100, &mut HashSet::new());
        let id = list.scheduled_pairs().next().unwrap().id();
        let now = Instant::now();
        let transmit = list.check_pair(id, true, now).unwrap();
        let transaction = Message::from_bytes(&transmit.data).unwrap().transaction_id();
        list.cancel_all();
        assert_eq!(list.state(), ChecklistState::Frozen);
        assert_eq!(list.match_response(transaction), Some((id, false)));
        assert_eq!(list.next_check(now, &HashSet::new()), None);

        // restarting re-arms with a fresh transaction
        list.start(&cfg, 100, &mut HashSet::new());
        assert_eq!(list.match_response(transaction), None);
        assert_eq!(list.next_check(now, &HashSet::new()), Some(id));
    }
}
