// Copyright (C) 2020 Matthew Waters <matthew@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::candidate::{Candidate, CandidateType};
use crate::pair::{CandidatePair, PairId};

pub const RTP: usize = 1;
pub const RTCP: usize = 2;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ComponentState {
    New,
    Connecting,
    Connected,
    Failed,
}

/// The nominated pair a component sends data over
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedPair {
    pub pair: PairId,
    pub priority: u64,
    pub local: Candidate,
    pub remote: Candidate,
}

#[derive(Debug)]
pub struct Component {
    pub id: usize,
    state: ComponentState,
    default_candidate: Option<Candidate>,
    selected: Option<SelectedPair>,
}

impl Component {
    pub(crate) fn new(id: usize) -> Self {
        Self {
            id,
            state: ComponentState::New,
            default_candidate: None,
            selected: None,
        }
    }

    /// Retrieve the current state of a `Component`
    ///
    /// # Examples
    ///
    /// The initial state is `ComponentState::New`
    ///
    /// ```
    /// # use librice_conncheck::component::ComponentState;
    /// # use librice_conncheck::conncheck::Credentials;
    /// # use librice_conncheck::session::Session;
    /// let mut session = Session::builder().build();
    /// let stream = session.add_stream(
    ///     Credentials::new("luser", "lpass"),
    ///     Credentials::new("ruser", "rpass"),
    /// );
    /// let component = session.stream_mut(stream).unwrap().add_component(1);
    /// assert_eq!(component.state(), ComponentState::New);
    /// ```
    pub fn state(&self) -> ComponentState {
        self.state
    }

    #[tracing::instrument(
        name = "set_component_state",
        level = "debug",
        skip(self, state),
        fields(component.id = self.id)
    )]
    pub(crate) fn set_state(&mut self, state: ComponentState) -> bool {
        if self.state != state {
            debug!(old_state = ?self.state, new_state = ?state, "setting");
            self.state = state;
            true
        } else {
            false
        }
    }

    pub fn selected_pair(&self) -> Option<&SelectedPair> {
        self.selected.as_ref()
    }

    /// The candidate advertised as default for this component
    pub fn default_candidate(&self) -> Option<&Candidate> {
        self.default_candidate.as_ref()
    }

    // RFC 8445 5.1.4: prefer relayed, then server reflexive, then host
    pub(crate) fn consider_default_candidate(&mut self, candidate: &Candidate) {
        fn rank(ctype: CandidateType) -> u8 {
            match ctype {
                CandidateType::Relayed => 3,
                CandidateType::ServerReflexive => 2,
                CandidateType::Host => 1,
                CandidateType::PeerReflexive => 0,
            }
        }
        let candidate_rank = rank(candidate.candidate_type);
        if candidate_rank == 0 {
            return;
        }
        let replace = match &self.default_candidate {
            None => true,
            Some(current) => rank(current.candidate_type) < candidate_rank,
        };
        if replace {
            self.default_candidate = Some(candidate.clone());
        }
    }

    /// Adopt `pair` as the selected pair when it has a strictly higher priority
    /// than the current selection.  Returns whether the selection changed.
    #[tracing::instrument(
        level = "debug",
        skip(self, pair),
        fields(component.id = self.id, pair.id = %pair.id())
    )]
    pub(crate) fn set_selected_if_higher_priority(&mut self, pair: &CandidatePair) -> bool {
        if let Some(selected) = &self.selected {
            if selected.priority >= pair.priority() {
                trace!(
                    current = selected.priority,
                    candidate = pair.priority(),
                    "keeping selected pair"
                );
                return false;
            }
        }
        info!(
            "selected pair {} -> {}",
            pair.local().address,
            pair.remote().address
        );
        self.selected = Some(SelectedPair {
            pair: pair.id(),
            priority: pair.priority(),
            local: pair.local().clone(),
            remote: pair.remote().clone(),
        });
        true
    }
}
