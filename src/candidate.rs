// Copyright (C) 2020 Matthew Waters <matthew@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Candidates as supplied by gathering and signalling.

use std::net::SocketAddr;

pub use crate::stun::TransportType;

/// A transport address a peer may be reachable at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub component_id: usize,
    pub candidate_type: CandidateType,
    pub transport_type: TransportType,
    pub foundation: String,
    pub priority: u32,
    pub address: SocketAddr,
    pub base_address: SocketAddr,
    pub related_address: Option<SocketAddr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateType {
    Host,
    PeerReflexive,
    ServerReflexive,
    Relayed,
}

impl std::fmt::Display for CandidateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            CandidateType::Host => "host",
            CandidateType::PeerReflexive => "prflx",
            CandidateType::ServerReflexive => "srflx",
            CandidateType::Relayed => "relay",
        })
    }
}

pub struct CandidateBuilder {
    component_id: usize,
    ctype: CandidateType,
    ttype: TransportType,
    foundation: String,
    address: SocketAddr,
    priority: Option<u32>,
    base_address: Option<SocketAddr>,
    related_address: Option<SocketAddr>,
}

impl CandidateBuilder {
    /// Builds the candidate.  Without an explicit priority, one is calculated
    /// from the type preference with a local preference of 0.
    ///
    /// # Examples
    ///
    /// ```
    /// # use librice_conncheck::candidate::*;
    /// let addr = "127.0.0.1:2345".parse().unwrap();
    /// let candidate = Candidate::builder(1, CandidateType::Host, TransportType::Udp, "0", addr)
    ///     .build();
    /// assert_eq!(candidate.priority, (126 << 24) + 256 - 1);
    /// assert_eq!(candidate.base_address, addr);
    /// ```
    pub fn build(self) -> Candidate {
        Candidate {
            component_id: self.component_id,
            candidate_type: self.ctype,
            transport_type: self.ttype,
            priority: self
                .priority
                .unwrap_or_else(|| Candidate::calculate_priority(self.ctype, 0, self.component_id)),
            foundation: self.foundation,
            base_address: self.base_address.unwrap_or(self.address),
            address: self.address,
            related_address: self.related_address,
        }
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn base_address(mut self, base_address: SocketAddr) -> Self {
        self.base_address = Some(base_address);
        self
    }

    pub fn related_address(mut self, related_address: SocketAddr) -> Self {
        self.related_address = Some(related_address);
        self
    }
}

impl std::fmt::Display for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.foundation, self.component_id, self.transport_type, self.address, self.candidate_type
        )
    }
}

impl Candidate {
    pub fn builder(
        component_id: usize,
        ctype: CandidateType,
        ttype: TransportType,
        foundation: &str,
        address: SocketAddr,
    ) -> CandidateBuilder {
        CandidateBuilder {
            component_id,
            ctype,
            ttype,
            foundation: foundation.to_owned(),
            address,
            priority: None,
            base_address: None,
            related_address: None,
        }
    }

    // RFC 8445 5.1.2.2
    fn type_preference(ctype: CandidateType) -> u32 {
        match ctype {
            CandidateType::Host => 126,
            CandidateType::PeerReflexive => 110,
            CandidateType::ServerReflexive => 100,
            CandidateType::Relayed => 0,
        }
    }

    /// RFC 8445 5.1.2.1 candidate priority
    pub fn calculate_priority(
        ctype: CandidateType,
        local_preference: u32,
        component_id: usize,
    ) -> u32 {
        (Self::type_preference(ctype) << 24) + ((local_preference & 0xffff) << 8) + 256
            - component_id as u32
    }

    /// The priority this candidate would have were it learnt as peer-reflexive.
    /// Sent in the PRIORITY attribute of every check from this candidate.
    pub fn peer_reflexive_priority(&self) -> u32 {
        let local_preference = (self.priority >> 8) & 0xffff;
        Self::calculate_priority(
            CandidateType::PeerReflexive,
            local_preference,
            self.component_id,
        )
    }

    // can this (local) candidate be paired with 'remote'
    pub(crate) fn can_pair_with(&self, remote: &Candidate) -> bool {
        let address = self.pair_prune_address();
        self.transport_type == remote.transport_type
            && self.component_id == remote.component_id
            && address.is_ipv4() == remote.address.is_ipv4()
    }

    // RFC 8445 6.1.2.4.  Pruning the Pairs
    pub(crate) fn pair_prune_address(&self) -> SocketAddr {
        match self.candidate_type {
            CandidateType::ServerReflexive => self.base_address,
            _ => self.address,
        }
    }

    /// The address checks from this candidate are sent from
    pub(crate) fn send_address(&self) -> SocketAddr {
        match self.candidate_type {
            CandidateType::Relayed => self.address,
            _ => self.base_address,
        }
    }
}

/// A pair foundation is the local foundation joined to the remote foundation
/// with a separator that cannot appear in either.
///
/// ```
/// # use librice_conncheck::candidate::pair_foundation;
/// assert_ne!(pair_foundation("12", "345"), pair_foundation("123", "45"));
/// ```
pub fn pair_foundation(local: &str, remote: &str) -> String {
    let mut ret = String::with_capacity(local.len() + remote.len() + 1);
    ret.push_str(local);
    ret.push(':');
    ret.push_str(remote);
    ret
}

// RFC 8445 5.1.2: candidate priorities lie in [1, 2^31 - 1]
const MAX_CANDIDATE_PRIORITY: u64 = (1 << 31) - 1;

/// RFC 8445 6.1.2.3 pair priority where `controlling` and `controlled` are the
/// candidate priorities from the respective agents.  Priorities outside the
/// RFC range are clamped to it.
pub fn pair_priority(controlling: u32, controlled: u32) -> u64 {
    let g = (controlling as u64).min(MAX_CANDIDATE_PRIORITY);
    let d = (controlled as u64).min(MAX_CANDIDATE_PRIORITY);
    (g.min(d) << 32) + 2 * g.max(d) + if g > d { 1 } else { 0 }
}
