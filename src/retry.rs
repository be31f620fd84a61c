// Copyright (C) 2020 Matthew Waters <matthew@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Retransmission state of a single connectivity check transaction.

use std::time::{Duration, Instant};

use crate::stun::message::Message;

/// The retransmission schedule of RFC 5389 7.2.1.  With the defaults, requests
/// are sent at 0, 0.5, 1.5, 3.5, 7.5, 15.5 and 31.5 seconds and the
/// transaction times out 8 seconds after the last one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    initial_timeout: Duration,
    max_attempts: u32,
    final_timeout_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_timeout: Duration::from_millis(500),
            max_attempts: 7,
            final_timeout_multiplier: 16,
        }
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            policy: Self::default(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// How long to wait after sending attempt number `attempt` (1-based)
    pub fn timeout_after(&self, attempt: u32) -> Duration {
        if attempt >= self.max_attempts {
            self.initial_timeout * self.final_timeout_multiplier
        } else {
            self.initial_timeout * 2u32.saturating_pow(attempt.saturating_sub(1))
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    pub fn initial_timeout(mut self, timeout: Duration) -> Self {
        self.policy.initial_timeout = timeout;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.policy.max_attempts = attempts.max(1);
        self
    }

    pub fn final_timeout_multiplier(mut self, multiplier: u32) -> Self {
        self.policy.final_timeout_multiplier = multiplier;
        self
    }

    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

/// One logical check: a transaction id that stays the same over all
/// retransmissions, the number of attempts sent so far and when the most
/// recent attempt expires.
#[derive(Debug, PartialEq, Eq)]
pub struct CheckRetry {
    transaction_id: u128,
    valid: bool,
    attempts: u32,
    max_attempts: u32,
    policy: RetryPolicy,
    deadline: Option<Instant>,
    use_candidate: bool,
}

impl CheckRetry {
    /// A fresh transaction whose id differs from every id in `avoid`
    pub(crate) fn new(policy: RetryPolicy, avoid: &[u128]) -> Self {
        let mut transaction_id = Message::generate_transaction();
        while avoid.contains(&transaction_id) {
            transaction_id = Message::generate_transaction();
        }
        Self {
            transaction_id,
            valid: true,
            attempts: 0,
            max_attempts: policy.max_attempts(),
            policy,
            deadline: None,
            use_candidate: false,
        }
    }

    pub fn transaction_id(&self) -> u128 {
        self.transaction_id
    }

    /// Whether responses for this transaction still drive the pair
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub(crate) fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Whether the requests of this transaction carried USE-CANDIDATE
    pub fn use_candidate(&self) -> bool {
        self.use_candidate
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Claim the next attempt.  `None` once the budget is used up.
    pub(crate) fn increment_retry_attempt(&mut self) -> Option<u32> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some(self.attempts)
    }

    /// Start the timer for the attempt that was just sent
    pub(crate) fn record_send(&mut self, now: Instant, use_candidate: bool) {
        self.deadline = Some(now + self.policy.timeout_after(self.attempts));
        self.use_candidate = use_candidate;
    }

    pub fn has_unsent_attempts(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// The instant the last sent attempt expires
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// A retransmission is owed: something was sent, it expired and the budget
    /// allows another attempt
    pub fn retransmit_due(&self, now: Instant) -> bool {
        self.attempts > 0
            && self.has_unsent_attempts()
            && self.deadline.map_or(false, |deadline| deadline <= now)
    }

    /// The last permitted attempt was sent and has expired
    pub fn is_timed_out(&self, now: Instant) -> bool {
        !self.has_unsent_attempts()
            && self.attempts > 0
            && self.deadline.map_or(false, |deadline| deadline <= now)
    }

    /// Stop retransmitting but keep waiting for a response to what was already
    /// sent, until the current attempt expires
    pub(crate) fn cease_retransmissions(&mut self) {
        if self.attempts > 0 {
            self.max_attempts = self.attempts;
        }
    }
}
