// Copyright (C) 2020 Matthew Waters <matthew@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use futures_timer::Delay;
use once_cell::sync::Lazy;

/// The time source the agent loop waits on
#[async_trait]
pub trait Clock: std::fmt::Debug + std::marker::Send + std::marker::Sync {
    fn now(&self) -> Instant;
    /// Resolves once `instant` has been reached
    async fn delay_until(&self, instant: Instant);
}

#[derive(Debug, Default)]
struct SystemClock {}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn delay_until(&self, instant: Instant) {
        let now = Instant::now();
        if instant > now {
            Delay::new(instant - now).await
        }
    }
}

static SYSTEM_CLOCK_INSTANCE: Lazy<Arc<dyn Clock>> = Lazy::new(|| Arc::new(SystemClock::default()));

pub fn system_clock() -> Arc<dyn Clock> {
    SYSTEM_CLOCK_INSTANCE.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_std::task;
    use std::time::Duration;

    fn init() {
        crate::tests::test_init_log();
    }

    #[test]
    fn system_clock_wait() {
        init();
        task::block_on(async move {
            let clock = system_clock();
            let start = clock.now();
            let dur = Duration::from_millis(50);
            clock.delay_until(start + dur).await;
            assert!(clock.now() >= start + dur);
        });
    }

    #[test]
    fn past_instant_returns_immediately() {
        init();
        task::block_on(async move {
            let clock = system_clock();
            let start = clock.now();
            clock.delay_until(start).await;
            assert!(clock.now() - start < Duration::from_secs(1));
        });
    }
}
