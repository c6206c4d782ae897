//! Bus health watchdog
//!
//! The EW11 occasionally wedges and stops forwarding bus traffic. Any
//! decoded frame counts as proof of life; sustained silence triggers an
//! adapter reset upstream.

use std::time::{Duration, Instant};

use crate::config::WatchdogConfig;

#[derive(Debug)]
pub struct Watchdog {
    timeout: Duration,
    settle: Duration,
    last_frame: Instant,
}

impl Watchdog {
    pub fn new(config: &WatchdogConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            settle: Duration::from_secs(config.settle_secs),
            last_frame: Instant::now(),
        }
    }

    pub fn mark_traffic(&mut self, now: Instant) {
        self.last_frame = now;
    }

    pub fn silent(&self, now: Instant) -> bool {
        !self.timeout.is_zero() && now.duration_since(self.last_frame) >= self.timeout
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Grace period after a reset before traffic is expected again.
    pub fn settle(&self) -> Duration {
        self.settle
    }

    pub fn rearm(&mut self, now: Instant) {
        self.last_frame = now;
    }
}
