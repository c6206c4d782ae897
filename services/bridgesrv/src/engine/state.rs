//! State store, duplicate suppression and forced refresh
//!
//! The wallpad rebroadcasts state continuously; without suppression every
//! frame would become an MQTT publish. Two layers: a frame-level cache keyed
//! by the 5-byte header prefix, and a per-attribute value map. A periodic
//! refresh window bypasses both so Home Assistant reconverges even if it
//! missed earlier publishes.

use ezville_proto::Frame;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::RefreshConfig;

use super::devices::{AttributeUpdate, DeviceKey};

#[derive(Debug, Default)]
pub struct StateStore {
    values: HashMap<DeviceKey, HashMap<&'static str, String>>,
    cache: HashMap<[u8; 5], Vec<u8>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when an identical frame body was already seen for this header
    /// prefix. The cached copy is refreshed either way.
    pub fn is_duplicate_frame(&mut self, frame: &Frame) -> bool {
        match self
            .cache
            .insert(frame.header_prefix(), frame.as_bytes().to_vec())
        {
            Some(previous) => previous == frame.as_bytes(),
            None => false,
        }
    }

    /// Record the updates; returns the ones whose value changed, or all of
    /// them when `force` is set.
    pub fn apply(&mut self, updates: Vec<AttributeUpdate>, force: bool) -> Vec<AttributeUpdate> {
        updates
            .into_iter()
            .filter(|update| {
                let slot = self.values.entry(update.key).or_default();
                let changed = slot.get(update.attribute) != Some(&update.value);
                if changed {
                    slot.insert(update.attribute, update.value.clone());
                }
                changed || force
            })
            .collect()
    }

    pub fn get(&self, key: DeviceKey, attribute: &str) -> Option<&str> {
        self.values
            .get(&key)?
            .get(attribute)
            .map(String::as_str)
    }

    /// Drop everything so the next frames republish from scratch.
    pub fn forget_published(&mut self) {
        self.values.clear();
        self.cache.clear();
    }
}

/// Recurring window in which publishes are unconditional.
#[derive(Debug)]
pub struct RefreshWindow {
    period: Duration,
    duration: Duration,
    epoch: Instant,
}

impl RefreshWindow {
    pub fn new(config: &RefreshConfig) -> Self {
        Self {
            period: Duration::from_secs(config.period_secs),
            duration: Duration::from_secs(config.duration_secs),
            epoch: Instant::now(),
        }
    }

    /// Active during the last `duration` of every `period`, so the first
    /// window opens one full period after startup.
    pub fn active(&self, now: Instant) -> bool {
        if self.period.is_zero() || self.duration.is_zero() || self.duration >= self.period {
            return false;
        }
        let into_cycle = now.duration_since(self.epoch).as_millis() % self.period.as_millis();
        into_cycle >= (self.period - self.duration).as_millis()
    }
}
