//! Command/ack correlator
//!
//! Strict FIFO with a single command in flight; the bus is half-duplex and
//! the wallpad answers one thing at a time. Each pending entry carries its
//! own attempt budget and next-attempt deadline; the engine polls on a short
//! tick instead of sleeping per command.

use ezville_proto::Frame;
use rand::Rng;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::Rs485Config;

use super::devices::{AckTarget, AttributeUpdate, OutboundCommand};

#[derive(Debug)]
struct PendingCommand {
    command: OutboundCommand,
    attempts_used: u32,
    next_attempt_at: Instant,
}

/// What the engine should do for the front of the queue.
#[derive(Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Transmit and keep the entry pending
    Send { frame: Vec<u8>, copies: u32 },
    /// Transmit once and consider the command done (nothing will ack it)
    SendLast {
        command: OutboundCommand,
        copies: u32,
    },
    /// Attempt budget exhausted; report the failure
    GiveUp {
        command: OutboundCommand,
        attempts: u32,
    },
}

pub struct Correlator {
    config: Rs485Config,
    queue: VecDeque<PendingCommand>,
}

impl Correlator {
    pub fn new(config: Rs485Config) -> Self {
        Self {
            config,
            queue: VecDeque::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn enqueue(&mut self, command: OutboundCommand, now: Instant) {
        debug!(
            "Queueing {} {} ({} pending)",
            command.key,
            command.attribute,
            self.queue.len()
        );
        self.queue.push_back(PendingCommand {
            command,
            attempts_used: 0,
            next_attempt_at: now,
        });
    }

    /// Advance the front of the queue if its deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Option<Dispatch> {
        let exhausted = {
            let front = self.queue.front()?;
            if now < front.next_attempt_at {
                return None;
            }
            front.attempts_used >= self.config.retry_limit
        };
        if exhausted {
            return self.queue.pop_front().map(|entry| Dispatch::GiveUp {
                command: entry.command,
                attempts: entry.attempts_used,
            });
        }

        let copies = self.config.send_count;
        let attempts_used = self.queue.front().map(|f| f.attempts_used + 1)?;
        let delay = self.attempt_delay(attempts_used);
        let front = self.queue.front_mut()?;
        front.attempts_used = attempts_used;
        front.next_attempt_at = now + delay;

        if front.command.ack == AckTarget::None {
            return self.queue.pop_front().map(|entry| Dispatch::SendLast {
                command: entry.command,
                copies,
            });
        }
        Some(Dispatch::Send {
            frame: front.command.frame.clone(),
            copies,
        })
    }

    fn attempt_delay(&self, attempts_used: u32) -> Duration {
        if attempts_used <= 1 {
            Duration::from_millis(self.config.first_delay_ms)
        } else {
            let ms = rand::thread_rng()
                .gen_range(self.config.retry_min_ms..=self.config.retry_max_ms);
            Duration::from_millis(ms)
        }
    }

    /// Resolve the in-flight command if this frame is its expected ack.
    pub fn resolve_ack(&mut self, frame: &Frame) -> Option<OutboundCommand> {
        let matched = match self.queue.front() {
            Some(entry) if entry.attempts_used > 0 => match &entry.command.ack {
                AckTarget::Signature(signature) => frame.ack_signature() == *signature,
                _ => false,
            },
            _ => false,
        };
        if matched {
            self.queue.pop_front().map(|entry| entry.command)
        } else {
            None
        }
    }

    /// Resolve the in-flight command if a decoded STATE update reached its
    /// target attribute/value (commands the wallpad never acks explicitly).
    pub fn resolve_state(&mut self, updates: &[AttributeUpdate]) -> Option<OutboundCommand> {
        let matched = match self.queue.front() {
            Some(entry) if entry.attempts_used > 0 => match &entry.command.ack {
                AckTarget::State {
                    key,
                    attribute,
                    value,
                } => updates
                    .iter()
                    .any(|u| u.key == *key && u.attribute == *attribute && u.value == *value),
                _ => false,
            },
            _ => false,
        };
        if matched {
            self.queue.pop_front().map(|entry| entry.command)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ezville_proto::{checksum, DeviceCatalog, DeviceKind};

    use crate::engine::devices::build_command;
    use crate::mqtt::CommandRequest;

    fn config() -> Rs485Config {
        Rs485Config {
            send_count: 1,
            first_delay_ms: 150,
            retry_min_ms: 200,
            retry_max_ms: 600,
            retry_limit: 3,
        }
    }

    fn light_on() -> OutboundCommand {
        build_command(
            &DeviceCatalog::new(),
            &CommandRequest {
                kind: DeviceKind::Light,
                group: 1,
                sub: 2,
                attribute: "power".to_string(),
                value: "ON".to_string(),
            },
        )
        .unwrap()
    }

    fn ack_frame() -> Frame {
        Frame::parse(checksum::seal(vec![
            0xF7, 0x0E, 0x11, 0xC1, 0x03, 0x02, 0x01, 0x00,
        ]))
        .unwrap()
    }

    #[test]
    fn ack_resolves_in_flight_command() {
        let mut correlator = Correlator::new(config());
        let now = Instant::now();
        correlator.enqueue(light_on(), now);

        match correlator.poll(now) {
            Some(Dispatch::Send { frame, copies }) => {
                assert_eq!(copies, 1);
                assert_eq!(&frame[..4], &[0xF7, 0x0E, 0x11, 0x41]);
            }
            other => panic!("expected Send, got {:?}", other),
        }

        let resolved = correlator.resolve_ack(&ack_frame()).expect("resolved");
        assert_eq!(resolved.attribute, "power");
        assert!(correlator.is_empty());
    }

    #[test]
    fn ack_before_first_transmission_is_ignored() {
        let mut correlator = Correlator::new(config());
        correlator.enqueue(light_on(), Instant::now());
        assert!(correlator.resolve_ack(&ack_frame()).is_none());
        assert_eq!(correlator.len(), 1);
    }

    #[test]
    fn mismatched_ack_is_ignored() {
        let mut correlator = Correlator::new(config());
        let now = Instant::now();
        correlator.enqueue(light_on(), now);
        correlator.poll(now);

        // plug ack, not the light's
        let other = Frame::parse(checksum::seal(vec![0xF7, 0x50, 0x11, 0xC3, 0x01, 0x00]))
            .unwrap();
        assert!(correlator.resolve_ack(&other).is_none());
        assert_eq!(correlator.len(), 1);
    }

    #[test]
    fn exhaustion_after_exact_attempt_budget() {
        let cfg = config();
        let mut correlator = Correlator::new(cfg.clone());
        let mut now = Instant::now();
        correlator.enqueue(light_on(), now);

        let mut sends = 0;
        loop {
            match correlator.poll(now) {
                Some(Dispatch::Send { .. }) => sends += 1,
                Some(Dispatch::GiveUp { attempts, .. }) => {
                    assert_eq!(attempts, cfg.retry_limit);
                    break;
                }
                Some(Dispatch::SendLast { .. }) => panic!("light commands expect an ack"),
                None => {}
            }
            now += Duration::from_millis(cfg.retry_max_ms + 1);
        }
        assert_eq!(sends, cfg.retry_limit);
        assert!(correlator.is_empty());
    }

    #[test]
    fn not_due_before_backoff_elapses() {
        let mut correlator = Correlator::new(config());
        let now = Instant::now();
        correlator.enqueue(light_on(), now);
        assert!(matches!(correlator.poll(now), Some(Dispatch::Send { .. })));
        // first retry waits at least first_delay_ms
        assert!(correlator.poll(now + Duration::from_millis(149)).is_none());
    }

    #[test]
    fn fifo_holds_second_command_until_first_resolves() {
        let mut correlator = Correlator::new(config());
        let now = Instant::now();
        correlator.enqueue(light_on(), now);
        correlator.enqueue(light_on(), now);

        assert!(matches!(correlator.poll(now), Some(Dispatch::Send { .. })));
        // second command is queued behind the first's backoff
        assert!(correlator.poll(now).is_none());

        correlator.resolve_ack(&ack_frame()).expect("resolved");
        assert!(matches!(correlator.poll(now), Some(Dispatch::Send { .. })));
    }

    #[test]
    fn fire_and_forget_resolves_on_first_send() {
        let mut correlator = Correlator::new(config());
        let command = build_command(
            &DeviceCatalog::new(),
            &CommandRequest {
                kind: DeviceKind::Batch,
                group: 1,
                sub: 1,
                attribute: "elevator-up".to_string(),
                value: "PRESS".to_string(),
            },
        )
        .unwrap();
        let now = Instant::now();
        correlator.enqueue(command, now);

        assert!(matches!(
            correlator.poll(now),
            Some(Dispatch::SendLast { .. })
        ));
        assert!(correlator.is_empty());
    }

    #[test]
    fn state_change_resolves_ackless_command() {
        let mut correlator = Correlator::new(config());
        let away = build_command(
            &DeviceCatalog::new(),
            &CommandRequest {
                kind: DeviceKind::Thermostat,
                group: 2,
                sub: 1,
                attribute: "away".to_string(),
                value: "ON".to_string(),
            },
        )
        .unwrap();
        let now = Instant::now();
        correlator.enqueue(away, now);
        correlator.poll(now);

        let target = AttributeUpdate {
            key: super::super::devices::DeviceKey::new(DeviceKind::Thermostat, 2, 1),
            attribute: "away",
            value: "ON".to_string(),
        };
        let miss = AttributeUpdate {
            value: "OFF".to_string(),
            ..target.clone()
        };
        assert!(correlator.resolve_state(&[miss]).is_none());
        assert!(correlator.resolve_state(&[target]).is_some());
        assert!(correlator.is_empty());
    }
}
