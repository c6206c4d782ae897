//! The bridge engine
//!
//! One task owns every mutable collection: decoder residue, state store,
//! discovery registry and the command queue. All suspension points meet in a
//! single `select!`, so there is no locking anywhere in the protocol path.
//! The engine lives for one transport session; on transport failure it is
//! discarded and rebuilt by the caller.

pub mod correlator;
pub mod devices;
pub mod discovery;
pub mod state;
pub mod watchdog;

use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use ezville_proto::{DeviceCatalog, DeviceKind, Frame, FrameClass, FrameDecoder};

use crate::config::BridgeConfig;
use crate::error::Result;
use crate::mqtt::{ControlEvent, Publisher};
use crate::reset::BusReset;
use crate::transport::BusTransport;

use correlator::{Correlator, Dispatch};
use devices::OutboundCommand;
use discovery::DiscoveryRegistry;
use state::{RefreshWindow, StateStore};
use watchdog::Watchdog;

/// Command queue and watchdog granularity
const DISPATCH_TICK: Duration = Duration::from_millis(50);

/// Runtime clock as a std `Instant`, so tests can drive it with paused time.
fn bus_now() -> Instant {
    tokio::time::Instant::now().into_std()
}

pub struct Engine<T: BusTransport, P: Publisher> {
    catalog: DeviceCatalog,
    decoder: FrameDecoder,
    store: StateStore,
    refresh: RefreshWindow,
    discovery: DiscoveryRegistry,
    correlator: Correlator,
    watchdog: Watchdog,
    reset: Option<BusReset>,
    transport: T,
    publisher: P,
    control: mpsc::Receiver<ControlEvent>,
    state_prefix: String,
    chunk_size: usize,
}

impl<T: BusTransport, P: Publisher> Engine<T, P> {
    pub fn new(
        config: &BridgeConfig,
        transport: T,
        publisher: P,
        control: mpsc::Receiver<ControlEvent>,
    ) -> Self {
        Self {
            catalog: DeviceCatalog::new(),
            decoder: FrameDecoder::new(),
            store: StateStore::new(),
            refresh: RefreshWindow::new(&config.refresh),
            discovery: DiscoveryRegistry::new(&config.discovery, &config.mqtt),
            correlator: Correlator::new(config.rs485.clone()),
            watchdog: Watchdog::new(&config.watchdog),
            reset: config.watchdog.reset.clone().map(BusReset::new),
            transport,
            publisher,
            control,
            state_prefix: config.mqtt.prefix.clone(),
            chunk_size: config.transport.chunk_size,
        }
    }

    /// Run until the transport fails or the control channel closes.
    pub async fn run(&mut self) -> Result<()> {
        let mut buf = vec![0u8; self.chunk_size];
        let mut tick = tokio::time::interval(DISPATCH_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("Bridge engine running");

        loop {
            tokio::select! {
                read = self.transport.recv(&mut buf) => {
                    let n = read?;
                    self.on_bus_bytes(&buf[..n]).await?;
                }
                event = self.control.recv() => {
                    match event {
                        Some(event) => self.on_control(event).await?,
                        None => {
                            info!("Control channel closed; stopping engine");
                            return Ok(());
                        }
                    }
                }
                _ = tick.tick() => {
                    self.on_tick().await?;
                }
            }
        }
    }

    async fn on_bus_bytes(&mut self, chunk: &[u8]) -> Result<()> {
        let frames = self.decoder.feed(chunk);
        let now = bus_now();
        for frame in frames {
            self.watchdog.mark_traffic(now);
            match self.catalog.classify(frame.device_id(), frame.op()) {
                FrameClass::State(kind) => self.on_state_frame(kind, &frame, now).await?,
                FrameClass::Ack(_) => {
                    if let Some(done) = self.correlator.resolve_ack(&frame) {
                        info!("Command {} {} confirmed", done.key, done.attribute);
                    } else {
                        debug!("Unmatched ack frame {}", frame);
                    }
                }
                FrameClass::Unrecognized => debug!("Unrecognized frame {}", frame),
            }
        }
        Ok(())
    }

    async fn on_state_frame(&mut self, kind: DeviceKind, frame: &Frame, now: Instant) -> Result<()> {
        let force = self.refresh.active(now);
        if !force && self.store.is_duplicate_frame(frame) {
            return Ok(());
        }

        let report = match devices::decode_state(kind, frame) {
            Ok(report) => report,
            Err(e) => {
                debug!("Dropping undecodable {} frame {}: {}", kind, frame, e);
                return Ok(());
            }
        };

        // the raw updates, not the deduplicated ones: an attribute that is
        // already at its commanded value still confirms the command
        if let Some(done) = self.correlator.resolve_state(&report.updates) {
            info!("Command {} {} confirmed by state", done.key, done.attribute);
        }

        for (topic, payload) in self.discovery.announce(&report.instances, now) {
            info!("Discovery: {}", topic);
            self.publisher.publish(&topic, &payload, false).await?;
        }

        for update in self.store.apply(report.updates, force) {
            let topic = format!(
                "{}/{}/{}/state",
                self.state_prefix, update.key, update.attribute
            );
            self.publisher.publish(&topic, &update.value, false).await?;
        }
        Ok(())
    }

    async fn on_control(&mut self, event: ControlEvent) -> Result<()> {
        match event {
            ControlEvent::Command(request) => {
                let command = match devices::build_command(&self.catalog, &request) {
                    Ok(command) => command,
                    Err(e) => {
                        warn!(
                            "Rejected command {}_{:02}_{:02}/{}: {}",
                            request.kind, request.group, request.sub, request.attribute, e
                        );
                        return Ok(());
                    }
                };
                if self.already_satisfied(&command, &request.value) {
                    debug!(
                        "{} {} already at requested value",
                        command.key, command.attribute
                    );
                    return Ok(());
                }
                self.correlator.enqueue(command, bus_now());
            }
            ControlEvent::DiscoveryRearm => {
                info!("Home Assistant is back; re-announcing devices");
                let now = bus_now();
                self.discovery.rearm(now);
                self.store.forget_published();
            }
        }
        Ok(())
    }

    fn already_satisfied(&self, command: &OutboundCommand, requested: &str) -> bool {
        match self.store.get(command.key, &command.attribute) {
            Some(current) => devices::normalize_value(requested) == current,
            None => false,
        }
    }

    async fn on_tick(&mut self) -> Result<()> {
        let now = bus_now();
        match self.correlator.poll(now) {
            Some(Dispatch::Send { frame, copies }) => self.transmit(&frame, copies).await?,
            Some(Dispatch::SendLast { command, copies }) => {
                self.transmit(&command.frame, copies).await?;
                debug!(
                    "Command {} {} sent; no confirmation expected",
                    command.key, command.attribute
                );
            }
            Some(Dispatch::GiveUp { command, attempts }) => {
                error!(
                    "Command {} {} failed after {} attempts",
                    command.key, command.attribute, attempts
                );
            }
            None => {}
        }

        if self.watchdog.silent(now) {
            warn!(
                "No bus traffic for {:?}; resetting bus adapter",
                self.watchdog.timeout()
            );
            match &self.reset {
                Some(reset) => match reset.trigger().await {
                    Ok(()) => tokio::time::sleep(self.watchdog.settle()).await,
                    Err(e) => warn!("Bus adapter reset failed: {}", e),
                },
                None => debug!("No reset endpoint configured"),
            }
            self.watchdog.rearm(bus_now());
        }
        Ok(())
    }

    async fn transmit(&mut self, frame: &[u8], copies: u32) -> Result<()> {
        for _ in 0..copies.max(1) {
            self.transport.send(frame).await?;
        }
        debug!("TX {}", hex::encode_upper(frame));
        Ok(())
    }
}
