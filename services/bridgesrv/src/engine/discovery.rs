//! Home Assistant discovery registry
//!
//! Devices are announced from what the bus actually reports: the first STATE
//! frame naming an instance produces exactly one set of config descriptors.
//! Announcements only happen while the registry is armed (a short window
//! after startup, re-opened by an HA birth message) so steady-state traffic
//! costs one set lookup per frame.

use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::{DiscoveryConfig, MqttConfig};

use super::devices::DeviceKey;
use ezville_proto::DeviceKind;

pub struct DiscoveryRegistry {
    enabled: bool,
    node_id: String,
    discovery_prefix: String,
    state_prefix: String,
    window: Duration,
    armed_until: Instant,
    seen: HashSet<DeviceKey>,
}

impl DiscoveryRegistry {
    pub fn new(discovery: &DiscoveryConfig, mqtt: &MqttConfig) -> Self {
        let window = Duration::from_secs(discovery.duration_secs);
        Self {
            enabled: discovery.enabled,
            node_id: discovery.node_id.clone(),
            discovery_prefix: mqtt.discovery_prefix.clone(),
            state_prefix: mqtt.prefix.clone(),
            window,
            armed_until: Instant::now() + window,
            seen: HashSet::new(),
        }
    }

    pub fn armed(&self, now: Instant) -> bool {
        self.enabled && now < self.armed_until
    }

    /// Re-open the announcement window and forget past announcements, so a
    /// restarted Home Assistant sees every device again.
    pub fn rearm(&mut self, now: Instant) {
        self.armed_until = now + self.window;
        self.seen.clear();
    }

    /// Config `(topic, payload)` pairs for every instance not yet announced.
    pub fn announce(&mut self, instances: &[DeviceKey], now: Instant) -> Vec<(String, String)> {
        if !self.armed(now) {
            return Vec::new();
        }
        let mut out = Vec::new();
        for &key in instances {
            if !self.seen.insert(key) {
                continue;
            }
            debug!("Announcing {}", key);
            for (component, name, mut payload) in self.descriptors(key) {
                payload["name"] = json!(name);
                payload["uniq_id"] = json!(name);
                payload["device"] = self.device_block();
                let topic = format!(
                    "{}/{}/{}/{}/config",
                    self.discovery_prefix, component, self.node_id, name
                );
                out.push((topic, payload.to_string()));
            }
        }
        out
    }

    fn device_block(&self) -> Value {
        json!({
            "ids": [self.node_id],
            "name": self.node_id,
            "mf": "EzVille",
            "mdl": "EzVille Wallpad",
            "sw": env!("CARGO_PKG_VERSION"),
        })
    }

    fn descriptors(&self, key: DeviceKey) -> Vec<(&'static str, String, Value)> {
        let base = format!("{}/{}", self.state_prefix, key);
        let name = format!("{}_{}", self.state_prefix, key);
        match key.kind {
            DeviceKind::Light => vec![(
                "light",
                name,
                json!({
                    "~": base,
                    "opt": true,
                    "stat_t": "~/power/state",
                    "cmd_t": "~/power/command",
                }),
            )],
            DeviceKind::Thermostat => vec![(
                "climate",
                name,
                json!({
                    "~": base,
                    "mode_stat_t": "~/power/state",
                    "temp_stat_t": "~/setTemp/state",
                    "temp_cmd_t": "~/setTemp/command",
                    "curr_temp_t": "~/curTemp/state",
                    "away_mode_stat_t": "~/away/state",
                    "away_mode_cmd_t": "~/away/command",
                    "modes": ["off", "heat"],
                    "min_temp": 5,
                    "max_temp": 40,
                }),
            )],
            DeviceKind::Plug => vec![
                (
                    "switch",
                    name.clone(),
                    json!({
                        "~": base,
                        "stat_t": "~/power/state",
                        "cmd_t": "~/power/command",
                        "icon": "mdi:power-socket-eu",
                    }),
                ),
                (
                    "binary_sensor",
                    format!("{}_plug-automode_{:02}_{:02}", self.state_prefix, key.group, key.sub),
                    json!({
                        "~": base,
                        "stat_t": "~/auto/state",
                        "icon": "mdi:leaf",
                    }),
                ),
                (
                    "sensor",
                    format!("{}_powermeter", name),
                    json!({
                        "~": base,
                        "stat_t": "~/current/state",
                        "unit_of_meas": "W",
                    }),
                ),
            ],
            DeviceKind::GasValve => vec![(
                "switch",
                name,
                json!({
                    "~": base,
                    "stat_t": "~/power/state",
                    "cmd_t": "~/power/command",
                    "icon": "mdi:valve",
                }),
            )],
            DeviceKind::Batch => vec![
                (
                    "button",
                    format!("{}_batch-elevator-up_{:02}_{:02}", self.state_prefix, key.group, key.sub),
                    json!({
                        "~": base,
                        "cmd_t": "~/elevator-up/command",
                        "icon": "mdi:elevator-up",
                    }),
                ),
                (
                    "button",
                    format!("{}_batch-elevator-down_{:02}_{:02}", self.state_prefix, key.group, key.sub),
                    json!({
                        "~": base,
                        "cmd_t": "~/elevator-down/command",
                        "icon": "mdi:elevator-down",
                    }),
                ),
                (
                    "binary_sensor",
                    format!("{}_batch-groupcontrol_{:02}_{:02}", self.state_prefix, key.group, key.sub),
                    json!({
                        "~": base,
                        "stat_t": "~/group/state",
                        "icon": "mdi:lightbulb-group",
                    }),
                ),
                (
                    "binary_sensor",
                    format!("{}_batch-outing_{:02}_{:02}", self.state_prefix, key.group, key.sub),
                    json!({
                        "~": base,
                        "stat_t": "~/outing/state",
                        "icon": "mdi:home-circle",
                    }),
                ),
            ],
        }
    }
}
