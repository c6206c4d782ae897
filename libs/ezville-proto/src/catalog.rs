//! Device Catalog
//!
//! Static wire knowledge for the closed set of EzVille device kinds: which
//! device-type id reports state under which opcode, and which command opcodes
//! expect which acknowledgment opcodes. Built once and injected; never
//! mutated at runtime.

use serde::{Deserialize, Serialize};

/// Closed set of device kinds on this bus family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Light,
    Thermostat,
    Plug,
    GasValve,
    Batch,
}

impl DeviceKind {
    pub const ALL: [DeviceKind; 5] = [
        DeviceKind::Light,
        DeviceKind::Thermostat,
        DeviceKind::Plug,
        DeviceKind::GasValve,
        DeviceKind::Batch,
    ];

    /// Topic segment / display name
    pub fn name(&self) -> &'static str {
        match self {
            DeviceKind::Light => "light",
            DeviceKind::Thermostat => "thermostat",
            DeviceKind::Plug => "plug",
            DeviceKind::GasValve => "gasvalve",
            DeviceKind::Batch => "batch",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        DeviceKind::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Device-type id carried in frame byte 1
    pub fn device_id(&self) -> u8 {
        match self {
            DeviceKind::Light => 0x0E,
            DeviceKind::Thermostat => 0x36,
            DeviceKind::Plug => 0x50,
            DeviceKind::GasValve => 0x12,
            DeviceKind::Batch => 0x33,
        }
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How a resolved command is confirmed on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Device echoes the command header with this opcode
    Opcode(u8),
    /// No distinct ack opcode; confirmation is the target attribute reaching
    /// the commanded value in a subsequent STATE frame
    StateChange,
    /// No confirmation at all; resolved after the first transmission
    None,
}

/// One controllable operation of a device kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    /// Attribute the command targets (`power`, `setTemp`, `away`, ...)
    pub attribute: &'static str,
    /// Command opcode in frame byte 3
    pub op: u8,
    pub ack: AckMode,
}

/// Classification of a decoded frame against the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    /// Broadcast of a device's current attribute values
    State(DeviceKind),
    /// Confirmation of a previously sent command
    Ack(DeviceKind),
    /// Valid checksum, unknown device/opcode combination
    Unrecognized,
}

/// State opcode shared by every kind on this bus
const STATE_OP: u8 = 0x81;

const LIGHT_COMMANDS: &[CommandSpec] = &[CommandSpec {
    attribute: "power",
    op: 0x41,
    ack: AckMode::Opcode(0xC1),
}];

const THERMOSTAT_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        attribute: "setTemp",
        op: 0x44,
        ack: AckMode::Opcode(0xC4),
    },
    // The wallpad sends no distinct ack for away mode; resolve on state
    CommandSpec {
        attribute: "away",
        op: 0x45,
        ack: AckMode::StateChange,
    },
];

const PLUG_COMMANDS: &[CommandSpec] = &[CommandSpec {
    attribute: "power",
    op: 0x43,
    ack: AckMode::Opcode(0xC3),
}];

// Close only; the valve cannot be reopened remotely
const GASVALVE_COMMANDS: &[CommandSpec] = &[CommandSpec {
    attribute: "power",
    op: 0x41,
    ack: AckMode::Opcode(0xC1),
}];

/// Static device table for one bus session.
#[derive(Debug, Default)]
pub struct DeviceCatalog;

impl DeviceCatalog {
    pub fn new() -> Self {
        Self
    }

    /// Kind reporting state as `(device_id, op)`, if any.
    pub fn state_kind(&self, device_id: u8, op: u8) -> Option<DeviceKind> {
        if op != STATE_OP {
            return None;
        }
        DeviceKind::ALL
            .into_iter()
            .find(|k| k.device_id() == device_id)
    }

    /// Kind acknowledging a command as `(device_id, op)`, if any.
    pub fn ack_kind(&self, device_id: u8, op: u8) -> Option<DeviceKind> {
        DeviceKind::ALL.into_iter().find(|k| {
            k.device_id() == device_id
                && self
                    .commands(*k)
                    .iter()
                    .any(|c| c.ack == AckMode::Opcode(op))
        })
    }

    /// Controllable operations of a kind. Batch panel updates are synthesized
    /// as state frames and carry no command spec here.
    pub fn commands(&self, kind: DeviceKind) -> &'static [CommandSpec] {
        match kind {
            DeviceKind::Light => LIGHT_COMMANDS,
            DeviceKind::Thermostat => THERMOSTAT_COMMANDS,
            DeviceKind::Plug => PLUG_COMMANDS,
            DeviceKind::GasValve => GASVALVE_COMMANDS,
            DeviceKind::Batch => &[],
        }
    }

    /// Command spec for a kind/attribute pair.
    pub fn command(&self, kind: DeviceKind, attribute: &str) -> Option<&'static CommandSpec> {
        self.commands(kind).iter().find(|c| c.attribute == attribute)
    }

    /// Label a validated frame as STATE, ACK or UNRECOGNIZED.
    ///
    /// A frame may interest both the state path and the correlator; the
    /// caller notifies both.
    pub fn classify(&self, device_id: u8, op: u8) -> FrameClass {
        if let Some(kind) = self.state_kind(device_id, op) {
            FrameClass::State(kind)
        } else if let Some(kind) = self.ack_kind(device_id, op) {
            FrameClass::Ack(kind)
        } else {
            FrameClass::Unrecognized
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_lookup() {
        let catalog = DeviceCatalog::new();
        assert_eq!(catalog.classify(0x0E, 0x81), FrameClass::State(DeviceKind::Light));
        assert_eq!(
            catalog.classify(0x36, 0x81),
            FrameClass::State(DeviceKind::Thermostat)
        );
        assert_eq!(catalog.classify(0x50, 0x81), FrameClass::State(DeviceKind::Plug));
        assert_eq!(
            catalog.classify(0x12, 0x81),
            FrameClass::State(DeviceKind::GasValve)
        );
        assert_eq!(catalog.classify(0x33, 0x81), FrameClass::State(DeviceKind::Batch));
    }

    #[test]
    fn ack_lookup() {
        let catalog = DeviceCatalog::new();
        assert_eq!(catalog.classify(0x0E, 0xC1), FrameClass::Ack(DeviceKind::Light));
        assert_eq!(
            catalog.classify(0x36, 0xC4),
            FrameClass::Ack(DeviceKind::Thermostat)
        );
        assert_eq!(catalog.classify(0x50, 0xC3), FrameClass::Ack(DeviceKind::Plug));
        assert_eq!(
            catalog.classify(0x12, 0xC1),
            FrameClass::Ack(DeviceKind::GasValve)
        );
    }

    #[test]
    fn unknown_is_unrecognized() {
        let catalog = DeviceCatalog::new();
        assert_eq!(catalog.classify(0x99, 0x81), FrameClass::Unrecognized);
        assert_eq!(catalog.classify(0x0E, 0x01), FrameClass::Unrecognized);
    }

    #[test]
    fn away_resolves_by_state() {
        let catalog = DeviceCatalog::new();
        let spec = catalog
            .command(DeviceKind::Thermostat, "away")
            .expect("away command");
        assert_eq!(spec.ack, AckMode::StateChange);
    }
}
