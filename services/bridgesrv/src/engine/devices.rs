//! Per-kind payload decoding and command synthesis
//!
//! STATE payloads carry their own cardinality (light count, room count, plug
//! count), so instances are derived from the frames themselves rather than
//! configured. Command frames are built bit-exact to what the wallpad
//! expects; the checksum trailer is appended last.

use bytes::{BufMut, BytesMut};
use ezville_proto::{checksum, AckMode, CommandSpec, DeviceCatalog, DeviceKind, Frame, FRAME_MARKER};
use std::fmt;

use crate::error::{BridgeError, Result};
use crate::mqtt::CommandRequest;

/// One addressable device instance on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceKey {
    pub kind: DeviceKind,
    pub group: u8,
    pub sub: u8,
}

impl DeviceKey {
    pub fn new(kind: DeviceKind, group: u8, sub: u8) -> Self {
        Self { kind, group, sub }
    }
}

impl fmt::Display for DeviceKey {
    /// Topic segment form, e.g. `light_01_02`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{:02}_{:02}", self.kind, self.group, self.sub)
    }
}

/// One attribute value extracted from a STATE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeUpdate {
    pub key: DeviceKey,
    pub attribute: &'static str,
    pub value: String,
}

impl AttributeUpdate {
    fn new(key: DeviceKey, attribute: &'static str, value: String) -> Self {
        Self {
            key,
            attribute,
            value,
        }
    }
}

/// Everything a STATE frame tells us.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct StateReport {
    /// Device instances implied by the frame's cardinality fields
    pub instances: Vec<DeviceKey>,
    pub updates: Vec<AttributeUpdate>,
}

/// How the bus confirms an outbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckTarget {
    /// Expected ack frame header: command bytes 0..4 with the ack opcode
    Signature([u8; 4]),
    /// Confirmed once this attribute reaches this value in a STATE frame
    State {
        key: DeviceKey,
        attribute: &'static str,
        value: String,
    },
    /// Fire-and-forget
    None,
}

/// A fully built command ready for the correlator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundCommand {
    pub key: DeviceKey,
    pub attribute: String,
    /// Complete frame, checksum trailer included
    pub frame: Vec<u8>,
    pub ack: AckTarget,
}

fn onoff(on: bool) -> String {
    if on { "ON" } else { "OFF" }.to_string()
}

fn invalid(kind: DeviceKind, detail: &str) -> BridgeError {
    BridgeError::Frame(ezville_proto::ProtoError::InvalidPayload(format!(
        "{}: {}",
        kind, detail
    )))
}

/// Decode a STATE frame into instances and attribute values.
pub fn decode_state(kind: DeviceKind, frame: &Frame) -> Result<StateReport> {
    let payload = frame.payload();
    let mut report = StateReport::default();
    match kind {
        DeviceKind::Light => {
            // payload[0] is a status byte; lights follow, one byte each
            let room = frame.sub_id();
            if payload.is_empty() {
                return Err(invalid(kind, "empty payload"));
            }
            for i in 1..payload.len() {
                let key = DeviceKey::new(kind, room, i as u8);
                report.instances.push(key);
                report
                    .updates
                    .push(AttributeUpdate::new(key, "power", onoff(payload[i] != 0)));
            }
        }
        DeviceKind::Thermostat => {
            if payload.len() < 7 {
                return Err(invalid(kind, "payload too short"));
            }
            let rooms = (payload.len() - 5) / 2;
            if rooms > 5 {
                // the bitmaps only cover five rooms
                return Err(invalid(kind, "implausible room count"));
            }
            let power_bits = payload[1] & 0x1F;
            let away_bits = payload[2] & 0x1F;
            for rid in 1..=rooms {
                let key = DeviceKey::new(kind, rid as u8, 1);
                report.instances.push(key);
                let bit = rooms - rid;
                report.updates.push(AttributeUpdate::new(
                    key,
                    "power",
                    onoff((power_bits >> bit) & 1 == 1),
                ));
                report.updates.push(AttributeUpdate::new(
                    key,
                    "away",
                    onoff((away_bits >> bit) & 1 == 1),
                ));
                report.updates.push(AttributeUpdate::new(
                    key,
                    "setTemp",
                    payload[3 + 2 * rid].to_string(),
                ));
                report.updates.push(AttributeUpdate::new(
                    key,
                    "curTemp",
                    payload[4 + 2 * rid].to_string(),
                ));
            }
        }
        DeviceKind::Plug => {
            let room = frame.sub_id();
            if payload.is_empty() {
                return Err(invalid(kind, "empty payload"));
            }
            let count = payload[0] as usize;
            if payload.len() < 1 + 3 * count {
                return Err(invalid(kind, "payload shorter than plug count implies"));
            }
            for i in 1..=count {
                let key = DeviceKey::new(kind, room, i as u8);
                report.instances.push(key);
                let state = payload[3 * i - 2];
                let draw = u16::from_be_bytes([payload[3 * i - 1], payload[3 * i]]);
                report
                    .updates
                    .push(AttributeUpdate::new(key, "power", onoff(state & 0x0F != 0)));
                report
                    .updates
                    .push(AttributeUpdate::new(key, "auto", onoff(state & 0xF0 != 0)));
                report.updates.push(AttributeUpdate::new(
                    key,
                    "current",
                    format!("{:.2}", f64::from(draw) / 100.0),
                ));
            }
        }
        DeviceKind::GasValve => {
            if payload.len() < 2 {
                return Err(invalid(kind, "payload too short"));
            }
            let key = DeviceKey::new(kind, 1, 1);
            report.instances.push(key);
            report
                .updates
                .push(AttributeUpdate::new(key, "power", onoff(payload[1] == 1)));
        }
        DeviceKind::Batch => {
            if payload.len() < 2 {
                return Err(invalid(kind, "payload too short"));
            }
            let bits = payload[1];
            let key = DeviceKey::new(kind, 1, 1);
            report.instances.push(key);
            // group relay reports inverted: the bit is set in normal operation
            report
                .updates
                .push(AttributeUpdate::new(key, "group", onoff(bits & 0x20 == 0)));
            report
                .updates
                .push(AttributeUpdate::new(key, "outing", onoff(bits & 0x40 != 0)));
        }
    }
    Ok(report)
}

/// `heat` (HA climate mode) maps to `ON`; everything else is uppercased.
pub fn normalize_value(value: &str) -> String {
    if value.eq_ignore_ascii_case("heat") {
        "ON".to_string()
    } else {
        value.to_uppercase()
    }
}

// Wallpad input bitmap for the batch panel. Distinct from the report bitmap
// the panel broadcasts in its own STATE frames.
const BATCH_BASE: u8 = 0x04; // group-normal flag, no buttons pressed
const BATCH_ELEV_DOWN: u8 = 0x20;
const BATCH_ELEV_UP: u8 = 0x10;
const BATCH_GROUP_NORMAL: u8 = 0x04;
const BATCH_OUTING: u8 = 0x02;

/// Build the wire frame and ack expectation for a control request.
pub fn build_command(catalog: &DeviceCatalog, request: &CommandRequest) -> Result<OutboundCommand> {
    // the address byte carries one nibble each; a larger id would alias
    // another device on the wire
    if request.group > 0x0F || request.sub > 0x0F {
        return Err(BridgeError::Command(format!(
            "address {}_{:02}_{:02} out of range",
            request.kind, request.group, request.sub
        )));
    }
    let key = DeviceKey::new(request.kind, request.group, request.sub);
    let value = normalize_value(&request.value);

    match request.kind {
        DeviceKind::Light => {
            let spec = command_spec(catalog, request)?;
            let frame = seal_body(request, 0x10, spec.op, &[request.sub, bool_byte(&value), 0x00]);
            Ok(outbound(key, request, frame, spec, value))
        }
        DeviceKind::Plug => {
            let spec = command_spec(catalog, request)?;
            let frame = seal_body(request, 0x10, spec.op, &[request.sub, bool_byte(&value)]);
            Ok(outbound(key, request, frame, spec, value))
        }
        DeviceKind::Thermostat => {
            let spec = command_spec(catalog, request)?;
            let byte = match request.attribute.as_str() {
                "setTemp" => {
                    let temp: f64 = request.value.trim().parse().map_err(|_| {
                        BridgeError::Command(format!(
                            "target temperature '{}' is not a number",
                            request.value
                        ))
                    })?;
                    if !(0.0..=255.0).contains(&temp) {
                        return Err(BridgeError::Command(format!(
                            "target temperature {} out of range",
                            temp
                        )));
                    }
                    temp.round() as u8
                }
                _ => bool_byte(&value),
            };
            let frame = seal_body(request, 0x10, spec.op, &[byte]);
            let value = if request.attribute == "setTemp" {
                byte.to_string()
            } else {
                value
            };
            Ok(outbound(key, request, frame, spec, value))
        }
        DeviceKind::GasValve => {
            let spec = command_spec(catalog, request)?;
            // the valve only closes remotely; reopening is manual
            if value != "OFF" {
                return Err(BridgeError::Command(
                    "gas valve only accepts OFF".to_string(),
                ));
            }
            let frame = seal_body(request, 0x00, spec.op, &[0x00]);
            Ok(outbound(key, request, frame, spec, value))
        }
        DeviceKind::Batch => {
            let mut bits = BATCH_BASE;
            match request.attribute.as_str() {
                "elevator-up" => bits |= BATCH_ELEV_UP,
                "elevator-down" => bits |= BATCH_ELEV_DOWN,
                "group" => bits &= !BATCH_GROUP_NORMAL,
                "outing" => bits |= BATCH_OUTING,
                other => {
                    return Err(BridgeError::Command(format!(
                        "batch panel has no '{}' control",
                        other
                    )));
                }
            }
            // synthesized as a STATE frame the wallpad acts on; nothing acks it
            let frame = seal_body(request, 0x00, 0x81, &[0x00, bits, 0x00]);
            Ok(OutboundCommand {
                key,
                attribute: request.attribute.clone(),
                frame,
                ack: AckTarget::None,
            })
        }
    }
}

fn command_spec(catalog: &DeviceCatalog, request: &CommandRequest) -> Result<&'static CommandSpec> {
    catalog
        .command(request.kind, &request.attribute)
        .ok_or_else(|| {
            BridgeError::Command(format!(
                "{} has no '{}' control",
                request.kind, request.attribute
            ))
        })
}

fn bool_byte(value: &str) -> u8 {
    u8::from(value == "ON")
}

fn seal_body(request: &CommandRequest, addr_high: u8, op: u8, payload: &[u8]) -> Vec<u8> {
    let mut body = BytesMut::with_capacity(5 + payload.len() + 2);
    body.put_u8(FRAME_MARKER);
    body.put_u8(request.kind.device_id());
    body.put_u8(addr_high | (request.group & 0x0F));
    body.put_u8(op);
    body.put_u8(payload.len() as u8);
    body.put_slice(payload);
    checksum::seal(body.to_vec())
}

fn outbound(
    key: DeviceKey,
    request: &CommandRequest,
    frame: Vec<u8>,
    spec: &CommandSpec,
    value: String,
) -> OutboundCommand {
    let ack = match spec.ack {
        // acks echo the command header from the 0x1g address even when the
        // command itself went out on 0x0g (gas valve)
        AckMode::Opcode(op) => AckTarget::Signature([
            FRAME_MARKER,
            request.kind.device_id(),
            0x10 | (request.group & 0x0F),
            op,
        ]),
        AckMode::StateChange => AckTarget::State {
            key,
            attribute: spec.attribute,
            value,
        },
        AckMode::None => AckTarget::None,
    };
    OutboundCommand {
        key,
        attribute: request.attribute.clone(),
        frame,
        ack,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_frame(device_id: u8, addr: u8, payload: &[u8]) -> Frame {
        let mut body = vec![FRAME_MARKER, device_id, addr, 0x81, payload.len() as u8];
        body.extend_from_slice(payload);
        Frame::parse(checksum::seal(body)).expect("valid frame")
    }

    fn request(kind: DeviceKind, group: u8, sub: u8, attribute: &str, value: &str) -> CommandRequest {
        CommandRequest {
            kind,
            group,
            sub,
            attribute: attribute.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn light_state_decodes_per_light() {
        let frame = state_frame(0x0E, 0x11, &[0x00, 0x01, 0x00, 0x02]);
        let report = decode_state(DeviceKind::Light, &frame).unwrap();
        assert_eq!(report.instances.len(), 3);
        assert_eq!(
            report.updates,
            vec![
                AttributeUpdate::new(
                    DeviceKey::new(DeviceKind::Light, 1, 1),
                    "power",
                    "ON".to_string()
                ),
                AttributeUpdate::new(
                    DeviceKey::new(DeviceKind::Light, 1, 2),
                    "power",
                    "OFF".to_string()
                ),
                AttributeUpdate::new(
                    DeviceKey::new(DeviceKind::Light, 1, 3),
                    "power",
                    "ON".to_string()
                ),
            ]
        );
    }

    #[test]
    fn thermostat_state_decodes_rooms() {
        // two rooms: power bitmap 0b10 (room 1 on), away bitmap 0b01 (room 2)
        let frame = state_frame(
            0x36,
            0x1F,
            &[0x00, 0x02, 0x01, 0x00, 0x00, 0x17, 0x16, 0x14, 0x15],
        );
        let report = decode_state(DeviceKind::Thermostat, &frame).unwrap();
        assert_eq!(report.instances.len(), 2);

        let room1 = DeviceKey::new(DeviceKind::Thermostat, 1, 1);
        let room2 = DeviceKey::new(DeviceKind::Thermostat, 2, 1);
        let get = |key: DeviceKey, attr: &str| {
            report
                .updates
                .iter()
                .find(|u| u.key == key && u.attribute == attr)
                .map(|u| u.value.clone())
                .unwrap()
        };
        assert_eq!(get(room1, "power"), "ON");
        assert_eq!(get(room2, "power"), "OFF");
        assert_eq!(get(room1, "away"), "OFF");
        assert_eq!(get(room2, "away"), "ON");
        assert_eq!(get(room1, "setTemp"), "23");
        assert_eq!(get(room1, "curTemp"), "22");
        assert_eq!(get(room2, "setTemp"), "20");
        assert_eq!(get(room2, "curTemp"), "21");
    }

    #[test]
    fn plug_state_decodes_blocks() {
        // two plugs: #1 on/manual drawing 3.45, #2 off/auto drawing 0
        let frame = state_frame(0x50, 0x11, &[0x02, 0x01, 0x01, 0x59, 0x10, 0x00, 0x00]);
        let report = decode_state(DeviceKind::Plug, &frame).unwrap();
        let plug1 = DeviceKey::new(DeviceKind::Plug, 1, 1);
        let plug2 = DeviceKey::new(DeviceKind::Plug, 1, 2);
        let get = |key: DeviceKey, attr: &str| {
            report
                .updates
                .iter()
                .find(|u| u.key == key && u.attribute == attr)
                .map(|u| u.value.clone())
                .unwrap()
        };
        assert_eq!(get(plug1, "power"), "ON");
        assert_eq!(get(plug1, "auto"), "OFF");
        assert_eq!(get(plug1, "current"), "3.45");
        assert_eq!(get(plug2, "power"), "OFF");
        assert_eq!(get(plug2, "auto"), "ON");
        assert_eq!(get(plug2, "current"), "0.00");
    }

    #[test]
    fn gasvalve_and_batch_decode() {
        let frame = state_frame(0x12, 0x11, &[0x00, 0x01]);
        let report = decode_state(DeviceKind::GasValve, &frame).unwrap();
        assert_eq!(report.updates[0].value, "ON");

        // group bit set (normal), outing bit set
        let frame = state_frame(0x33, 0x01, &[0x00, 0x60, 0x00]);
        let report = decode_state(DeviceKind::Batch, &frame).unwrap();
        let get = |attr: &str| {
            report
                .updates
                .iter()
                .find(|u| u.attribute == attr)
                .map(|u| u.value.clone())
                .unwrap()
        };
        assert_eq!(get("group"), "OFF");
        assert_eq!(get("outing"), "ON");
    }

    #[test]
    fn short_payloads_rejected() {
        let frame = state_frame(0x36, 0x1F, &[0x00, 0x02]);
        assert!(decode_state(DeviceKind::Thermostat, &frame).is_err());
        let frame = state_frame(0x50, 0x11, &[0x03, 0x01]);
        assert!(decode_state(DeviceKind::Plug, &frame).is_err());
    }

    #[test]
    fn light_command_known_vector() {
        let catalog = DeviceCatalog::new();
        let cmd = build_command(&catalog, &request(DeviceKind::Light, 1, 2, "power", "ON")).unwrap();
        assert_eq!(
            &cmd.frame[..8],
            &[0xF7, 0x0E, 0x11, 0x41, 0x03, 0x02, 0x01, 0x00]
        );
        assert_eq!(cmd.frame.len(), 10);
        assert!(ezville_proto::verify_checksum(&cmd.frame));
        assert_eq!(cmd.ack, AckTarget::Signature([0xF7, 0x0E, 0x11, 0xC1]));
    }

    #[test]
    fn plug_command_frame() {
        let catalog = DeviceCatalog::new();
        let cmd =
            build_command(&catalog, &request(DeviceKind::Plug, 1, 2, "power", "off")).unwrap();
        assert_eq!(&cmd.frame[..7], &[0xF7, 0x50, 0x11, 0x43, 0x02, 0x02, 0x00]);
        assert_eq!(cmd.ack, AckTarget::Signature([0xF7, 0x50, 0x11, 0xC3]));
    }

    #[test]
    fn thermostat_target_parses_ha_float() {
        let catalog = DeviceCatalog::new();
        let cmd = build_command(
            &catalog,
            &request(DeviceKind::Thermostat, 3, 1, "setTemp", "22.0"),
        )
        .unwrap();
        assert_eq!(&cmd.frame[..6], &[0xF7, 0x36, 0x13, 0x44, 0x01, 0x16]);
        assert_eq!(cmd.ack, AckTarget::Signature([0xF7, 0x36, 0x13, 0xC4]));

        assert!(build_command(
            &catalog,
            &request(DeviceKind::Thermostat, 3, 1, "setTemp", "warm"),
        )
        .is_err());
    }

    #[test]
    fn thermostat_away_resolves_via_state() {
        let catalog = DeviceCatalog::new();
        let cmd = build_command(
            &catalog,
            &request(DeviceKind::Thermostat, 2, 1, "away", "ON"),
        )
        .unwrap();
        assert_eq!(&cmd.frame[..6], &[0xF7, 0x36, 0x12, 0x45, 0x01, 0x01]);
        assert_eq!(
            cmd.ack,
            AckTarget::State {
                key: DeviceKey::new(DeviceKind::Thermostat, 2, 1),
                attribute: "away",
                value: "ON".to_string(),
            }
        );
    }

    #[test]
    fn gasvalve_close_only() {
        let catalog = DeviceCatalog::new();
        let cmd =
            build_command(&catalog, &request(DeviceKind::GasValve, 1, 1, "power", "OFF")).unwrap();
        // command goes out on the 0x0g address, the ack comes back on 0x1g
        assert_eq!(&cmd.frame[..6], &[0xF7, 0x12, 0x01, 0x41, 0x01, 0x00]);
        assert_eq!(cmd.ack, AckTarget::Signature([0xF7, 0x12, 0x11, 0xC1]));

        assert!(
            build_command(&catalog, &request(DeviceKind::GasValve, 1, 1, "power", "ON")).is_err()
        );
    }

    #[test]
    fn batch_buttons_build_state_frames() {
        let catalog = DeviceCatalog::new();
        let cases = [
            ("elevator-up", 0x14),
            ("elevator-down", 0x24),
            ("group", 0x00),
            ("outing", 0x06),
        ];
        for (attribute, bits) in cases {
            let cmd =
                build_command(&catalog, &request(DeviceKind::Batch, 1, 1, attribute, "PRESS"))
                    .unwrap();
            assert_eq!(
                &cmd.frame[..8],
                &[0xF7, 0x33, 0x01, 0x81, 0x03, 0x00, bits, 0x00],
                "bitmap for {}",
                attribute
            );
            assert_eq!(cmd.ack, AckTarget::None);
        }
        assert!(
            build_command(&catalog, &request(DeviceKind::Batch, 1, 1, "siren", "ON")).is_err()
        );
    }

    #[test]
    fn out_of_nibble_address_rejected() {
        let catalog = DeviceCatalog::new();
        let err =
            build_command(&catalog, &request(DeviceKind::Light, 16, 1, "power", "ON")).unwrap_err();
        assert!(matches!(err, BridgeError::Command(_)));
        assert!(
            build_command(&catalog, &request(DeviceKind::Plug, 1, 16, "power", "ON")).is_err()
        );
        // the full nibble range still builds
        assert!(
            build_command(&catalog, &request(DeviceKind::Light, 15, 15, "power", "ON")).is_ok()
        );
    }

    #[test]
    fn heat_maps_to_on() {
        assert_eq!(normalize_value("heat"), "ON");
        assert_eq!(normalize_value("on"), "ON");
        assert_eq!(normalize_value("Off"), "OFF");
    }
}
