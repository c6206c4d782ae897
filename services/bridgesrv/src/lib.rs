//! EzVille RS485 ↔ MQTT bridge service
//!
//! Decodes the wallpad's RS485 traffic into Home Assistant state topics and
//! turns MQTT command topics back into bus frames, with discovery, command
//! retry and a bus-health watchdog. The wire protocol itself lives in the
//! `ezville-proto` crate.

pub mod config;
pub mod engine;
pub mod error;
pub mod mqtt;
pub mod reset;
pub mod transport;

pub use error::{BridgeError, Result};
