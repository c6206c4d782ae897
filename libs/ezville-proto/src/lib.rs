//! EzVille RS485 Wire Protocol Library
//!
//! Framing and device knowledge for the EzVille wallpad bus.
//!
//! This library provides:
//! - **Checksum Codec**: XOR + additive trailer generation and verification
//! - **Frame**: immutable decoded bus frame with header accessors
//! - **Frame Decoder**: resynchronizing stream decoder with residue buffering
//! - **Device Catalog**: static device kind / opcode tables and frame classification
//!
//! No I/O happens here; the bridge service owns transports and scheduling.

pub mod catalog;
pub mod checksum;
pub mod decoder;
pub mod error;
pub mod frame;

// Re-export core types
pub use catalog::{AckMode, CommandSpec, DeviceCatalog, DeviceKind, FrameClass};
pub use checksum::{generate_checksum, verify_checksum};
pub use decoder::FrameDecoder;
pub use error::{ProtoError, Result};
pub use frame::{Frame, FRAME_MARKER, FRAME_OVERHEAD, LENGTH_OFFSET};
