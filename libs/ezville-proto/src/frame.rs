//! Decoded bus frame
//!
//! Wire layout (bit-exact):
//!
//! ```text
//! [0] marker 0xF7
//! [1] device-type id
//! [2] high nibble: group/room id, low nibble: sub-id
//! [3] operation code
//! [4] payload length N
//! [5..5+N] payload
//! [5+N] XOR checksum
//! [6+N] additive checksum
//! ```

use crate::checksum::verify_checksum;
use crate::error::{ProtoError, Result};

/// Leading sentinel byte of every frame
pub const FRAME_MARKER: u8 = 0xF7;

/// Offset of the payload length field within a frame
pub const LENGTH_OFFSET: usize = 4;

/// Fixed bytes around the payload: 5 header + 2 trailer
pub const FRAME_OVERHEAD: usize = 7;

/// One complete, checksum-validated unit of bus communication.
///
/// Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    /// Validate a complete candidate frame and take ownership of it.
    pub fn parse(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < FRAME_OVERHEAD {
            return Err(ProtoError::TooShort(bytes.len()));
        }
        if bytes[0] != FRAME_MARKER {
            return Err(ProtoError::MissingMarker);
        }
        let declared = bytes[LENGTH_OFFSET] as usize + FRAME_OVERHEAD;
        if declared != bytes.len() {
            return Err(ProtoError::LengthMismatch {
                declared,
                actual: bytes.len(),
            });
        }
        if !verify_checksum(&bytes) {
            return Err(ProtoError::ChecksumMismatch);
        }
        Ok(Self { bytes })
    }

    pub fn device_id(&self) -> u8 {
        self.bytes[1]
    }

    /// Group/room id (high nibble of the address byte)
    pub fn group_id(&self) -> u8 {
        self.bytes[2] >> 4
    }

    /// Sub-id (low nibble of the address byte)
    pub fn sub_id(&self) -> u8 {
        self.bytes[2] & 0x0F
    }

    pub fn op(&self) -> u8 {
        self.bytes[3]
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[5..self.bytes.len() - 2]
    }

    /// First five bytes: marker, device id, address, opcode, length.
    ///
    /// Used as the message-cache key for duplicate suppression.
    pub fn header_prefix(&self) -> [u8; 5] {
        [
            self.bytes[0],
            self.bytes[1],
            self.bytes[2],
            self.bytes[3],
            self.bytes[4],
        ]
    }

    /// First four bytes: the acknowledgment signature material.
    ///
    /// An ACK mirrors the command's marker, device id and address with a
    /// distinct opcode in byte 3.
    pub fn ack_signature(&self) -> [u8; 4] {
        [self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3]]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode_upper(&self.bytes))
    }
}
