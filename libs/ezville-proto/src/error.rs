//! Protocol Error Types

use thiserror::Error;

/// Result type for ezville-proto operations
pub type Result<T> = std::result::Result<T, ProtoError>;

/// Wire protocol errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtoError {
    /// Frame shorter than the fixed header + trailer
    #[error("Frame too short: {0} bytes")]
    TooShort(usize),

    /// Length field disagrees with the actual byte count
    #[error("Length mismatch: declared {declared}, actual {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Missing leading marker byte
    #[error("Missing frame marker")]
    MissingMarker,

    /// XOR or additive checksum mismatch
    #[error("Checksum mismatch")]
    ChecksumMismatch,

    /// Payload does not decode for the claimed device kind
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}
