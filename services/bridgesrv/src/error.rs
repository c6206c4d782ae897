//! Bridge service error types
//!
//! Almost nothing here is fatal: framing noise is silently discarded by the
//! decoder, command failures are logged by the correlator, and transport or
//! MQTT errors end the current session so the outer loop can reconnect.

use thiserror::Error;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("MQTT error: {0}")]
    Mqtt(String),

    #[error("Frame error: {0}")]
    Frame(#[from] ezville_proto::ProtoError),

    #[error("Command error: {0}")]
    Command(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<figment::Error> for BridgeError {
    fn from(err: figment::Error) -> Self {
        BridgeError::Config(err.to_string())
    }
}

impl From<tokio_serial::Error> for BridgeError {
    fn from(err: tokio_serial::Error) -> Self {
        BridgeError::Transport(err.to_string())
    }
}

impl From<rumqttc::ClientError> for BridgeError {
    fn from(err: rumqttc::ClientError) -> Self {
        BridgeError::Mqtt(err.to_string())
    }
}
