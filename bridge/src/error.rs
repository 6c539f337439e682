//! Error types shared across the bridge's subsystems.

use thiserror::Error;

/// Top-level error type surfaced by the bridge's public operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("not connected to a device")]
    NotConnected,

    #[error("failed to parse device frame: {0}")]
    ParseError(#[from] crate::codec::ParseError),

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("simulator protocol error: {0}")]
    SimulatorProtocolError(String),

    #[error("fatal runtime error: {0}")]
    FatalRuntimeError(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
