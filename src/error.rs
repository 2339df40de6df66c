// Error types for the bridge
//
// Nothing here is fatal to the process: callers log and carry on with the
// next tick or the next command.

use crate::protocol::{Channel, CommandId, ErrorKind};

/// Failure to get a batch across the link
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no answer after {attempts} attempts: {reason}")]
    RetriesExhausted { attempts: u8, reason: String },

    #[error("link reported {0}")]
    Link(ErrorKind),

    #[error("link closed")]
    Closed,

    #[error("link message codec: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("session error: {0}")]
    Session(String),
}

impl TransportError {
    /// Error kind this failure is counted under on the host side
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::Link(kind) => *kind,
            TransportError::Codec(_) => ErrorKind::CreatePacket,
            _ => ErrorKind::TimeoutSyncPacket,
        }
    }
}

/// Packet that the router could not make sense of
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("no handler for command {command} on channel {channel}")]
    Unhandled { channel: Channel, command: CommandId },

    #[error("command {command} carried unexpected payload {found}")]
    UnexpectedPayload {
        command: CommandId,
        found: &'static str,
    },
}

/// Configuration store read/write failure
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing parameter {key}")]
    Missing { key: String },

    #[error("parameter {key} is not a {expected}")]
    Type { key: String, expected: &'static str },

    #[error("parameter {key} is invalid: {reason}")]
    Invalid { key: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("board type {found:?} is not supported (expected {expected:?})")]
    UnsupportedBoard { found: String, expected: String },

    #[error("unknown update target {0:?}")]
    UnknownTarget(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
