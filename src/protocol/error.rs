//! Protocol error types.

use thiserror::Error;

/// Errors related to mesh frame and command decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid dispatch: 0x{0:02x}")]
    InvalidDispatch(u8),

    #[error("invalid command type: 0x{0:02x}")]
    InvalidCommandType(u8),

    #[error("message too short: expected at least {expected}, got {got}")]
    MessageTooShort { expected: usize, got: usize },

    #[error("message too long: max {max}, got {got}")]
    MessageTooLong { max: usize, got: usize },

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("missing tlv 0x{0:02x}")]
    MissingTlv(u8),

    #[error("malformed message: {0}")]
    Malformed(String),
}
