//! Error types shared by the codec, the state decoder and the device client.
use crate::protocol::SessionId;
use crate::transport::TransportError;

/// A caller-supplied value lies outside the bounds the device protocol accepts.
///
/// Raised before any byte is sent to the device.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Register range out of bounds: start {start}, count {count}")]
    RegisterRange { start: u16, count: usize },
    #[error("Speed {0} out of range 0..=10")]
    SpeedOutOfRange(i32),
    #[error("Temperature {0} out of range 10..=30")]
    TemperatureOutOfRange(i32),
    #[error("Invalid command payload '{0}'")]
    InvalidPayload(String),
}

/// The response frame does not have the shape the request implies.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Response too short: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },
    #[error("Odd register byte count {0}")]
    OddByteCount(u8),
    #[error("Register offset {0} missing from response")]
    MissingRegister(usize),
}

/// Represents all possible errors of a single device operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Session id mismatch: expected {expected}, got {actual}")]
    SessionMismatch {
        expected: SessionId,
        actual: SessionId,
    },

    #[error("Device reported fault #{code}")]
    DeviceFault { code: u8 },

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// The result type for device operations.
pub type Result<T> = std::result::Result<T, Error>;
