//! Error handling for codec operations.

use thiserror::Error;

/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors that can occur while constructing or running a codec.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Sample rate not supported by this codec.
    #[error("invalid sample rate: {rate}Hz (supported: {supported:?})")]
    InvalidSampleRate { rate: u32, supported: Vec<u32> },

    /// Channel count not supported by this codec.
    #[error("invalid channel count: {channels} (supported: {supported:?})")]
    InvalidChannelCount { channels: u8, supported: Vec<u8> },

    /// Input frame has the wrong number of samples.
    #[error("invalid frame size: expected {expected} samples, got {actual}")]
    InvalidFrameSize { expected: usize, actual: usize },

    /// Encoding operation failed.
    #[error("encoding failed: {reason}")]
    EncodingFailed { reason: String },

    /// Decoding operation failed.
    #[error("decoding failed: {reason}")]
    DecodingFailed { reason: String },

    /// Payload data is malformed or empty.
    #[error("invalid payload: {details}")]
    InvalidPayload { details: String },

    /// Codec could not be initialised.
    #[error("codec initialisation failed: {reason}")]
    InitializationFailed { reason: String },
}
