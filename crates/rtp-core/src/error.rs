//! Error types for RTP parsing and transport handoff.

use thiserror::Error;

/// Result type alias for RTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while parsing, building, or moving RTP packets.
#[derive(Error, Debug)]
pub enum Error {
    /// Buffer is too short to contain the advertised structure.
    #[error("RTP packet truncated: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },

    /// The version field is not 2.
    #[error("unsupported RTP version {0}")]
    BadVersion(u8),

    /// Padding length is inconsistent with the packet size.
    #[error("invalid RTP padding: {0} bytes claimed")]
    BadPadding(usize),

    /// The remote end closed the media path.
    #[error("RTP stream closed")]
    Eof,

    /// Transport-level failure reported by the collaborator.
    #[error("RTP transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the error means the stream ended normally rather than broke.
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::Eof)
    }
}
