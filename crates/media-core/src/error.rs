//! Error types for the media engine.

use thiserror::Error;

use crate::codec::NegotiationError;

/// Result type alias for media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the bridge and its workers.
///
/// Only configuration and terminal I/O conditions travel through this
/// type; transient conditions (read timeouts, single bad packets) are
/// handled where they occur and never reach the supervisor.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration detected before any worker starts.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Codec negotiation with the peer failed.
    #[error("codec negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),

    /// Codec construction or persistent codec failure.
    #[error(transparent)]
    Codec(#[from] sipbridge_codec_core::CodecError),

    /// RTP parse or transport failure.
    #[error(transparent)]
    Rtp(#[from] sipbridge_rtp_core::Error),

    /// The messenger side rejected an injected frame.
    #[error("messenger send failed: {0}")]
    MessengerSend(String),

    /// The messenger frame channel is gone; the call ended on that side.
    #[error("messenger media channel closed")]
    ChannelClosed,
}
