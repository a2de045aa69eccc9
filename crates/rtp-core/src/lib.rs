//! RTP packet model for the sipbridge media plane.
//!
//! This crate covers the wire-level pieces the bridge needs from RFC 3550:
//! header parsing and marshalling, payload ownership via [`bytes::Bytes`],
//! and an outbound [`RtpStreamWriter`] that sequences packets for one media
//! stream (monotonic sequence numbers, timestamp advance in RTP-clock
//! ticks, catch-up after stalls).
//!
//! Socket handling stays with the SIP collaborator; it hands the bridge an
//! [`RtpReader`]/[`RtpWriter`] pair once the dialog has negotiated media.

pub mod error;
pub mod packet;
pub mod stream;
pub mod traits;

pub use error::{Error, Result};
pub use packet::{RtpHeader, RtpPacket};
pub use stream::RtpStreamWriter;
pub use traits::{RtpReader, RtpWriter};

/// RTP protocol version (RFC 3550).
pub const RTP_VERSION: u8 = 2;

/// Fixed RTP header size in bytes (without CSRC entries or extensions).
pub const RTP_HEADER_SIZE: usize = 12;

/// Read-buffer size large enough for any audio packet this bridge handles.
pub const RTP_BUF_SIZE: usize = 1500;
