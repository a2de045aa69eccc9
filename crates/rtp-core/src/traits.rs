//! Transport traits implemented by the SIP collaborator.

use async_trait::async_trait;

use crate::error::Result;
use crate::packet::{RtpHeader, RtpPacket};

/// Blocking-style packet source for one media stream.
///
/// `read_rtp` writes the packet payload into `buf` and returns the parsed
/// header together with the payload length. The buffer is reused between
/// calls; callers that hand the payload to a buffering stage MUST copy it
/// first.
#[async_trait]
pub trait RtpReader: Send {
    async fn read_rtp(&mut self, buf: &mut [u8]) -> Result<(RtpHeader, usize)>;
}

/// Packet sink for one media stream. Implementations enqueue without
/// blocking on the wire.
#[async_trait]
pub trait RtpWriter: Send {
    async fn write_rtp(&mut self, packet: &RtpPacket) -> Result<()>;
}
