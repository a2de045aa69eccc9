//! Outbound RTP stream sequencing.

use bytes::Bytes;
use rand::Rng;
use tracing::debug;

use crate::packet::{RtpHeader, RtpPacket};

/// Builds the packets of one outbound RTP stream.
///
/// Sequence numbers increase by one per packet; the timestamp advances by
/// the duration of each written frame measured in RTP-clock ticks, which
/// is not necessarily the PCM sample count (G.722 runs a 8000 Hz RTP clock
/// over 16000 Hz audio). The marker bit is set on the first packet of the
/// stream, per audio codec convention.
#[derive(Debug)]
pub struct RtpStreamWriter {
    payload_type: u8,
    clock_rate: u32,
    sequence: u16,
    timestamp: u32,
    ssrc: u32,
    started: bool,
}

impl RtpStreamWriter {
    /// Create a stream with random SSRC and starting offsets.
    pub fn new(payload_type: u8, clock_rate: u32) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            payload_type,
            clock_rate,
            sequence: rng.gen(),
            timestamp: rng.gen(),
            ssrc: rng.gen(),
            started: false,
        }
    }

    /// Create a stream with fixed identifiers. Test hook.
    pub fn with_state(payload_type: u8, clock_rate: u32, ssrc: u32, sequence: u16, timestamp: u32) -> Self {
        Self {
            payload_type,
            clock_rate,
            sequence,
            timestamp,
            ssrc,
            started: false,
        }
    }

    pub fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Timestamp the next packet will carry.
    pub fn next_timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Skip the stream clock forward by `ticks`.
    ///
    /// Used after a send stall so the stream does not emit frames dated in
    /// the past, which downstream jitter buffers would discard as late.
    pub fn delay(&mut self, ticks: u32) {
        if ticks == 0 {
            return;
        }
        debug!(ticks, "advancing rtp timestamp after stall");
        self.timestamp = self.timestamp.wrapping_add(ticks);
    }

    /// Build the next packet carrying `payload` covering `duration_ticks`
    /// of the RTP clock.
    pub fn next_packet(&mut self, payload: Bytes, duration_ticks: u32) -> RtpPacket {
        let mut header = RtpHeader::new(self.payload_type, self.sequence, self.timestamp, self.ssrc);
        if !self.started {
            header.marker = true;
            self.started = true;
        }
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(duration_ticks);
        RtpPacket::new(header, payload)
    }
}
