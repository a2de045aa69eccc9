//! Codec descriptors, negotiation, and codec construction.
//!
//! The SIP collaborator parses SDP and hands the engine a structured list
//! of peer-offered codecs. Negotiation intersects that list with the
//! locally supported families and picks by priority weight, not offer
//! order: local output quality matters more than symmetry, and the offer
//! order is preserved in the SDP answer by the collaborator anyway.

use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use sipbridge_codec_core::{AudioCodec, CodecError, G711Codec, G722Codec, OpusCodec};

use crate::config::BridgeConfig;

/// First payload type used for dynamically assigned codecs.
const DYNAMIC_PT_START: u8 = 101;

/// Codec families this bridge understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecKind {
    Pcmu,
    Pcma,
    G722,
    Opus,
    /// RFC 4733 DTMF events; never carries audio.
    TelephoneEvent,
}

impl CodecKind {
    /// Selection weight; higher wins.
    pub fn priority(self) -> i32 {
        match self {
            CodecKind::Opus => 100,
            CodecKind::G722 => 80,
            CodecKind::Pcmu => 60,
            CodecKind::Pcma => 50,
            CodecKind::TelephoneEvent => 0,
        }
    }

    /// True for families that carry audio (everything but DTMF).
    pub fn is_audio(self) -> bool {
        !matches!(self, CodecKind::TelephoneEvent)
    }

    /// True when the family has a fixed payload type assignment.
    pub fn static_payload_type(self) -> Option<u8> {
        match self {
            CodecKind::Pcmu => Some(0),
            CodecKind::Pcma => Some(8),
            CodecKind::G722 => Some(9),
            _ => None,
        }
    }
}

/// One negotiated or offered codec, immutable per call.
///
/// `sample_rate` is the decoded PCM rate and `rtp_clock` the timestamp
/// unit; they differ for G.722 (16000 Hz PCM over an 8000 Hz clock), so
/// the two are carried separately everywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecDescriptor {
    pub kind: CodecKind,
    pub payload_type: u8,
    pub sample_rate: u32,
    pub rtp_clock: u32,
    pub channels: u8,
    pub frame_dur: Duration,
}

impl CodecDescriptor {
    pub fn pcmu(frame_dur: Duration) -> Self {
        Self {
            kind: CodecKind::Pcmu,
            payload_type: 0,
            sample_rate: 8000,
            rtp_clock: 8000,
            channels: 1,
            frame_dur,
        }
    }

    pub fn pcma(frame_dur: Duration) -> Self {
        Self {
            kind: CodecKind::Pcma,
            payload_type: 8,
            sample_rate: 8000,
            rtp_clock: 8000,
            channels: 1,
            frame_dur,
        }
    }

    pub fn g722(frame_dur: Duration) -> Self {
        Self {
            kind: CodecKind::G722,
            payload_type: 9,
            sample_rate: 16000,
            rtp_clock: 8000,
            channels: 1,
            frame_dur,
        }
    }

    pub fn opus(payload_type: u8, channels: u8, frame_dur: Duration) -> Self {
        Self {
            kind: CodecKind::Opus,
            payload_type,
            sample_rate: 48000,
            rtp_clock: 48000,
            channels,
            frame_dur,
        }
    }

    pub fn telephone_event(payload_type: u8) -> Self {
        Self {
            kind: CodecKind::TelephoneEvent,
            payload_type,
            sample_rate: 8000,
            rtp_clock: 8000,
            channels: 1,
            frame_dur: Duration::from_millis(20),
        }
    }

    /// Samples of one frame at the decoded PCM rate (all channels).
    pub fn frame_samples(&self) -> usize {
        let micros = self.frame_dur.as_micros() as u64;
        (self.sample_rate as u64 * self.channels as u64 * micros / 1_000_000) as usize
    }

    /// RTP timestamp ticks covered by one frame.
    pub fn frame_rtp_ticks(&self) -> u32 {
        let micros = self.frame_dur.as_micros() as u64;
        (self.rtp_clock as u64 * micros / 1_000_000) as u32
    }
}

/// Negotiation failures, distinguished so signalling can answer properly.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("no common audio codec with peer")]
    NoCommonCodec,

    #[error("common codecs are DTMF-only")]
    DtmfOnly,

    #[error("unsupported channel count {channels} for {kind:?}")]
    UnsupportedChannels { kind: CodecKind, channels: u8 },
}

/// The local offer list, in the order it goes on the wire: static payload
/// types first, then dynamic assignments counting up from 101.
pub fn local_codecs(cfg: &BridgeConfig) -> Vec<CodecDescriptor> {
    let frame_dur = cfg.frame_duration();
    let mut next_dynamic = DYNAMIC_PT_START;
    let mut alloc = || {
        let pt = next_dynamic;
        next_dynamic += 1;
        pt
    };

    let mut codecs = vec![
        CodecDescriptor::pcmu(frame_dur),
        CodecDescriptor::pcma(frame_dur),
        CodecDescriptor::g722(frame_dur),
        CodecDescriptor::opus(alloc(), 1, frame_dur),
    ];
    if cfg.enable_dtmf {
        codecs.push(CodecDescriptor::telephone_event(alloc()));
    }
    codecs
}

/// Pick the codec for a call from the peer's offer.
///
/// Selection is by [`CodecKind::priority`] within the supported
/// intersection. A DTMF-only intersection gets its own error so the
/// caller can reject the call with a useful reason instead of starting
/// media on telephone-event.
pub fn select_codec(offered: &[CodecDescriptor]) -> Result<CodecDescriptor, NegotiationError> {
    let best = offered
        .iter()
        .filter(|d| d.kind.is_audio())
        .max_by_key(|d| d.kind.priority());

    let Some(best) = best else {
        if offered.iter().any(|d| d.kind == CodecKind::TelephoneEvent) {
            return Err(NegotiationError::DtmfOnly);
        }
        return Err(NegotiationError::NoCommonCodec);
    };

    let valid_channels = match best.kind {
        CodecKind::Opus => best.channels == 1 || best.channels == 2,
        _ => best.channels == 1,
    };
    if !valid_channels {
        return Err(NegotiationError::UnsupportedChannels {
            kind: best.kind,
            channels: best.channels,
        });
    }

    // Keep the peer's payload type and channel count, but normalise the
    // rates: they are a property of the family, not of the offer.
    let mut selected = match best.kind {
        CodecKind::Pcmu => CodecDescriptor::pcmu(best.frame_dur),
        CodecKind::Pcma => CodecDescriptor::pcma(best.frame_dur),
        CodecKind::G722 => CodecDescriptor::g722(best.frame_dur),
        CodecKind::Opus => CodecDescriptor::opus(best.payload_type, best.channels, best.frame_dur),
        CodecKind::TelephoneEvent => unreachable!("filtered above"),
    };
    selected.payload_type = best.payload_type;

    debug!(kind = ?selected.kind, pt = selected.payload_type, "codec selected");
    Ok(selected)
}

/// Build a codec instance for a negotiated descriptor.
///
/// Called once per chain; the decode and encode paths each own their own
/// codec state.
pub fn make_codec(desc: &CodecDescriptor) -> Result<Box<dyn AudioCodec>, CodecError> {
    match desc.kind {
        CodecKind::Pcmu => Ok(Box::new(G711Codec::mu_law()?)),
        CodecKind::Pcma => Ok(Box::new(G711Codec::a_law()?)),
        CodecKind::G722 => Ok(Box::new(G722Codec::new(desc.sample_rate, desc.channels)?)),
        CodecKind::Opus => Ok(Box::new(OpusCodec::with_frame_ms(
            desc.sample_rate,
            desc.channels,
            desc.frame_dur.as_millis() as u32,
        )?)),
        CodecKind::TelephoneEvent => Err(CodecError::InvalidPayload {
            details: "telephone-event carries no audio".into(),
        }),
    }
}
