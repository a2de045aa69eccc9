//! Opus codec via the `audiopus` libopus binding.
//!
//! The bridge always runs Opus in VoIP mode with a fixed frame duration
//! negotiated as the SIP ptime. Mono and stereo are both supported; the
//! RTP clock for Opus is always 48000 regardless of the coded bandwidth.

use audiopus::coder::{Decoder, Encoder};
use audiopus::{Application, Bitrate, Channels, SampleRate};
use tracing::debug;

use crate::error::{CodecError, Result};
use crate::types::{AudioCodec, CodecInfo};

/// Upper bound for one encoded Opus frame (RFC 6716 caps at 1275 bytes
/// per frame; leave slack for multi-frame packets).
const MAX_PACKET: usize = 4000;

/// Longest decodable Opus frame: 120 ms at 48 kHz, per channel.
const MAX_FRAME_SAMPLES: usize = 5760;

const DEFAULT_BITRATE: i32 = 64_000;

/// Opus codec instance (one encoder and one decoder).
pub struct OpusCodec {
    encoder: Encoder,
    decoder: Decoder,
    sample_rate: u32,
    channels: u8,
    frame_samples: usize,
}

impl OpusCodec {
    /// Create a codec for the given rate/channels with 20 ms frames.
    pub fn new(sample_rate: u32, channels: u8) -> Result<Self> {
        Self::with_frame_ms(sample_rate, channels, 20)
    }

    pub fn with_frame_ms(sample_rate: u32, channels: u8, frame_ms: u32) -> Result<Self> {
        let rate = match sample_rate {
            8000 => SampleRate::Hz8000,
            12000 => SampleRate::Hz12000,
            16000 => SampleRate::Hz16000,
            24000 => SampleRate::Hz24000,
            48000 => SampleRate::Hz48000,
            other => {
                return Err(CodecError::InvalidSampleRate {
                    rate: other,
                    supported: vec![8000, 12000, 16000, 24000, 48000],
                })
            }
        };
        let chans = match channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            other => {
                return Err(CodecError::InvalidChannelCount {
                    channels: other,
                    supported: vec![1, 2],
                })
            }
        };

        let mut encoder = Encoder::new(rate, chans, Application::Voip)
            .map_err(|e| CodecError::InitializationFailed { reason: e.to_string() })?;
        encoder
            .set_bitrate(Bitrate::BitsPerSecond(DEFAULT_BITRATE))
            .map_err(|e| CodecError::InitializationFailed { reason: e.to_string() })?;
        let decoder = Decoder::new(rate, chans)
            .map_err(|e| CodecError::InitializationFailed { reason: e.to_string() })?;

        let frame_samples = (sample_rate as usize * frame_ms as usize) / 1000;
        debug!(sample_rate, channels, frame_samples, "opus codec ready");

        Ok(Self {
            encoder,
            decoder,
            sample_rate,
            channels,
            frame_samples,
        })
    }

    /// Samples per channel in one frame.
    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }
}

impl AudioCodec for OpusCodec {
    fn encode(&mut self, samples: &[i16]) -> Result<Vec<u8>> {
        let expected = self.frame_samples * self.channels as usize;
        if samples.len() != expected {
            return Err(CodecError::InvalidFrameSize {
                expected,
                actual: samples.len(),
            });
        }
        let mut out = vec![0u8; MAX_PACKET];
        let written = self
            .encoder
            .encode(samples, &mut out)
            .map_err(|e| CodecError::EncodingFailed { reason: e.to_string() })?;
        out.truncate(written);
        Ok(out)
    }

    fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>> {
        if data.is_empty() {
            return Err(CodecError::InvalidPayload {
                details: "empty Opus payload".into(),
            });
        }
        let mut out = vec![0i16; MAX_FRAME_SAMPLES * self.channels as usize];
        let per_channel = self
            .decoder
            .decode(Some(data), &mut out, false)
            .map_err(|e| CodecError::DecodingFailed { reason: e.to_string() })?;
        out.truncate(per_channel * self.channels as usize);
        Ok(out)
    }

    fn info(&self) -> CodecInfo {
        CodecInfo {
            name: "opus",
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    fn reset(&mut self) {
        if let Ok(fresh) = Self::with_frame_ms(
            self.sample_rate,
            self.channels,
            (self.frame_samples * 1000 / self.sample_rate as usize) as u32,
        ) {
            self.encoder = fresh.encoder;
            self.decoder = fresh.decoder;
        }
    }
}
