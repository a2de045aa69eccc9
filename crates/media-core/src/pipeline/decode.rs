//! SIP → messenger decode chain.
//!
//! Linear composition: jitter buffer (optional) → silence filler → codec
//! decode → channel conversion → resample → playout buffer. One instance
//! per call, owned by the decode worker.

use std::sync::Arc;

use tracing::{debug, warn};

use sipbridge_codec_core::AudioCodec;
use sipbridge_rtp_core::RtpPacket;

use crate::codec::{self, CodecDescriptor};
use crate::error::{Error, Result};
use crate::pcm::{self, FrameAssembler, LinearResampler, PlayoutBuffer};
use crate::pipeline::jitter::{JitterBuffer, JitterConfig};
use crate::pipeline::silence::SilenceFiller;
use crate::types::AudioFormat;

/// Consecutive decode failures tolerated before the chain gives up.
const MAX_DECODE_FAILURES: u32 = 10;

/// Decoded-PCM sink: converts channel layout, resamples to the messenger
/// rate, and chops the result into playout frames.
struct PcmSink {
    in_channels: u8,
    out_channels: u8,
    resampler: LinearResampler,
    assembler: FrameAssembler,
    playout: Arc<PlayoutBuffer>,
}

impl PcmSink {
    fn new(codec_format: AudioFormat, out_format: AudioFormat, playout: Arc<PlayoutBuffer>) -> Self {
        Self {
            in_channels: codec_format.channels,
            out_channels: out_format.channels,
            resampler: LinearResampler::new(
                codec_format.sample_rate,
                out_format.sample_rate,
                out_format.channels,
            ),
            assembler: FrameAssembler::new(out_format.frame_bytes()),
            playout,
        }
    }

    fn write_samples(&mut self, samples: &[i16]) {
        let converted;
        let samples = if self.in_channels != self.out_channels {
            converted = pcm::convert_channels(samples, self.in_channels, self.out_channels);
            &converted
        } else {
            samples
        };
        let resampled = self.resampler.process(samples);
        let bytes = pcm::samples_to_bytes(&resampled);
        for frame in self.assembler.push(&bytes) {
            self.playout.write_frame(&frame);
        }
    }

    /// Write `frames` frames of silence, each `samples` codec-rate
    /// samples long, through the same conversion path as decoded audio.
    fn write_silence(&mut self, frames: usize, samples: usize) {
        let zeros = vec![0i16; samples];
        for _ in 0..frames {
            self.write_samples(&zeros);
        }
    }
}

/// The RTP-to-playout pipeline for one call.
pub struct DecodeChain {
    jitter: Option<JitterBuffer>,
    filler: SilenceFiller,
    decoder: Box<dyn AudioCodec>,
    sink: PcmSink,
    /// Codec-rate samples representing one frame of silence fill.
    silence_samples: usize,
    decode_failures: u32,
}

impl DecodeChain {
    pub fn new(
        desc: &CodecDescriptor,
        out_format: AudioFormat,
        playout: Arc<PlayoutBuffer>,
        jitter_min_packets: u16,
    ) -> Result<Self> {
        let decoder = codec::make_codec(desc)?;
        let codec_format = AudioFormat::new(desc.sample_rate, desc.channels, desc.frame_dur);

        let jitter = (jitter_min_packets > 0).then(|| {
            JitterBuffer::new(JitterConfig {
                min_depth: jitter_min_packets,
                ..JitterConfig::default()
            })
        });

        let frames_per_sec = (1_000_000 / desc.frame_dur.as_micros().max(1)) as u32;
        debug!(
            kind = ?desc.kind,
            rtp_clock = desc.rtp_clock,
            pcm_rate = desc.sample_rate,
            jitter = jitter.is_some(),
            "decode chain ready"
        );

        Ok(Self {
            jitter,
            filler: SilenceFiller::new(desc.rtp_clock, frames_per_sec),
            decoder,
            sink: PcmSink::new(codec_format, out_format, playout),
            silence_samples: codec_format.frame_samples(),
            decode_failures: 0,
        })
    }

    /// Silent frames inserted so far (diagnostics).
    pub fn silence_inserted(&self) -> u64 {
        self.filler.filled_frames()
    }

    /// Feed one RTP packet through the chain.
    ///
    /// The payload must be owned (copied out of any reusable read
    /// buffer); the jitter buffer holds on to it.
    pub fn handle_packet(&mut self, packet: RtpPacket) -> Result<()> {
        match &mut self.jitter {
            Some(jitter) => {
                jitter.push(packet);
            }
            None => return self.process(packet),
        }
        loop {
            let Some(next) = self.jitter.as_mut().and_then(|j| j.pop()) else {
                return Ok(());
            };
            self.process(next)?;
        }
    }

    fn process(&mut self, packet: RtpPacket) -> Result<()> {
        let missing = self
            .filler
            .observe(packet.header.sequence_number, packet.header.timestamp);
        if missing > 0 {
            debug!(missing, "filling DTX gap with silence");
            self.sink.write_silence(missing, self.silence_samples);
        }

        match self.decoder.decode(&packet.payload) {
            Ok(samples) => {
                self.decode_failures = 0;
                self.sink.write_samples(&samples);
                Ok(())
            }
            Err(e) => {
                // One bad payload is survivable; a run of them means the
                // stream and our codec state no longer agree.
                self.decode_failures += 1;
                if self.decode_failures >= MAX_DECODE_FAILURES {
                    return Err(Error::Codec(e));
                }
                warn!(error = %e, failures = self.decode_failures, "packet decode failed, skipping");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use sipbridge_rtp_core::RtpHeader;
    use std::time::Duration;

    fn out_format() -> AudioFormat {
        AudioFormat::new(48000, 1, Duration::from_millis(10))
    }

    fn pcmu_packet(seq: u16, ts: u32) -> RtpPacket {
        // 0xff is µ-law silence.
        RtpPacket::new(RtpHeader::new(0, seq, ts, 1), Bytes::from(vec![0xffu8; 160]))
    }

    fn chain(playout: Arc<PlayoutBuffer>, jitter_min: u16) -> DecodeChain {
        let desc = CodecDescriptor::pcmu(Duration::from_millis(20));
        DecodeChain::new(&desc, out_format(), playout, jitter_min).unwrap()
    }

    #[test]
    fn one_packet_yields_two_messenger_frames() {
        let playout = Arc::new(PlayoutBuffer::new(out_format().frame_bytes()));
        let mut chain = chain(playout.clone(), 0);
        chain.handle_packet(pcmu_packet(1, 160)).unwrap();
        // 20 ms of decoded audio = two 10 ms playout frames at 48 kHz.
        assert_eq!(playout.len_frames(), 2);
    }

    #[test]
    fn dtx_gap_writes_silence_before_audio() {
        let playout = Arc::new(PlayoutBuffer::new(out_format().frame_bytes()));
        let mut chain = chain(playout.clone(), 0);
        for i in 1..=10u16 {
            chain.handle_packet(pcmu_packet(i, i as u32 * 160)).unwrap();
        }
        let before = playout.len_frames();
        // Contiguous sequence, 6-frame timestamp jump: 5 suppressed frames.
        chain
            .handle_packet(pcmu_packet(11, (10 + 6) as u32 * 160))
            .unwrap();
        assert_eq!(chain.silence_inserted(), 5);
        // 5 silence frames (10 messenger frames) + the decoded packet (2).
        assert_eq!(playout.len_frames(), before + 12);
    }

    #[test]
    fn jitter_buffer_reorders_before_decode() {
        let playout = Arc::new(PlayoutBuffer::new(out_format().frame_bytes()));
        let mut chain = chain(playout.clone(), 2);
        // Out of order, contiguous once sorted: no silence fill expected.
        chain.handle_packet(pcmu_packet(2, 320)).unwrap();
        chain.handle_packet(pcmu_packet(1, 160)).unwrap();
        chain.handle_packet(pcmu_packet(3, 480)).unwrap();
        assert_eq!(chain.silence_inserted(), 0);
        assert!(playout.len_frames() >= 4);
    }

    #[test]
    fn empty_payload_failures_eventually_terminate() {
        let playout = Arc::new(PlayoutBuffer::new(out_format().frame_bytes()));
        let mut chain = chain(playout, 0);
        let mut result = Ok(());
        for i in 0..MAX_DECODE_FAILURES as u16 {
            let bad = RtpPacket::new(RtpHeader::new(0, i + 1, 160 * (i as u32 + 1), 1), Bytes::new());
            result = chain.handle_packet(bad);
            if result.is_err() {
                break;
            }
        }
        assert!(result.is_err(), "persistent decode failure should terminate");
    }
}
