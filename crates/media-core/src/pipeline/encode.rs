//! Messenger → SIP encode chain.
//!
//! Regroups paced 10 ms messenger frames into codec frames (one ptime),
//! converts channel layout, resamples down to the codec PCM rate,
//! encodes, and emits sequenced RTP. After a send stall the stream clock
//! is advanced so the far side never receives frames dated in the past.

use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::debug;

use sipbridge_codec_core::AudioCodec;
use sipbridge_rtp_core::{RtpStreamWriter, RtpWriter};

use crate::codec::{self, CodecDescriptor};
use crate::error::Result;
use crate::pcm::{self, LinearResampler, SampleAssembler};
use crate::types::AudioFormat;

/// One call's messenger-to-RTP pipeline.
pub struct EncodeChain {
    assembler: SampleAssembler,
    out_channels: u8,
    resampler: LinearResampler,
    encoder: Box<dyn AudioCodec>,
    stream: RtpStreamWriter,
    writer: Box<dyn RtpWriter>,
    frame_ticks: u32,
    frame_dur: Duration,
    last_write: Option<Instant>,
    frames_sent: u64,
}

impl EncodeChain {
    /// `source_format` is the messenger injection format (10 ms frames);
    /// codec frames are assembled at the negotiated ptime.
    pub fn new(
        desc: &CodecDescriptor,
        source_format: AudioFormat,
        writer: Box<dyn RtpWriter>,
    ) -> Result<Self> {
        let encoder = codec::make_codec(desc)?;
        let source_frame = AudioFormat::new(
            source_format.sample_rate,
            source_format.channels,
            desc.frame_dur,
        );
        debug!(
            kind = ?desc.kind,
            source_rate = source_format.sample_rate,
            codec_rate = desc.sample_rate,
            ticks = desc.frame_rtp_ticks(),
            "encode chain ready"
        );
        Ok(Self {
            assembler: SampleAssembler::new(source_frame.frame_samples()),
            out_channels: desc.channels,
            resampler: LinearResampler::new(source_format.sample_rate, desc.sample_rate, desc.channels),
            encoder,
            stream: RtpStreamWriter::new(desc.payload_type, desc.rtp_clock),
            writer,
            frame_ticks: desc.frame_rtp_ticks(),
            frame_dur: desc.frame_dur,
            last_write: None,
            frames_sent: 0,
        })
    }

    /// Test hook: pin the stream identity so packet fields are assertable.
    #[cfg(test)]
    fn with_stream(mut self, stream: RtpStreamWriter) -> Self {
        self.stream = stream;
        self
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Feed one messenger PCM frame (PCM16LE bytes); encodes and writes
    /// whenever a whole codec frame has accumulated.
    pub async fn push_frame(&mut self, pcm: &[u8]) -> Result<()> {
        let samples = pcm::bytes_to_samples(pcm);
        for frame in self.assembler.push(&samples) {
            self.write_encoded(&frame).await?;
        }
        Ok(())
    }

    async fn write_encoded(&mut self, frame: &[i16]) -> Result<()> {
        // Timestamp catch-up: if the wall clock ran ahead of the stream
        // clock (scheduler stall, messenger hiccup), skip the stream
        // forward instead of playing in the past.
        let now = Instant::now();
        if let Some(last) = self.last_write {
            let elapsed = now.saturating_duration_since(last);
            if elapsed > self.frame_dur * 2 {
                let skip = elapsed - self.frame_dur;
                let ticks = (skip.as_secs_f64() * self.stream.clock_rate() as f64) as u32;
                self.stream.delay(ticks);
            }
        }

        // Mono source to codec channel layout, then down to codec rate.
        let converted;
        let samples = if self.out_channels != 1 {
            converted = pcm::convert_channels(frame, 1, self.out_channels);
            &converted
        } else {
            frame
        };
        let resampled = self.resampler.process(samples);

        let payload = self.encoder.encode(&resampled)?;
        let packet = self.stream.next_packet(Bytes::from(payload), self.frame_ticks);
        self.writer.write_rtp(&packet).await?;
        self.last_write = Some(now);
        self.frames_sent += 1;
        Ok(())
    }
}
