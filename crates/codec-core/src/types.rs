//! Common codec trait and metadata.

use crate::error::Result;

/// Static description of a codec instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecInfo {
    /// Canonical codec name ("PCMU", "PCMA", "G722", "opus").
    pub name: &'static str,
    /// Decoded PCM sample rate in Hz.
    pub sample_rate: u32,
    /// Interleaved channel count of the decoded PCM.
    pub channels: u8,
}

/// A stateful audio codec working on interleaved PCM16 samples.
///
/// `encode` consumes exactly one frame of samples at the codec's natural
/// rate and channel count; `decode` produces the samples of one wire
/// payload. Implementations keep per-call state (predictors, analysis
/// windows) and are reset between calls, never shared across them.
pub trait AudioCodec: Send {
    /// Encode one PCM frame into its wire payload.
    fn encode(&mut self, samples: &[i16]) -> Result<Vec<u8>>;

    /// Decode one wire payload into PCM samples.
    fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>>;

    /// Codec metadata.
    fn info(&self) -> CodecInfo;

    /// Drop all codec state, as after construction.
    fn reset(&mut self);
}
