//! Bridge configuration.
//!
//! All knobs the media engine reads are set once at call start. The
//! struct deserialises from the `audio`/`jitter` sections of the bridge's
//! YAML configuration file; every field has a default so a partial file
//! works.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::AudioFormat;

const fn default_sample_rate() -> u32 {
    48000
}

const fn default_channels() -> u8 {
    1
}

const fn default_frame_ms() -> u64 {
    20
}

const fn default_jitter_min_packets() -> u16 {
    10
}

const fn default_drift_target() -> usize {
    10
}

const fn default_drift_burst() -> usize {
    2
}

const fn default_true() -> bool {
    true
}

/// Media-plane configuration for one bridge instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Messenger-side PCM sample rate.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Messenger-side channel count.
    #[serde(default = "default_channels")]
    pub channels: u8,

    /// SIP packetisation time in milliseconds.
    #[serde(default = "default_frame_ms")]
    pub frame_duration_ms: u64,

    /// Jitter buffer initial fill; 0 disables reordering entirely.
    #[serde(default = "default_jitter_min_packets")]
    pub jitter_min_packets: u16,

    /// Target playout backlog in messenger frames.
    #[serde(default = "default_drift_target")]
    pub drift_target_frames: usize,

    /// Maximum reverse-path frames dropped per tick.
    #[serde(default = "default_drift_burst")]
    pub drift_max_burst: usize,

    /// Advertise telephone-event and log incoming digits.
    #[serde(default = "default_true")]
    pub enable_dtmf: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            frame_duration_ms: default_frame_ms(),
            jitter_min_packets: default_jitter_min_packets(),
            drift_target_frames: default_drift_target(),
            drift_max_burst: default_drift_burst(),
            enable_dtmf: default_true(),
        }
    }
}

impl BridgeConfig {
    /// Parse a YAML document and validate the result.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(text)
            .map_err(|e| Error::Config(format!("failed to parse config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and parse a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("failed to read config file: {e}")))?;
        Self::from_yaml(&text)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be positive".into()));
        }
        if self.channels != 1 {
            return Err(Error::Config(format!(
                "channels must be 1 for now, got {}",
                self.channels
            )));
        }
        if self.frame_duration_ms == 0 || self.frame_duration_ms % 2 != 0 {
            return Err(Error::Config(format!(
                "frame_duration_ms must be a positive even value, got {}",
                self.frame_duration_ms
            )));
        }
        if self.drift_target_frames == 0 {
            return Err(Error::Config("drift_target_frames must be at least 1".into()));
        }
        if self.drift_max_burst == 0 {
            return Err(Error::Config("drift_max_burst must be at least 1".into()));
        }
        Ok(())
    }

    /// SIP-side packetisation time.
    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.frame_duration_ms)
    }

    /// Messenger injection format: same rate and channels, frames at half
    /// the SIP ptime (external audio injection is most stable in 10 ms
    /// blocks).
    pub fn messenger_format(&self) -> AudioFormat {
        AudioFormat::new(
            self.sample_rate,
            self.channels,
            self.frame_duration() / 2,
        )
    }
}
