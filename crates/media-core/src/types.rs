//! Basic media types shared across the engine.

use std::time::Duration;

/// PCM16 audio framing description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Interleaved channel count (1 or 2).
    pub channels: u8,
    /// Duration of one frame.
    pub frame_dur: Duration,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u8, frame_dur: Duration) -> Self {
        Self {
            sample_rate,
            channels,
            frame_dur,
        }
    }

    /// Interleaved samples in one frame.
    pub fn frame_samples(&self) -> usize {
        let rate = self.sample_rate.max(1) as u64;
        let channels = self.channels.max(1) as u64;
        let micros = self.frame_dur.as_micros() as u64;
        (rate * channels * micros / 1_000_000) as usize
    }

    /// PCM16LE bytes in one frame.
    pub fn frame_bytes(&self) -> usize {
        self.frame_samples() * 2
    }
}

/// Stream device tag for frames injected into the messenger call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDevice {
    Microphone,
    Speaker,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_math() {
        let fmt = AudioFormat::new(48000, 1, Duration::from_millis(10));
        assert_eq!(fmt.frame_samples(), 480);
        assert_eq!(fmt.frame_bytes(), 960);

        let stereo = AudioFormat::new(48000, 2, Duration::from_millis(20));
        assert_eq!(stereo.frame_samples(), 1920);
        assert_eq!(stereo.frame_bytes(), 3840);

        let telephony = AudioFormat::new(8000, 1, Duration::from_millis(20));
        assert_eq!(telephony.frame_samples(), 160);
    }
}
