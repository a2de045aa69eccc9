//! DTX gap detection.
//!
//! Silence suppression leaves a signature in the RTP stream: contiguous
//! sequence numbers with a timestamp jump of more than one frame. The
//! filler spots that signature and tells the decode chain how many silent
//! frames to synthesise before the next decoded packet. Sequence gaps are
//! packet loss, not DTX, and produce no fill.

use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

/// Largest gap filled with silence, in frames.
const MAX_GAP_FRAMES: u64 = 25;

/// Gaps beyond `MAX_GAP_FRAMES × RESET_FACTOR` are stream resets.
const RESET_FACTOR: u64 = 100;

/// Minimum spacing of "large gap" log lines.
const WARN_INTERVAL: Duration = Duration::from_secs(15);

/// Two-state tracker: uninitialised until the first packet, tracking
/// afterwards.
#[derive(Debug)]
pub struct SilenceFiller {
    /// RTP timestamp ticks per frame (detection domain).
    ticks_per_frame: u32,
    last: Option<(u16, u32)>,
    last_warn: Option<Instant>,
    filled_frames: u64,
}

impl SilenceFiller {
    /// `rtp_clock` is the RTP timestamp rate; `frames_per_sec` derives
    /// from the negotiated ptime (20 ms → 50).
    pub fn new(rtp_clock: u32, frames_per_sec: u32) -> Self {
        Self {
            ticks_per_frame: (rtp_clock / frames_per_sec.max(1)).max(1),
            last: None,
            last_warn: None,
            filled_frames: 0,
        }
    }

    /// Total silent frames requested so far.
    pub fn filled_frames(&self) -> u64 {
        self.filled_frames
    }

    /// Observe one packet's header; returns how many silent frames to
    /// write to the sink before decoding it.
    pub fn observe(&mut self, sequence: u16, timestamp: u32) -> usize {
        let prev = self.last.replace((sequence, timestamp));
        let Some((last_seq, last_ts)) = prev else {
            return 0;
        };

        if sequence != last_seq.wrapping_add(1) {
            // Sequence discontinuity: loss or reorder, the decoder's
            // problem, not DTX.
            return 0;
        }

        let expected_ts = last_ts.wrapping_add(self.ticks_per_frame);
        let ts_diff = timestamp.wrapping_sub(expected_ts);
        let missing = (ts_diff / self.ticks_per_frame) as u64;
        if missing == 0 {
            return 0;
        }

        if missing <= MAX_GAP_FRAMES {
            self.filled_frames += missing;
            return missing as usize;
        }
        if missing <= MAX_GAP_FRAMES * RESET_FACTOR {
            // Suspiciously large but not reset-sized; worth a note,
            // rate-limited against log floods.
            let now = Instant::now();
            if self.last_warn.map_or(true, |at| now - at >= WARN_INTERVAL) {
                self.last_warn = Some(now);
                info!(gap_frames = missing, "large timestamp gap ignored");
            }
        }
        // Either ignored or a stream reset; in both cases no fill.
        0
    }
}
