//! Messenger endpoint adapter.
//!
//! Two jobs: collect the far side's playback audio into fixed 10 ms
//! frames for the encode worker, and inject paced microphone frames with
//! a synthesized capture timeline. The capture clock is anchored to the
//! monotonic clock and quantised to the frame step; deriving timestamps
//! from "frames sent so far" instead would fall behind real time on any
//! scheduler pause and get the frames dropped as late on the far side.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::pcm::FrameAssembler;
use crate::types::{AudioFormat, StreamDevice};

/// Bounded depth of the incoming (far-side audio) frame queue.
const INCOMING_QUEUE_FRAMES: usize = 20;

fn lock_ignore_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The collaborator call that transmits one injected frame.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send_external_frame(
        &self,
        chat_id: i64,
        device: StreamDevice,
        pcm: &[u8],
        capture_ts_ms: i64,
    ) -> Result<()>;
}

/// Synthesized capture timeline for injected frames.
///
/// Anchored on first use; each timestamp is the wall-clock anchor plus
/// the monotonic elapsed time quantised to whole frame steps, forced
/// strictly monotonic. Under a scheduler pause the timeline jumps by a
/// whole multiple of the step instead of drifting behind real time.
#[derive(Debug)]
pub struct CaptureClock {
    step_ms: i64,
    anchor: Option<(Instant, i64)>,
    last_ts_ms: i64,
}

impl CaptureClock {
    pub fn new(step_ms: i64) -> Self {
        Self {
            step_ms: step_ms.max(1),
            anchor: None,
            last_ts_ms: 0,
        }
    }

    /// Timestamp for a frame captured "now".
    pub fn next_ts(&mut self, now: Instant, wall_now_ms: i64) -> i64 {
        let step = self.step_ms;
        let (start, start_wall_ms) = match self.anchor {
            Some(anchor) => anchor,
            None => {
                self.anchor = Some((now, wall_now_ms));
                self.last_ts_ms = wall_now_ms - step;
                (now, wall_now_ms)
            }
        };

        let elapsed_ms = now.saturating_duration_since(start).as_millis() as i64;
        let mut ts = start_wall_ms + (elapsed_ms / step) * step;
        if ts <= self.last_ts_ms {
            ts = self.last_ts_ms + step;
        }
        self.last_ts_ms = ts;
        ts
    }
}

/// Owned by the paced injector worker; sends one frame per tick.
pub struct FrameInjector {
    chat_id: i64,
    sink: Arc<dyn FrameSink>,
    clock: CaptureClock,
    sends: u64,
}

impl FrameInjector {
    pub async fn send(&mut self, pcm: &[u8]) -> Result<()> {
        let ts = self.clock.next_ts(Instant::now(), unix_millis());
        let result = self
            .sink
            .send_external_frame(self.chat_id, StreamDevice::Microphone, pcm, ts)
            .await;
        self.sends += 1;
        // Early-call diagnostics, then a heartbeat while ramping up.
        if self.sends <= 5 || (self.sends <= 200 && self.sends % 50 == 0) {
            match &result {
                Ok(()) => debug!(count = self.sends, size = pcm.len(), ts_ms = ts, "mic frame sent"),
                Err(e) => warn!(count = self.sends, error = %e, "mic frame send failed"),
            }
        }
        result
    }
}

fn unix_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Messenger side of one call.
pub struct MessengerEndpoint {
    chat_id: i64,
    format: AudioFormat,
    assembler: Mutex<FrameAssembler>,
    frames_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    frames_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    sink: Arc<dyn FrameSink>,
}

impl MessengerEndpoint {
    /// `format` is the injection format (10 ms frames at the configured
    /// rate and channel count).
    pub fn new(chat_id: i64, format: AudioFormat, sink: Arc<dyn FrameSink>) -> Self {
        let (tx, rx) = mpsc::channel(INCOMING_QUEUE_FRAMES);
        Self {
            chat_id,
            format,
            assembler: Mutex::new(FrameAssembler::new(format.frame_bytes())),
            frames_tx: Mutex::new(Some(tx)),
            frames_rx: Mutex::new(Some(rx)),
            sink,
        }
    }

    pub fn chat_id(&self) -> i64 {
        self.chat_id
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// `on_frame` callback target: far-side playback audio in arbitrary
    /// chunk sizes. Complete frames go to the encode worker's queue,
    /// applying backpressure to the caller.
    pub async fn push_playback_bytes(&self, data: &[u8]) -> Result<()> {
        let frames = lock_ignore_poison(&self.assembler).push(data);
        if frames.is_empty() {
            return Ok(());
        }
        let Some(tx) = lock_ignore_poison(&self.frames_tx).clone() else {
            return Err(Error::ChannelClosed);
        };
        for frame in frames {
            tx.send(frame).await.map_err(|_| Error::ChannelClosed)?;
        }
        Ok(())
    }

    /// End the media stream: the encode worker observes a closed queue.
    pub fn close(&self) {
        lock_ignore_poison(&self.frames_tx).take();
    }

    /// Hand the incoming-frame queue to the encode worker. Single use.
    pub(crate) fn take_frames(&self) -> Option<mpsc::Receiver<Vec<u8>>> {
        lock_ignore_poison(&self.frames_rx).take()
    }

    /// Build the injector for the paced worker; the capture clock lives
    /// exclusively inside it.
    pub(crate) fn injector(&self) -> FrameInjector {
        FrameInjector {
            chat_id: self.chat_id,
            sink: Arc::clone(&self.sink),
            clock: CaptureClock::new(self.format.frame_dur.as_millis() as i64),
            sends: 0,
        }
    }
}
