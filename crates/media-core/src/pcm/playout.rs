//! Fixed-frame PCM playout buffer with sub-sample drift adjustment.
//!
//! Decouples bursty decode output from the paced messenger injection. The
//! consumer always receives frames of exactly `frame_size` bytes; drift
//! correction changes how much is *consumed* per frame (±1 PCM16 sample)
//! rather than dropping whole frames, so corrections stay inaudible.

use std::sync::{Mutex, MutexGuard};

use tracing::warn;

/// Byte search window around the frame midpoint for the cut-point scan.
const CUT_WINDOW: usize = 80;

/// Score bonus applied when the candidate sits on a zero crossing.
const ZERO_CROSSING_BONUS: i32 = -2000;

fn lock_ignore_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read_s16(buf: &[u8], off: usize) -> i16 {
    i16::from_le_bytes([buf[off], buf[off + 1]])
}

fn write_s16(buf: &mut [u8], off: usize, value: i16) {
    buf[off..off + 2].copy_from_slice(&value.to_le_bytes());
}

/// Choose a sample-aligned byte offset in `[min_off, max_off]` where
/// removing or inserting one sample is least audible. The score prefers
/// low energy, small discontinuity, and zero crossings around the
/// candidate sample.
fn find_best_cut(buf: &[u8], min_off: isize, max_off: isize) -> usize {
    let min_off = min_off.max(2) as usize;
    let max_off = if buf.len() < 4 {
        0
    } else {
        (max_off.max(0) as usize).min(buf.len() - 4)
    };
    let min_off = min_off / 2 * 2;
    let max_off = max_off / 2 * 2;
    if max_off < min_off {
        return buf.len() / 2 / 2 * 2;
    }

    let mut best_off = min_off;
    let mut best_score = i32::MAX;
    let mut off = min_off;
    while off <= max_off {
        let a = read_s16(buf, off - 2) as i32;
        let b = read_s16(buf, off) as i32;
        let c = read_s16(buf, off + 2) as i32;

        let energy = a.abs() + b.abs() + c.abs();
        let discontinuity = (b - a).abs() + (c - b).abs();
        let crossing = if (a ^ b) < 0 || (b ^ c) < 0 {
            ZERO_CROSSING_BONUS
        } else {
            0
        };

        let score = energy + discontinuity + crossing;
        if score < best_score {
            best_score = score;
            best_off = off;
        }
        off += 2;
    }
    best_off
}

/// Mutex-protected byte FIFO of fixed-size PCM16 frames.
///
/// Single producer (the decode sink), single consumer (the paced
/// injector). Critical sections are short, constant-time copies; the lock
/// is never held across an await point.
#[derive(Debug)]
pub struct PlayoutBuffer {
    frame_size: usize,
    buf: Mutex<Vec<u8>>,
}

impl PlayoutBuffer {
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            // Headroom for a typical backlog; grows if needed.
            buf: Mutex::new(Vec::with_capacity(frame_size * 50)),
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Whole frames currently buffered.
    pub fn len_frames(&self) -> usize {
        lock_ignore_poison(&self.buf).len() / self.frame_size
    }

    /// Append exactly one frame. A frame of the wrong size is an
    /// invariant violation: it is logged and dropped, never spliced in.
    pub fn write_frame(&self, frame: &[u8]) -> bool {
        if frame.len() != self.frame_size {
            warn!(
                got = frame.len(),
                expected = self.frame_size,
                "dropping playout frame of wrong size"
            );
            return false;
        }
        lock_ignore_poison(&self.buf).extend_from_slice(frame);
        true
    }

    /// Drop up to `n` oldest frames; returns how many went.
    pub fn drop_frames(&self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        let mut buf = lock_ignore_poison(&self.buf);
        let available = buf.len() / self.frame_size;
        let n = n.min(available);
        if n > 0 {
            buf.drain(..n * self.frame_size);
        }
        n
    }

    /// Copy one frame into `dst` without drift adjustment.
    pub fn read_into(&self, dst: &mut [u8]) -> bool {
        self.read_into_adjust(dst, 0)
    }

    /// Produce exactly one frame into `dst`, consuming `frame_size +
    /// 2·adjust` bytes from the FIFO.
    ///
    /// * `adjust = +1` time-compresses: one sample is dropped at the best
    ///   cut point.
    /// * `adjust = −1` time-expands: one interpolated sample is inserted.
    /// * On underflow `dst` is zero-filled and `false` returned.
    /// * An odd `frame_size` (not PCM16) degrades to an exact copy.
    pub fn read_into_adjust(&self, dst: &mut [u8], adjust: i32) -> bool {
        if dst.len() != self.frame_size {
            return false;
        }
        let adjust = adjust.clamp(-1, 1);
        let mut buf = lock_ignore_poison(&self.buf);

        if self.frame_size % 2 != 0 {
            if buf.len() < self.frame_size {
                dst.fill(0);
                return false;
            }
            dst.copy_from_slice(&buf[..self.frame_size]);
            buf.drain(..self.frame_size);
            return true;
        }

        let in_bytes = (self.frame_size as isize + adjust as isize * 2).max(0) as usize;
        if in_bytes == 0 || buf.len() < in_bytes {
            dst.fill(0);
            return false;
        }

        let src: Vec<u8> = buf.drain(..in_bytes).collect();
        drop(buf);

        let mid = self.frame_size as isize / 2;
        match adjust {
            1 => {
                // `src` is one sample long; remove the least audible one.
                let drop_at = find_best_cut(&src, mid - CUT_WINDOW as isize, mid + CUT_WINDOW as isize)
                    .min(self.frame_size);
                dst[..drop_at].copy_from_slice(&src[..drop_at]);
                dst[drop_at..].copy_from_slice(&src[drop_at + 2..]);
            }
            -1 => {
                // `src` is one sample short; splice in the mean of the two
                // samples straddling the chosen offset.
                let cut = find_best_cut(&src, mid - CUT_WINDOW as isize, mid + CUT_WINDOW as isize);
                let dup_at = (cut / 2 * 2).clamp(2, self.frame_size - 2);
                let left = read_s16(&src, dup_at - 2) as i32;
                let right_off = dup_at.min(src.len() - 2);
                let right = read_s16(&src, right_off) as i32;
                let inserted = ((left + right) / 2) as i16;

                dst[..dup_at].copy_from_slice(&src[..dup_at]);
                write_s16(dst, dup_at, inserted);
                dst[dup_at + 2..].copy_from_slice(&src[dup_at..]);
            }
            _ => {
                dst.copy_from_slice(&src[..self.frame_size]);
            }
        }
        true
    }
}
