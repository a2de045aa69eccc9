//! Playout drift control.
//!
//! The SIP decode clock and the messenger injection clock free-run
//! against each other; left alone, the playout backlog slowly walks away
//! from its target. The controller nudges it back with ±1-sample
//! consumption adjustments (≈0.2 % speed change at 10 ms ticks, below
//! audibility) and keeps a hard cap as the emergency brake when
//! something upstream goes genuinely wrong.

/// Extra frames past the target that trigger the emergency drop.
///
/// The exact figure is a tunable; what matters is that some finite cap
/// bounds latency.
pub const HARD_CAP_EXTRA_FRAMES: usize = 200;

/// What the paced consumer should do this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriftDecision {
    /// Oldest frames to drop wholesale before reading (hard cap only).
    pub hard_drop: usize,
    /// Consumption adjustment for this frame: −1, 0, or +1 samples.
    pub adjust: i32,
}

/// Integer drift accumulator ticking once per output frame.
#[derive(Debug)]
pub struct DriftController {
    target: usize,
    acc: i64,
}

impl DriftController {
    pub fn new(target_frames: usize) -> Self {
        Self {
            target: target_frames.max(1),
            acc: 0,
        }
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn acc(&self) -> i64 {
        self.acc
    }

    /// Evaluate the backlog for this tick.
    ///
    /// The hard cap empties the backlog down to the target and resets the
    /// accumulator; after such a drop the backlog equals the target, so
    /// the same tick applies no fine adjustment. Otherwise half of the
    /// backlog error accumulates (with a ±2 hysteresis band against
    /// flapping) and drains at one sample per tick.
    pub fn tick(&mut self, backlog_frames: usize) -> DriftDecision {
        if backlog_frames > self.target + HARD_CAP_EXTRA_FRAMES {
            self.acc = 0;
            return DriftDecision {
                hard_drop: backlog_frames - self.target,
                adjust: 0,
            };
        }

        let err = backlog_frames as i64 - self.target as i64;
        if err >= 2 || err <= -2 {
            self.acc += err / 2;
        }

        let adjust = if self.acc > 0 {
            self.acc -= 1;
            1
        } else if self.acc < 0 {
            self.acc += 1;
            -1
        } else {
            0
        };

        DriftDecision { hard_drop: 0, adjust }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_target_backlog_needs_no_adjustment() {
        let mut drift = DriftController::new(10);
        for backlog in [10, 11, 9, 10] {
            let d = drift.tick(backlog);
            assert_eq!(d.adjust, 0, "backlog {backlog} inside hysteresis band");
            assert_eq!(d.hard_drop, 0);
        }
        assert_eq!(drift.acc(), 0);
    }

    #[test]
    fn surplus_backlog_yields_positive_adjusts() {
        let mut drift = DriftController::new(10);
        let d = drift.tick(16);
        // err 6 accumulates 3, one drains immediately.
        assert_eq!(d.adjust, 1);
        assert_eq!(drift.acc(), 2);
        assert_eq!(drift.tick(10).adjust, 1);
        assert_eq!(drift.tick(10).adjust, 1);
        assert_eq!(drift.tick(10).adjust, 0);
    }

    #[test]
    fn deficit_backlog_yields_negative_adjusts() {
        let mut drift = DriftController::new(10);
        let d = drift.tick(4);
        assert_eq!(d.adjust, -1);
        assert_eq!(drift.acc(), -2);
    }

    #[test]
    fn adjust_is_always_bounded() {
        let mut drift = DriftController::new(10);
        for backlog in [0, 5, 50, 150, 210, 10, 0, 200] {
            let d = drift.tick(backlog);
            assert!(d.adjust.abs() <= 1);
        }
    }

    #[test]
    fn hard_cap_drops_to_target_and_resets() {
        let mut drift = DriftController::new(10);
        drift.tick(50); // build up some accumulator first
        let d = drift.tick(10 + HARD_CAP_EXTRA_FRAMES + 90);
        assert_eq!(d.hard_drop, HARD_CAP_EXTRA_FRAMES + 90);
        assert_eq!(d.adjust, 0);
        assert_eq!(drift.acc(), 0);
        // Next tick at target emits no adjustment.
        assert_eq!(drift.tick(10).adjust, 0);
    }

    #[test]
    fn backlog_at_cap_boundary_is_not_dropped() {
        let mut drift = DriftController::new(10);
        let d = drift.tick(10 + HARD_CAP_EXTRA_FRAMES);
        assert_eq!(d.hard_drop, 0);
        assert_eq!(d.adjust, 1);
    }
}
