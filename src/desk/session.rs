use std::time::Duration;

/// Convergence tuning for one desk model.
///
/// The defaults are the values tuned for the Idasen; other Linak desks can
/// construct their own profile instead of patching constants.
#[derive(Debug, Clone, Copy)]
pub struct MotionProfile {
    /// Distance from the target inside which the desk counts as arrived.
    pub arrival_threshold_mm: f64,
    /// Per-iteration movement below this counts as "not moving".
    pub stall_threshold_mm: f64,
    /// Consecutive not-moving iterations before the session is declared stalled.
    pub stall_iterations: u32,
    /// Hard ceiling on control-loop iterations (~30s at the default interval).
    pub max_iterations: u32,
    /// Pause after the wake/stop pulse before asserting the target.
    pub wake_settle: Duration,
    /// Pause between reference refreshes while the desk responds.
    pub poll_interval: Duration,
    /// Pause after the final stop before reading the resting height.
    pub stop_settle: Duration,
}

impl Default for MotionProfile {
    fn default() -> Self {
        Self {
            arrival_threshold_mm: 5.0,
            stall_threshold_mm: 1.0,
            stall_iterations: 3,
            max_iterations: 150,
            wake_settle: Duration::from_millis(100),
            poll_interval: Duration::from_millis(200),
            stop_settle: Duration::from_millis(200),
        }
    }
}

/// Verdict of the state machine for one height observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Keep refreshing the reference position.
    Moving,
    /// Within the arrival threshold of the target.
    Arrived,
    /// Height stopped changing before the target (end stop or obstruction).
    Stalled,
    /// Iteration ceiling reached without arrival or stall.
    TimedOut,
}

/// State for a single move-to-target session.
///
/// Pure transition logic, separated from the suspending I/O calls so the
/// convergence heuristic can be exercised without timing dependencies.
#[derive(Debug)]
pub struct MoveSession {
    profile: MotionProfile,
    target_mm: f64,
    last_observed_mm: f64,
    stable_iterations: u32,
    elapsed_iterations: u32,
}

impl MoveSession {
    /// Start a session toward `target_mm` from the height read before the
    /// wake pulse.
    pub fn new(profile: MotionProfile, target_mm: f64, current_mm: f64) -> Self {
        Self {
            profile,
            target_mm,
            last_observed_mm: current_mm,
            stable_iterations: 0,
            elapsed_iterations: 0,
        }
    }

    /// Feed one fresh height reading and decide whether to keep driving.
    ///
    /// Arrival wins over stall; the stall counter resets whenever the desk
    /// has moved at least the stall threshold since the previous reading,
    /// and the reference point advances on every observation.
    pub fn observe(&mut self, height_mm: f64) -> StepOutcome {
        self.elapsed_iterations += 1;

        if (height_mm - self.target_mm).abs() < self.profile.arrival_threshold_mm {
            return StepOutcome::Arrived;
        }

        if (height_mm - self.last_observed_mm).abs() < self.profile.stall_threshold_mm {
            self.stable_iterations += 1;
            if self.stable_iterations >= self.profile.stall_iterations {
                return StepOutcome::Stalled;
            }
        } else {
            self.stable_iterations = 0;
        }
        self.last_observed_mm = height_mm;

        if self.elapsed_iterations >= self.profile.max_iterations {
            return StepOutcome::TimedOut;
        }
        StepOutcome::Moving
    }

    /// Iterations consumed so far.
    pub fn elapsed_iterations(&self) -> u32 {
        self.elapsed_iterations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(target_mm: f64, current_mm: f64) -> MoveSession {
        MoveSession::new(MotionProfile::default(), target_mm, current_mm)
    }

    #[test]
    fn test_arrival_within_threshold() {
        let mut s = session(1000.0, 700.0);
        assert_eq!(s.observe(800.0), StepOutcome::Moving);
        assert_eq!(s.observe(996.0), StepOutcome::Arrived);
    }

    #[test]
    fn test_arrival_on_first_observation() {
        let mut s = session(1000.0, 700.0);
        assert_eq!(s.observe(995.5), StepOutcome::Arrived);
    }

    #[test]
    fn test_arrival_wins_over_stall() {
        let mut s = session(1000.0, 997.0);
        assert_eq!(s.observe(997.2), StepOutcome::Arrived);
    }

    #[test]
    fn test_stall_after_three_stable_readings() {
        let mut s = session(1000.0, 700.0);
        assert_eq!(s.observe(750.0), StepOutcome::Moving);
        assert_eq!(s.observe(750.4), StepOutcome::Moving);
        assert_eq!(s.observe(750.8), StepOutcome::Moving);
        assert_eq!(s.observe(751.2), StepOutcome::Stalled);
    }

    #[test]
    fn test_stall_counter_resets_on_movement() {
        let mut s = session(1000.0, 700.0);
        s.observe(750.0);
        assert_eq!(s.observe(750.2), StepOutcome::Moving);
        assert_eq!(s.observe(750.4), StepOutcome::Moving);
        assert_eq!(s.observe(760.0), StepOutcome::Moving); // moved, counter resets
        assert_eq!(s.observe(760.2), StepOutcome::Moving);
        assert_eq!(s.observe(760.4), StepOutcome::Moving);
        assert_eq!(s.observe(760.6), StepOutcome::Stalled);
    }

    #[test]
    fn test_creeping_movement_never_stalls() {
        // The stall reference advances every observation, so steady
        // 1.5mm-per-iteration progress must never read as a stall.
        let mut s = session(1000.0, 700.0);
        let mut height = 700.0;
        for _ in 0..100 {
            height += 1.5;
            assert_eq!(s.observe(height), StepOutcome::Moving);
        }
    }

    #[test]
    fn test_ceiling_at_max_iterations() {
        let mut s = session(1000.0, 700.0);
        // Alternate by 2mm so neither arrival nor stall can trigger.
        for i in 0..149 {
            let height = if i % 2 == 0 { 702.0 } else { 700.0 };
            assert_eq!(s.observe(height), StepOutcome::Moving, "iteration {i}");
        }
        assert_eq!(s.observe(702.0), StepOutcome::TimedOut);
        assert_eq!(s.elapsed_iterations(), 150);
    }

    #[test]
    fn test_arrival_still_wins_on_final_iteration() {
        let mut s = session(1000.0, 700.0);
        for i in 0..149 {
            let height = if i % 2 == 0 { 702.0 } else { 700.0 };
            s.observe(height);
        }
        assert_eq!(s.observe(998.0), StepOutcome::Arrived);
    }
}
