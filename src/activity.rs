//! Activity-gating heuristic embedded in each string simulator.
//!
//! Skips the inner FD loop on strings that have decayed to silence. The
//! threshold and check period are deliberately compile-time constants (see
//! spec §9, "Open question — activity threshold") rather than runtime
//! parameters.

/// Number of `get_next_sample` calls between activity re-evaluations.
pub(crate) const ACTIVITY_CHECK_PERIOD: u64 = 0x4000;
/// Minimum summed energy (see [`ActivityTracker::record_check`]) for a string
/// to be considered active.
pub(crate) const ACTIVITY_THRESHOLD: f64 = 1e-6;

/// Tracks whether a string is currently worth advancing.
///
/// Invariant: if `is_active()` is false, the string's next sample is exactly
/// `0.0` and no FD work is performed for it.
pub(crate) struct ActivityTracker {
    is_active: bool,
    check_ctr: u64,
}

impl ActivityTracker {
    pub fn new() -> Self {
        ActivityTracker {
            is_active: true,
            check_ctr: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Advance the check counter by one sample. Returns `true` if this call
    /// should re-evaluate activity (the caller must then call
    /// [`ActivityTracker::record_check`]).
    pub fn tick(&mut self) -> bool {
        self.check_ctr += 1;
        self.check_ctr > ACTIVITY_CHECK_PERIOD
    }

    /// Record the result of an activity evaluation and reset the counter.
    pub fn record_check(&mut self, summed_energy: f64) {
        self.is_active = summed_energy > ACTIVITY_THRESHOLD;
        self.check_ctr = 0;
    }

    /// Force the string active again and restart the check window. Called
    /// unconditionally on `hit`.
    pub fn hit(&mut self) {
        self.is_active = true;
        self.check_ctr = 0;
    }
}
