//! Per-script fault accounting and the runaway halt switch.
//!
//! Scripts are untrusted: a callback may throw, loop forever, or keep
//! failing every tick. The engine's operation budget stops any single call,
//! and the session counts faults across calls; once too many accumulate the
//! whole script is halted for the rest of the session.

use crate::timing::SongTime;
use crate::triggers::UpdateStats;
use crate::Error;

/// Operation budget for a single script call. Roughly a few milliseconds of
/// interpreter work, far beyond anything a per-tick callback needs.
pub const MAX_OPERATIONS_PER_CALL: u64 = 1_000_000;

/// Faults tolerated before the script is halted.
pub const MAX_FAULTS: usize = 100;

/// Mutable per-script state threaded through every update pass.
#[derive(Debug)]
pub struct ScriptSession {
    song_time: SongTime,
    error_count: usize,
    budget_exceeded_count: usize,
    max_faults: usize,
    halted: Option<String>,
}

impl Default for ScriptSession {
    fn default() -> Self {
        Self::new(MAX_FAULTS)
    }
}

impl ScriptSession {
    /// Create a session tolerating `max_faults` faults before halting.
    pub fn new(max_faults: usize) -> Self {
        Self {
            song_time: SongTime::ZERO,
            error_count: 0,
            budget_exceeded_count: 0,
            max_faults,
            halted: None,
        }
    }

    /// The song time of the current update pass.
    pub fn song_time(&self) -> SongTime {
        self.song_time
    }

    pub(crate) fn set_song_time(&mut self, now: SongTime) {
        self.song_time = now;
    }

    /// Callback errors seen so far.
    pub fn error_count(&self) -> usize {
        self.error_count
    }

    /// Operation budget trips seen so far.
    pub fn budget_exceeded_count(&self) -> usize {
        self.budget_exceeded_count
    }

    /// Fold the fault counts of one scheduler pass into the session.
    pub fn absorb(&mut self, stats: &UpdateStats) {
        self.error_count += stats.failures;
        self.budget_exceeded_count += stats.budget_trips;
    }

    /// Count a single callback error.
    pub fn record_callback_error(&mut self, error: &Error) {
        match error {
            Error::BudgetExceeded => self.budget_exceeded_count += 1,
            _ => self.error_count += 1,
        }
    }

    /// Whether the accumulated faults warrant halting the script.
    pub fn exceeded(&self) -> bool {
        self.error_count + self.budget_exceeded_count >= self.max_faults
    }

    /// Reset the fault counters, giving the script a fresh allowance.
    pub fn reset_counters(&mut self) {
        self.error_count = 0;
        self.budget_exceeded_count = 0;
    }

    /// Permanently stop the script for the rest of the session.
    pub fn halt(&mut self, reason: impl Into<String>) {
        if self.halted.is_none() {
            let reason = reason.into();
            log::error!("script halted: {reason}");
            self.halted = Some(reason);
        }
    }

    /// Whether the script has been halted.
    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    /// Why the script was halted, if it was.
    pub fn halt_reason(&self) -> Option<&str> {
        self.halted.as_deref()
    }
}
