//! Continuous interval scheduler with per-tick progress callbacks.
//!
//! A [`Segment`] spans `[start, end]` in song time. While the current time
//! is inside the interval its payload receives a normalized progress value
//! in `[0, 1]` on every update; the final `1.0` is delivered exactly once,
//! after which the segment is completed and removed from the live set.

use std::collections::HashMap;

use crate::payload::SegmentPayload;
use crate::timing::{SongTime, TimeIndex, TimeKey};
use crate::triggers::UpdateStats;
use crate::{Error, Result};

/// Identifies a registered segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId(u64);

impl SegmentId {
    /// Create a segment id from a raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw id value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SegmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "segment#{}", self.0)
    }
}

/// Lifecycle state of a segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentState {
    /// Registered, current time has not reached `start`.
    Pending,
    /// Current time is inside the interval; receiving progress callbacks.
    Active,
    /// Final progress delivered; never fires again.
    Completed,
}

/// A time-ranged progress callback.
#[derive(Debug)]
pub struct Segment {
    /// Id assigned at registration.
    pub id: SegmentId,
    /// Interval start, inclusive.
    pub start: SongTime,
    /// Interval end. Equal to `start` for zero-length segments.
    pub end: SongTime,
    /// The callback receiving progress values.
    pub payload: SegmentPayload,
    /// Current lifecycle state.
    pub state: SegmentState,
}

impl Segment {
    /// Normalized progress at `now`, clamped to `[0, 1]`. A zero-length
    /// segment is always at `1.0`.
    pub fn progress_at(&self, now: SongTime) -> f64 {
        let length = self.end.as_millis() - self.start.as_millis();
        if length <= 0 {
            return 1.0;
        }
        let elapsed = (now.as_millis() - self.start.as_millis()) as f64;
        (elapsed / length as f64).clamp(0.0, 1.0)
    }
}

/// Interval scheduler owning the live segment set.
#[derive(Debug, Default)]
pub struct SegmentManager {
    segments: HashMap<SegmentId, Segment>,
    /// Pending segments keyed by start time, so activation preserves
    /// start-time order with stable registration-order ties.
    pending: TimeIndex<SegmentId>,
    pending_keys: HashMap<SegmentId, TimeKey>,
    /// Active segments in activation order.
    active: Vec<SegmentId>,
}

impl SegmentManager {
    /// Create an empty segment manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a segment over `[start, end]`. Rejects `end < start`
    /// without touching the live set. Registration with `start` already in
    /// the past is legal; the segment activates on the next update with the
    /// interpolated progress for the current time.
    pub fn enqueue(
        &mut self,
        id: SegmentId,
        start: SongTime,
        end: SongTime,
        payload: SegmentPayload,
    ) -> Result<()> {
        if end < start {
            return Err(Error::InvalidTimeRange { start, end });
        }
        let key = self.pending.insert(start, id);
        self.pending_keys.insert(id, key);
        self.segments.insert(
            id,
            Segment {
                id,
                start,
                end,
                payload,
                state: SegmentState::Pending,
            },
        );
        Ok(())
    }

    /// Remove a segment from the live set before it completes.
    /// Returns whether it was still live.
    pub fn cancel(&mut self, id: SegmentId) -> bool {
        if self.segments.remove(&id).is_none() {
            return false;
        }
        if let Some(key) = self.pending_keys.remove(&id) {
            self.pending.remove(&key);
        }
        self.active.retain(|&a| a != id);
        true
    }

    /// Number of live (pending or active) segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Check whether any segments are live.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Look up a live segment.
    pub fn get(&self, id: SegmentId) -> Option<&Segment> {
        self.segments.get(&id)
    }

    /// Advance the live set to `now`.
    ///
    /// Pending segments whose start has arrived become active; every active
    /// segment receives its clamped progress through `deliver`; segments at
    /// or past their end receive the final `1.0` and are completed and
    /// removed. A payload error is caught and logged without aborting the
    /// rest of the pass.
    pub fn update(
        &mut self,
        now: SongTime,
        deliver: &mut dyn FnMut(&SegmentPayload, f64, SegmentId) -> Result<()>,
    ) -> UpdateStats {
        let mut stats = UpdateStats::default();

        for (_, id) in self.pending.take_due(now) {
            self.pending_keys.remove(&id);
            if let Some(segment) = self.segments.get_mut(&id) {
                segment.state = SegmentState::Active;
                self.active.push(id);
            }
        }

        let mut completed = Vec::new();
        for &id in &self.active {
            let Some(segment) = self.segments.get_mut(&id) else {
                continue;
            };
            let progress = segment.progress_at(now);
            let done = now >= segment.end;
            if done {
                segment.state = SegmentState::Completed;
                completed.push(id);
            }
            stats.record(deliver(&segment.payload, progress, id), &id);
        }

        for id in completed {
            self.segments.remove(&id);
            self.active.retain(|&a| a != id);
        }

        stats
    }
}
