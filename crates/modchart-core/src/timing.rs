//! Timing primitives for the mod-chart timeline.
//!
//! This module provides the fundamental timing types used throughout the core:
//!
//! - [`SongTime`] - Integer-millisecond song position
//! - [`TimeKey`] - Ordering key combining time and insertion order
//! - [`TimeIndex`] - Sorted time-keyed collection with range drains
//!
//! All scheduling is keyed by song playback time, not wall-clock time. The
//! host supplies the current song time once per tick; it is monotonic during
//! normal playback but may jump in either direction on a seek.

use std::collections::BTreeMap;

/// Song position in integer milliseconds.
///
/// Integer milliseconds avoid floating-point drift over long sessions and
/// match the resolution the host clock reports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SongTime(i64);

impl SongTime {
    /// Zero song time constant.
    pub const ZERO: SongTime = SongTime(0);

    /// Create a SongTime from a millisecond value.
    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Get the millisecond value.
    #[inline]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Saturating millisecond addition.
    #[inline]
    pub const fn saturating_add_millis(self, millis: i64) -> Self {
        Self(self.0.saturating_add(millis))
    }
}

impl std::ops::Add for SongTime {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl std::ops::Sub for SongTime {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl From<i64> for SongTime {
    fn from(value: i64) -> Self {
        SongTime::from_millis(value)
    }
}

impl From<SongTime> for i64 {
    fn from(value: SongTime) -> Self {
        value.as_millis()
    }
}

impl std::fmt::Display for SongTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Ordering key for time-indexed items.
///
/// Items are ordered by time first, then by insertion sequence, which gives
/// the stable tie-break the trigger contract requires: two items registered
/// for the same time fire in registration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeKey {
    /// The time the item is keyed under.
    pub time: SongTime,
    /// Insertion sequence number within the owning index.
    pub seq: u64,
}

/// A sorted collection of time-stamped items.
///
/// Supports insertion at arbitrary times, including times already in the
/// past; such items are returned by the next [`take_due`](Self::take_due)
/// call rather than being silently skipped.
#[derive(Debug)]
pub struct TimeIndex<T> {
    items: BTreeMap<TimeKey, T>,
    next_seq: u64,
}

// Manual impl to avoid the derive's unnecessary `T: Default` bound.
impl<T> Default for TimeIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimeIndex<T> {
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            items: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// Insert an item at the given time, returning its key.
    pub fn insert(&mut self, time: SongTime, value: T) -> TimeKey {
        let key = TimeKey {
            time,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.items.insert(key, value);
        key
    }

    /// Remove an item by key.
    pub fn remove(&mut self, key: &TimeKey) -> Option<T> {
        self.items.remove(key)
    }

    /// Drain every item whose time has arrived as of `now`, in time order
    /// with ties broken by insertion order. Each item is returned at most
    /// once across the lifetime of the index.
    pub fn take_due(&mut self, now: SongTime) -> Vec<(TimeKey, T)> {
        let bound = TimeKey {
            time: now.saturating_add_millis(1),
            seq: 0,
        };
        let not_due = self.items.split_off(&bound);
        let due = std::mem::replace(&mut self.items, not_due);
        due.into_iter().collect()
    }

    /// The earliest time present in the index, if any.
    pub fn next_time(&self) -> Option<SongTime> {
        self.items.keys().next().map(|k| k.time)
    }

    /// Iterate over all items in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&TimeKey, &T)> {
        self.items.iter()
    }

    /// Number of items in the index.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Remove all items.
    pub fn clear(&mut self) {
        self.items.clear();
    }
}
