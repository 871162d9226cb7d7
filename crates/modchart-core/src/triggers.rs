//! One-shot event scheduler keyed by song time.
//!
//! The [`TriggerManager`] owns every registered trigger vertex and fires the
//! due ones on each update, in non-decreasing time order with registration
//! order as the tie-break. Fired one-shot vertices are consumed, which gives
//! forward-only firing semantics across backward seeks: a trigger that has
//! already fired is never re-fired when the song time jumps back below it.

use std::collections::HashMap;

use crate::payload::TriggerPayload;
use crate::timing::{SongTime, TimeIndex, TimeKey};
use crate::{Error, Result};

/// Identifies a registered trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TriggerId(u64);

impl TriggerId {
    /// Create a trigger id from a raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw id value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TriggerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "trigger#{}", self.0)
    }
}

/// A registered trigger: time, payload, and per-instance repeat policy.
#[derive(Debug)]
pub struct TriggerVertex {
    /// Id assigned at registration.
    pub id: TriggerId,
    /// The time this vertex fires at.
    pub time: SongTime,
    /// Repeat interval; `None` makes the trigger one-shot.
    pub repeat: Option<SongTime>,
    /// The callback to invoke on firing.
    pub payload: TriggerPayload,
}

/// Counters returned by a scheduler update pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateStats {
    /// Callbacks invoked this pass, including failed ones.
    pub fired: usize,
    /// Callbacks that returned an error other than a budget overrun.
    pub failures: usize,
    /// Callbacks that tripped the script instruction budget.
    pub budget_trips: usize,
}

impl UpdateStats {
    pub(crate) fn record(&mut self, result: Result<()>, what: &dyn std::fmt::Display) {
        self.fired += 1;
        match result {
            Ok(()) => {}
            Err(Error::BudgetExceeded) => {
                log::error!("{what} exceeded the instruction budget");
                self.budget_trips += 1;
            }
            Err(err) => {
                log::error!("{what} failed: {err}");
                self.failures += 1;
            }
        }
    }
}

/// One-shot event scheduler with stable time ordering.
#[derive(Debug, Default)]
pub struct TriggerManager {
    index: TimeIndex<TriggerVertex>,
    keys: HashMap<TriggerId, TimeKey>,
}

impl TriggerManager {
    /// Create an empty trigger manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a one-shot trigger. A time at or before the current song
    /// time is legal; the trigger fires on the next update.
    pub fn enqueue(&mut self, id: TriggerId, time: SongTime, payload: TriggerPayload) {
        let key = self.index.insert(
            time,
            TriggerVertex {
                id,
                time,
                repeat: None,
                payload,
            },
        );
        self.keys.insert(id, key);
    }

    /// Register a repeating trigger firing first at `time`, then every
    /// `interval` after. The interval must be positive.
    pub fn enqueue_repeating(
        &mut self,
        id: TriggerId,
        time: SongTime,
        interval: SongTime,
        payload: TriggerPayload,
    ) -> Result<()> {
        if interval.as_millis() <= 0 {
            return Err(Error::InvalidInterval(interval));
        }
        let key = self.index.insert(
            time,
            TriggerVertex {
                id,
                time,
                repeat: Some(interval),
                payload,
            },
        );
        self.keys.insert(id, key);
        Ok(())
    }

    /// Remove a trigger before it fires. Returns whether it was still live.
    pub fn cancel(&mut self, id: TriggerId) -> bool {
        match self.keys.remove(&id) {
            Some(key) => self.index.remove(&key).is_some(),
            None => false,
        }
    }

    /// Number of live (un-fired) triggers.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Check whether any triggers are live.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// The earliest pending fire time, if any.
    pub fn next_time(&self) -> Option<SongTime> {
        self.index.next_time()
    }

    /// Fire every trigger due as of `now`, delivering each payload exactly
    /// once through `deliver`. A payload error is caught and logged without
    /// aborting the rest of the pass. Repeating vertices are rescheduled at
    /// the first occurrence strictly after `now`, so a long stall never
    /// produces a burst of catch-up firings.
    pub fn update(
        &mut self,
        now: SongTime,
        deliver: &mut dyn FnMut(&TriggerPayload, SongTime) -> Result<()>,
    ) -> UpdateStats {
        let mut stats = UpdateStats::default();
        for (_, vertex) in self.index.take_due(now) {
            self.keys.remove(&vertex.id);
            stats.record(deliver(&vertex.payload, vertex.time), &vertex.id);
            if let Some(interval) = vertex.repeat {
                let next = next_occurrence(vertex.time, interval, now);
                let key = self.index.insert(
                    next,
                    TriggerVertex {
                        id: vertex.id,
                        time: next,
                        repeat: Some(interval),
                        payload: vertex.payload,
                    },
                );
                self.keys.insert(vertex.id, key);
            }
        }
        stats
    }
}

/// First `time + k * interval` strictly after `now`, with `k >= 1`.
fn next_occurrence(time: SongTime, interval: SongTime, now: SongTime) -> SongTime {
    let interval = interval.as_millis().max(1);
    let elapsed = now.as_millis().saturating_sub(time.as_millis()).max(0);
    let k = elapsed / interval + 1;
    time.saturating_add_millis(k.saturating_mul(interval))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (
        Arc<Mutex<Vec<i64>>>,
        impl FnMut(&TriggerPayload, SongTime) -> Result<()>,
    ) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let deliver = move |payload: &TriggerPayload, time: SongTime| match payload {
            TriggerPayload::Native(f) => f(time),
            TriggerPayload::Script(_) => {
                sink.lock().unwrap().push(time.as_millis());
                Ok(())
            }
        };
        (seen, deliver)
    }

    fn tagged(seen: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> TriggerPayload {
        let sink = seen.clone();
        TriggerPayload::native(move |_| {
            sink.lock().unwrap().push(tag);
            Ok(())
        })
    }

    fn deliver_native(payload: &TriggerPayload, time: SongTime) -> Result<()> {
        match payload {
            TriggerPayload::Native(f) => f(time),
            TriggerPayload::Script(_) => Ok(()),
        }
    }

    #[test]
    fn test_firing_order_with_ties() {
        // Register {100: A, 100: B, 50: C}; update(100) fires C, A, B.
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut manager = TriggerManager::new();
        manager.enqueue(TriggerId::new(1), SongTime::from_millis(100), tagged(&seen, "A"));
        manager.enqueue(TriggerId::new(2), SongTime::from_millis(100), tagged(&seen, "B"));
        manager.enqueue(TriggerId::new(3), SongTime::from_millis(50), tagged(&seen, "C"));

        let stats = manager.update(SongTime::from_millis(100), &mut deliver_native);
        assert_eq!(stats.fired, 3);
        assert_eq!(stats.failures, 0);
        assert_eq!(*seen.lock().unwrap(), vec!["C", "A", "B"]);
    }

    #[test]
    fn test_coalescing_equivalence() {
        // Incremental updates fire the same set as one jump to the final time.
        let make = |seen: &Arc<Mutex<Vec<&'static str>>>| {
            let mut manager = TriggerManager::new();
            manager.enqueue(TriggerId::new(1), SongTime::from_millis(10), tagged(seen, "a"));
            manager.enqueue(TriggerId::new(2), SongTime::from_millis(20), tagged(seen, "b"));
            manager.enqueue(TriggerId::new(3), SongTime::from_millis(30), tagged(seen, "c"));
            manager
        };

        let incremental = Arc::new(Mutex::new(Vec::new()));
        let mut manager = make(&incremental);
        for t in [10, 20, 30] {
            manager.update(SongTime::from_millis(t), &mut deliver_native);
        }

        let jump = Arc::new(Mutex::new(Vec::new()));
        let mut manager = make(&jump);
        manager.update(SongTime::from_millis(30), &mut deliver_native);

        assert_eq!(*incremental.lock().unwrap(), *jump.lock().unwrap());
    }

    #[test]
    fn test_fires_exactly_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut manager = TriggerManager::new();
        manager.enqueue(TriggerId::new(1), SongTime::from_millis(100), tagged(&seen, "x"));

        manager.update(SongTime::from_millis(100), &mut deliver_native);
        manager.update(SongTime::from_millis(200), &mut deliver_native);
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_backward_seek_does_not_refire() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut manager = TriggerManager::new();
        manager.enqueue(TriggerId::new(1), SongTime::from_millis(100), tagged(&seen, "x"));

        manager.update(SongTime::from_millis(150), &mut deliver_native);
        // Seek back before the trigger, then forward past it again.
        manager.update(SongTime::from_millis(50), &mut deliver_native);
        manager.update(SongTime::from_millis(150), &mut deliver_native);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unfired_trigger_survives_backward_seek() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut manager = TriggerManager::new();
        manager.enqueue(TriggerId::new(1), SongTime::from_millis(100), tagged(&seen, "x"));

        manager.update(SongTime::from_millis(50), &mut deliver_native);
        assert!(seen.lock().unwrap().is_empty());
        manager.update(SongTime::from_millis(100), &mut deliver_native);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_error_isolation_between_callbacks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut manager = TriggerManager::new();
        manager.enqueue(
            TriggerId::new(1),
            SongTime::from_millis(10),
            TriggerPayload::native(|_| Err(Error::Script("boom".into()))),
        );
        manager.enqueue(TriggerId::new(2), SongTime::from_millis(20), tagged(&seen, "ok"));

        let stats = manager.update(SongTime::from_millis(30), &mut deliver_native);
        assert_eq!(stats.fired, 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(*seen.lock().unwrap(), vec!["ok"]);
    }

    #[test]
    fn test_cancel_before_firing() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut manager = TriggerManager::new();
        let id = TriggerId::new(7);
        manager.enqueue(id, SongTime::from_millis(100), tagged(&seen, "x"));

        assert!(manager.cancel(id));
        assert!(!manager.cancel(id));
        manager.update(SongTime::from_millis(200), &mut deliver_native);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_repeating_trigger_reschedules_without_burst() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut manager = TriggerManager::new();
        manager
            .enqueue_repeating(
                TriggerId::new(1),
                SongTime::from_millis(100),
                SongTime::from_millis(50),
                TriggerPayload::native(move |t| {
                    sink.lock().unwrap().push(t.as_millis());
                    Ok(())
                }),
            )
            .unwrap();

        manager.update(SongTime::from_millis(100), &mut deliver_native);
        // A long stall: the repeat skips ahead instead of bursting.
        manager.update(SongTime::from_millis(500), &mut deliver_native);
        manager.update(SongTime::from_millis(560), &mut deliver_native);
        assert_eq!(*seen.lock().unwrap(), vec![100, 150, 550]);
    }

    #[test]
    fn test_repeating_rejects_non_positive_interval() {
        let mut manager = TriggerManager::new();
        let result = manager.enqueue_repeating(
            TriggerId::new(1),
            SongTime::ZERO,
            SongTime::ZERO,
            TriggerPayload::native(|_| Ok(())),
        );
        assert!(matches!(result, Err(Error::InvalidInterval(_))));
    }

    #[test]
    fn test_next_occurrence_skips_past_now() {
        let next = next_occurrence(
            SongTime::from_millis(100),
            SongTime::from_millis(50),
            SongTime::from_millis(500),
        );
        assert_eq!(next.as_millis(), 550);
    }

    #[test]
    fn test_script_payload_delivery_goes_through_closure() {
        let (seen, mut deliver) = recorder();
        let mut manager = TriggerManager::new();
        manager.enqueue(
            TriggerId::new(1),
            SongTime::from_millis(5),
            TriggerPayload::Script(rhai::FnPtr::new("f").unwrap()),
        );
        manager.update(SongTime::from_millis(5), &mut deliver);
        assert_eq!(*seen.lock().unwrap(), vec![5]);
    }
}
