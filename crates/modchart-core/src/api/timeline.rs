//! Timeline API functions.
//!
//! These schedule triggers and segments against song time. Registration
//! returns the allocated id immediately; the entity itself joins the
//! schedule on the next update pass.

use rhai::{Engine, EvalAltResult, FnPtr};

use crate::messages::ScriptMessage;
use crate::payload::{SegmentPayload, TriggerPayload};
use crate::segments::SegmentId;
use crate::timing::SongTime;
use crate::triggers::TriggerId;

use super::require_handle;

/// Register timeline functions with the Rhai engine.
pub fn register(engine: &mut Engine) {
    // Triggers
    engine.register_fn("trigger", trigger);
    engine.register_fn("trigger_every", trigger_every);
    engine.register_fn("cancel_trigger", cancel_trigger);

    // Segments
    engine.register_fn("segment", segment);
    engine.register_fn("cancel_segment", cancel_segment);

    // Transport
    engine.register_fn("song_time", song_time);
    engine.register_fn("halt", halt);
}

/// Schedule `f` to fire once at `time` milliseconds. Returns the trigger id.
pub fn trigger(time: i64, f: FnPtr) -> i64 {
    let handle = require_handle();
    let id = TriggerId::new(handle.next_id());
    handle.send(ScriptMessage::RegisterTrigger {
        id,
        time: SongTime::from_millis(time),
        repeat: None,
        payload: TriggerPayload::Script(f),
    });
    id.as_u64() as i64
}

/// Schedule `f` to fire at `time` and then every `interval` milliseconds.
pub fn trigger_every(time: i64, interval: i64, f: FnPtr) -> Result<i64, Box<EvalAltResult>> {
    if interval <= 0 {
        return Err(format!("trigger interval must be positive, got {interval}ms").into());
    }
    let handle = require_handle();
    let id = TriggerId::new(handle.next_id());
    handle.send(ScriptMessage::RegisterTrigger {
        id,
        time: SongTime::from_millis(time),
        repeat: Some(SongTime::from_millis(interval)),
        payload: TriggerPayload::Script(f),
    });
    Ok(id.as_u64() as i64)
}

/// Remove a trigger before it fires.
pub fn cancel_trigger(id: i64) {
    let Ok(raw) = u64::try_from(id) else {
        log::warn!("cancel_trigger: invalid id {id}");
        return;
    };
    require_handle().send(ScriptMessage::CancelTrigger(TriggerId::new(raw)));
}

/// Schedule `f` to receive progress in `[0, 1]` while song time is inside
/// `[start, end]` milliseconds. Returns the segment id.
pub fn segment(start: i64, end: i64, f: FnPtr) -> Result<i64, Box<EvalAltResult>> {
    if end < start {
        return Err(format!("segment range is inverted: [{start}, {end}]").into());
    }
    let handle = require_handle();
    let id = SegmentId::new(handle.next_id());
    handle.send(ScriptMessage::RegisterSegment {
        id,
        start: SongTime::from_millis(start),
        end: SongTime::from_millis(end),
        payload: SegmentPayload::Script(f),
    });
    Ok(id.as_u64() as i64)
}

/// Remove a segment before it completes.
pub fn cancel_segment(id: i64) {
    let Ok(raw) = u64::try_from(id) else {
        log::warn!("cancel_segment: invalid id {id}");
        return;
    };
    require_handle().send(ScriptMessage::CancelSegment(SegmentId::new(raw)));
}

/// Song time of the current update pass, in milliseconds.
pub fn song_time() -> i64 {
    require_handle().song_time().as_millis()
}

/// Stop the script for the rest of the session.
pub fn halt() {
    require_handle().send(ScriptMessage::Halt);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{init_api, ScriptHandle};
    use crate::idgen::IdGen;
    use crate::machine::StateId;
    use crossbeam_channel::{unbounded, Receiver};
    use std::sync::atomic::AtomicI64;
    use std::sync::Arc;

    fn bind() -> Receiver<ScriptMessage> {
        let (tx, rx) = unbounded();
        init_api(ScriptHandle::new(
            tx,
            IdGen::new(),
            Arc::new(AtomicI64::new(0)),
            StateId::new(0),
        ));
        rx
    }

    #[test]
    fn test_trigger_defers_registration() {
        let rx = bind();
        let id = trigger(500, FnPtr::new("on_beat").unwrap());
        match rx.try_recv().unwrap() {
            ScriptMessage::RegisterTrigger {
                id: got,
                time,
                repeat,
                ..
            } => {
                assert_eq!(got.as_u64() as i64, id);
                assert_eq!(time, SongTime::from_millis(500));
                assert_eq!(repeat, None);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_trigger_every_rejects_nonpositive_interval() {
        let rx = bind();
        assert!(trigger_every(0, 0, FnPtr::new("f").unwrap()).is_err());
        assert!(trigger_every(0, -5, FnPtr::new("f").unwrap()).is_err());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_segment_rejects_inverted_range() {
        let rx = bind();
        assert!(segment(400, 200, FnPtr::new("f").unwrap()).is_err());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_cancel_with_negative_id_is_ignored() {
        let rx = bind();
        cancel_trigger(-1);
        cancel_segment(-1);
        assert!(rx.try_recv().is_err());
    }
}
