//! Deferred commands from script code to the host.
//!
//! Script API calls never mutate the schedulers or the state graph directly;
//! they run while the host is mid-update and holds the mutable borrows. Each
//! call instead sends a message over a channel, and the host drains the
//! channel at the start of the next update pass. Ids are allocated up front
//! from the shared generator so scripts get them synchronously.

use crate::machine::{HookKind, StateId};
use crate::payload::{Guard, SegmentPayload, StatePayload, TriggerPayload};
use crate::segments::SegmentId;
use crate::timing::SongTime;
use crate::triggers::TriggerId;

/// A deferred script command, applied at the start of the next update pass.
#[derive(Clone, Debug)]
pub enum ScriptMessage {
    // === Timeline ===
    /// Schedule a one-shot or repeating trigger.
    RegisterTrigger {
        id: TriggerId,
        time: SongTime,
        repeat: Option<SongTime>,
        payload: TriggerPayload,
    },
    /// Schedule a progress segment over `[start, end]`.
    RegisterSegment {
        id: SegmentId,
        start: SongTime,
        end: SongTime,
        payload: SegmentPayload,
    },
    /// Remove a trigger before it fires.
    CancelTrigger(TriggerId),
    /// Remove a segment before it completes.
    CancelSegment(SegmentId),

    // === State graph construction ===
    /// Add a composite state under `parent`.
    AddMachine {
        id: StateId,
        parent: StateId,
        name: String,
        orthogonal: bool,
    },
    /// Add a leaf state under `parent`.
    AddLeaf {
        id: StateId,
        parent: StateId,
        name: String,
    },
    /// Attach a lifecycle hook to a state.
    SetHook {
        state: StateId,
        kind: HookKind,
        payload: StatePayload,
    },
    /// Register a guarded transition edge.
    AddEdge {
        source: StateId,
        target: StateId,
        guard: Guard,
    },

    // === Activity control ===
    /// Manually enter a state through its parent.
    Activate(StateId),
    /// Manually leave a state.
    Deactivate(StateId),

    /// Stop the script for the rest of the session.
    Halt,
}
