//! ModChart Core - Scheduling and state machines for scripted chart effects.
//!
//! This crate provides the building blocks for mod-chart scripts:
//!
//! - **Timing** - Song time and the sorted time index
//! - **Triggers** - One-shot and repeating scheduled callbacks
//! - **Segments** - Time-ranged callbacks with normalized progress
//! - **Machine** - Hierarchical state machines with guarded transitions
//! - **Script** - The Rhai script host driving everything per tick
//! - **API** - Rhai scripting API
//!
//! # Architecture
//!
//! A [`ModChartScript`] owns the engine, the schedulers, and the state
//! graph, and advances them from a single [`ModChartScript::tick`] per
//! frame. Script API calls never mutate host state directly; each one
//! sends a [`ScriptMessage`] that the host applies at the start of the
//! next tick, so callbacks can freely register more work while the host
//! is mid-iteration.

pub mod api;
pub mod error;
pub mod idgen;
pub mod machine;
pub mod messages;
pub mod payload;
pub mod script;
pub mod segments;
pub mod session;
pub mod timing;
pub mod triggers;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use idgen::IdGen;
pub use machine::{
    EdgeRef, HookKind, StateGraph, StateHooks, StateId, StateKind, StateNode, TransitionEdge,
    TransitionOutcome,
};
pub use messages::ScriptMessage;
pub use payload::{Guard, SegmentPayload, StatePayload, TriggerPayload};
pub use script::ModChartScript;
pub use segments::{Segment, SegmentId, SegmentManager, SegmentState};
pub use session::{ScriptSession, MAX_FAULTS, MAX_OPERATIONS_PER_CALL};
pub use timing::{SongTime, TimeIndex, TimeKey};
pub use triggers::{TriggerId, TriggerManager, TriggerVertex, UpdateStats};

// Re-export API module entry points
pub use api::{create_engine, get_handle, init_api, register_api, require_handle, ScriptHandle};
