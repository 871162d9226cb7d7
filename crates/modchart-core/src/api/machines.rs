//! State machine API functions.
//!
//! Scripts build the state graph with these: composites and leaves under
//! the root (or any composite), lifecycle hooks, transition edges, and
//! manual activation. Construction is deferred like everything else, so a
//! structural mistake surfaces as a logged warning on the next update pass
//! rather than an exception inside the script.

use rhai::{Engine, EvalAltResult, FnPtr};

use crate::machine::{HookKind, StateId};
use crate::messages::ScriptMessage;
use crate::payload::{Guard, StatePayload};

use super::require_handle;

/// Register state machine functions with the Rhai engine.
pub fn register(engine: &mut Engine) {
    // Graph construction
    engine.register_fn("root", root);
    engine.register_fn("state_machine", state_machine);
    engine.register_fn("sub_machine", sub_machine);
    engine.register_fn("orthogonal", orthogonal);
    engine.register_fn("sub_orthogonal", sub_orthogonal);
    engine.register_fn("leaf", leaf);

    // Lifecycle hooks
    engine.register_fn("on_enter", on_enter);
    engine.register_fn("on_update", on_update);
    engine.register_fn("on_leave", on_leave);

    // Transitions and manual activity
    engine.register_fn("edge", edge);
    engine.register_fn("activate", activate);
    engine.register_fn("deactivate", deactivate);
}

fn state_id(raw: i64) -> Result<StateId, Box<EvalAltResult>> {
    u64::try_from(raw)
        .map(StateId::new)
        .map_err(|_| format!("invalid state id {raw}").into())
}

fn add_machine(parent: StateId, name: &str, orthogonal: bool) -> i64 {
    let handle = require_handle();
    let id = StateId::new(handle.next_id());
    handle.send(ScriptMessage::AddMachine {
        id,
        parent,
        name: name.to_string(),
        orthogonal,
    });
    id.as_u64() as i64
}

/// Id of the root machine.
pub fn root() -> i64 {
    require_handle().root().as_u64() as i64
}

/// Add an exclusive state machine under the root. Returns its id.
pub fn state_machine(name: &str) -> i64 {
    add_machine(require_handle().root(), name, false)
}

/// Add an exclusive state machine under `parent`. Returns its id.
pub fn sub_machine(parent: i64, name: &str) -> Result<i64, Box<EvalAltResult>> {
    Ok(add_machine(state_id(parent)?, name, false))
}

/// Add an orthogonal state machine under the root. Returns its id.
pub fn orthogonal(name: &str) -> i64 {
    add_machine(require_handle().root(), name, true)
}

/// Add an orthogonal state machine under `parent`. Returns its id.
pub fn sub_orthogonal(parent: i64, name: &str) -> Result<i64, Box<EvalAltResult>> {
    Ok(add_machine(state_id(parent)?, name, true))
}

/// Add a leaf state under `parent`. The first state added to an exclusive
/// machine becomes its entry state. Returns the leaf's id.
pub fn leaf(parent: i64, name: &str) -> Result<i64, Box<EvalAltResult>> {
    let handle = require_handle();
    let id = StateId::new(handle.next_id());
    handle.send(ScriptMessage::AddLeaf {
        id,
        parent: state_id(parent)?,
        name: name.to_string(),
    });
    Ok(id.as_u64() as i64)
}

fn set_hook(state: i64, kind: HookKind, f: FnPtr) {
    let Ok(state) = state_id(state) else {
        log::warn!("hook attached to invalid state id {state}");
        return;
    };
    require_handle().send(ScriptMessage::SetHook {
        state,
        kind,
        payload: StatePayload::Script(f),
    });
}

/// Call `f` when the state becomes active.
pub fn on_enter(state: i64, f: FnPtr) {
    set_hook(state, HookKind::Enter, f);
}

/// Call `f` every update pass while the state is an active leaf.
pub fn on_update(state: i64, f: FnPtr) {
    set_hook(state, HookKind::Update, f);
}

/// Call `f` when the state becomes inactive.
pub fn on_leave(state: i64, f: FnPtr) {
    set_hook(state, HookKind::Leave, f);
}

/// Register a transition edge from `source` to `target`, taken whenever
/// `guard` returns true while `source` is active.
pub fn edge(source: i64, target: i64, guard: FnPtr) {
    let (Ok(source), Ok(target)) = (state_id(source), state_id(target)) else {
        log::warn!("edge with invalid state ids {source} -> {target}");
        return;
    };
    require_handle().send(ScriptMessage::AddEdge {
        source,
        target,
        guard: Guard::Script(guard),
    });
}

/// Manually enter a state through its parent, if legal at apply time.
pub fn activate(state: i64) {
    match state_id(state) {
        Ok(state) => require_handle().send(ScriptMessage::Activate(state)),
        Err(_) => log::warn!("activate: invalid state id {state}"),
    }
}

/// Manually leave a state.
pub fn deactivate(state: i64) {
    match state_id(state) {
        Ok(state) => require_handle().send(ScriptMessage::Deactivate(state)),
        Err(_) => log::warn!("deactivate: invalid state id {state}"),
    }
}
