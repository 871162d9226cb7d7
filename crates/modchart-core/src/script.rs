//! The mod-chart script host.
//!
//! [`ModChartScript`] owns the Rhai engine, the compiled script, both
//! schedulers, and the state graph, and drives them all from a single
//! [`tick`](ModChartScript::tick) call per frame. Script callbacks cannot
//! reach back into the host synchronously; every API call they make is
//! deferred over a channel and applied at the start of the next tick, so
//! the host never re-enters its own collections mid-iteration.

use std::collections::HashSet;
use std::io::Write;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver};
use rhai::{Dynamic, Engine, AST};

use crate::api::{self, ScriptHandle};
use crate::idgen::IdGen;
use crate::machine::{dot, StateGraph, StateId};
use crate::messages::ScriptMessage;
use crate::payload::{Guard, SegmentPayload, StatePayload, TriggerPayload};
use crate::segments::{SegmentId, SegmentManager};
use crate::session::ScriptSession;
use crate::timing::SongTime;
use crate::triggers::{TriggerId, TriggerManager};
use crate::{Error, Result};

/// A loaded chart script and everything it scheduled.
pub struct ModChartScript {
    engine: Engine,
    ast: AST,
    triggers: TriggerManager,
    segments: SegmentManager,
    graph: StateGraph,
    session: ScriptSession,
    ids: IdGen,
    rx: Receiver<ScriptMessage>,
    handle: ScriptHandle,
    song_time: Arc<AtomicI64>,
}

impl ModChartScript {
    /// Compile and run `source`, then apply everything its top level
    /// registered and enter the root machine. `name` labels the script in
    /// error positions and logs.
    pub fn load_str(source: &str, name: &str) -> Result<Self> {
        let (tx, rx) = unbounded();
        let ids = IdGen::new();
        let root = StateId::new(ids.next_id());
        let song_time = Arc::new(AtomicI64::new(0));
        let handle = ScriptHandle::new(tx, ids.clone(), song_time.clone(), root);
        api::init_api(handle.clone());

        let engine = api::create_engine();
        let mut ast = engine.compile(source)?;
        ast.set_source(name);

        let mut script = Self {
            engine,
            ast,
            triggers: TriggerManager::new(),
            segments: SegmentManager::new(),
            graph: StateGraph::new(root, name),
            session: ScriptSession::default(),
            ids,
            rx,
            handle,
            song_time,
        };

        // Top-level statements run once, at load time.
        script
            .engine
            .eval_ast::<Dynamic>(&script.ast)
            .map_err(Error::from)?;
        script.drain_messages();

        let entered = script.graph.enter(root)?;
        script.fire_enter_hooks(&entered);
        Ok(script)
    }

    /// Load a script from a file. The file stem becomes the script name.
    pub fn load_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("script");
        Self::load_str(&source, name)
    }

    /// Advance the whole script to `now`.
    ///
    /// Order within a tick: deferred script commands from the previous tick,
    /// then due triggers, then segment progress, then state update hooks,
    /// then transition evaluation. A halted script ticks as a no-op.
    pub fn tick(&mut self, now: SongTime) -> Result<()> {
        if self.session.is_halted() {
            return Ok(());
        }
        // Rebind in case another script ran on this thread since last tick.
        api::init_api(self.handle.clone());

        if self.session.exceeded() {
            self.session.halt(format!(
                "too many faults: {} callback errors, {} budget overruns",
                self.session.error_count(),
                self.session.budget_exceeded_count()
            ));
            return Ok(());
        }

        self.session.set_song_time(now);
        self.song_time.store(now.as_millis(), Ordering::Relaxed);

        self.drain_messages();
        if self.session.is_halted() {
            return Ok(());
        }

        let stats = {
            let Self {
                engine,
                ast,
                triggers,
                ..
            } = self;
            triggers.update(now, &mut |payload, time| {
                invoke_trigger(engine, ast, payload, time)
            })
        };
        self.session.absorb(&stats);

        let stats = {
            let Self {
                engine,
                ast,
                segments,
                ..
            } = self;
            segments.update(now, &mut |payload, progress, _| {
                invoke_segment(engine, ast, payload, progress)
            })
        };
        self.session.absorb(&stats);

        self.update_machines();
        self.evaluate_transitions();
        Ok(())
    }

    // === Host-side registration ===

    /// Schedule a native one-shot trigger. Takes effect immediately.
    pub fn register_trigger(&mut self, time: SongTime, payload: TriggerPayload) -> TriggerId {
        let id = TriggerId::new(self.ids.next_id());
        self.triggers.enqueue(id, time, payload);
        id
    }

    /// Schedule a native repeating trigger.
    pub fn register_repeating_trigger(
        &mut self,
        time: SongTime,
        interval: SongTime,
        payload: TriggerPayload,
    ) -> Result<TriggerId> {
        let id = TriggerId::new(self.ids.next_id());
        self.triggers.enqueue_repeating(id, time, interval, payload)?;
        Ok(id)
    }

    /// Schedule a native segment over `[start, end]`.
    pub fn register_segment(
        &mut self,
        start: SongTime,
        end: SongTime,
        payload: SegmentPayload,
    ) -> Result<SegmentId> {
        let id = SegmentId::new(self.ids.next_id());
        self.segments.enqueue(id, start, end, payload)?;
        Ok(id)
    }

    /// Remove a trigger before it fires.
    pub fn cancel_trigger(&mut self, id: TriggerId) -> bool {
        self.triggers.cancel(id)
    }

    /// Remove a segment before it completes.
    pub fn cancel_segment(&mut self, id: SegmentId) -> bool {
        self.segments.cancel(id)
    }

    // === Accessors ===

    /// Handle for sending deferred commands from host-side code.
    pub fn handle(&self) -> &ScriptHandle {
        &self.handle
    }

    /// Fault accounting and halt state.
    pub fn session(&self) -> &ScriptSession {
        &self.session
    }

    /// The state graph.
    pub fn graph(&self) -> &StateGraph {
        &self.graph
    }

    /// Live trigger count.
    pub fn trigger_count(&self) -> usize {
        self.triggers.len()
    }

    /// Live segment count.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Whether the script has been halted.
    pub fn is_halted(&self) -> bool {
        self.session.is_halted()
    }

    /// Permanently stop the script.
    pub fn halt(&mut self, reason: impl Into<String>) {
        self.session.halt(reason);
    }

    /// Give the script a fresh fault allowance, as on a chart restart.
    pub fn reset_counters(&mut self) {
        self.session.reset_counters();
    }

    /// Write the state graph in graphviz format.
    pub fn write_dot<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        dot::write_dot(&self.graph, out)
    }

    // === Internals ===

    fn drain_messages(&mut self) {
        while let Ok(msg) = self.rx.try_recv() {
            self.apply_message(msg);
        }
    }

    /// Apply one deferred script command. Structural mistakes are logged
    /// and dropped; they never poison the rest of the queue.
    fn apply_message(&mut self, msg: ScriptMessage) {
        match msg {
            ScriptMessage::RegisterTrigger {
                id,
                time,
                repeat,
                payload,
            } => {
                let result = match repeat {
                    Some(interval) => self.triggers.enqueue_repeating(id, time, interval, payload),
                    None => {
                        self.triggers.enqueue(id, time, payload);
                        Ok(())
                    }
                };
                if let Err(e) = result {
                    log::warn!("{id} rejected: {e}");
                }
            }
            ScriptMessage::RegisterSegment {
                id,
                start,
                end,
                payload,
            } => {
                if let Err(e) = self.segments.enqueue(id, start, end, payload) {
                    log::warn!("{id} rejected: {e}");
                }
            }
            ScriptMessage::CancelTrigger(id) => {
                if !self.triggers.cancel(id) {
                    log::warn!("cancel of unknown {id}");
                }
            }
            ScriptMessage::CancelSegment(id) => {
                if !self.segments.cancel(id) {
                    log::warn!("cancel of unknown {id}");
                }
            }
            ScriptMessage::AddMachine {
                id,
                parent,
                name,
                orthogonal,
            } => {
                let result = if orthogonal {
                    self.graph.add_orthogonal(id, parent, name)
                } else {
                    self.graph.add_machine(id, parent, name)
                };
                match result {
                    // A machine added under an already-active parent may
                    // itself become active right away.
                    Ok(id) => self.enter_if_parent_active(parent, id),
                    Err(e) => log::warn!("add machine {id} rejected: {e}"),
                }
            }
            ScriptMessage::AddLeaf { id, parent, name } => match self.graph.add_leaf(id, parent, name)
            {
                Ok(id) => self.enter_if_parent_active(parent, id),
                Err(e) => log::warn!("add leaf {id} rejected: {e}"),
            },
            ScriptMessage::SetHook {
                state,
                kind,
                payload,
            } => {
                if let Err(e) = self.graph.set_hook(state, kind, payload) {
                    log::warn!("hook on {state} rejected: {e}");
                }
            }
            ScriptMessage::AddEdge {
                source,
                target,
                guard,
            } => {
                if let Err(e) = self.graph.add_edge(source, target, guard) {
                    log::warn!("edge {source} -> {target} rejected: {e}");
                }
            }
            ScriptMessage::Activate(state) => {
                let Some(parent) = self.graph.node(state).and_then(|n| n.parent()) else {
                    log::warn!("activate of unknown or root {state}");
                    return;
                };
                match self.graph.enter_child(parent, state) {
                    Ok(entered) => self.fire_enter_hooks(&entered),
                    Err(e) => log::warn!("activate {state} rejected: {e}"),
                }
            }
            ScriptMessage::Deactivate(state) => match self.graph.leave(state) {
                Ok(left) => self.fire_leave_hooks(&left),
                Err(e) => log::warn!("deactivate {state} rejected: {e}"),
            },
            ScriptMessage::Halt => self.session.halt("halted by script"),
        }
    }

    /// Newly added children of active orthogonal parents join the active
    /// set; under an exclusive machine only a legal entry child does.
    fn enter_if_parent_active(&mut self, parent: StateId, child: StateId) {
        if !self.graph.is_active(parent) {
            return;
        }
        if self.graph.can_enter_sub_state_directly(parent, child) {
            match self.graph.enter_child(parent, child) {
                Ok(entered) => self.fire_enter_hooks(&entered),
                Err(e) => log::warn!("entering fresh {child} failed: {e}"),
            }
        }
    }

    fn update_machines(&mut self) {
        let hooks: Vec<(StateId, StatePayload)> = self
            .graph
            .active_leaf_states()
            .filter_map(|id| {
                let payload = self.graph.node(id)?.hooks().on_update.clone()?;
                Some((id, payload))
            })
            .collect();
        for (id, payload) in hooks {
            self.fire_hook(id, &payload, "on_update");
        }
    }

    /// Evaluate every edge in preorder and take those whose guard passes.
    /// At most one edge fires per source per tick, and an edge whose
    /// source went inactive or whose target went active earlier in the
    /// same pass is skipped.
    fn evaluate_transitions(&mut self) {
        let mut fired: HashSet<StateId> = HashSet::new();
        for edge in self.graph.transition_candidates() {
            if fired.contains(&edge.source) {
                continue;
            }
            if !self.graph.is_active(edge.source) || self.graph.is_active(edge.target) {
                continue;
            }
            let Some(guard) = self.graph.edge_guard(edge).cloned() else {
                continue;
            };
            if !self.eval_guard_isolated(&guard) {
                continue;
            }
            match self.graph.fire_transition(edge.source, edge.target) {
                Ok(outcome) => {
                    self.fire_leave_hooks(&outcome.left);
                    self.fire_enter_hooks(&outcome.entered);
                    fired.insert(edge.source);
                }
                Err(e) => {
                    log::debug!("edge {} -> {} not taken: {e}", edge.source, edge.target);
                }
            }
        }
    }

    fn eval_guard_isolated(&mut self, guard: &Guard) -> bool {
        let result = {
            let Self { engine, ast, .. } = self;
            eval_guard(engine, ast, guard)
        };
        match result {
            Ok(take) => take,
            Err(e) => {
                log::error!("transition guard failed: {e}");
                self.session.record_callback_error(&e);
                false
            }
        }
    }

    fn fire_enter_hooks(&mut self, entered: &[StateId]) {
        let hooks = self.collect_hooks(entered, |h| h.on_enter.clone());
        for (id, payload) in hooks {
            self.fire_hook(id, &payload, "on_enter");
        }
    }

    fn fire_leave_hooks(&mut self, left: &[StateId]) {
        let hooks = self.collect_hooks(left, |h| h.on_leave.clone());
        for (id, payload) in hooks {
            self.fire_hook(id, &payload, "on_leave");
        }
    }

    fn collect_hooks(
        &self,
        ids: &[StateId],
        pick: impl Fn(&crate::machine::StateHooks) -> Option<StatePayload>,
    ) -> Vec<(StateId, StatePayload)> {
        ids.iter()
            .filter_map(|&id| {
                let payload = pick(self.graph.node(id)?.hooks())?;
                Some((id, payload))
            })
            .collect()
    }

    fn fire_hook(&mut self, id: StateId, payload: &StatePayload, what: &str) {
        let result = {
            let Self { engine, ast, .. } = self;
            invoke_state_hook(engine, ast, payload, id)
        };
        if let Err(e) = result {
            log::error!("{what} hook for {id} failed: {e}");
            self.session.record_callback_error(&e);
        }
    }
}

impl std::fmt::Debug for ModChartScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModChartScript")
            .field("triggers", &self.triggers.len())
            .field("segments", &self.segments.len())
            .field("states", &self.graph.len())
            .field("halted", &self.session.is_halted())
            .finish()
    }
}

fn invoke_trigger(
    engine: &Engine,
    ast: &AST,
    payload: &TriggerPayload,
    time: SongTime,
) -> Result<()> {
    match payload {
        TriggerPayload::Native(f) => f(time),
        TriggerPayload::Script(f) => {
            f.call::<Dynamic>(engine, ast, (time.as_millis(),))
                .map_err(Error::from)?;
            Ok(())
        }
    }
}

fn invoke_segment(
    engine: &Engine,
    ast: &AST,
    payload: &SegmentPayload,
    progress: f64,
) -> Result<()> {
    match payload {
        SegmentPayload::Native(f) => f(progress),
        SegmentPayload::Script(f) => {
            f.call::<Dynamic>(engine, ast, (progress,))
                .map_err(Error::from)?;
            Ok(())
        }
    }
}

fn invoke_state_hook(
    engine: &Engine,
    ast: &AST,
    payload: &StatePayload,
    id: StateId,
) -> Result<()> {
    match payload {
        StatePayload::Native(f) => f(id),
        StatePayload::Script(f) => {
            f.call::<Dynamic>(engine, ast, (id.as_u64() as i64,))
                .map_err(Error::from)?;
            Ok(())
        }
    }
}

fn eval_guard(engine: &Engine, ast: &AST, guard: &Guard) -> Result<bool> {
    match guard {
        Guard::Native(f) => Ok(f()),
        Guard::Script(f) => {
            let value = f.call::<Dynamic>(engine, ast, ()).map_err(Error::from)?;
            value
                .as_bool()
                .map_err(|actual| Error::Script(format!("guard returned {actual}, expected bool")))
        }
    }
}
