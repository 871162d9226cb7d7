//! Hierarchical state machine graph.
//!
//! States live in an arena keyed by [`StateId`]; parent links are plain ids
//! used only for legality checks and path computation, never for ownership.
//! Three node kinds exist:
//!
//! - leaf states, which carry the lifecycle hooks scripts attach;
//! - exclusive machines, which keep at most one child active and remember
//!   the first child ever added as their entry state;
//! - orthogonal machines, whose children are all active together.
//!
//! Machines are themselves states, so they nest freely. Mutating operations
//! return the ordered lists of states that were entered or left; the host
//! fires the corresponding hooks afterwards, so graph mutation never
//! overlaps script execution.

use std::collections::HashMap;

use crate::payload::{Guard, StatePayload};
use crate::{Error, Result};

/// Identifies a state in the graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateId(u64);

impl StateId {
    /// Create a state id from a raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw id value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for StateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "state#{}", self.0)
    }
}

// `Error::IllegalTransition` names a field `source`, which thiserror's
// derive treats as the error source and therefore requires to implement
// `std::error::Error`.
impl std::error::Error for StateId {}

/// What kind of node a state is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateKind {
    /// A state with no children.
    Leaf,
    /// Exclusive composite: at most one child active at a time.
    Machine {
        /// First child ever added; immutable once set.
        entry: Option<StateId>,
        /// Which child currently holds focus.
        active: Option<StateId>,
    },
    /// Parallel composite: all children active together.
    Orthogonal,
}

/// Which lifecycle hook to attach a payload to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookKind {
    Enter,
    Update,
    Leave,
}

/// Lifecycle callbacks attached to a state.
#[derive(Clone, Debug, Default)]
pub struct StateHooks {
    /// Invoked when the state becomes active.
    pub on_enter: Option<StatePayload>,
    /// Invoked every tick the state is an active leaf.
    pub on_update: Option<StatePayload>,
    /// Invoked when the state becomes inactive.
    pub on_leave: Option<StatePayload>,
}

/// A guarded rule moving activity from one state to another.
#[derive(Clone, Debug)]
pub struct TransitionEdge {
    /// The state this edge is defined on.
    pub source: StateId,
    /// The state activity moves to when the edge fires.
    pub target: StateId,
    /// Predicate deciding whether the edge fires.
    pub guard: Guard,
}

/// Stable reference to an edge, valid as long as edges are only appended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EdgeRef {
    /// The edge's source state.
    pub source: StateId,
    /// Index into the source state's edge list.
    pub index: usize,
    /// The edge's target state.
    pub target: StateId,
}

/// States entered and left by a fired transition, in hook-firing order.
#[derive(Debug, Default)]
pub struct TransitionOutcome {
    /// States left, children first.
    pub left: Vec<StateId>,
    /// States entered, parents first.
    pub entered: Vec<StateId>,
}

/// A node in the state tree.
#[derive(Debug)]
pub struct StateNode {
    id: StateId,
    name: String,
    parent: Option<StateId>,
    children: Vec<StateId>,
    kind: StateKind,
    active: bool,
    edges: Vec<TransitionEdge>,
    hooks: StateHooks,
}

impl StateNode {
    fn new(id: StateId, name: impl Into<String>, kind: StateKind) -> Self {
        Self {
            id,
            name: name.into(),
            parent: None,
            children: Vec::new(),
            kind,
            active: false,
            edges: Vec::new(),
            hooks: StateHooks::default(),
        }
    }

    /// The state's id.
    pub fn id(&self) -> StateId {
        self.id
    }

    /// The state's display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Non-owning back-reference to the parent, if any.
    pub fn parent(&self) -> Option<StateId> {
        self.parent
    }

    /// Children in the order they were added.
    pub fn children(&self) -> &[StateId] {
        &self.children
    }

    /// The node kind, including entry/active bookkeeping for machines.
    pub fn kind(&self) -> StateKind {
        self.kind
    }

    /// Whether the state is currently active.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether the state can hold children.
    pub fn is_composite(&self) -> bool {
        !matches!(self.kind, StateKind::Leaf)
    }

    /// Transition edges defined on this state, in registration order.
    pub fn edges(&self) -> &[TransitionEdge] {
        &self.edges
    }

    /// Lifecycle hooks attached to this state.
    pub fn hooks(&self) -> &StateHooks {
        &self.hooks
    }
}

enum Descend {
    None,
    One(StateId),
    Many(Vec<StateId>),
}

/// Arena of state nodes rooted at an orthogonal machine.
#[derive(Debug)]
pub struct StateGraph {
    nodes: HashMap<StateId, StateNode>,
    root: StateId,
}

impl StateGraph {
    /// Create a graph whose root is an orthogonal machine, so independently
    /// scripted regions can run side by side.
    pub fn new(root: StateId, name: impl Into<String>) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(root, StateNode::new(root, name, StateKind::Orthogonal));
        Self { nodes, root }
    }

    /// The root machine's id.
    pub fn root(&self) -> StateId {
        self.root
    }

    /// Look up a node.
    pub fn node(&self, id: StateId) -> Option<&StateNode> {
        self.nodes.get(&id)
    }

    /// Whether a state is currently active.
    pub fn is_active(&self, id: StateId) -> bool {
        self.nodes.get(&id).is_some_and(|n| n.active)
    }

    /// Number of states in the graph, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A graph always contains at least its root.
    pub fn is_empty(&self) -> bool {
        false
    }

    // === Construction ===

    /// Add an exclusive machine under `parent`.
    pub fn add_machine(
        &mut self,
        id: StateId,
        parent: StateId,
        name: impl Into<String>,
    ) -> Result<StateId> {
        self.attach(
            StateNode::new(
                id,
                name,
                StateKind::Machine {
                    entry: None,
                    active: None,
                },
            ),
            parent,
        )
    }

    /// Add an orthogonal machine under `parent`.
    pub fn add_orthogonal(
        &mut self,
        id: StateId,
        parent: StateId,
        name: impl Into<String>,
    ) -> Result<StateId> {
        self.attach(StateNode::new(id, name, StateKind::Orthogonal), parent)
    }

    /// Add a leaf state under `parent`.
    pub fn add_leaf(
        &mut self,
        id: StateId,
        parent: StateId,
        name: impl Into<String>,
    ) -> Result<StateId> {
        self.attach(StateNode::new(id, name, StateKind::Leaf), parent)
    }

    fn attach(&mut self, mut node: StateNode, parent: StateId) -> Result<StateId> {
        let id = node.id;
        debug_assert!(!self.nodes.contains_key(&id), "duplicate state id {id}");
        let pnode = self
            .nodes
            .get_mut(&parent)
            .ok_or(Error::UnknownState(parent))?;
        match &mut pnode.kind {
            StateKind::Leaf => return Err(Error::NotComposite(parent)),
            StateKind::Machine { entry, .. } => {
                // The first state ever added becomes the entry state.
                if entry.is_none() {
                    *entry = Some(id);
                }
            }
            StateKind::Orthogonal => {}
        }
        pnode.children.push(id);
        node.parent = Some(parent);
        self.nodes.insert(id, node);
        Ok(id)
    }

    /// Re-point a machine's entry state. The entry state is immutable once
    /// set; later calls are no-ops and only log a warning.
    pub fn set_entry_state(&mut self, machine: StateId, child: StateId) -> Result<()> {
        let node = self
            .nodes
            .get_mut(&machine)
            .ok_or(Error::UnknownState(machine))?;
        if !node.children.contains(&child) {
            return Err(Error::UnknownState(child));
        }
        match &mut node.kind {
            StateKind::Machine { entry, .. } => {
                if entry.is_none() {
                    *entry = Some(child);
                } else if *entry != Some(child) {
                    log::warn!("entry state of {machine} is immutable once set");
                }
                Ok(())
            }
            _ => Err(Error::NotComposite(machine)),
        }
    }

    /// Attach a lifecycle hook payload to a state.
    pub fn set_hook(&mut self, id: StateId, kind: HookKind, payload: StatePayload) -> Result<()> {
        let node = self.nodes.get_mut(&id).ok_or(Error::UnknownState(id))?;
        match kind {
            HookKind::Enter => node.hooks.on_enter = Some(payload),
            HookKind::Update => node.hooks.on_update = Some(payload),
            HookKind::Leave => node.hooks.on_leave = Some(payload),
        }
        Ok(())
    }

    /// Register a guarded transition edge on `source`.
    pub fn add_edge(&mut self, source: StateId, target: StateId, guard: Guard) -> Result<()> {
        if !self.nodes.contains_key(&target) {
            return Err(Error::UnknownState(target));
        }
        let node = self
            .nodes
            .get_mut(&source)
            .ok_or(Error::UnknownState(source))?;
        node.edges.push(TransitionEdge {
            source,
            target,
            guard,
        });
        Ok(())
    }

    // === Activity ===

    /// Enter a state: mark it active, and recursively enter its entry state
    /// (exclusive machine) or all children (orthogonal machine). Entering an
    /// already-active state is a silent no-op. Returns the entered states,
    /// parents first.
    pub fn enter(&mut self, id: StateId) -> Result<Vec<StateId>> {
        if !self.nodes.contains_key(&id) {
            return Err(Error::UnknownState(id));
        }
        let mut entered = Vec::new();
        self.enter_inner(id, &mut entered);
        Ok(entered)
    }

    fn enter_inner(&mut self, id: StateId, out: &mut Vec<StateId>) {
        let descend = {
            let Some(node) = self.nodes.get_mut(&id) else {
                return;
            };
            if node.active {
                return;
            }
            node.active = true;
            match &mut node.kind {
                StateKind::Leaf => Descend::None,
                StateKind::Machine { entry, active } => {
                    *active = *entry;
                    match *entry {
                        Some(child) => Descend::One(child),
                        None => Descend::None,
                    }
                }
                StateKind::Orthogonal => Descend::Many(node.children.clone()),
            }
        };
        out.push(id);
        match descend {
            Descend::None => {}
            Descend::One(child) => self.enter_inner(child, out),
            Descend::Many(children) => {
                for child in children {
                    self.enter_inner(child, out);
                }
            }
        }
    }

    /// Leave a state: recursively leave its active descendants, then mark it
    /// inactive. Leaving an inactive state is a silent no-op. If the state's
    /// parent is an exclusive machine pointing at it, the pointer is
    /// cleared. Returns the left states, children first.
    pub fn leave(&mut self, id: StateId) -> Result<Vec<StateId>> {
        if !self.nodes.contains_key(&id) {
            return Err(Error::UnknownState(id));
        }
        let mut left = Vec::new();
        self.leave_inner(id, &mut left);
        if let Some(parent) = self.nodes[&id].parent {
            if let Some(pnode) = self.nodes.get_mut(&parent) {
                if let StateKind::Machine { active, .. } = &mut pnode.kind {
                    if *active == Some(id) {
                        *active = None;
                    }
                }
            }
        }
        Ok(left)
    }

    fn leave_inner(&mut self, id: StateId, out: &mut Vec<StateId>) {
        let descend = {
            let Some(node) = self.nodes.get_mut(&id) else {
                return;
            };
            if !node.active {
                return;
            }
            match &mut node.kind {
                StateKind::Leaf => Descend::None,
                StateKind::Machine { active, .. } => match active.take() {
                    Some(child) => Descend::One(child),
                    None => Descend::None,
                },
                StateKind::Orthogonal => Descend::Many(node.children.clone()),
            }
        };
        match descend {
            Descend::None => {}
            Descend::One(child) => self.leave_inner(child, out),
            Descend::Many(children) => {
                for child in children {
                    self.leave_inner(child, out);
                }
            }
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.active = false;
        }
        out.push(id);
    }

    /// Legality guard for entering a specific child without traversing
    /// edges. True only if `candidate` is a direct child of `parent` and
    /// entering it would not bypass the parent's own selection: for an
    /// exclusive machine the candidate must be the current active child, or
    /// the entry state while no child is active. Orthogonal machines accept
    /// any direct child.
    pub fn can_enter_sub_state_directly(&self, parent: StateId, candidate: StateId) -> bool {
        let (Some(pnode), Some(cnode)) = (self.nodes.get(&parent), self.nodes.get(&candidate))
        else {
            return false;
        };
        if cnode.parent != Some(parent) {
            return false;
        }
        match pnode.kind {
            StateKind::Leaf => false,
            StateKind::Orthogonal => true,
            StateKind::Machine { entry, active } => {
                log::debug!("machine {parent}: active {active:?}, entry {entry:?}");
                (active.is_none() && entry == Some(candidate)) || active == Some(candidate)
            }
        }
    }

    /// Manually enter a direct child of an active composite, honoring
    /// [`can_enter_sub_state_directly`](Self::can_enter_sub_state_directly).
    pub fn enter_child(&mut self, parent: StateId, child: StateId) -> Result<Vec<StateId>> {
        if !self.nodes.contains_key(&parent) {
            return Err(Error::UnknownState(parent));
        }
        if !self.nodes.contains_key(&child) {
            return Err(Error::UnknownState(child));
        }
        if !self.nodes[&parent].active || !self.can_enter_sub_state_directly(parent, child) {
            return Err(Error::IllegalTransition {
                source: parent,
                target: child,
            });
        }
        self.set_active_child(parent, child);
        let mut entered = Vec::new();
        self.enter_inner(child, &mut entered);
        Ok(entered)
    }

    fn set_active_child(&mut self, id: StateId, child: StateId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            if let StateKind::Machine { active, .. } = &mut node.kind {
                *active = Some(child);
            }
        }
    }

    // === Traversal ===

    /// Lazy sequence of currently active leaf states, in tree order.
    pub fn active_leaf_states(&self) -> ActiveLeaves<'_> {
        self.active_leaf_states_from(self.root)
    }

    /// Active leaf states of the subtree rooted at `id`.
    pub fn active_leaf_states_from(&self, id: StateId) -> ActiveLeaves<'_> {
        ActiveLeaves {
            graph: self,
            stack: vec![id],
        }
    }

    /// Leaf states reachable by always following each machine's entry
    /// state, without touching activity.
    pub fn leaf_entry_states(&self, id: StateId) -> EntryLeaves<'_> {
        EntryLeaves {
            graph: self,
            stack: vec![id],
        }
    }

    /// Every transition edge in the subtree rooted at `id`, in preorder:
    /// a state's own edges before its children's.
    pub fn all_transition_edges(&self, id: StateId) -> TransitionEdges<'_> {
        TransitionEdges {
            graph: self,
            stack: vec![id],
            edges: [].iter(),
        }
    }

    /// Edge references for the whole tree in evaluation order.
    pub fn transition_candidates(&self) -> Vec<EdgeRef> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            for (index, edge) in node.edges.iter().enumerate() {
                out.push(EdgeRef {
                    source: id,
                    index,
                    target: edge.target,
                });
            }
            for &child in node.children.iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// Guard of the referenced edge, if it still exists.
    pub fn edge_guard(&self, edge: EdgeRef) -> Option<&Guard> {
        self.nodes
            .get(&edge.source)?
            .edges
            .get(edge.index)
            .map(|e| &e.guard)
    }

    // === Transitions ===

    /// Move activity from `source` to `target` along the minimal differing
    /// path: the lowest common ancestor's current branch is left, then the
    /// path down to the target is entered, forcing each intermediate
    /// machine's selection. Fails with [`Error::IllegalTransition`] when the
    /// source is inactive, the target is already active, or the branch
    /// point is not an exclusive machine.
    pub fn fire_transition(&mut self, source: StateId, target: StateId) -> Result<TransitionOutcome> {
        let src = self.nodes.get(&source).ok_or(Error::UnknownState(source))?;
        if !src.active {
            return Err(Error::IllegalTransition { source, target });
        }
        let tgt = self.nodes.get(&target).ok_or(Error::UnknownState(target))?;
        if tgt.active {
            return Err(Error::IllegalTransition { source, target });
        }

        let target_chain = self.ancestor_chain(target);
        let source_chain = self.ancestor_chain(source);
        let lca_pos = target_chain
            .iter()
            .position(|id| source_chain.contains(id))
            .ok_or(Error::IllegalTransition { source, target })?;
        let lca = target_chain[lca_pos];
        // Path from the LCA's child down to the target.
        let mut path: Vec<StateId> = target_chain[..lca_pos].to_vec();
        path.reverse();

        let mut cursor = lca;
        for (i, &next) in path.iter().enumerate() {
            match self.nodes[&cursor].kind {
                StateKind::Machine { active, .. } => {
                    if active == Some(next) {
                        cursor = next;
                        continue;
                    }
                    // Branch point: switch this machine's selection.
                    let mut outcome = TransitionOutcome::default();
                    if let Some(current) = active {
                        self.leave_inner(current, &mut outcome.left);
                    }
                    self.set_active_child(cursor, next);
                    self.enter_forced(&path[i..], &mut outcome.entered);
                    return Ok(outcome);
                }
                StateKind::Orthogonal => {
                    if self.nodes[&next].active {
                        cursor = next;
                        continue;
                    }
                    // Region added after its parent entered: additive entry.
                    let mut outcome = TransitionOutcome::default();
                    self.enter_forced(&path[i..], &mut outcome.entered);
                    return Ok(outcome);
                }
                StateKind::Leaf => {
                    return Err(Error::IllegalTransition { source, target });
                }
            }
        }
        // The whole path was already active, so the target was too.
        Err(Error::IllegalTransition { source, target })
    }

    /// Enter `path[0]`, forcing each machine on the path to select the next
    /// path node instead of its entry state. Off-path descent follows
    /// normal entry semantics.
    fn enter_forced(&mut self, path: &[StateId], out: &mut Vec<StateId>) {
        let Some(&id) = path.first() else {
            return;
        };
        if let Some(node) = self.nodes.get_mut(&id) {
            if !node.active {
                node.active = true;
                out.push(id);
            }
        } else {
            return;
        }
        match self.nodes[&id].kind {
            StateKind::Leaf => {}
            StateKind::Machine { entry, .. } => {
                if path.len() > 1 {
                    self.set_active_child(id, path[1]);
                    self.enter_forced(&path[1..], out);
                } else if let Some(entry) = entry {
                    self.set_active_child(id, entry);
                    self.enter_inner(entry, out);
                }
            }
            StateKind::Orthogonal => {
                let children = self.nodes[&id].children.clone();
                let forced = path.get(1).copied();
                for child in children {
                    if Some(child) == forced {
                        self.enter_forced(&path[1..], out);
                    } else {
                        self.enter_inner(child, out);
                    }
                }
            }
        }
    }

    /// Chain of ids from `id` up to the root, `id` first.
    fn ancestor_chain(&self, id: StateId) -> Vec<StateId> {
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            chain.push(current);
            cursor = self.nodes.get(&current).and_then(|n| n.parent);
        }
        chain
    }
}

/// DFS iterator over currently active leaf states.
pub struct ActiveLeaves<'a> {
    graph: &'a StateGraph,
    stack: Vec<StateId>,
}

impl Iterator for ActiveLeaves<'_> {
    type Item = StateId;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.stack.pop() {
            let Some(node) = self.graph.nodes.get(&id) else {
                continue;
            };
            if !node.active {
                continue;
            }
            match node.kind {
                StateKind::Leaf => return Some(id),
                StateKind::Machine { active, .. } => {
                    if let Some(child) = active {
                        self.stack.push(child);
                    }
                }
                StateKind::Orthogonal => {
                    for &child in node.children.iter().rev() {
                        self.stack.push(child);
                    }
                }
            }
        }
        None
    }
}

/// DFS iterator over the leaves of the default entry path.
pub struct EntryLeaves<'a> {
    graph: &'a StateGraph,
    stack: Vec<StateId>,
}

impl Iterator for EntryLeaves<'_> {
    type Item = StateId;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.stack.pop() {
            let Some(node) = self.graph.nodes.get(&id) else {
                continue;
            };
            match node.kind {
                StateKind::Leaf => return Some(id),
                StateKind::Machine { entry, .. } => {
                    if let Some(child) = entry {
                        self.stack.push(child);
                    }
                }
                StateKind::Orthogonal => {
                    for &child in node.children.iter().rev() {
                        self.stack.push(child);
                    }
                }
            }
        }
        None
    }
}

/// Preorder iterator over every transition edge in a subtree.
pub struct TransitionEdges<'a> {
    graph: &'a StateGraph,
    stack: Vec<StateId>,
    edges: std::slice::Iter<'a, TransitionEdge>,
}

impl<'a> Iterator for TransitionEdges<'a> {
    type Item = &'a TransitionEdge;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(edge) = self.edges.next() {
                return Some(edge);
            }
            let id = self.stack.pop()?;
            let Some(node) = self.graph.nodes.get(&id) else {
                continue;
            };
            for &child in node.children.iter().rev() {
                self.stack.push(child);
            }
            self.edges = node.edges.iter();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn always() -> Guard {
        Guard::native(|| true)
    }

    /// Root(orthogonal) -> M(machine) -> [S1 (entry), S2].
    fn two_state_machine() -> (StateGraph, StateId, StateId, StateId) {
        let mut graph = StateGraph::new(StateId::new(0), "root");
        let m = graph
            .add_machine(StateId::new(1), graph.root(), "m")
            .unwrap();
        let s1 = graph.add_leaf(StateId::new(2), m, "s1").unwrap();
        let s2 = graph.add_leaf(StateId::new(3), m, "s2").unwrap();
        (graph, m, s1, s2)
    }

    #[test]
    fn test_first_child_becomes_entry_state() {
        let (graph, m, s1, _) = two_state_machine();
        match graph.node(m).unwrap().kind() {
            StateKind::Machine { entry, .. } => assert_eq!(entry, Some(s1)),
            _ => panic!("expected machine"),
        }
    }

    #[test]
    fn test_entry_state_is_immutable() {
        let (mut graph, m, s1, s2) = two_state_machine();
        graph.set_entry_state(m, s2).unwrap();
        match graph.node(m).unwrap().kind() {
            StateKind::Machine { entry, .. } => assert_eq!(entry, Some(s1)),
            _ => panic!("expected machine"),
        }
    }

    #[test]
    fn test_add_child_to_leaf_fails() {
        let (mut graph, _, s1, _) = two_state_machine();
        let result = graph.add_leaf(StateId::new(9), s1, "x");
        assert!(matches!(result, Err(Error::NotComposite(_))));
    }

    #[test]
    fn test_enter_activates_entry_chain() {
        let (mut graph, m, s1, s2) = two_state_machine();
        let entered = graph.enter(graph.root()).unwrap();
        assert_eq!(entered, vec![graph.root(), m, s1]);
        assert!(graph.is_active(s1));
        assert!(!graph.is_active(s2));
    }

    #[test]
    fn test_at_most_one_active_child() {
        let (mut graph, m, s1, s2) = two_state_machine();
        graph.enter(graph.root()).unwrap();
        let active_children = [s1, s2]
            .iter()
            .filter(|&&s| graph.is_active(s))
            .count();
        assert_eq!(active_children, 1);
        match graph.node(m).unwrap().kind() {
            StateKind::Machine { active, .. } => assert_eq!(active, Some(s1)),
            _ => panic!("expected machine"),
        }
    }

    #[test]
    fn test_enter_is_idempotent() {
        let (mut graph, _, _, _) = two_state_machine();
        graph.enter(graph.root()).unwrap();
        let entered = graph.enter(graph.root()).unwrap();
        assert!(entered.is_empty());
    }

    #[test]
    fn test_enter_leave_round_trip() {
        let (mut graph, m, s1, s2) = two_state_machine();
        graph.enter(graph.root()).unwrap();
        let left = graph.leave(graph.root()).unwrap();
        // Children first on the way out.
        assert_eq!(left, vec![s1, m, graph.root()]);
        for id in [graph.root(), m, s1, s2] {
            assert!(!graph.is_active(id));
        }
        match graph.node(m).unwrap().kind() {
            StateKind::Machine { active, .. } => assert_eq!(active, None),
            _ => panic!("expected machine"),
        }
    }

    #[test]
    fn test_leave_is_idempotent() {
        let (mut graph, _, _, _) = two_state_machine();
        let left = graph.leave(graph.root()).unwrap();
        assert!(left.is_empty());
    }

    #[test]
    fn test_leave_child_clears_parent_selection() {
        let (mut graph, m, s1, _) = two_state_machine();
        graph.enter(graph.root()).unwrap();
        graph.leave(s1).unwrap();
        match graph.node(m).unwrap().kind() {
            StateKind::Machine { active, .. } => assert_eq!(active, None),
            _ => panic!("expected machine"),
        }
        assert!(graph.is_active(m));
    }

    #[test]
    fn test_orthogonal_enters_all_children() {
        let mut graph = StateGraph::new(StateId::new(0), "root");
        let o = graph
            .add_orthogonal(StateId::new(1), graph.root(), "o")
            .unwrap();
        let a = graph.add_leaf(StateId::new(2), o, "a").unwrap();
        let b = graph.add_leaf(StateId::new(3), o, "b").unwrap();

        graph.enter(graph.root()).unwrap();
        assert!(graph.is_active(a));
        assert!(graph.is_active(b));
    }

    #[test]
    fn test_can_enter_sub_state_directly() {
        let (mut graph, m, s1, s2) = two_state_machine();
        // Not a child of the receiver.
        assert!(!graph.can_enter_sub_state_directly(graph.root(), s1));
        // No child active: only the entry state is enterable.
        assert!(graph.can_enter_sub_state_directly(m, s1));
        assert!(!graph.can_enter_sub_state_directly(m, s2));

        graph.enter(graph.root()).unwrap();
        // The active child stays enterable (a no-op), its siblings do not.
        assert!(graph.can_enter_sub_state_directly(m, s1));
        assert!(!graph.can_enter_sub_state_directly(m, s2));
    }

    #[test]
    fn test_transition_scenario() {
        // Enter activates s1; firing s1 -> s2 flips which child is enterable.
        let (mut graph, m, s1, s2) = two_state_machine();
        graph.add_edge(s1, s2, always()).unwrap();
        graph.enter(graph.root()).unwrap();
        assert!(graph.is_active(s1));
        assert!(!graph.is_active(s2));

        let outcome = graph.fire_transition(s1, s2).unwrap();
        assert_eq!(outcome.left, vec![s1]);
        assert_eq!(outcome.entered, vec![s2]);
        assert!(!graph.is_active(s1));
        assert!(graph.is_active(s2));
        assert!(!graph.can_enter_sub_state_directly(m, s1));
        assert!(graph.can_enter_sub_state_directly(m, s2));
    }

    #[test]
    fn test_transition_from_inactive_source_is_illegal() {
        let (mut graph, _, s1, s2) = two_state_machine();
        let result = graph.fire_transition(s1, s2);
        assert!(matches!(result, Err(Error::IllegalTransition { .. })));
    }

    #[test]
    fn test_transition_to_active_target_is_illegal() {
        let (mut graph, _, s1, s2) = two_state_machine();
        graph.enter(graph.root()).unwrap();
        let result = graph.fire_transition(s2, s1);
        assert!(matches!(result, Err(Error::IllegalTransition { .. })));
    }

    #[test]
    fn test_transition_into_nested_machine() {
        // M -> [S1 (entry), N -> [N1 (entry), N2]]; edge S1 -> N2 must
        // switch M to N and force N's selection to N2, not N1.
        let mut graph = StateGraph::new(StateId::new(0), "root");
        let m = graph
            .add_machine(StateId::new(1), graph.root(), "m")
            .unwrap();
        let s1 = graph.add_leaf(StateId::new(2), m, "s1").unwrap();
        let n = graph.add_machine(StateId::new(3), m, "n").unwrap();
        let n1 = graph.add_leaf(StateId::new(4), n, "n1").unwrap();
        let n2 = graph.add_leaf(StateId::new(5), n, "n2").unwrap();

        graph.enter(graph.root()).unwrap();
        let outcome = graph.fire_transition(s1, n2).unwrap();
        assert_eq!(outcome.left, vec![s1]);
        assert_eq!(outcome.entered, vec![n, n2]);
        assert!(graph.is_active(n2));
        assert!(!graph.is_active(n1));
        assert!(!graph.is_active(s1));
    }

    #[test]
    fn test_transition_out_of_nested_machine() {
        let mut graph = StateGraph::new(StateId::new(0), "root");
        let m = graph
            .add_machine(StateId::new(1), graph.root(), "m")
            .unwrap();
        let n = graph.add_machine(StateId::new(2), m, "n").unwrap();
        let n1 = graph.add_leaf(StateId::new(3), n, "n1").unwrap();
        let s2 = graph.add_leaf(StateId::new(4), m, "s2").unwrap();

        graph.enter(graph.root()).unwrap();
        assert!(graph.is_active(n1));
        let outcome = graph.fire_transition(n1, s2).unwrap();
        // The whole nested branch is left, children first.
        assert_eq!(outcome.left, vec![n1, n]);
        assert_eq!(outcome.entered, vec![s2]);
    }

    #[test]
    fn test_active_leaf_states() {
        let mut graph = StateGraph::new(StateId::new(0), "root");
        let o = graph
            .add_orthogonal(StateId::new(1), graph.root(), "o")
            .unwrap();
        let a = graph.add_leaf(StateId::new(2), o, "a").unwrap();
        let m = graph.add_machine(StateId::new(3), o, "m").unwrap();
        let b = graph.add_leaf(StateId::new(4), m, "b").unwrap();
        graph.add_leaf(StateId::new(5), m, "c").unwrap();

        assert_eq!(graph.active_leaf_states().count(), 0);
        graph.enter(graph.root()).unwrap();
        let leaves: Vec<StateId> = graph.active_leaf_states().collect();
        assert_eq!(leaves, vec![a, b]);
    }

    #[test]
    fn test_leaf_entry_states_do_not_mutate_activity() {
        let (graph, _, s1, _) = two_state_machine();
        let leaves: Vec<StateId> = graph.leaf_entry_states(graph.root()).collect();
        assert_eq!(leaves, vec![s1]);
        assert!(!graph.is_active(s1));
    }

    #[test]
    fn test_all_transition_edges_preorder() {
        let (mut graph, m, s1, s2) = two_state_machine();
        graph.add_edge(m, s1, always()).unwrap();
        graph.add_edge(s1, s2, always()).unwrap();
        graph.add_edge(s2, s1, always()).unwrap();

        let pairs: Vec<(StateId, StateId)> = graph
            .all_transition_edges(graph.root())
            .map(|e| (e.source, e.target))
            .collect();
        assert_eq!(pairs, vec![(m, s1), (s1, s2), (s2, s1)]);

        let candidates = graph.transition_candidates();
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0].source, m);
        assert!(graph.edge_guard(candidates[0]).is_some());
    }
}
