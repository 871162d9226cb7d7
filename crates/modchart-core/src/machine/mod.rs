//! Hierarchical state machines.
//!
//! - [`graph`] holds the state arena, activity tracking, and transitions.
//! - [`dot`] renders a graph in graphviz format for debugging.

mod graph;

pub mod dot;

pub use graph::{
    ActiveLeaves, EdgeRef, EntryLeaves, HookKind, StateGraph, StateHooks, StateId, StateKind,
    StateNode, TransitionEdge, TransitionEdges, TransitionOutcome,
};
