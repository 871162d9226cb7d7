//! Graphviz export of a state graph for debugging chart scripts.
//!
//! Composites become `cluster_` subgraphs, leaves become plain nodes, and a
//! machine's entry state is drawn with a double circle. Active states are
//! green. Transition edges are emitted once, after the whole tree.

use std::io::{self, Write};

use super::graph::{StateGraph, StateId, StateKind};

/// Node name in the emitted graph. Composites get the `cluster_` prefix so
/// graphviz lays them out as subgraphs.
fn node_name(graph: &StateGraph, id: StateId) -> String {
    match graph.node(id).map(|n| n.kind()) {
        Some(StateKind::Leaf) | None => format!("s{}", id.as_u64()),
        Some(_) => format!("cluster_{}", id.as_u64()),
    }
}

fn color(active: bool) -> &'static str {
    if active {
        "green"
    } else {
        "black"
    }
}

/// Write the whole graph as a `digraph`.
pub fn write_dot<W: Write>(graph: &StateGraph, out: &mut W) -> io::Result<()> {
    writeln!(out, "digraph states {{")?;
    write_state(graph, graph.root(), out)?;
    for edge in graph.all_transition_edges(graph.root()) {
        writeln!(
            out,
            "{} -> {}",
            node_name(graph, edge.source),
            node_name(graph, edge.target)
        )?;
    }
    writeln!(out, "}}")
}

fn write_state<W: Write>(graph: &StateGraph, id: StateId, out: &mut W) -> io::Result<()> {
    let Some(node) = graph.node(id) else {
        return Ok(());
    };
    match node.kind() {
        StateKind::Leaf => {
            writeln!(
                out,
                "{} [label=\"{}\", color={}]",
                node_name(graph, id),
                node.name(),
                color(node.is_active())
            )
        }
        kind => {
            writeln!(out, "subgraph {} {{", node_name(graph, id))?;
            writeln!(out, "style = solid;")?;
            writeln!(out, "color = {}", color(node.is_active()))?;
            writeln!(out, "node [style=solid];")?;
            writeln!(out, "label = \"{}\";", node.name())?;
            for &child in node.children() {
                write_state(graph, child, out)?;
            }
            if let StateKind::Machine {
                entry: Some(entry), ..
            } = kind
            {
                writeln!(out, "{} [shape=doublecircle]", node_name(graph, entry))?;
            }
            writeln!(out, "}}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Guard;

    #[test]
    fn test_dot_output_shape() {
        let mut graph = StateGraph::new(StateId::new(0), "root");
        let m = graph
            .add_machine(StateId::new(1), graph.root(), "m")
            .unwrap();
        let s1 = graph.add_leaf(StateId::new(2), m, "s1").unwrap();
        let s2 = graph.add_leaf(StateId::new(3), m, "s2").unwrap();
        graph.add_edge(s1, s2, Guard::native(|| true)).unwrap();
        graph.enter(graph.root()).unwrap();

        let mut buf = Vec::new();
        write_dot(&graph, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.starts_with("digraph states {"));
        assert!(text.contains("subgraph cluster_1 {"));
        assert!(text.contains("label = \"m\";"));
        // Entry state of the machine is double-circled.
        assert!(text.contains("s2 [shape=doublecircle]"));
        // Active leaf is green, inactive sibling black.
        assert!(text.contains("s2 [label=\"s1\", color=green]"));
        assert!(text.contains("s3 [label=\"s2\", color=black]"));
        assert!(text.contains("s2 -> s3"));
    }
}
