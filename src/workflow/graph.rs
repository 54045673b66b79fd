//! Topological ordering of step nodes.
//!
//! Kahn's algorithm over the node/edge set. The ready queue is seeded and
//! drained in caller-supplied node order, so the resulting order is
//! deterministic for a given input: ties between independent nodes always
//! resolve to author order.

use std::collections::{HashMap, VecDeque};

use crate::error::{Error, Result};

use super::types::{Edge, Node};

/// Compute a deterministic topological order of `nodes` under `edges`.
///
/// Returns the nodes in an order where every edge's source precedes its
/// target. Runs in O(V+E). Fails with `Error::Cycle` naming one implicated
/// node if the graph is not a DAG, and with `Error::Validation` if an edge
/// references an unknown node.
pub fn sort(nodes: &[Node], edges: &[Edge]) -> Result<Vec<Node>> {
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    if index.len() != nodes.len() {
        let dup = nodes
            .iter()
            .enumerate()
            .find(|(i, n)| index[n.id.as_str()] != *i)
            .map(|(_, n)| n.id.clone())
            .unwrap_or_default();
        return Err(Error::Validation(format!("Duplicate node id '{}'", dup)));
    }

    let mut in_degree = vec![0usize; nodes.len()];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

    for edge in edges {
        let source = *index.get(edge.source.as_str()).ok_or_else(|| {
            Error::Validation(format!("Edge references unknown node '{}'", edge.source))
        })?;
        let target = *index.get(edge.target.as_str()).ok_or_else(|| {
            Error::Validation(format!("Edge references unknown node '{}'", edge.target))
        })?;
        children[source].push(target);
        in_degree[target] += 1;
    }

    // Seed in input order; the FIFO keeps that order among ready nodes.
    let mut queue: VecDeque<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(i) = queue.pop_front() {
        order.push(i);
        for &child in &children[i] {
            in_degree[child] -= 1;
            if in_degree[child] == 0 {
                queue.push_back(child);
            }
        }
    }

    if order.len() < nodes.len() {
        // Any node still holding in-degree is on or downstream of a cycle;
        // report the first such node in input order.
        let node = nodes
            .iter()
            .enumerate()
            .find(|(i, _)| in_degree[*i] > 0)
            .map(|(_, n)| n.id.clone())
            .unwrap_or_default();
        return Err(Error::Cycle { node });
    }

    Ok(order.into_iter().map(|i| nodes[i].clone()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> Node {
        Node::new(id, id.to_uppercase(), "demo")
    }

    #[test]
    fn test_sort_respects_edges() {
        let nodes = vec![node("c"), node("a"), node("b")];
        let edges = vec![Edge::new("a", "b"), Edge::new("b", "c")];

        let order = sort(&nodes, &edges).unwrap();
        let ids: Vec<&str> = order.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_sort_every_node_exactly_once() {
        let nodes = vec![node("a"), node("b"), node("c"), node("d")];
        let edges = vec![Edge::new("a", "c"), Edge::new("b", "d")];

        let order = sort(&nodes, &edges).unwrap();
        assert_eq!(order.len(), 4);
        let mut ids: Vec<&str> = order.iter().map(|n| n.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_ties_resolve_to_input_order() {
        // No edges at all: output must equal input order.
        let nodes = vec![node("z"), node("m"), node("a")];
        let order = sort(&nodes, &[]).unwrap();
        let ids: Vec<&str> = order.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "m", "a"]);
    }

    #[test]
    fn test_diamond_keeps_branches_after_root() {
        let nodes = vec![node("a"), node("b"), node("c")];
        let edges = vec![Edge::new("a", "b"), Edge::new("a", "c")];

        let order = sort(&nodes, &edges).unwrap();
        let ids: Vec<&str> = order.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids[0], "a");
        assert!(ids.contains(&"b") && ids.contains(&"c"));
    }

    #[test]
    fn test_cycle_returns_error_and_no_order() {
        let nodes = vec![node("a"), node("b")];
        let edges = vec![Edge::new("a", "b"), Edge::new("b", "a")];

        let err = sort(&nodes, &edges).unwrap_err();
        match err {
            Error::Cycle { node } => assert!(node == "a" || node == "b"),
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_self_edge_is_a_cycle() {
        let nodes = vec![node("a")];
        let edges = vec![Edge::new("a", "a")];
        assert!(matches!(sort(&nodes, &edges), Err(Error::Cycle { .. })));
    }

    #[test]
    fn test_unknown_edge_endpoint() {
        let nodes = vec![node("a")];
        let edges = vec![Edge::new("a", "ghost")];
        assert!(matches!(sort(&nodes, &edges), Err(Error::Validation(_))));
    }

    #[test]
    fn test_duplicate_node_id() {
        let nodes = vec![node("a"), node("a")];
        assert!(matches!(sort(&nodes, &[]), Err(Error::Validation(_))));
    }
}
