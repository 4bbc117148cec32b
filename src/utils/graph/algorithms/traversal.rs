//! Graph traversal algorithms.
//!
//! This module provides depth-first traversal orders for directed graphs. These are
//! the building blocks for dominance and loop analysis and for every pass that walks
//! blocks in a deterministic order.
//!
//! # Algorithms
//!
//! - [`postorder`] - Depth-first search with post-order visitation
//! - [`reverse_postorder`] - Reverse post-order (useful for forward data flow)
//! - [`reachable`] - Reachability mask from a start node
//!
//! Successors are visited in edge order, so for a control-flow graph the taken
//! branch target is explored before the fall-through target. Both orders are
//! therefore deterministic for a given graph.

use crate::utils::graph::{NodeId, Successors};

/// Computes the post-order traversal of nodes reachable from `start`.
///
/// A node is emitted after all of its DFS descendants. Nodes that are not
/// reachable from `start` do not appear.
///
/// # Arguments
///
/// * `graph` - The graph to traverse
/// * `start` - The starting node for traversal
///
/// # Complexity
///
/// - Time: O(V + E)
/// - Space: O(V)
#[allow(clippy::items_after_statements)]
pub fn postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let node_count = graph.node_count();

    // Validate start node - return empty vec if invalid
    if start.index() >= node_count {
        return Vec::new();
    }

    let mut visited = vec![false; node_count];
    let mut result = Vec::with_capacity(node_count);

    // Iterative postorder using explicit stack with state
    #[derive(Clone, Copy)]
    enum State {
        Enter,
        Exit,
    }

    let mut stack = vec![(start, State::Enter)];

    while let Some((node, state)) = stack.pop() {
        match state {
            State::Enter => {
                if visited[node.index()] {
                    continue;
                }
                visited[node.index()] = true;

                // Push exit state for this node (will be processed after children)
                stack.push((node, State::Exit));

                // Push children in reverse order so they're processed in order
                let successors: Vec<NodeId> = graph.successors(node).collect();
                for &succ in successors.iter().rev() {
                    if !visited[succ.index()] {
                        stack.push((succ, State::Enter));
                    }
                }
            }
            State::Exit => {
                result.push(node);
            }
        }
    }

    result
}

/// Computes the reverse postorder traversal of nodes reachable from the start.
///
/// Reverse postorder (RPO) is the reverse of postorder: in an acyclic region a node
/// comes before any of its successors. This is the preferred iteration order for
/// forward data flow analysis and for the dominator fixpoint.
pub fn reverse_postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let mut result = postorder(graph, start);
    result.reverse();
    result
}

/// Returns a mask with `true` for every node reachable from `start`.
pub fn reachable<G: Successors>(graph: &G, start: NodeId) -> Vec<bool> {
    let mut seen = vec![false; graph.node_count()];
    if start.index() >= seen.len() {
        return seen;
    }

    let mut stack = vec![start];
    seen[start.index()] = true;
    while let Some(node) = stack.pop() {
        for succ in graph.successors(node) {
            if !seen[succ.index()] {
                seen[succ.index()] = true;
                stack.push(succ);
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use crate::utils::graph::{
        algorithms::traversal::{postorder, reachable, reverse_postorder},
        testing::AdjacencyGraph,
        NodeId,
    };

    fn ids(raw: &[usize]) -> Vec<NodeId> {
        raw.iter().copied().map(NodeId::new).collect()
    }

    #[test]
    fn test_postorder_linear() {
        let graph = AdjacencyGraph::new(3, &[(0, 1), (1, 2)]);
        assert_eq!(postorder(&graph, NodeId::new(0)), ids(&[2, 1, 0]));
    }

    #[test]
    fn test_reverse_postorder_diamond() {
        let graph = AdjacencyGraph::new(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let rpo = reverse_postorder(&graph, NodeId::new(0));
        assert_eq!(rpo[0], NodeId::new(0));
        assert_eq!(rpo[3], NodeId::new(3));
        assert_eq!(rpo.len(), 4);
    }

    #[test]
    fn test_reverse_postorder_cycle() {
        let graph = AdjacencyGraph::new(4, &[(0, 1), (1, 2), (2, 1), (2, 3)]);
        assert_eq!(reverse_postorder(&graph, NodeId::new(0)), ids(&[0, 1, 2, 3]));
    }

    #[test]
    fn test_unreachable_nodes_are_skipped() {
        let graph = AdjacencyGraph::new(4, &[(0, 1), (2, 3)]);
        assert_eq!(postorder(&graph, NodeId::new(0)), ids(&[1, 0]));
        assert_eq!(reachable(&graph, NodeId::new(0)), vec![true, true, false, false]);
    }

    #[test]
    fn test_invalid_start() {
        let graph = AdjacencyGraph::new(2, &[(0, 1)]);
        assert!(postorder(&graph, NodeId::new(5)).is_empty());
    }
}
