//! Trait definitions for graph abstractions.
//!
//! This module defines the core traits that enable graph algorithms to work with
//! different graph implementations. By programming against these traits, algorithms
//! can be reused across various graph types without modification.
//!
//! # Architecture
//!
//! The trait hierarchy is designed to be minimal and composable:
//!
//! - [`GraphBase`] - Core properties: node count and node iteration
//! - [`Successors`] - Forward edge traversal (outgoing edges)
//! - [`Predecessors`] - Backward edge traversal (incoming edges)
//! - [`RootedGraph`] - Graphs with a designated entry node (for dominator computation)
//!
//! All adjacency queries return iterators rather than collections, enabling lazy
//! evaluation and avoiding unnecessary allocations for simple traversals.

use crate::utils::graph::NodeId;

/// Base trait providing core graph properties.
///
/// Node ids are dense: every id in `0..node_count()` is valid, although a
/// concrete graph may report nodes without edges (for example removed blocks).
pub trait GraphBase {
    /// Returns the number of node slots in the graph.
    fn node_count(&self) -> usize;

    /// Returns an iterator over all node identifiers in the graph.
    ///
    /// The iteration order is by ascending `NodeId` index.
    fn node_ids(&self) -> impl Iterator<Item = NodeId>;
}

/// Trait for graphs that support forward edge traversal.
pub trait Successors: GraphBase {
    /// Returns an iterator over the successor nodes of the given node.
    ///
    /// For a directed edge `(u, v)`, node `v` is a successor of `u`. Successors are
    /// yielded in edge order, which for a control-flow graph is the branch order
    /// (taken target first).
    ///
    /// # Panics
    ///
    /// May panic if `node` is not a valid node in the graph.
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// Trait for graphs that support backward edge traversal.
pub trait Predecessors: GraphBase {
    /// Returns an iterator over the predecessor nodes of the given node.
    ///
    /// For a directed edge `(u, v)`, node `u` is a predecessor of `v`.
    ///
    /// # Panics
    ///
    /// May panic if `node` is not a valid node in the graph.
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// Trait for graphs with a designated entry (root) node.
///
/// This is essential for algorithms like dominator computation that require a
/// well-defined starting point. For the IR graph the entry is the synthetic start
/// block.
pub trait RootedGraph: Successors + Predecessors {
    /// Returns the entry (root) node of the graph.
    fn entry(&self) -> NodeId;
}

#[cfg(test)]
mod tests {
    use crate::utils::graph::{
        testing::AdjacencyGraph, GraphBase, NodeId, Predecessors, RootedGraph, Successors,
    };

    #[test]
    fn test_graph_base() {
        let graph = AdjacencyGraph::new(3, &[(0, 1), (1, 2)]);
        assert_eq!(graph.node_count(), 3);
        let ids: Vec<_> = graph.node_ids().collect();
        assert_eq!(ids, vec![NodeId::new(0), NodeId::new(1), NodeId::new(2)]);
    }

    #[test]
    fn test_successors_and_predecessors() {
        let graph = AdjacencyGraph::new(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);

        let succs: Vec<_> = graph.successors(NodeId::new(0)).collect();
        assert_eq!(succs, vec![NodeId::new(1), NodeId::new(2)]);

        let preds: Vec<_> = graph.predecessors(NodeId::new(3)).collect();
        assert_eq!(preds, vec![NodeId::new(1), NodeId::new(2)]);
    }

    #[test]
    fn test_rooted_graph() {
        let graph = AdjacencyGraph::new(2, &[(0, 1)]);
        assert_eq!(graph.entry(), NodeId::new(0));
    }
}
