//! Dominator tree computation using the iterative Cooper-Harvey-Kennedy algorithm.
//!
//! A node `d` **dominates** a node `n` if every path from the entry node to `n`
//! must pass through `d`. The **immediate dominator** of `n` (idom(n)) is the
//! unique node that strictly dominates `n` but does not strictly dominate any
//! other dominator of `n`. Making each node's immediate dominator its parent
//! yields the dominator tree rooted at the entry.
//!
//! # Algorithm
//!
//! Nodes are numbered in reverse post-order. Starting from `idom(entry) = entry`,
//! every other node takes the intersection of its already-processed predecessors,
//! where the intersection walks both fingers up the current tree by RPO number.
//! The pass repeats until no immediate dominator changes. Reducible graphs
//! converge in two passes; irreducible graphs need a few more.
//!
//! Nodes that are unreachable from the entry have no immediate dominator and are
//! dominated by nothing (not even the entry).

use crate::utils::graph::{
    algorithms::traversal::reverse_postorder, NodeId, Predecessors, Successors,
};

/// Result of dominator tree computation.
///
/// Besides the tree itself the result keeps the reverse post-order it was built
/// from, which most consumers need anyway (loop analysis, forward passes).
#[derive(Debug, Clone)]
pub struct DominatorTree {
    /// The entry (root) node of the dominator tree
    entry: NodeId,
    /// Immediate dominator for each node; `None` for the entry and unreachable nodes
    idom: Vec<Option<NodeId>>,
    /// Reachable nodes in reverse post-order
    rpo: Vec<NodeId>,
    /// Position of each node in `rpo`, `usize::MAX` when unreachable
    rpo_index: Vec<usize>,
}

impl DominatorTree {
    /// Returns the entry (root) node of the dominator tree.
    #[inline]
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    /// Returns the immediate dominator of a node, or `None` for the entry node
    /// and for unreachable nodes.
    #[inline]
    pub fn immediate_dominator(&self, node: NodeId) -> Option<NodeId> {
        self.idom.get(node.index()).copied().flatten()
    }

    /// Returns `true` if `node` is reachable from the entry.
    #[inline]
    pub fn is_reachable(&self, node: NodeId) -> bool {
        self.rpo_index
            .get(node.index())
            .is_some_and(|&index| index != usize::MAX)
    }

    /// Reachable nodes in reverse post-order.
    #[inline]
    pub fn rpo(&self) -> &[NodeId] {
        &self.rpo
    }

    /// Position of `node` in the reverse post-order, if reachable.
    #[inline]
    pub fn rpo_number(&self, node: NodeId) -> Option<usize> {
        self.rpo_index
            .get(node.index())
            .copied()
            .filter(|&index| index != usize::MAX)
    }

    /// Checks if node `a` dominates node `b`.
    ///
    /// A reachable node dominates itself. The entry node dominates all reachable
    /// nodes. Nothing dominates an unreachable node.
    ///
    /// # Complexity
    ///
    /// O(depth) where depth is the depth of `b` in the dominator tree.
    pub fn dominates(&self, a: NodeId, b: NodeId) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        self.dominators(b).any(|dominator| dominator == a)
    }

    /// Checks if node `a` strictly dominates node `b`.
    ///
    /// Strict dominance excludes self-dominance: a strictly dominates b iff
    /// a dominates b and a ≠ b.
    #[inline]
    pub fn strictly_dominates(&self, a: NodeId, b: NodeId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Returns an iterator over all dominators of a node, from the node itself
    /// up to (and including) the entry node.
    ///
    /// The iterator is empty for unreachable nodes.
    pub fn dominators(&self, node: NodeId) -> DominatorIterator<'_> {
        DominatorIterator {
            tree: self,
            current: self.is_reachable(node).then_some(node),
        }
    }

    /// Returns the depth of a node in the dominator tree.
    ///
    /// The entry node has depth 0. Unreachable nodes report 0 as well.
    pub fn depth(&self, node: NodeId) -> usize {
        self.dominators(node).count().saturating_sub(1)
    }

    /// Returns all children of a node in the dominator tree, in reverse
    /// post-order.
    ///
    /// # Complexity
    ///
    /// O(V) where V is the number of nodes.
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.rpo
            .iter()
            .copied()
            .filter(|&n| self.immediate_dominator(n) == Some(node))
            .collect()
    }

    /// Returns the number of node slots covered by the tree.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.idom.len()
    }
}

/// Iterator over dominators of a node, from the node up to the entry.
pub struct DominatorIterator<'a> {
    tree: &'a DominatorTree,
    current: Option<NodeId>,
}

impl Iterator for DominatorIterator<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;
        self.current = self.tree.immediate_dominator(current);
        Some(current)
    }
}

/// Computes the dominator tree for the nodes reachable from `entry`.
///
/// # Arguments
///
/// * `graph` - The graph to analyze
/// * `entry` - The root of the dominator tree
///
/// # Complexity
///
/// - Time: O(V * E) worst case, close to O(V + E) for structured control flow
/// - Space: O(V)
pub fn compute_dominators<G>(graph: &G, entry: NodeId) -> DominatorTree
where
    G: Successors + Predecessors,
{
    let node_count = graph.node_count();
    let rpo = reverse_postorder(graph, entry);

    let mut rpo_index = vec![usize::MAX; node_count];
    for (index, &node) in rpo.iter().enumerate() {
        rpo_index[node.index()] = index;
    }

    // Working array: the entry points at itself so that intersections terminate.
    let mut doms: Vec<Option<NodeId>> = vec![None; node_count];
    if let Some(&root) = rpo.first() {
        doms[root.index()] = Some(root);
    }

    let mut changed = true;
    while changed {
        changed = false;
        for &node in rpo.iter().skip(1) {
            let mut new_idom: Option<NodeId> = None;
            for pred in graph.predecessors(node) {
                if rpo_index[pred.index()] == usize::MAX || doms[pred.index()].is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => pred,
                    Some(current) => intersect(&doms, &rpo_index, pred, current),
                });
            }

            if new_idom.is_some() && doms[node.index()] != new_idom {
                doms[node.index()] = new_idom;
                changed = true;
            }
        }
    }

    // The entry has no immediate dominator.
    if let Some(&root) = rpo.first() {
        doms[root.index()] = None;
    }

    DominatorTree {
        entry,
        idom: doms,
        rpo,
        rpo_index,
    }
}

fn intersect(
    doms: &[Option<NodeId>],
    rpo_index: &[usize],
    mut finger1: NodeId,
    mut finger2: NodeId,
) -> NodeId {
    while finger1 != finger2 {
        while rpo_index[finger1.index()] > rpo_index[finger2.index()] {
            match doms[finger1.index()] {
                Some(next) => finger1 = next,
                None => return finger2,
            }
        }
        while rpo_index[finger2.index()] > rpo_index[finger1.index()] {
            match doms[finger2.index()] {
                Some(next) => finger2 = next,
                None => return finger1,
            }
        }
    }
    finger1
}
