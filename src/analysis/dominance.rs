//! Block and instruction dominance over the IR graph.
//!
//! [`Dominance`] wraps the generic [`DominatorTree`] with [`BlockId`] queries and
//! records the graph generation it was computed for, so the graph can tell a fresh
//! cache entry from a stale one.

use crate::{
    ir::{BlockId, Graph, InstId},
    utils::graph::{
        algorithms::{compute_dominators, DominatorTree},
        NodeId, RootedGraph,
    },
};

fn node(block: BlockId) -> NodeId {
    NodeId::new(block.index())
}

fn block(node: NodeId) -> BlockId {
    BlockId::new(node.index() as u32)
}

/// Dominator tree of a [`Graph`] stamped with its generation.
#[derive(Debug, Clone)]
pub struct Dominance {
    tree: DominatorTree,
    generation: u64,
}

impl Dominance {
    /// Computes dominance for the blocks reachable from the start block.
    #[must_use]
    pub fn compute(graph: &Graph) -> Self {
        Self {
            tree: compute_dominators(graph, graph.entry()),
            generation: graph.generation(),
        }
    }

    /// Graph generation the tree was computed for.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The underlying generic tree.
    #[must_use]
    pub fn tree(&self) -> &DominatorTree {
        &self.tree
    }

    /// Immediate dominator; `None` for the start block and unreachable blocks.
    #[must_use]
    pub fn idom(&self, b: BlockId) -> Option<BlockId> {
        self.tree.immediate_dominator(node(b)).map(block)
    }

    /// Returns `true` if `a` dominates `b` (reflexive).
    #[must_use]
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.tree.dominates(node(a), node(b))
    }

    /// Returns `true` if `a` dominates `b` and `a != b`.
    #[must_use]
    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.tree.strictly_dominates(node(a), node(b))
    }

    /// Returns `true` if `b` is reachable from the start block.
    #[must_use]
    pub fn is_reachable(&self, b: BlockId) -> bool {
        self.tree.is_reachable(node(b))
    }

    /// Reachable blocks in reverse post-order.
    pub fn rpo(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.tree.rpo().iter().copied().map(block)
    }

    /// Position of a block in the reverse post-order.
    #[must_use]
    pub fn rpo_number(&self, b: BlockId) -> Option<usize> {
        self.tree.rpo_number(node(b))
    }

    /// Children of `b` in the dominator tree.
    #[must_use]
    pub fn children(&self, b: BlockId) -> Vec<BlockId> {
        self.tree.children(node(b)).into_iter().map(block).collect()
    }

    /// Depth of `b` in the dominator tree.
    #[must_use]
    pub fn depth(&self, b: BlockId) -> usize {
        self.tree.depth(node(b))
    }

    /// Returns `true` if the definition `def` is available at `user`.
    ///
    /// Across blocks this is block dominance; within a block Phis come first and
    /// instructions are ordered by position. An instruction does not dominate
    /// itself.
    #[must_use]
    pub fn inst_dominates(&self, graph: &Graph, def: InstId, user: InstId) -> bool {
        let (Ok(def_inst), Ok(user_inst)) = (graph.inst(def), graph.inst(user)) else {
            return false;
        };
        let (Some(def_block), Some(user_block)) = (def_inst.block(), user_inst.block()) else {
            return false;
        };
        if def_block != user_block {
            return self.strictly_dominates(def_block, user_block);
        }
        if def == user {
            return false;
        }
        match (def_inst.is_phi(), user_inst.is_phi()) {
            (true, false) => true,
            (false, true) => false,
            _ => match (graph.position(def), graph.position(user)) {
                (Some(d), Some(u)) => d < u,
                _ => false,
            },
        }
    }

    /// Returns `true` if `def` is available at the end of block `b`.
    #[must_use]
    pub fn dominates_block_end(&self, graph: &Graph, def: InstId, b: BlockId) -> bool {
        graph
            .inst(def)
            .ok()
            .and_then(|inst| inst.block())
            .is_some_and(|def_block| self.dominates(def_block, b))
    }
}
