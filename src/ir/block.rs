//! Basic blocks.
//!
//! A block holds its Phis separately from its ordinary instructions:
//!
//! ```text
//! bb3 (preds: bb1, bb4; succs: bb4, bb5)
//!   v7 = Phi v2, v9          // v2 from bb1, v9 from bb4
//!   v8 = Compare.Lt v7, v6
//!   IfImm.Ne v8, 0           // true -> bb4, false -> bb5
//! ```
//!
//! Phis are evaluated together on entry; `phi.inputs[k]` flows in from
//! `preds[k]`. A block with two successors ends in `If`/`IfImm`, a block with one
//! successor has no jump instruction at all.

use crate::ir::{BlockFlags, BlockId, InstId};

/// A basic block of the control-flow graph.
#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub(crate) preds: Vec<BlockId>,
    pub(crate) succs: Vec<BlockId>,
    pub(crate) phis: Vec<InstId>,
    pub(crate) insts: Vec<InstId>,
    pub(crate) flags: BlockFlags,
}

impl BasicBlock {
    pub(crate) fn new() -> Self {
        Self {
            flags: BlockFlags::ALIVE,
            ..Self::default()
        }
    }

    /// Ordered predecessors.
    #[must_use]
    pub fn preds(&self) -> &[BlockId] {
        &self.preds
    }

    /// Ordered successors; `succs[0]` is the taken target of a branch.
    #[must_use]
    pub fn succs(&self) -> &[BlockId] {
        &self.succs
    }

    /// Phis in block order.
    #[must_use]
    pub fn phis(&self) -> &[InstId] {
        &self.phis
    }

    /// Non-phi instructions in execution order.
    #[must_use]
    pub fn insts(&self) -> &[InstId] {
        &self.insts
    }

    /// Phis followed by instructions.
    pub fn all_insts(&self) -> impl DoubleEndedIterator<Item = InstId> + '_ {
        self.phis.iter().chain(self.insts.iter()).copied()
    }

    /// The last instruction, if any.
    #[must_use]
    pub fn last_inst(&self) -> Option<InstId> {
        self.insts.last().copied()
    }

    /// Block flags.
    #[must_use]
    pub fn flags(&self) -> BlockFlags {
        self.flags
    }

    /// Returns `true` if the slot holds a live block.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.flags.contains(BlockFlags::ALIVE)
    }

    /// Returns `true` if the block has neither Phis nor instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phis.is_empty() && self.insts.is_empty()
    }

    /// Returns `true` if loop analysis marked the block as a loop header.
    #[must_use]
    pub fn is_loop_header(&self) -> bool {
        self.flags.contains(BlockFlags::LOOP_HEADER)
    }

    /// Returns `true` for on-stack-replacement entries.
    #[must_use]
    pub fn is_osr_entry(&self) -> bool {
        self.flags.contains(BlockFlags::OSR_ENTRY)
    }

    /// Position of `pred` in the predecessor list.
    #[must_use]
    pub fn pred_index(&self, pred: BlockId) -> Option<usize> {
        self.preds.iter().position(|&p| p == pred)
    }

    /// Position of `succ` in the successor list.
    #[must_use]
    pub fn succ_index(&self, succ: BlockId) -> Option<usize> {
        self.succs.iter().position(|&s| s == succ)
    }
}
