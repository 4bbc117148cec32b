//! Shape requirements shared by the loop-cloning passes.
//!
//! Peeling and unrolling only touch loops whose header is the single decision
//! point: one back edge, one exit edge leaving from the header, and no inlined call
//! whose `ReturnInlined` sits on the other side of the clone boundary.

use std::collections::HashSet;

use crate::{
    analysis::Loop,
    ir::{BlockId, DataType, Graph, InstId, Opcode},
    Error, Result,
};

/// A loop accepted for cloning.
#[derive(Debug, Clone)]
pub(crate) struct LoopShape {
    pub header: BlockId,
    pub latch: BlockId,
    pub exit: BlockId,
    /// Body blocks, header first, then by id
    pub blocks: Vec<BlockId>,
    pub body: HashSet<BlockId>,
    /// Instructions a copy duplicates: everything but header Phis and SafePoints
    pub cloneable: usize,
    /// Header Phis and SafePoints
    pub fixed: usize,
    /// Whether the body holds a call that is not an inlined one
    pub has_calls: bool,
}

impl LoopShape {
    /// Checks `lp` and returns either its shape or the reason it was rejected.
    pub fn analyze(graph: &Graph, lp: &Loop) -> Result<std::result::Result<Self, &'static str>> {
        if !lp.is_reducible() {
            return Ok(Err("not a reducible finite loop"));
        }
        if !lp.is_innermost() {
            return Ok(Err("contains inner loops"));
        }
        let Some(latch) = lp.single_latch() else {
            return Ok(Err("more than one back edge"));
        };
        if !lp.header_is_sole_exit() || lp.exits.len() != 1 {
            return Ok(Err("exits from a block other than the header"));
        }
        if graph.branch_of(lp.header).is_none() {
            return Ok(Err("header does not end with a branch"));
        }

        let mut blocks = lp.blocks();
        blocks.retain(|&block| block != lp.header);
        blocks.insert(0, lp.header);

        let mut cloneable = 0;
        let mut fixed = 0;
        let mut has_calls = false;
        for &block in &blocks {
            let slot = graph.block(block)?;
            if slot.is_osr_entry() {
                return Ok(Err("on-stack-replacement entry"));
            }
            for id in slot.all_insts() {
                let inst = graph.inst(id)?;
                let header_phi = block == lp.header && inst.is_phi();
                if header_phi || inst.opcode().is_safepoint() {
                    fixed += 1;
                } else {
                    cloneable += 1;
                }
                if inst.opcode().is_call() && !inst.is_inlined_call() {
                    has_calls = true;
                }
                if splits_inlined_pair(graph, lp, id)? {
                    return Ok(Err("inlined call pair crosses the loop boundary"));
                }
            }
        }

        Ok(Ok(Self {
            header: lp.header,
            latch,
            exit: lp.exits[0].exit_block,
            blocks,
            body: lp.body.clone(),
            cloneable,
            fixed,
            has_calls,
        }))
    }
}

/// A header Phi with its entry and back-edge inputs.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HeaderPhi {
    pub phi: InstId,
    pub ty: DataType,
    /// Input from the single outside predecessor, if there is exactly one
    pub entry: Option<InstId>,
    pub back: InstId,
}

/// The Phis of `header` split into entry and back-edge inputs.
pub(crate) fn header_phis(graph: &Graph, header: BlockId, latch: BlockId) -> Result<Vec<HeaderPhi>> {
    let slot = graph.block(header)?;
    let latch_index = slot
        .pred_index(latch)
        .ok_or(Error::InvalidEdge { from: latch, to: header })?;
    let entry_index = match slot.preds().len() {
        2 => Some(1 - latch_index),
        _ => None,
    };

    let mut phis = Vec::with_capacity(slot.phis().len());
    for &phi in slot.phis() {
        let inst = graph.inst(phi)?;
        phis.push(HeaderPhi {
            phi,
            ty: inst.ty(),
            entry: entry_index.and_then(|index| inst.input(index)),
            back: inst
                .input(latch_index)
                .ok_or(Error::InvalidInput { inst: phi, index: latch_index })?,
        });
    }
    Ok(phis)
}

fn splits_inlined_pair(graph: &Graph, lp: &Loop, id: InstId) -> Result<bool> {
    let inst = graph.inst(id)?;
    let inside = |other: InstId| {
        graph
            .inst(other)
            .ok()
            .and_then(|inst| inst.block())
            .is_some_and(|block| lp.contains(block))
    };
    if matches!(inst.opcode(), Opcode::ReturnInlined) {
        return Ok(!inst.input(0).is_some_and(inside));
    }
    if inst.is_inlined_call() {
        for &user in inst.users() {
            if matches!(graph.inst(user)?.opcode(), Opcode::ReturnInlined) && !inside(user) {
                return Ok(true);
            }
        }
    }
    Ok(false)
}
