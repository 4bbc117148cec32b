//! Removal of loops whose execution has no observable effect.
//!
//! A loop can be dropped when it is guaranteed to terminate, writes nothing,
//! cannot throw and none of its values are read after it. The pre-header is then
//! wired straight to the exit block:
//!
//! ```text
//!   pre-header            pre-header
//!       |                     |
//!    header <--+              |
//!       |      |     =>       |
//!     body ----+              |
//!       |                     |
//!     exit                  exit
//! ```
//!
//! Termination is proven through the countable-loop analysis: the induction
//! variable moves towards the bound and cannot wrap before reaching it.

use log::{debug, trace};

use crate::{
    analysis::{ensure_preheader, CountableLoop, Loop},
    compiler::{pass::GraphPass, EventKind, OptimizerConfig, PassContext},
    ir::{ssa::values_escaping, BlockId, Graph},
    Result,
};

const NAME: &str = "redundant-loop-elimination";

/// Deletes terminating loops without side effects or live-out values.
pub struct RedundantLoopEliminationPass;

impl Default for RedundantLoopEliminationPass {
    fn default() -> Self {
        Self::new()
    }
}

impl RedundantLoopEliminationPass {
    /// Creates a new redundant loop elimination pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Whether `lp` only computes values nobody reads.
    fn is_redundant(graph: &Graph, lp: &Loop) -> Result<bool> {
        if !lp.is_innermost() {
            return Ok(false);
        }
        let Some(countable) = CountableLoop::analyze(graph, lp) else {
            return Ok(false);
        };
        if !countable.never_wraps(graph) {
            return Ok(false);
        }
        for block in lp.blocks() {
            let slot = graph.block(block)?;
            if slot.is_osr_entry() {
                return Ok(false);
            }
            for id in slot.all_insts() {
                let inst = graph.inst(id)?;
                let opcode = inst.opcode();
                if inst.is_must_keep() && !opcode.is_branch() && !opcode.is_safepoint() {
                    return Ok(false);
                }
            }
        }
        Ok(values_escaping(graph, &lp.body)?.is_empty())
    }

    fn remove_loop(graph: &mut Graph, ctx: &PassContext<'_>, header: BlockId) -> Result<bool> {
        {
            let forest = graph.loops();
            let Some(lp) = forest.loop_for_header(header) else {
                return Ok(false);
            };
            if !Self::is_redundant(graph, lp)? {
                trace!("{}: loop {header} is live", graph.name());
                return Ok(false);
            }
        }

        let preheader = ensure_preheader(graph, header)?;
        let forest = graph.loops();
        let lp = forest
            .loop_for_header(header)
            .ok_or_else(|| malformed_error!("{} is no longer a loop header", header))?;
        let exit = lp.exits[0].exit_block;
        let exiting = lp.exits[0].exiting_block;
        let blocks = lp.blocks();

        let exit_slot = graph.block(exit)?;
        let index = exit_slot
            .pred_index(exiting)
            .ok_or_else(|| malformed_error!("{} is not a predecessor of {}", exiting, exit))?;
        let mut carried = Vec::with_capacity(exit_slot.phis().len());
        for &phi in exit_slot.phis() {
            let value = graph
                .inst(phi)?
                .input(index)
                .ok_or_else(|| malformed_error!("Phi {} is missing the loop input", phi))?;
            carried.push((phi, value));
        }

        graph.redirect_edge(preheader, header, exit)?;
        for (phi, value) in carried {
            graph.add_phi_input(phi, value)?;
        }
        graph.remove_blocks(&blocks)?;
        graph.invalidate_analyses();

        debug!("{}: removed redundant loop {header}", graph.name());
        ctx.record(EventKind::LoopRemoved, NAME, header.index())
            .message(format!("{} blocks removed", blocks.len()));
        Ok(true)
    }
}

impl GraphPass for RedundantLoopEliminationPass {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Removes terminating loops whose results are unused"
    }

    fn enabled(&self, config: &OptimizerConfig) -> bool {
        config.enable_redundant_loop_elimination
    }

    fn is_structural(&self) -> bool {
        true
    }

    fn run(&self, graph: &mut Graph, ctx: &PassContext<'_>) -> Result<bool> {
        if graph.has_unpublished_edits() {
            graph.invalidate_analyses();
        }
        let headers = graph.loops().headers_innermost_first();
        let mut changed = false;
        for header in headers {
            changed |= Self::remove_loop(graph, ctx, header)?;
        }
        Ok(changed)
    }
}
