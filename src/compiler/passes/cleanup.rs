//! Cleanup pass: the normalization run between structural passes.
//!
//! Each round performs, in order:
//!
//! 1. **Unreachable-block removal** - blocks the start block cannot reach are
//!    deleted together with their edges and the matching Phi inputs.
//! 2. **Phi resolution** - a Phi whose non-self inputs are all the same value is
//!    replaced by that value; a Phi merging the same values as an earlier Phi of its
//!    block is replaced by the earlier one. Replacements re-enqueue dependent Phis.
//! 3. **Dead-code elimination** - mark-and-sweep from the must-keep instructions.
//!    SafePoint inputs are weak: they do not keep values alive and are pruned when
//!    their producer dies, unless the register map must stay complete.
//! 4. **CFG simplification** - empty pass-through blocks are spliced out and
//!    straight-line block pairs are merged, in reverse post-order.
//!
//! Rounds repeat until nothing changes or the configured cap is reached.
//!
//! # Loop safety
//!
//! ```text
//!   pre-header  (kept even when empty)
//!       |
//!    header  <----+   never merged into its predecessor
//!       |         |
//!     latch ------+   never merged away
//! ```

use std::collections::{HashSet, VecDeque};

use log::{debug, trace};

use crate::{
    compiler::{pass::GraphPass, EventKind, OptimizerConfig, PassContext},
    ir::{
        ssa::{phi_value, phis_equivalent, PhiValue},
        Graph, InstId,
    },
    Result,
};

const NAME: &str = "cleanup";

/// Removes dead code, trivial Phis, unreachable and redundant blocks.
pub struct CleanupPass;

impl Default for CleanupPass {
    fn default() -> Self {
        Self::new()
    }
}

impl CleanupPass {
    /// Creates a new cleanup pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn publish(graph: &mut Graph) {
        if graph.has_unpublished_edits() {
            graph.invalidate_analyses();
        }
    }

    fn remove_unreachable(graph: &mut Graph, ctx: &PassContext<'_>) -> Result<bool> {
        Self::publish(graph);
        let dominance = graph.dominance();
        let (start, end) = (graph.start(), graph.end());
        let dead: Vec<_> = graph
            .block_ids()
            .filter(|&block| block != start && block != end && !dominance.is_reachable(block))
            .collect();
        if dead.is_empty() {
            return Ok(false);
        }

        graph.remove_blocks(&dead)?;
        for block in dead {
            ctx.record(EventKind::BlockRemoved, NAME, block.index())
                .message(format!("unreachable {block}"));
        }
        Ok(true)
    }

    /// An earlier Phi of the same block that merges the same values.
    fn equivalent_phi(graph: &Graph, phi: InstId) -> Result<Option<InstId>> {
        let Some(block) = graph.inst(phi)?.block() else {
            return Ok(None);
        };
        Ok(graph
            .block(block)?
            .phis()
            .iter()
            .copied()
            .take_while(|&other| other != phi)
            .find(|&other| phis_equivalent(graph, other, phi)))
    }

    fn resolve_phis(graph: &mut Graph, ctx: &PassContext<'_>) -> Result<bool> {
        let mut worklist: VecDeque<InstId> = VecDeque::new();
        for block in graph.block_ids() {
            worklist.extend(graph.block(block)?.phis());
        }
        let mut queued: HashSet<InstId> = worklist.iter().copied().collect();
        let mut changed = false;

        while let Some(phi) = worklist.pop_front() {
            queued.remove(&phi);
            if !graph.contains_inst(phi) {
                continue;
            }

            let replacement = match phi_value(graph, phi)? {
                PhiValue::Same(value) => Some(value),
                PhiValue::Merge => Self::equivalent_phi(graph, phi)?,
                PhiValue::Empty => {
                    if graph.inst(phi)?.users().iter().all(|&user| user == phi) {
                        graph.remove_inst(phi, true)?;
                        ctx.record(EventKind::PhiSimplified, NAME, phi.index())
                            .message(format!("self-referencing {phi} removed"));
                        changed = true;
                    }
                    continue;
                }
            };
            let Some(value) = replacement else {
                continue;
            };

            let mut requeue: Vec<InstId> = graph
                .inst(phi)?
                .users()
                .iter()
                .copied()
                .filter(|&user| user != phi)
                .collect();
            requeue.push(value);

            graph.replace_users(phi, value)?;
            graph.remove_inst(phi, true)?;
            trace!("{}: {phi} -> {value}", graph.name());
            ctx.record(EventKind::PhiSimplified, NAME, phi.index())
                .message(format!("{phi} replaced by {value}"));
            changed = true;

            for user in requeue {
                let is_phi = graph.inst(user).is_ok_and(|inst| inst.is_phi());
                if is_phi && queued.insert(user) {
                    worklist.push_back(user);
                }
            }
        }
        Ok(changed)
    }

    fn eliminate_dead_code(
        graph: &mut Graph,
        ctx: &PassContext<'_>,
        config: &OptimizerConfig,
    ) -> Result<bool> {
        let strong_safepoints = config.safepoints_require_regmap;
        let mut placed = Vec::new();
        for block in graph.block_ids() {
            placed.extend(graph.block(block)?.all_insts());
        }

        let mut live = HashSet::new();
        let mut worklist = Vec::new();
        for &id in &placed {
            if graph.inst(id)?.is_must_keep() {
                live.insert(id);
                worklist.push(id);
            }
        }
        while let Some(id) = worklist.pop() {
            let inst = graph.inst(id)?;
            if inst.opcode().is_safepoint() && !strong_safepoints {
                continue;
            }
            for &input in inst.inputs() {
                if live.insert(input) {
                    worklist.push(input);
                }
            }
        }

        let mut changed = false;
        for &id in &placed {
            if !graph.inst(id)?.opcode().is_safepoint() {
                continue;
            }
            let inputs = graph.inst(id)?.inputs().to_vec();
            for (index, input) in inputs.iter().enumerate().rev() {
                if !live.contains(input) {
                    graph.remove_input(id, index)?;
                    ctx.record(EventKind::SafePointPruned, NAME, id.index())
                        .message(format!("dead {input} dropped from {id}"));
                    changed = true;
                }
            }
        }

        let dead: Vec<InstId> = placed.iter().copied().filter(|id| !live.contains(id)).collect();
        if !dead.is_empty() {
            graph.remove_insts(&dead)?;
            for id in &dead {
                ctx.record(EventKind::InstructionRemoved, NAME, id.index());
            }
            changed = true;
        }

        // SafePoints outside loops that no longer record anything.
        Self::publish(graph);
        let forest = graph.loops();
        let mut empty_safepoints = Vec::new();
        for &id in &placed {
            let Ok(inst) = graph.inst(id) else {
                continue;
            };
            let in_loop = inst.block().is_some_and(|block| forest.is_in_loop(block));
            if inst.opcode().is_safepoint() && inst.inputs().is_empty() && !inst.has_users() && !in_loop
            {
                empty_safepoints.push(id);
            }
        }
        for id in empty_safepoints {
            graph.remove_inst(id, false)?;
            ctx.record(EventKind::InstructionRemoved, NAME, id.index())
                .message(format!("empty SafePoint {id}"));
            changed = true;
        }
        Ok(changed)
    }

    fn simplify_cfg(graph: &mut Graph, ctx: &PassContext<'_>) -> Result<bool> {
        Self::publish(graph);
        let forest = graph.loops();
        let order = graph.rpo();
        let (start, end) = (graph.start(), graph.end());
        let mut changed = false;

        for block in order {
            if block == start || block == end || !graph.contains_block(block) {
                continue;
            }
            let slot = graph.block(block)?;
            let &[pred] = slot.preds() else {
                continue;
            };
            let pred_succs = graph.block(pred)?.succs();

            if slot.is_empty() && slot.succs().len() == 1 && !forest.is_preheader(block) {
                let succ = slot.succs()[0];
                if succ != block && pred != block && !pred_succs.contains(&succ) {
                    graph.bypass_block(block)?;
                    ctx.record(EventKind::BlockElided, NAME, block.index())
                        .message(format!("{pred} -> {succ} bypasses {block}"));
                    changed = true;
                    continue;
                }
            }

            let straight_line = pred_succs == [block];
            if straight_line
                && pred != start
                && !forest.is_header(block)
                && !forest.has_back_edge(block)
                && !(forest.is_preheader(block) && forest.is_header(pred))
                && !slot.succs().contains(&pred)
            {
                graph.merge_into_pred(block)?;
                ctx.record(EventKind::BlocksMerged, NAME, block.index())
                    .message(format!("{block} merged into {pred}"));
                changed = true;
            }
        }

        Self::publish(graph);
        Ok(changed)
    }
}

impl GraphPass for CleanupPass {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Removes dead code, trivial phis, unreachable and redundant blocks"
    }

    fn enabled(&self, config: &OptimizerConfig) -> bool {
        config.enable_cleanup
    }

    fn run(&self, graph: &mut Graph, ctx: &PassContext<'_>) -> Result<bool> {
        let mut changed = false;
        for round in 0..ctx.config.cleanup_max_iterations {
            let mut round_changed = Self::remove_unreachable(graph, ctx)?;
            round_changed |= Self::resolve_phis(graph, ctx)?;
            round_changed |= Self::eliminate_dead_code(graph, ctx, ctx.config)?;
            round_changed |= Self::simplify_cfg(graph, ctx)?;
            if !round_changed {
                trace!("{}: cleanup stable after {round} rounds", graph.name());
                break;
            }
            changed = true;
        }

        Self::publish(graph);
        if changed {
            // Refreshes the loop header flags.
            graph.loops();
            debug!("{}: cleanup changed the graph", graph.name());
        }
        Ok(changed)
    }
}
