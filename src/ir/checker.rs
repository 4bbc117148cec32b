//! Structural verification of a [`Graph`].
//!
//! The checker recomputes every analysis it needs from scratch, so it can be run at
//! any point, including on a graph whose caches are stale. It stops at the first
//! violation and reports it as [`Error::Malformed`](crate::Error::Malformed).
//!
//! # Rules
//!
//! - Edge symmetry, no duplicate successors, at most two successors
//! - Branch shape: two successors end in `If`/`IfImm`, one successor has no jump,
//!   returning blocks lead to the end block
//! - Start block: no predecessors, one successor, only Parameters, Constants and
//!   SafePoints; end block: no instructions, no successors
//! - Def/use symmetry with multiplicities, operand arity, placement
//! - Phi arity equals predecessor count
//! - Definitions dominate uses; a Phi input must be available at the end of the
//!   matching predecessor
//! - `ReturnInlined` pairs with exactly one inlined call
//! - Cached loops equal recomputed loops; back edges are header predecessors;
//!   optionally every reducible loop holds a SafePoint
//! - No raw pointer is live across a SafePoint; optionally every reference live
//!   across a SafePoint is one of its inputs
//! - No unpublished control-flow edits

use std::collections::HashMap;

use crate::{
    analysis::{detect_loops, Dominance, LoopKind},
    ir::{ssa::safepoints_crossed, BlockId, DataType, Graph, InstId, Opcode},
    Result,
};

/// Configurable graph verifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphChecker {
    require_loop_safepoints: bool,
    safepoint_roots: bool,
}

impl GraphChecker {
    /// Checker with the default rule set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires a SafePoint inside every reducible loop.
    #[must_use]
    pub fn require_loop_safepoints(mut self, require: bool) -> Self {
        self.require_loop_safepoints = require;
        self
    }

    /// Requires every reference live across a SafePoint to be among its inputs.
    #[must_use]
    pub fn with_safepoint_roots(mut self) -> Self {
        self.safepoint_roots = true;
        self
    }

    /// Runs every enabled rule.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Malformed`] describing the first violated rule.
    pub fn check(&self, graph: &Graph) -> Result<()> {
        if graph.has_unpublished_edits() {
            return Err(malformed_error!(
                "{} has control-flow edits that were not published",
                graph.name()
            ));
        }
        check_special_blocks(graph)?;
        for block in graph.block_ids() {
            check_edges(graph, block)?;
            check_block_shape(graph, block)?;
        }
        check_def_use(graph)?;

        let dominance = Dominance::compute(graph);
        check_dominance(graph, &dominance)?;
        check_inlined_pairs(graph)?;
        self.check_loops(graph, &dominance)?;
        self.check_safepoint_liveness(graph, &dominance)?;
        Ok(())
    }

    fn check_loops(&self, graph: &Graph, dominance: &Dominance) -> Result<()> {
        let forest = detect_loops(graph, dominance);
        if let Some(cached) = graph.cached_loops() {
            if cached.generation() == graph.generation() && !cached.same_structure(&forest) {
                return Err(malformed_error!("Cached loop analysis is stale"));
            }
        }

        for lp in forest.iter() {
            let preds = graph.block(lp.header)?.preds();
            for latch in &lp.latches {
                if !preds.contains(latch) {
                    return Err(malformed_error!(
                        "Back edge {} of loop {} is not a header predecessor",
                        latch,
                        lp.header
                    ));
                }
            }

            if self.require_loop_safepoints && lp.kind != LoopKind::Irreducible {
                let mut has_safepoint = false;
                for block in lp.blocks() {
                    for &id in graph.block(block)?.insts() {
                        has_safepoint |= graph.inst(id)?.opcode().is_safepoint();
                    }
                }
                if !has_safepoint {
                    return Err(malformed_error!("Loop {} has no SafePoint", lp.header));
                }
            }
        }
        Ok(())
    }

    fn check_safepoint_liveness(&self, graph: &Graph, dominance: &Dominance) -> Result<()> {
        for block in dominance.rpo() {
            for id in graph.block(block)?.all_insts() {
                let ty = graph.inst(id)?.ty();
                if ty == DataType::Pointer {
                    if let Some(&safepoint) = safepoints_crossed(graph, id)?.first() {
                        return Err(malformed_error!(
                            "Raw pointer {} is live across SafePoint {}",
                            id,
                            safepoint
                        ));
                    }
                } else if self.safepoint_roots && ty.is_reference() {
                    for safepoint in safepoints_crossed(graph, id)? {
                        if !graph.inst(safepoint)?.inputs().contains(&id) {
                            return Err(malformed_error!(
                                "Reference {} is live across SafePoint {} but not recorded",
                                id,
                                safepoint
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn check_special_blocks(graph: &Graph) -> Result<()> {
    let start = graph.block(graph.start())?;
    if !start.preds().is_empty() || start.succs().len() != 1 || !start.phis().is_empty() {
        return Err(malformed_error!("Start block must have no preds and one successor"));
    }
    for &id in start.insts() {
        match graph.inst(id)?.opcode() {
            Opcode::Parameter { .. } | Opcode::Constant(_) | Opcode::SafePoint(_) => {}
            other => {
                return Err(malformed_error!("Start block holds {} ({:?})", id, other.kind()));
            }
        }
    }

    let end = graph.block(graph.end())?;
    if !end.succs().is_empty() || !end.is_empty() {
        return Err(malformed_error!("End block must be empty and have no successors"));
    }
    Ok(())
}

fn check_edges(graph: &Graph, block: BlockId) -> Result<()> {
    let slot = graph.block(block)?;
    for (index, &succ) in slot.succs().iter().enumerate() {
        if slot.succs()[..index].contains(&succ) {
            return Err(malformed_error!("{} has successor {} twice", block, succ));
        }
        let target = graph
            .block(succ)
            .map_err(|_| malformed_error!("{} points to removed block {}", block, succ))?;
        if !target.preds().contains(&block) {
            return Err(malformed_error!("Edge {} -> {} missing at the target", block, succ));
        }
    }
    for (index, &pred) in slot.preds().iter().enumerate() {
        if slot.preds()[..index].contains(&pred) {
            return Err(malformed_error!("{} has predecessor {} twice", block, pred));
        }
        let source = graph
            .block(pred)
            .map_err(|_| malformed_error!("{} has removed predecessor {}", block, pred))?;
        if !source.succs().contains(&block) {
            return Err(malformed_error!("Edge {} -> {} missing at the source", pred, block));
        }
    }
    Ok(())
}

fn check_block_shape(graph: &Graph, block: BlockId) -> Result<()> {
    if block == graph.end() {
        return Ok(());
    }
    let slot = graph.block(block)?;

    for &phi in slot.phis() {
        let inst = graph.inst(phi)?;
        if !inst.is_phi() || inst.block() != Some(block) {
            return Err(malformed_error!("Phi list of {} holds {}", block, phi));
        }
        if inst.inputs().len() != slot.preds().len() {
            return Err(malformed_error!(
                "Phi {} has {} inputs for {} predecessors",
                phi,
                inst.inputs().len(),
                slot.preds().len()
            ));
        }
    }

    let count = slot.insts().len();
    for (position, &id) in slot.insts().iter().enumerate() {
        let inst = graph.inst(id)?;
        if inst.is_phi() || inst.block() != Some(block) {
            return Err(malformed_error!("Instruction list of {} holds {}", block, id));
        }
        if inst.opcode().is_terminator() && position + 1 != count {
            return Err(malformed_error!("Terminator {} is not last in {}", id, block));
        }
    }

    let last = slot.last_inst().map(|id| graph.inst(id)).transpose()?;
    let last_opcode = last.map(|inst| inst.opcode());
    match slot.succs() {
        [] if block != graph.start() => {
            Err(malformed_error!("{} has no successors", block))
        }
        [single] if *single == graph.end() => match last_opcode {
            Some(opcode) if opcode.is_return() => Ok(()),
            _ => Err(malformed_error!("{} reaches the end block without a return", block)),
        },
        [_] => match last_opcode {
            Some(opcode) if opcode.is_terminator() => {
                Err(malformed_error!("{} has one successor but ends in a jump", block))
            }
            _ => Ok(()),
        },
        [_, second] => match last_opcode {
            Some(opcode) if opcode.is_branch() && *second != graph.end() => Ok(()),
            _ => Err(malformed_error!("{} has two successors but no branch", block)),
        },
        _ if slot.succs().len() > 2 => {
            Err(malformed_error!("{} has more than two successors", block))
        }
        _ => Ok(()),
    }
}

fn check_def_use(graph: &Graph) -> Result<()> {
    let mut expected: HashMap<(InstId, InstId), usize> = HashMap::new();

    for id in graph.inst_ids() {
        let inst = graph.inst(id)?;
        let Some(block) = inst.block() else {
            return Err(malformed_error!("{} is live but not placed", id));
        };
        if !graph.contains_block(block) {
            return Err(malformed_error!("{} is placed in removed block {}", id, block));
        }
        if let Some(arity) = inst.opcode().fixed_arity() {
            if inst.inputs().len() != arity {
                return Err(malformed_error!(
                    "{} has {} inputs, {:?} takes {}",
                    id,
                    inst.inputs().len(),
                    inst.opcode().kind(),
                    arity
                ));
            }
        }
        if let Some(data) = inst.opcode().safepoint_data() {
            if data.vregs.len() != inst.inputs().len() {
                return Err(malformed_error!("SafePoint {} register map is out of sync", id));
            }
        }
        for &input in inst.inputs() {
            if !graph.contains_inst(input) {
                return Err(malformed_error!("{} reads removed instruction {}", id, input));
            }
            *expected.entry((input, id)).or_default() += 1;
        }
    }

    let mut recorded: HashMap<(InstId, InstId), usize> = HashMap::new();
    for id in graph.inst_ids() {
        for &user in graph.inst(id)?.users() {
            *recorded.entry((id, user)).or_default() += 1;
        }
    }

    if expected != recorded {
        let mismatch = expected
            .iter()
            .find(|(key, count)| recorded.get(key) != Some(count))
            .map(|(key, _)| *key)
            .or_else(|| {
                recorded
                    .iter()
                    .find(|(key, count)| expected.get(key) != Some(count))
                    .map(|(key, _)| *key)
            });
        if let Some((producer, user)) = mismatch {
            return Err(malformed_error!(
                "Def/use mismatch between {} and its user {}",
                producer,
                user
            ));
        }
    }
    Ok(())
}

fn check_dominance(graph: &Graph, dominance: &Dominance) -> Result<()> {
    for block in dominance.rpo() {
        let slot = graph.block(block)?;
        for &phi in slot.phis() {
            for (&input, &pred) in graph.inst(phi)?.inputs().iter().zip(slot.preds()) {
                if dominance.is_reachable(pred) && !dominance.dominates_block_end(graph, input, pred) {
                    return Err(malformed_error!(
                        "Phi {} input {} is not available at the end of {}",
                        phi,
                        input,
                        pred
                    ));
                }
            }
        }
        for &id in slot.insts() {
            for &input in graph.inst(id)?.inputs() {
                if !dominance.inst_dominates(graph, input, id) {
                    return Err(malformed_error!("{} does not dominate its user {}", input, id));
                }
            }
        }
    }
    Ok(())
}

fn check_inlined_pairs(graph: &Graph) -> Result<()> {
    for id in graph.inst_ids() {
        let inst = graph.inst(id)?;
        if matches!(inst.opcode(), Opcode::ReturnInlined) {
            let call = inst.input(0).map(|call| graph.inst(call)).transpose()?;
            if !call.is_some_and(|call| call.is_inlined_call()) {
                return Err(malformed_error!("ReturnInlined {} is not paired with an inlined call", id));
            }
        }
        if inst.is_inlined_call() {
            let returns = inst
                .users()
                .iter()
                .filter(|&&user| {
                    graph
                        .inst(user)
                        .is_ok_and(|u| matches!(u.opcode(), Opcode::ReturnInlined))
                })
                .count();
            if returns != 1 {
                return Err(malformed_error!(
                    "Inlined call {} has {} ReturnInlined instructions",
                    id,
                    returns
                ));
            }
        }
    }
    Ok(())
}
