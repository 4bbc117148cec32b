//! Countable loop recognition.
//!
//! A loop is countable when its header Phi (the induction variable) is advanced by
//! a single constant-step `Add`/`Sub` per iteration and the header branch compares
//! the Phi or its update against a loop-invariant bound.
//!
//! ```text
//!  guard:  if init cc bound -> preheader else exit     (optional)
//!  header: iv = phi(init, update)
//!          ...
//!          update = iv + step
//!          if update cc bound -> header else exit     (tests the update)
//! ```
//!
//! The condition is normalized so that `tested cc bound` keeps the loop running,
//! with the induction side on the left.

use crate::{
    analysis::{Dominance, Loop},
    ir::{BlockId, ConditionCode, DataType, Graph, InstId, Opcode},
};

/// Right-hand side of the loop test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopBound {
    /// A loop-invariant value
    Value(InstId),
    /// The immediate of an `IfImm`
    Imm(i64),
}

/// A recognized countable loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountableLoop {
    /// Loop header
    pub header: BlockId,
    /// The single back-edge source
    pub latch: BlockId,
    /// The single exit block
    pub exit: BlockId,
    /// Induction variable, a header Phi
    pub iv: InstId,
    /// Entry input of the induction variable
    pub init: InstId,
    /// The `Add`/`Sub` feeding the back edge
    pub update: InstId,
    /// Signed step per iteration
    pub step: i64,
    /// Loop bound
    pub bound: LoopBound,
    /// Continue condition, `tested cc bound`
    pub cc: ConditionCode,
    /// Type both sides are compared as
    pub operand_type: DataType,
    /// The header branch
    pub branch: InstId,
    /// Whether the branch tests the update rather than the Phi
    pub tests_update: bool,
}

/// Guard in front of a rotated loop that skips it when the first test would fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopGuard {
    /// Block holding the guard branch
    pub block: BlockId,
    /// The guard branch
    pub branch: InstId,
    /// Successor of the guard on the path into the loop
    pub loop_side: BlockId,
    /// Successor of the guard on the path to the exit block
    pub exit_side: BlockId,
    /// Predecessor of the exit block on the guard path
    pub exit_pred: BlockId,
}

impl CountableLoop {
    /// Recognizes `lp` as a countable loop whose only exit is the header branch.
    #[must_use]
    pub fn analyze(graph: &Graph, lp: &Loop) -> Option<Self> {
        if !lp.is_reducible() || !lp.header_is_sole_exit() || lp.exits.len() != 1 {
            return None;
        }
        let header = lp.header;
        let latch = lp.single_latch()?;
        let exit = lp.exits[0].exit_block;
        let header_block = graph.block(header).ok()?;
        if header_block.preds().len() != 2 {
            return None;
        }
        let latch_index = header_block.pred_index(latch)?;
        let entry_index = 1 - latch_index;

        let branch = graph.branch_of(header)?;
        let branch_inst = graph.inst(branch).ok()?;
        let continue_on_true = lp.contains(*header_block.succs().first()?);

        let (cc, operand_type, induction_side, bound, iv_on_left) = match *branch_inst.opcode() {
            Opcode::If { cc, operand_type } => {
                let (lhs, rhs) = (branch_inst.input(0)?, branch_inst.input(1)?);
                if is_invariant(graph, lp, rhs) {
                    (cc, operand_type, lhs, LoopBound::Value(rhs), true)
                } else if is_invariant(graph, lp, lhs) {
                    (cc, operand_type, rhs, LoopBound::Value(lhs), false)
                } else {
                    return None;
                }
            }
            Opcode::IfImm {
                cc,
                imm,
                operand_type,
            } => (cc, operand_type, branch_inst.input(0)?, LoopBound::Imm(imm), true),
            _ => return None,
        };
        if !operand_type.is_integral() {
            return None;
        }

        let (iv, tests_update) = if header_block.phis().contains(&induction_side) {
            (induction_side, false)
        } else {
            let phi = header_block.phis().iter().copied().find(|&phi| {
                graph
                    .inst(phi)
                    .ok()
                    .and_then(|inst| inst.input(latch_index))
                    == Some(induction_side)
            })?;
            (phi, true)
        };

        let iv_inst = graph.inst(iv).ok()?;
        if iv_inst.ty() != operand_type {
            return None;
        }
        let init = iv_inst.input(entry_index)?;
        let update = iv_inst.input(latch_index)?;
        let step = step_of(graph, lp, iv, update)?;
        if !operand_type.contains(i128::from(step)) && !operand_type.contains(-i128::from(step)) {
            return None;
        }

        let mut cc = if iv_on_left { cc } else { cc.swap() };
        if !continue_on_true {
            cc = cc.inverse();
        }

        Some(Self {
            header,
            latch,
            exit,
            iv,
            init,
            update,
            step,
            bound,
            cc,
            operand_type,
            branch,
            tests_update,
        })
    }

    /// Returns `true` if the loop is a single self-looping block.
    #[must_use]
    pub fn is_single_block(&self) -> bool {
        self.header == self.latch
    }

    /// Constant value of the bound, if known.
    #[must_use]
    pub fn bound_constant(&self, graph: &Graph) -> Option<i64> {
        match self.bound {
            LoopBound::Imm(imm) => Some(imm),
            LoopBound::Value(value) => graph.constant_value(value),
        }
    }

    /// Constant value of the entry input, if known.
    #[must_use]
    pub fn init_constant(&self, graph: &Graph) -> Option<i64> {
        graph.constant_value(self.init)
    }

    /// Returns `true` if the step moves the induction variable towards the bound
    /// of an ordering condition.
    #[must_use]
    pub fn is_monotone(&self) -> bool {
        match self.cc {
            ConditionCode::Lt | ConditionCode::Le => self.step > 0,
            ConditionCode::Gt | ConditionCode::Ge => self.step < 0,
            ConditionCode::Eq | ConditionCode::Ne => false,
        }
    }

    /// Returns `true` if the induction variable provably never wraps while the
    /// loop runs, which also proves termination.
    ///
    /// With a constant bound the last value that passes the test must still be
    /// advanced without overflow. Without one only a unit step towards a strict
    /// bound is accepted.
    #[must_use]
    pub fn never_wraps(&self, graph: &Graph) -> bool {
        if !self.is_monotone() {
            return false;
        }
        let ty = self.operand_type;
        match self.bound_constant(graph) {
            Some(bound) => {
                let bound = ty.widen(bound);
                let last = match self.cc {
                    ConditionCode::Lt => bound - 1,
                    ConditionCode::Gt => bound + 1,
                    _ => bound,
                };
                ty.contains(last + i128::from(self.step))
            }
            None => {
                self.step.abs() == 1 && matches!(self.cc, ConditionCode::Lt | ConditionCode::Gt)
            }
        }
    }

    /// Number of times the header runs for constant `init` and bound, simulated
    /// exactly. `None` if an update would overflow the operand type or the count
    /// exceeds `limit`.
    #[must_use]
    pub fn trip_count(&self, graph: &Graph, limit: u64) -> Option<u64> {
        let ty = self.operand_type;
        let bound = self.bound_constant(graph)?;
        let mut value = ty.widen(self.init_constant(graph)?);
        let step = i128::from(self.step);

        for runs in 1..=limit {
            let next = value + step;
            if !ty.contains(next) {
                return None;
            }
            let tested = if self.tests_update { next } else { value };
            if !self.cc.evaluate(tested as i64, bound, ty) {
                return Some(runs);
            }
            value = next;
        }
        None
    }

    /// The value the header branch compares against the bound.
    #[must_use]
    pub fn tested_value(&self) -> InstId {
        if self.tests_update {
            self.update
        } else {
            self.iv
        }
    }

    /// Finds a guard that branches on `init cc bound` to either `preheader` or the
    /// exit block, through chains of single-entry single-exit blocks. The entry
    /// value must be available at the end of the guard block.
    #[must_use]
    pub fn find_guard(
        &self,
        graph: &Graph,
        dominance: &Dominance,
        preheader: BlockId,
    ) -> Option<LoopGuard> {
        let mut loop_side = preheader;
        let guard = loop {
            let slot = graph.block(loop_side).ok()?;
            if slot.preds().len() != 1 || slot.succs().len() != 1 {
                return None;
            }
            let parent = slot.preds()[0];
            if graph.branch_of(parent).is_some() {
                break parent;
            }
            loop_side = parent;
        };

        let guard_block = graph.block(guard).ok()?;
        let exit_side = *guard_block.succs().iter().find(|&&succ| succ != loop_side)?;
        let mut exit_pred = guard;
        let mut cursor = exit_side;
        while cursor != self.exit {
            let slot = graph.block(cursor).ok()?;
            if !slot.is_empty() || slot.preds().len() != 1 || slot.succs().len() != 1 {
                return None;
            }
            exit_pred = cursor;
            cursor = slot.succs()[0];
        }

        let branch = graph.branch_of(guard)?;
        let inst = graph.inst(branch).ok()?;
        let take_loop = guard_block.succs().first() == Some(&loop_side);
        let matches_bound = |value: InstId| match self.bound {
            LoopBound::Value(bound) => {
                bound == value
                    || graph
                        .constant_value(value)
                        .is_some_and(|c| Some(c) == graph.constant_value(bound))
            }
            LoopBound::Imm(imm) => graph.constant_value(value) == Some(imm),
        };

        let guard_cc = match *inst.opcode() {
            Opcode::If { cc, operand_type } if operand_type == self.operand_type => {
                let (lhs, rhs) = (inst.input(0)?, inst.input(1)?);
                if lhs == self.init && matches_bound(rhs) {
                    cc
                } else if rhs == self.init && matches_bound(lhs) {
                    cc.swap()
                } else {
                    return None;
                }
            }
            Opcode::IfImm {
                cc,
                imm,
                operand_type,
            } if operand_type == self.operand_type => {
                let bound_matches = match self.bound {
                    LoopBound::Imm(bound) => bound == imm,
                    LoopBound::Value(bound) => graph.constant_value(bound) == Some(imm),
                };
                if inst.input(0)? != self.init || !bound_matches {
                    return None;
                }
                cc
            }
            _ => return None,
        };
        let guard_cc = if take_loop { guard_cc } else { guard_cc.inverse() };
        if guard_cc != self.cc || !dominance.dominates_block_end(graph, self.init, guard) {
            return None;
        }

        Some(LoopGuard {
            block: guard,
            branch,
            loop_side,
            exit_side,
            exit_pred,
        })
    }
}

fn is_invariant(graph: &Graph, lp: &Loop, value: InstId) -> bool {
    graph
        .inst(value)
        .ok()
        .and_then(|inst| inst.block())
        .is_some_and(|block| !lp.contains(block))
}

fn step_of(graph: &Graph, lp: &Loop, iv: InstId, update: InstId) -> Option<i64> {
    let inst = graph.inst(update).ok()?;
    if !inst.block().is_some_and(|block| lp.contains(block)) || inst.ty() != graph.inst(iv).ok()?.ty() {
        return None;
    }
    let (lhs, rhs) = (inst.input(0)?, inst.input(1)?);
    let step = match inst.opcode() {
        Opcode::Add if lhs == iv => graph.constant_value(rhs)?,
        Opcode::Add if rhs == iv => graph.constant_value(lhs)?,
        Opcode::Sub if lhs == iv => graph.constant_value(rhs)?.checked_neg()?,
        _ => return None,
    };
    (step != 0).then_some(step)
}
