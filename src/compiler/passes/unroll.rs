//! Loop unrolling.
//!
//! Every innermost loop accepted by [`LoopShape`] is unrolled by the configured
//! factor, clamped so that the body stays within the instruction budget:
//! `f = min(factor, (limit - K) / C)` where `C` counts the instructions a copy
//! duplicates and `K` the header Phis and SafePoints that stay single. Three
//! strategies are tried in order.
//!
//! # Full unroll
//!
//! A single-block countable loop with a constant start and bound and a short trip
//! count is replaced by straight-line copies. A guard that is known to enter the
//! loop is folded.
//!
//! # Countable loops
//!
//! A rotated single-block loop `do { body; i += s } while (i cc B)` behind a guard
//! runs `f` copies per trip against the adjusted bound `B' = B - (f-1)*s`:
//!
//! ```text
//!  guard: if init cc B' -> pre-header else R
//!  H:     f copies of the body
//!         if i_f cc B' -> H else R
//!  R:     phis (H: values of copy f, guard: entry values)
//!         if i cc B -> Rb1 else X
//!  Rb1:   body; if i' cc B -> Rb2 else X
//!  ...
//!  Rb(f-1): body -> X
//!  X:     phis merging the exit values, then the original exit
//! ```
//!
//! The rewrite is skipped when `B'` does not fit the operand type.
//!
//! # Side exits
//!
//! Anything else gets `f - 1` copies of the whole body chained through the header
//! Phis. Every copy keeps its own exit test; the exit edges meet in a resolver
//! block whose Phis merge the values in copy order. SafePoints are never copied,
//! so the body ends up with exactly `f*C + K` instructions.

use std::collections::HashMap;

use log::{debug, trace};

use crate::{
    analysis::{CountableLoop, LoopBound, LoopGuard},
    compiler::{
        pass::GraphPass,
        passes::loop_shape::{header_phis, LoopShape},
        EventKind, OptimizerConfig, PassContext,
    },
    ir::{
        ssa::{bridge_reference_phis, close_loop},
        BlockId, CloneMap, DataType, Graph, InstId, Opcode, RegionCloner,
    },
    Error, Result,
};

const NAME: &str = "loop-unroll";

/// Where [`copy_body`] places the copies.
#[derive(Debug, Clone, Copy)]
enum Placement {
    Append(BlockId),
    Before(InstId),
}

/// An exit-block Phi with its inputs from the loop and from the guard path.
#[derive(Debug, Clone, Copy)]
struct ExitPhi {
    phi: InstId,
    ty: DataType,
    from_loop: InstId,
    from_guard: Option<InstId>,
}

fn mapped(map: &HashMap<InstId, InstId>, value: InstId) -> InstId {
    map.get(&value).copied().unwrap_or(value)
}

fn exit_phis(graph: &Graph, exit: BlockId, from_loop: BlockId, from_guard: Option<BlockId>) -> Result<Vec<ExitPhi>> {
    let slot = graph.block(exit)?;
    let loop_index = slot
        .pred_index(from_loop)
        .ok_or(Error::InvalidEdge { from: from_loop, to: exit })?;
    let guard_index = from_guard.and_then(|pred| slot.pred_index(pred));

    let mut phis = Vec::with_capacity(slot.phis().len());
    for &phi in slot.phis() {
        let inst = graph.inst(phi)?;
        phis.push(ExitPhi {
            phi,
            ty: inst.ty(),
            from_loop: inst
                .input(loop_index)
                .ok_or(Error::InvalidInput { inst: phi, index: loop_index })?,
            from_guard: guard_index.and_then(|index| inst.input(index)),
        });
    }
    Ok(phis)
}

/// Copies `insts`, minus SafePoints and branches, with inputs remapped through
/// `map`. Returns `map` extended by the copies.
fn copy_body(
    graph: &mut Graph,
    insts: &[InstId],
    placement: Placement,
    mut map: HashMap<InstId, InstId>,
) -> Result<HashMap<InstId, InstId>> {
    for &id in insts {
        let inst = graph.inst(id)?;
        if inst.opcode().is_safepoint() || inst.opcode().is_branch() {
            continue;
        }
        let opcode = inst.opcode().clone();
        let ty = inst.ty();
        let flags = inst.flags();
        let inputs: Vec<InstId> = inst.inputs().iter().map(|&input| mapped(&map, input)).collect();

        let copy = graph.create_inst(opcode, ty, &inputs)?;
        graph.set_flags(copy, flags)?;
        match placement {
            Placement::Append(block) => graph.append_inst(block, copy)?,
            Placement::Before(anchor) => graph.insert_before(anchor, copy)?,
        }
        map.insert(id, copy);
    }
    Ok(map)
}

/// Empty blocks between the guard and the exit block.
fn guard_exit_chain(graph: &Graph, guard: &LoopGuard, exit: BlockId) -> Result<Vec<BlockId>> {
    let mut chain = Vec::new();
    let mut cursor = guard.exit_side;
    while cursor != exit {
        chain.push(cursor);
        cursor = graph
            .block(cursor)?
            .succs()
            .first()
            .copied()
            .ok_or_else(|| malformed_error!("{} does not lead to {}", cursor, exit))?;
    }
    Ok(chain)
}

/// Points the bound side of a loop test at `bound`/`imm` and the tested side at
/// `tested`.
fn retarget_test(graph: &mut Graph, branch: InstId, keep: InstId, tested: InstId, bound: InstId, imm: i64) -> Result<()> {
    let inst = graph.inst(branch)?;
    let opcode = inst.opcode().clone();
    let keep_index = usize::from(inst.input(0) != Some(keep));
    match opcode {
        Opcode::If { .. } => {
            graph.set_input(branch, 1 - keep_index, bound)?;
            graph.set_input(branch, keep_index, tested)?;
        }
        Opcode::IfImm { cc, operand_type, .. } => {
            graph.set_opcode(branch, Opcode::IfImm { cc, imm, operand_type }, DataType::Void)?;
            graph.set_input(branch, 0, tested)?;
        }
        _ => return Err(malformed_error!("{} is not a conditional branch", branch)),
    }
    Ok(())
}

/// Appends `value cc bound` in the normalized direction of `countable`.
fn add_loop_test(graph: &mut Graph, block: BlockId, countable: &CountableLoop, value: InstId) -> Result<InstId> {
    let cc = countable.cc;
    let operand_type = countable.operand_type;
    match countable.bound {
        LoopBound::Value(bound) => graph.add_inst(block, Opcode::If { cc, operand_type }, DataType::Void, &[value, bound]),
        LoopBound::Imm(imm) => graph.add_inst(block, Opcode::IfImm { cc, imm, operand_type }, DataType::Void, &[value]),
    }
}

/// Replicates loop bodies to cut the per-iteration test and branch overhead.
pub struct LoopUnrollPass;

impl Default for LoopUnrollPass {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopUnrollPass {
    /// Creates a new loop unrolling pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn clamp_factor(config: &OptimizerConfig, shape: &LoopShape) -> Option<usize> {
        let room = config.unroll_inst_limit.saturating_sub(shape.fixed) / shape.cloneable.max(1);
        let factor = config.unroll_factor.min(room);
        (factor >= 2).then_some(factor)
    }

    fn unroll_loop(graph: &mut Graph, ctx: &PassContext<'_>, header: BlockId) -> Result<bool> {
        let config = ctx.config;
        let forest = graph.loops();
        let Some(lp) = forest.loop_for_header(header) else {
            return Ok(false);
        };
        let shape = match LoopShape::analyze(graph, lp)? {
            Ok(shape) => shape,
            Err(reason) => {
                trace!("{}: loop {header} not unrolled: {reason}", graph.name());
                return Ok(false);
            }
        };
        if shape.has_calls && !config.unroll_with_calls {
            trace!("{}: loop {header} not unrolled: contains calls", graph.name());
            return Ok(false);
        }
        let countable = CountableLoop::analyze(graph, lp);
        let preheader = lp.preheader;

        if let Some(countable) = &countable {
            if Self::full_unroll(graph, ctx, &shape, countable, preheader)? {
                return Ok(true);
            }
        }

        let Some(factor) = Self::clamp_factor(config, &shape) else {
            trace!(
                "{}: loop {header} not unrolled: {} + {} instructions exceed the budget",
                graph.name(),
                shape.cloneable,
                shape.fixed
            );
            return Ok(false);
        };

        if let Some(countable) = &countable {
            if Self::unroll_countable(graph, ctx, &shape, countable, preheader, factor)? {
                return Ok(true);
            }
        }
        Self::unroll_with_side_exits(graph, ctx, &shape, factor)
    }

    fn full_unroll(
        graph: &mut Graph,
        ctx: &PassContext<'_>,
        shape: &LoopShape,
        countable: &CountableLoop,
        preheader: Option<BlockId>,
    ) -> Result<bool> {
        let config = ctx.config;
        if !countable.is_single_block() {
            return Ok(false);
        }
        let Some(trips) = countable.trip_count(graph, config.full_unroll_max_trip_count) else {
            return Ok(false);
        };
        let size = trips
            .saturating_mul(shape.cloneable as u64)
            .saturating_add(shape.fixed as u64);
        if size > config.unroll_inst_limit as u64 {
            return Ok(false);
        }
        let (Some(init), Some(bound)) = (countable.init_constant(graph), countable.bound_constant(graph)) else {
            return Ok(false);
        };

        let guard = match preheader {
            Some(preheader) => {
                let dominance = graph.dominance();
                countable.find_guard(graph, &dominance, preheader)
            }
            None => None,
        };
        if guard.is_some() && !countable.cc.evaluate(init, bound, countable.operand_type) {
            return Ok(false);
        }

        let header = shape.header;
        let exit = shape.exit;
        let entry = graph
            .block(header)?
            .preds()
            .iter()
            .copied()
            .find(|&pred| pred != header)
            .ok_or_else(|| malformed_error!("Loop {} has no entry edge", header))?;
        let phis = header_phis(graph, header, header)?;
        let exits = exit_phis(graph, exit, header, None)?;
        let body = graph.block(header)?.insts().to_vec();

        let mut copies = Vec::new();
        let mut map: HashMap<InstId, InstId> = HashMap::new();
        for trip in 0..trips {
            let mut seeds = HashMap::with_capacity(phis.len());
            for phi in &phis {
                let value = if trip == 0 {
                    phi.entry
                        .ok_or_else(|| malformed_error!("Phi {} has no entry input", phi.phi))?
                } else {
                    mapped(&map, phi.back)
                };
                seeds.insert(phi.phi, value);
            }
            let block = graph.create_block();
            map = copy_body(graph, &body, Placement::Append(block), seeds)?;
            copies.push(block);
        }
        let (Some(&first), Some(&last)) = (copies.first(), copies.last()) else {
            return Ok(false);
        };

        graph.redirect_edge(entry, header, first)?;
        for pair in copies.windows(2) {
            graph.add_edge(pair[0], pair[1])?;
        }
        graph.add_edge(last, exit)?;
        for exit_phi in &exits {
            graph.add_phi_input(exit_phi.phi, mapped(&map, exit_phi.from_loop))?;
        }

        let defined: Vec<InstId> = graph.block(header)?.all_insts().collect();
        for value in defined {
            let escapes = graph.inst(value)?.users().iter().any(|&user| {
                graph.inst(user).ok().and_then(|inst| inst.block()) != Some(header)
            });
            if escapes {
                graph.replace_users(value, mapped(&map, value))?;
            }
        }
        graph.remove_blocks(&[header])?;

        if let Some(guard) = guard {
            let chain = guard_exit_chain(graph, &guard, exit)?;
            graph.remove_inst(guard.branch, false)?;
            graph.remove_edge(guard.block, guard.exit_side)?;
            if !chain.is_empty() {
                graph.remove_blocks(&chain)?;
            }
        }
        graph.invalidate_analyses();

        debug!("{}: loop {header} fully unrolled, {trips} trips", graph.name());
        ctx.record(EventKind::LoopFullyUnrolled, NAME, header.index())
            .message(format!("{trips} trips"));
        Ok(true)
    }

    fn unroll_countable(
        graph: &mut Graph,
        ctx: &PassContext<'_>,
        shape: &LoopShape,
        countable: &CountableLoop,
        preheader: Option<BlockId>,
        factor: usize,
    ) -> Result<bool> {
        if !countable.is_single_block()
            || !countable.tests_update
            || !countable.cc.is_ordering()
            || !countable.never_wraps(graph)
        {
            return Ok(false);
        }
        let (Some(bound), Some(preheader)) = (countable.bound_constant(graph), preheader) else {
            return Ok(false);
        };
        let dominance = graph.dominance();
        let Some(guard) = countable.find_guard(graph, &dominance, preheader) else {
            return Ok(false);
        };

        let ty = countable.operand_type;
        let steps = i128::from(countable.step) * (factor as i128 - 1);
        let new_bound = ty.widen(bound) - steps;
        if !ty.contains(new_bound) {
            trace!(
                "{}: loop {} keeps its exits: bound {bound} adjusted by {steps} overflows {ty:?}",
                graph.name(),
                shape.header
            );
            return Ok(false);
        }
        let new_bound = ty.wrap(new_bound as i64);

        let header = shape.header;
        let exit = shape.exit;
        let phis = header_phis(graph, header, header)?;
        let entries_available = phis.iter().all(|phi| {
            phi.entry
                .is_some_and(|entry| dominance.dominates_block_end(graph, entry, guard.block))
        });
        if !entries_available {
            return Ok(false);
        }
        let exits = exit_phis(graph, exit, header, Some(guard.exit_pred))?;
        let chain = guard_exit_chain(graph, &guard, exit)?;
        let body = graph.block(header)?.insts().to_vec();
        let latch_index = graph
            .block(header)?
            .pred_index(header)
            .ok_or(Error::InvalidEdge { from: header, to: header })?;

        // Copies 2..=f of the body, in front of the loop test.
        let mut last: HashMap<InstId, InstId> = HashMap::new();
        for _ in 1..factor {
            let seeds = phis
                .iter()
                .map(|phi| (phi.phi, mapped(&last, phi.back)))
                .collect();
            last = copy_body(graph, &body, Placement::Before(countable.branch), seeds)?;
        }

        let resolver = graph.create_block();
        let remainder: Vec<BlockId> = (1..factor).map(|_| graph.create_block()).collect();
        let join = graph.create_block();

        graph.redirect_edge(header, exit, resolver)?;
        graph.redirect_edge(guard.block, guard.exit_side, resolver)?;
        if !chain.is_empty() {
            graph.remove_blocks(&chain)?;
        }
        graph.add_edge(resolver, remainder[0])?;
        graph.add_edge(resolver, join)?;

        let mut new_phis = Vec::new();
        let mut resumed = HashMap::with_capacity(phis.len());
        for phi in &phis {
            let entry = phi
                .entry
                .ok_or_else(|| malformed_error!("Phi {} has no entry input", phi.phi))?;
            let merged = graph.add_phi(resolver, phi.ty, &[mapped(&last, phi.back), entry])?;
            resumed.insert(phi.phi, merged);
            new_phis.push(merged);
        }
        let mut early_exit = Vec::with_capacity(exits.len());
        for exit_phi in &exits {
            let from_guard = exit_phi
                .from_guard
                .ok_or_else(|| malformed_error!("Phi {} has no guard input", exit_phi.phi))?;
            let merged = graph.add_phi(resolver, exit_phi.ty, &[mapped(&last, exit_phi.from_loop), from_guard])?;
            early_exit.push(merged);
            new_phis.push(merged);
        }
        let resumed_iv = resumed
            .get(&countable.iv)
            .copied()
            .ok_or(Error::InvalidInstruction(countable.iv))?;
        add_loop_test(graph, resolver, countable, resumed_iv)?;

        // Leftover iterations, each re-checking the original bound.
        let mut leftover: Vec<HashMap<InstId, InstId>> = Vec::with_capacity(remainder.len());
        for (index, &block) in remainder.iter().enumerate() {
            let seeds = phis
                .iter()
                .map(|phi| {
                    let value = match leftover.last() {
                        Some(previous) => mapped(previous, phi.back),
                        None => resumed[&phi.phi],
                    };
                    (phi.phi, value)
                })
                .collect();
            let copy = copy_body(graph, &body, Placement::Append(block), seeds)?;
            if let Some(&next) = remainder.get(index + 1) {
                add_loop_test(graph, block, countable, mapped(&copy, countable.update))?;
                graph.add_edge(block, next)?;
            }
            graph.add_edge(block, join)?;
            leftover.push(copy);
        }

        for (exit_phi, &early) in exits.iter().zip(&early_exit) {
            let mut inputs = vec![early];
            inputs.extend(leftover.iter().map(|copy| mapped(copy, exit_phi.from_loop)));
            let merged = graph.add_phi(join, exit_phi.ty, &inputs)?;
            new_phis.push(merged);
        }
        graph.add_edge(join, exit)?;
        let join_phis = graph.block(join)?.phis().to_vec();
        for (exit_phi, merged) in exits.iter().zip(join_phis) {
            graph.add_phi_input(exit_phi.phi, merged)?;
        }

        // The loop itself now advances f iterations per trip.
        for phi in &phis {
            graph.set_input(phi.phi, latch_index, mapped(&last, phi.back))?;
        }
        let bound_value = graph.constant(new_bound, ty)?;
        let update = countable.update;
        retarget_test(graph, countable.branch, update, mapped(&last, update), bound_value, new_bound)?;
        retarget_test(graph, guard.branch, countable.init, countable.init, bound_value, new_bound)?;

        bridge_reference_phis(graph, &new_phis)?;
        graph.invalidate_analyses();

        debug!("{}: countable loop {header} unrolled by {factor}", graph.name());
        ctx.record(EventKind::LoopUnrolled, NAME, header.index())
            .message(format!("factor {factor}, bound {bound} -> {new_bound}"));
        Ok(true)
    }

    fn unroll_with_side_exits(
        graph: &mut Graph,
        ctx: &PassContext<'_>,
        shape: &LoopShape,
        factor: usize,
    ) -> Result<bool> {
        let header = shape.header;
        let latch = shape.latch;
        let phis = header_phis(graph, header, latch)?;

        let resolver = graph.split_edge(header, shape.exit)?;
        let closed = close_loop(graph, &shape.body, resolver)?;

        let mut copies: Vec<CloneMap> = Vec::with_capacity(factor - 1);
        for _ in 1..factor {
            let mut cloner = RegionCloner::new(&shape.blocks).skip_safepoints(true);
            for phi in &phis {
                let seed = copies.last().map_or(phi.back, |copy| copy.value(phi.back));
                cloner = cloner.seed(phi.phi, seed);
            }
            copies.push(cloner.clone_into(graph)?);
        }

        let copy_block = |copy: &CloneMap, block: BlockId| {
            copy.block(block)
                .ok_or_else(|| malformed_error!("{} was not cloned", block))
        };
        graph.redirect_edge(latch, header, copy_block(&copies[0], header)?)?;
        for (index, copy) in copies.iter().enumerate() {
            let next = match copies.get(index + 1) {
                Some(next) => copy_block(next, header)?,
                None => header,
            };
            graph.redirect_edge(copy_block(copy, latch)?, copy_block(copy, header)?, next)?;
        }
        if let Some(final_copy) = copies.last() {
            for phi in &phis {
                graph.add_phi_input(phi.phi, final_copy.value(phi.back))?;
            }
        }

        let resolver_phis: Vec<InstId> = closed.iter().map(|&(_, phi)| phi).collect();
        let bridges = bridge_reference_phis(graph, &resolver_phis)?;
        graph.invalidate_analyses();

        debug!("{}: loop {header} unrolled by {factor} with side exits", graph.name());
        ctx.record(EventKind::LoopUnrolled, NAME, header.index())
            .message(format!("factor {factor}, {} copies keep their exits", factor - 1));
        if bridges > 0 {
            ctx.record(EventKind::SafePointBridged, NAME, header.index())
                .message(format!("{bridges} references bridged"));
        }
        Ok(true)
    }
}

impl GraphPass for LoopUnrollPass {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Unrolls innermost loops within an instruction budget"
    }

    fn enabled(&self, config: &OptimizerConfig) -> bool {
        config.enable_unrolling
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
            changed |= Self::unroll_loop(graph, ctx, header)?;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        analysis::GraphEvaluator,
        compiler::{passes::LoopUnrollPass, EventKind, EventLog, GraphPass, OptimizerConfig, PassContext},
        ir::{builder::label, ConditionCode, DataType, Graph, GraphBuilder, GraphChecker, GraphComparator},
        runtime::MockRuntime,
    };

    fn without_full_unroll(factor: usize) -> OptimizerConfig {
        OptimizerConfig {
            full_unroll_max_trip_count: 0,
            ..OptimizerConfig::unroll(100, factor)
        }
    }

    fn unroll(graph: &mut Graph, config: &OptimizerConfig) -> (bool, EventLog) {
        let runtime = MockRuntime::default();
        let events = EventLog::new();
        let ctx = PassContext::new(config, &runtime, &events);
        let changed = LoopUnrollPass::new().run(graph, &ctx).unwrap();
        (changed, events)
    }

    fn evaluate(graph: &Graph, args: &[i64]) -> i64 {
        let runtime = MockRuntime::default();
        let args: Vec<_> = args.iter().map(|&a| crate::analysis::Value::Int(a)).collect();
        let outcome = GraphEvaluator::new(graph, &runtime)
            .run(&args, Vec::new())
            .unwrap();
        match outcome.value {
            Some(crate::analysis::Value::Int(v)) => v,
            other => panic!("unexpected result {other:?}"),
        }
    }

    /// `s = 0; i = start; if (i < 1000) do { s += i; i += 1 } while (i < 1000); return s`
    fn guarded_sum(start: i64) -> Graph {
        GraphBuilder::new("guarded_sum")
            .build(|f| {
                let zero = f.constant(0, DataType::Int32);
                let init = f.constant(start, DataType::Int32);
                let one = f.constant(1, DataType::Int32);
                let bound = f.constant(1000, DataType::Int32);
                f.block(0, |b| b.branch(ConditionCode::Lt, init, bound, 1, 3));
                f.block(1, |b| b.jump(2));
                let s = f.block(2, |b| {
                    let i = b.phi(DataType::Int32, &[(1, init)]);
                    let s = b.phi(DataType::Int32, &[(1, zero)]);
                    b.safepoint(&[]);
                    let s2 = b.add(s, i);
                    let i2 = b.add(i, one);
                    b.phi_input(i, 2, i2);
                    b.phi_input(s, 2, s2);
                    b.branch(ConditionCode::Lt, i2, bound, 2, 3);
                    s2
                });
                f.block(3, |b| {
                    let r = b.phi(DataType::Int32, &[(0, zero), (2, s)]);
                    b.ret(r);
                });
            })
            .unwrap()
    }

    #[test]
    fn test_countable_loop_keeps_semantics() {
        for (start, factor) in [(0, 4), (995, 4), (997, 3), (999, 2), (1000, 4), (993, 8)] {
            let mut graph = guarded_sum(start);
            let expected = evaluate(&graph, &[]);
            let (changed, events) = unroll(&mut graph, &without_full_unroll(factor));
            assert!(changed);
            assert!(events.has(EventKind::LoopUnrolled));
            GraphChecker::new().check(&graph).unwrap();
            assert_eq!(evaluate(&graph, &[]), expected, "start {start}, factor {factor}");
        }
    }

    /// `a = start; b = 0; if (a cc bound) do { a += step; b += a } while (a cc bound)`,
    /// returning the `b` (or `a`) the header saw last. Without `start` the counter
    /// begins at parameter 0.
    fn guarded_accumulate(
        ty: DataType,
        cc: ConditionCode,
        start: Option<i64>,
        bound: i64,
        step: i64,
        returns_counter: bool,
    ) -> Graph {
        GraphBuilder::new("guarded_accumulate")
            .build(|f| {
                let init = match start {
                    Some(value) => f.constant(value, ty),
                    None => f.param(0, ty),
                };
                let stop = f.constant(bound, ty);
                let zero = f.constant(0, ty);
                let stride = f.constant(step, ty);
                f.block(0, |b| b.branch(cc, init, stop, 1, 3));
                f.block(1, |b| b.jump(2));
                let (a, sum) = f.block(2, |b| {
                    let a = b.phi(ty, &[(1, init)]);
                    let sum = b.phi(ty, &[(1, zero)]);
                    let next = b.add(a, stride);
                    let sum2 = b.add(sum, next);
                    b.phi_input(a, 2, next);
                    b.phi_input(sum, 2, sum2);
                    b.branch(cc, next, stop, 2, 3);
                    (a, sum)
                });
                f.block(3, |b| {
                    let result = if returns_counter {
                        b.phi(ty, &[(0, init), (2, a)])
                    } else {
                        b.phi(ty, &[(0, zero), (2, sum)])
                    };
                    b.ret(result);
                });
            })
            .unwrap()
    }

    /// Unrolls a fresh graph by every factor in 2..=10 and compares it with the
    /// original on each argument list.
    fn sweep_factors(build: impl Fn() -> Graph, inputs: &[&[i64]], case: &str) {
        let original = build();
        let expected: Vec<i64> = inputs.iter().map(|args| evaluate(&original, args)).collect();
        for factor in 2..=10 {
            let mut graph = build();
            let (changed, events) = unroll(&mut graph, &without_full_unroll(factor));
            assert!(changed, "{case}, factor {factor}");
            assert_eq!(events.count_kind(EventKind::LoopUnrolled), 1, "{case}, factor {factor}");
            GraphChecker::new().check(&graph).unwrap();
            for (args, want) in inputs.iter().zip(&expected) {
                assert_eq!(evaluate(&graph, args), *want, "{case}, factor {factor}, args {args:?}");
            }
        }
    }

    #[test]
    fn test_descending_loops() {
        for cc in [ConditionCode::Gt, ConditionCode::Ge] {
            for step in [-1, -3] {
                for start in [-4, 0, 1, 2, 3, 10, 31] {
                    sweep_factors(
                        || guarded_accumulate(DataType::Int32, cc, Some(start), 0, step, false),
                        &[&[]],
                        &format!("{cc:?} step {step} from {start}"),
                    );
                }
            }
        }
    }

    #[test]
    fn test_inclusive_bound_with_large_step() {
        for step in [2, 3] {
            for start in [0, 5, 9, 10, 11, 20] {
                sweep_factors(
                    || guarded_accumulate(DataType::Int32, ConditionCode::Le, Some(start), 10, step, false),
                    &[&[]],
                    &format!("Le step {step} from {start}"),
                );
            }
        }
    }

    #[test]
    fn test_unsigned_bound_near_max() {
        let max = i64::from(u32::MAX);
        for (cc, bound, step) in [
            (ConditionCode::Lt, max - 1, 1),
            (ConditionCode::Le, max - 2, 2),
            (ConditionCode::Lt, max, 3),
        ] {
            for start in [max - 20, max - 3, max - 2, max - 1, max] {
                sweep_factors(
                    || guarded_accumulate(DataType::Uint32, cc, Some(start), bound, step, false),
                    &[&[]],
                    &format!("{cc:?} {bound} step {step} from {start}"),
                );
            }
        }
    }

    #[test]
    fn test_parameter_start() {
        let lt = || guarded_accumulate(DataType::Int32, ConditionCode::Lt, None, 10, 1, false);
        let le = || guarded_accumulate(DataType::Int32, ConditionCode::Le, None, 10, 1, false);
        // 3 + 4 + ... + 9 and 3 + 4 + ... + 10
        assert_eq!(evaluate(&lt(), &[2]), 42);
        assert_eq!(evaluate(&le(), &[2]), 52);

        let inputs: &[&[i64]] = &[&[-3], &[0], &[2], &[9], &[10], &[11]];
        sweep_factors(lt, inputs, "Lt from parameter");
        sweep_factors(le, inputs, "Le from parameter");
        for factor in 2..=10 {
            let mut graph = lt();
            unroll(&mut graph, &without_full_unroll(factor));
            assert_eq!(evaluate(&graph, &[2]), 42, "factor {factor}");
        }
    }

    #[test]
    fn test_counter_itself_escapes() {
        for (cc, bound, step) in [
            (ConditionCode::Lt, 17, 2),
            (ConditionCode::Gt, -5, -3),
            (ConditionCode::Ge, 0, -1),
        ] {
            for start in [-9, 0, 4, 16, 30] {
                sweep_factors(
                    || guarded_accumulate(DataType::Int32, cc, Some(start), bound, step, true),
                    &[&[]],
                    &format!("{cc:?} {bound} step {step} from {start}, counter returned"),
                );
            }
        }
    }

    #[test]
    fn test_overflowing_bound_falls_back_to_side_exits() {
        let mut graph = GraphBuilder::new("overflow")
            .build(|f| {
                let init = f.constant(i64::from(i32::MIN), DataType::Int32);
                let bound = f.constant(i64::from(i32::MIN) + 3, DataType::Int32);
                let step = f.constant(1, DataType::Int32);
                f.block(0, |b| b.branch(ConditionCode::Lt, init, bound, 1, 3));
                f.block(1, |b| b.jump(2));
                let i = f.block(2, |b| {
                    let i = b.phi(DataType::Int32, &[(1, init)]);
                    let i2 = b.add(i, step);
                    b.phi_input(i, 2, i2);
                    b.branch(ConditionCode::Lt, i2, bound, 2, 3);
                    i
                });
                f.block(3, |b| {
                    let r = b.phi(DataType::Int32, &[(0, init), (2, i)]);
                    b.ret(r);
                });
            })
            .unwrap();

        let expected = evaluate(&graph, &[]);
        let (changed, events) = unroll(&mut graph, &without_full_unroll(8));
        assert!(changed);
        assert_eq!(events.count_kind(EventKind::LoopUnrolled), 1);
        GraphChecker::new().check(&graph).unwrap();
        assert_eq!(graph.loops().len(), 1);
        assert_eq!(evaluate(&graph, &[]), expected);
    }

    #[test]
    fn test_full_unroll_replaces_loop() {
        let mut graph = guarded_sum(990);
        let expected = evaluate(&graph, &[]);
        let (changed, events) = unroll(&mut graph, &OptimizerConfig::unroll(100, 2));
        assert!(changed);
        assert!(events.has(EventKind::LoopFullyUnrolled));
        assert!(graph.loops().is_empty());
        assert!(!graph.contains_block(label(2)));
        GraphChecker::new().check(&graph).unwrap();
        assert_eq!(evaluate(&graph, &[]), expected);
    }

    #[test]
    fn test_budget_too_small_is_a_no_op() {
        let mut graph = guarded_sum(0);
        let before = graph.clone();
        let (changed, events) = unroll(&mut graph, &OptimizerConfig::unroll(6, 4));
        assert!(!changed);
        assert!(events.is_empty());
        assert!(GraphComparator::new(&before, &graph).equivalent());
    }
}
