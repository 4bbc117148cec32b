//! SafePoint root-set minimization.
//!
//! A SafePoint records the values the runtime must be able to reconstruct when it
//! stops the thread there. A value nobody reads after the SafePoint is dead at that
//! point and its entry only keeps the producer and a GC root alive for nothing.
//!
//! A value counts as live when one of its non-SafePoint users can still execute
//! after the SafePoint: a later instruction of the same block, an instruction in a
//! block reachable from the SafePoint's block, or a Phi whose matching predecessor
//! is. The test is conservative around loops, a use earlier in a loop body keeps
//! the value recorded.
//!
//! Nothing is pruned when the configuration requires complete register maps.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::{
    compiler::{pass::GraphPass, EventKind, OptimizerConfig, PassContext},
    ir::{BlockId, Graph, InstId},
    Error, Result,
};

const NAME: &str = "safepoint-optimization";

/// Drops SafePoint inputs that are dead after the SafePoint.
pub struct SafePointOptimizationPass;

impl Default for SafePointOptimizationPass {
    fn default() -> Self {
        Self::new()
    }
}

/// Blocks reachable through at least one edge, memoized per source block.
struct Reachability {
    cache: HashMap<BlockId, HashSet<BlockId>>,
}

impl Reachability {
    fn new() -> Self {
        Self {
            cache: HashMap::new(),
        }
    }

    /// Whether the start of `to` can be reached from the end of `from`.
    fn reaches(&mut self, graph: &Graph, from: BlockId, to: BlockId) -> Result<bool> {
        if !self.cache.contains_key(&from) {
            let mut seen = HashSet::new();
            let mut stack = graph.block(from)?.succs().to_vec();
            while let Some(block) = stack.pop() {
                if seen.insert(block) {
                    stack.extend_from_slice(graph.block(block)?.succs());
                }
            }
            self.cache.insert(from, seen);
        }
        Ok(self.cache.get(&from).is_some_and(|seen| seen.contains(&to)))
    }
}

impl SafePointOptimizationPass {
    /// Creates a new SafePoint optimization pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn live_after(graph: &Graph, reach: &mut Reachability, safepoint: InstId, value: InstId) -> Result<bool> {
        let block = graph
            .inst(safepoint)?
            .block()
            .ok_or(Error::InvalidInstruction(safepoint))?;
        let position = graph.position(safepoint).unwrap_or(0);

        for &user in graph.inst(value)?.users() {
            let inst = graph.inst(user)?;
            if inst.opcode().is_safepoint() {
                continue;
            }
            let Some(user_block) = inst.block() else {
                continue;
            };
            if inst.is_phi() {
                let preds = graph.block(user_block)?.preds();
                for (&input, &pred) in inst.inputs().iter().zip(preds) {
                    if input == value && (pred == block || reach.reaches(graph, block, pred)?) {
                        return Ok(true);
                    }
                }
                continue;
            }
            if user_block == block && graph.position(user).is_some_and(|at| at > position) {
                return Ok(true);
            }
            if reach.reaches(graph, block, user_block)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl GraphPass for SafePointOptimizationPass {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Removes SafePoint inputs that are not live after the SafePoint"
    }

    fn enabled(&self, config: &OptimizerConfig) -> bool {
        config.enable_safepoint_optimization
    }

    fn run(&self, graph: &mut Graph, ctx: &PassContext<'_>) -> Result<bool> {
        if ctx.config.safepoints_require_regmap {
            return Ok(false);
        }

        let safepoints: Vec<InstId> = graph
            .inst_ids()
            .filter(|&id| graph.opcode(id).is_ok_and(|opcode| opcode.is_safepoint()))
            .collect();

        let mut reach = Reachability::new();
        let mut pruned = 0usize;
        for safepoint in safepoints {
            if graph.inst(safepoint)?.block().is_none() {
                continue;
            }
            let inputs = graph.inst(safepoint)?.inputs().to_vec();
            for (index, &value) in inputs.iter().enumerate().rev() {
                if Self::live_after(graph, &mut reach, safepoint, value)? {
                    continue;
                }
                graph.remove_input(safepoint, index)?;
                ctx.record(EventKind::SafePointPruned, NAME, safepoint.index())
                    .message(format!("{value} is dead after {safepoint}"));
                pruned += 1;
            }
        }

        if pruned > 0 {
            debug!("{}: pruned {pruned} SafePoint inputs", graph.name());
        }
        Ok(pruned > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        compiler::{
            passes::SafePointOptimizationPass, EventKind, EventLog, GraphPass, OptimizerConfig,
            PassContext,
        },
        ir::{ConditionCode, DataType, Graph, GraphBuilder, GraphChecker, InstId, Opcode},
        runtime::MockRuntime,
    };

    fn run(graph: &mut Graph, config: &OptimizerConfig) -> EventLog {
        let runtime = MockRuntime::default();
        let events = EventLog::new();
        let ctx = PassContext::new(config, &runtime, &events);
        SafePointOptimizationPass::new().run(graph, &ctx).unwrap();
        events
    }

    /// A SafePoint recording `a`, `b` and the loop counter; only `b` and the
    /// counter are read afterwards.
    fn recorded() -> (Graph, InstId) {
        let mut safepoint = None;
        let graph = GraphBuilder::new("recorded")
            .build(|f| {
                let a = f.param(0, DataType::Reference);
                let b_ref = f.param(1, DataType::Reference);
                let n = f.param(2, DataType::Int32);
                let zero = f.constant(0, DataType::Int32);
                let one = f.constant(1, DataType::Int32);
                let first = f.block(0, |b| {
                    let first = b.load_array(DataType::Int32, a, zero);
                    b.jump(1);
                    first
                });
                let i = f.block(1, |b| {
                    let i = b.phi(DataType::Int32, &[(0, zero)]);
                    safepoint = Some(b.safepoint(&[(a, 0), (b_ref, 1), (i, 2)]));
                    let next = b.add(i, one);
                    b.phi_input(i, 1, next);
                    b.branch(ConditionCode::Lt, next, n, 1, 2);
                    i
                });
                f.block(2, |b| {
                    let last = b.load_array(DataType::Int32, b_ref, i);
                    let sum = b.add(first, last);
                    b.ret(sum);
                });
            })
            .unwrap();
        (graph, safepoint.unwrap())
    }

    #[test]
    fn test_prunes_dead_reference() {
        let (mut graph, safepoint) = recorded();
        let events = run(&mut graph, &OptimizerConfig::default());

        let inst = graph.inst(safepoint).unwrap();
        assert_eq!(inst.inputs().len(), 2);
        let Opcode::SafePoint(data) = inst.opcode() else {
            panic!("not a SafePoint");
        };
        assert_eq!(data.vregs.len(), 2);
        assert_eq!(events.count_kind(EventKind::SafePointPruned), 1);
        GraphChecker::new().check(&graph).unwrap();
    }

    #[test]
    fn test_regmap_keeps_everything() {
        let (mut graph, safepoint) = recorded();
        let config = OptimizerConfig {
            safepoints_require_regmap: true,
            ..OptimizerConfig::default()
        };
        let events = run(&mut graph, &config);
        assert_eq!(graph.inst(safepoint).unwrap().inputs().len(), 3);
        assert!(events.is_empty());
    }
}
