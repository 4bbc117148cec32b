//! Loop peeling: runs the first iteration of a loop as straight code in front of it.
//!
//! ```text
//!   pre-header           pre-header
//!       |                    |
//!       v                    v
//!    header <--+          header'   (copy, header Phis replaced by entry values)
//!       |      |             |  \
//!     latch ---+           latch'  \
//!       |                    |      \
//!     exit                header <-+ \
//!                            |     |  |
//!                          latch --+  |
//!                            |        |
//!                         resolver <--+
//!                            |
//!                          exit
//! ```
//!
//! The original loop becomes the steady state, entered from the peeled latch. Both
//! header exits meet in a resolver block holding a Phi for each value that escapes
//! the loop. SafePoints are copied with the body, one per physical iteration.

use log::{debug, trace};

use crate::{
    analysis::ensure_preheader,
    compiler::{
        pass::GraphPass,
        passes::loop_shape::{header_phis, LoopShape},
        EventKind, OptimizerConfig, PassContext,
    },
    ir::{
        ssa::{bridge_reference_phis, close_loop},
        BlockId, Graph, InstId, RegionCloner,
    },
    Result,
};

const NAME: &str = "loop-peeling";

/// Splits the first iteration off every eligible innermost loop.
pub struct LoopPeelingPass;

impl Default for LoopPeelingPass {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopPeelingPass {
    /// Creates a new loop peeling pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn accepts(graph: &mut Graph, ctx: &PassContext<'_>, header: BlockId) -> Result<bool> {
        let forest = graph.loops();
        let Some(lp) = forest.loop_for_header(header) else {
            return Ok(false);
        };
        match LoopShape::analyze(graph, lp)? {
            Ok(shape) if shape.has_calls && !ctx.config.peel_with_calls => {
                trace!("{}: loop {header} not peeled: contains calls", graph.name());
                Ok(false)
            }
            Ok(_) => Ok(true),
            Err(reason) => {
                trace!("{}: loop {header} not peeled: {reason}", graph.name());
                Ok(false)
            }
        }
    }

    fn peel_loop(graph: &mut Graph, ctx: &PassContext<'_>, header: BlockId) -> Result<bool> {
        if !Self::accepts(graph, ctx, header)? {
            return Ok(false);
        }
        let preheader = ensure_preheader(graph, header)?;

        let forest = graph.loops();
        let lp = forest
            .loop_for_header(header)
            .ok_or_else(|| malformed_error!("{} is no longer a loop header", header))?;
        let shape = LoopShape::analyze(graph, lp)?
            .map_err(|reason| malformed_error!("Loop {} changed shape: {}", header, reason))?;
        let phis = header_phis(graph, header, shape.latch)?;

        let resolver = graph.split_edge(header, shape.exit)?;
        let closed = close_loop(graph, &shape.body, resolver)?;

        let mut cloner = RegionCloner::new(&shape.blocks);
        for phi in &phis {
            let entry = phi
                .entry
                .ok_or_else(|| malformed_error!("Phi {} has no entry input", phi.phi))?;
            cloner = cloner.seed(phi.phi, entry);
        }
        let peeled = cloner.clone_into(graph)?;
        let missing = |block: BlockId| malformed_error!("{} was not cloned", block);
        let peeled_header = peeled.block(header).ok_or_else(|| missing(header))?;
        let peeled_latch = peeled.block(shape.latch).ok_or_else(|| missing(shape.latch))?;

        graph.redirect_edge(peeled_latch, peeled_header, header)?;
        for phi in &phis {
            graph.add_phi_input(phi.phi, peeled.value(phi.back))?;
        }
        graph.redirect_edge(preheader, header, peeled_header)?;

        let resolver_phis: Vec<InstId> = closed.iter().map(|&(_, phi)| phi).collect();
        let bridges = bridge_reference_phis(graph, &resolver_phis)?;
        graph.invalidate_analyses();

        debug!("{}: peeled first iteration of loop {header}", graph.name());
        ctx.record(EventKind::LoopPeeled, NAME, header.index())
            .message(format!("{} blocks peeled", shape.blocks.len()));
        if bridges > 0 {
            ctx.record(EventKind::SafePointBridged, NAME, header.index())
                .message(format!("{bridges} references bridged"));
        }
        Ok(true)
    }
}

impl GraphPass for LoopPeelingPass {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Peels the first iteration of innermost loops"
    }

    fn enabled(&self, config: &OptimizerConfig) -> bool {
        config.enable_peeling
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
            changed |= Self::peel_loop(graph, ctx, header)?;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        analysis::{GraphEvaluator, Value},
        compiler::{passes::LoopPeelingPass, EventKind, EventLog, GraphPass, OptimizerConfig, PassContext},
        ir::{builder::label, ConditionCode, DataType, Graph, GraphBuilder, GraphChecker},
        runtime::MockRuntime,
    };

    /// `s = 0; for (i = 0; i < n; i++) s += i * 3; return s`
    fn triple_sum() -> Graph {
        GraphBuilder::new("triple_sum")
            .build(|f| {
                let n = f.param(0, DataType::Int32);
                let zero = f.constant(0, DataType::Int32);
                let one = f.constant(1, DataType::Int32);
                let three = f.constant(3, DataType::Int32);
                f.block(0, |b| b.jump(1));
                let (i, s) = f.block(1, |b| {
                    let i = b.phi(DataType::Int32, &[(0, zero)]);
                    let s = b.phi(DataType::Int32, &[(0, zero)]);
                    b.branch(ConditionCode::Lt, i, n, 2, 3);
                    (i, s)
                });
                f.block(2, |b| {
                    b.safepoint(&[]);
                    let t = b.mul(i, three);
                    let s2 = b.add(s, t);
                    let i2 = b.add(i, one);
                    b.phi_input(i, 2, i2);
                    b.phi_input(s, 2, s2);
                    b.jump(1);
                });
                f.block(3, |b| b.ret(s));
            })
            .unwrap()
    }

    fn evaluate(graph: &Graph, n: i64) -> Option<Value> {
        let runtime = MockRuntime::default();
        GraphEvaluator::new(graph, &runtime)
            .run(&[Value::Int(n)], Vec::new())
            .unwrap()
            .value
    }

    #[test]
    fn test_peeled_loop_computes_the_same() {
        let mut graph = triple_sum();
        let original = graph.clone();

        let config = OptimizerConfig {
            enable_peeling: true,
            ..OptimizerConfig::default()
        };
        let runtime = MockRuntime::default();
        let events = EventLog::new();
        let ctx = PassContext::new(&config, &runtime, &events);
        assert!(LoopPeelingPass::new().run(&mut graph, &ctx).unwrap());

        GraphChecker::new().require_loop_safepoints(true).check(&graph).unwrap();
        assert_eq!(events.count_kind(EventKind::LoopPeeled), 1);
        for n in [-2, 0, 1, 2, 7] {
            assert_eq!(evaluate(&graph, n), evaluate(&original, n), "n = {n}");
        }

        // The loop is now entered from the peeled latch only.
        let forest = graph.loops();
        let lp = forest.loop_for_header(label(1)).unwrap();
        let header = graph.block(label(1)).unwrap();
        assert_eq!(header.preds().len(), 2);
        assert!(header.preds().iter().all(|&pred| pred != label(0)));
        assert!(lp.preheader.is_some());
    }

    #[test]
    fn test_disabled_by_default() {
        assert!(!LoopPeelingPass::new().enabled(&OptimizerConfig::default()));
    }
}
