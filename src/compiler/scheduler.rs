//! Pass scheduling for single graphs and for sets of compilation units.
//!
//! The [`PassScheduler`] runs an ordered list of passes over one graph. A
//! structural pass that reported a change is followed by a Cleanup run, and with
//! `verify_after_each_pass` the [`GraphChecker`] validates the graph after every
//! pass.
//!
//! The [`Optimizer`] owns a table of compilation units and runs the scheduler over
//! all of them in parallel. Units are independent: each worker takes its graph out
//! of the table, optimizes it with no lock held and puts it back.

use std::sync::{
    atomic::{AtomicU32, AtomicUsize, Ordering},
    Arc,
};

use dashmap::DashMap;
use log::{debug, trace, warn};
use rayon::prelude::*;

use crate::{
    compiler::{
        pass::{GraphPass, PassContext},
        passes::{
            AdjustRefsPass, CleanupPass, LoopPeelingPass, LoopUnrollPass,
            MemoryBarrierPlacementPass, RedundantLoopEliminationPass, SafePointOptimizationPass,
        },
        EventKind, EventLog, OptimizerConfig,
    },
    ir::{Graph, GraphChecker, GraphDump},
    runtime::RuntimeInfo,
    Error, Result,
};

/// Runs passes over a graph in a fixed order.
pub struct PassScheduler {
    passes: Vec<Box<dyn GraphPass>>,
    cleanup: CleanupPass,
}

impl Default for PassScheduler {
    fn default() -> Self {
        Self::standard()
    }
}

impl PassScheduler {
    /// Creates a scheduler without passes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            cleanup: CleanupPass::new(),
        }
    }

    /// The default pipeline.
    ///
    /// Cleanup first normalizes the input. Dead loops are removed before the loop
    /// transformations spend budget on them, and AdjustRefs runs after unrolling
    /// so that the copies' accesses join the same chains.
    #[must_use]
    pub fn standard() -> Self {
        Self::new()
            .with_pass(CleanupPass::new())
            .with_pass(RedundantLoopEliminationPass::new())
            .with_pass(LoopPeelingPass::new())
            .with_pass(LoopUnrollPass::new())
            .with_pass(SafePointOptimizationPass::new())
            .with_pass(AdjustRefsPass::new())
            .with_pass(MemoryBarrierPlacementPass::new())
    }

    /// Appends a pass to the pipeline.
    #[must_use]
    pub fn with_pass(mut self, pass: impl GraphPass + 'static) -> Self {
        self.passes.push(Box::new(pass));
        self
    }

    /// Appends a boxed pass to the pipeline.
    pub fn add_pass(&mut self, pass: Box<dyn GraphPass>) {
        self.passes.push(pass);
    }

    /// Names of the scheduled passes, in order.
    #[must_use]
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|pass| pass.name()).collect()
    }

    /// Runs every enabled pass once over `graph`.
    ///
    /// Returns `true` if any pass changed the graph.
    ///
    /// # Errors
    ///
    /// Returns the first pass error, or the checker error when verification is
    /// enabled and a pass left the graph malformed.
    pub fn run(&self, graph: &mut Graph, ctx: &PassContext<'_>) -> Result<bool> {
        let mut changed = false;
        for pass in &self.passes {
            if !pass.enabled(ctx.config) {
                continue;
            }
            changed |= self.run_pass(pass.as_ref(), graph, ctx)?;
        }
        Ok(changed)
    }

    fn run_pass(&self, pass: &dyn GraphPass, graph: &mut Graph, ctx: &PassContext<'_>) -> Result<bool> {
        trace!("{}: running {}", graph.name(), pass.name());
        let changed = pass.run(graph, ctx)?;
        Self::verify(graph, ctx, pass.name())?;
        if !changed {
            return Ok(false);
        }
        ctx.record(EventKind::PassCompleted, pass.name(), 0)
            .message(format!("{} changed {}", pass.name(), graph.name()));

        if pass.is_structural() && pass.name() != self.cleanup.name() && self.cleanup.enabled(ctx.config) {
            debug!("{}: cleanup after {}", graph.name(), pass.name());
            self.cleanup.run(graph, ctx)?;
            Self::verify(graph, ctx, self.cleanup.name())?;
        }
        Ok(true)
    }

    fn verify(graph: &mut Graph, ctx: &PassContext<'_>, pass: &str) -> Result<()> {
        if !ctx.config.verify_after_each_pass {
            return Ok(());
        }
        if graph.has_unpublished_edits() {
            graph.invalidate_analyses();
        }
        GraphChecker::new().check(graph).map_err(|error| {
            trace!("{}: graph after {pass}:\n{}", graph.name(), GraphDump::new(graph));
            ctx.record(EventKind::VerificationFailed, pass, 0)
                .message(format!("after {pass}: {error}"));
            error
        })
    }
}

/// Optimizes a set of compilation units in parallel.
///
/// # Examples
///
/// ```rust,no_run
/// use ssaopt::prelude::*;
///
/// # fn example(graph: Graph) {
/// let optimizer = Optimizer::new(OptimizerConfig::default(), MockRuntime::default());
/// let unit = optimizer.add_unit(graph);
/// let changed = optimizer.optimize_all();
/// println!("{changed} units changed, {}", optimizer.events().summary());
/// let graph = optimizer.take_unit(unit).unwrap();
/// # }
/// ```
pub struct Optimizer {
    config: OptimizerConfig,
    runtime: Arc<dyn RuntimeInfo>,
    scheduler: PassScheduler,
    units: DashMap<u32, Graph>,
    next_unit: AtomicU32,
    events: EventLog,
}

impl Optimizer {
    /// Creates an optimizer running the standard pipeline.
    #[must_use]
    pub fn new(config: OptimizerConfig, runtime: impl RuntimeInfo + 'static) -> Self {
        Self {
            config,
            runtime: Arc::new(runtime),
            scheduler: PassScheduler::standard(),
            units: DashMap::new(),
            next_unit: AtomicU32::new(0),
            events: EventLog::new(),
        }
    }

    /// Replaces the pass pipeline.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: PassScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Pipeline options.
    #[must_use]
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Change journal shared by all units.
    #[must_use]
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Registers a graph and returns its unit id.
    pub fn add_unit(&self, graph: Graph) -> u32 {
        let unit = self.next_unit.fetch_add(1, Ordering::Relaxed);
        self.units.insert(unit, graph);
        unit
    }

    /// Number of registered units.
    #[must_use]
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Runs `f` on the graph of `unit`.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownUnit`] if no such unit is registered.
    pub fn with_unit<R>(&self, unit: u32, f: impl FnOnce(&Graph) -> R) -> Result<R> {
        let graph = self.units.get(&unit).ok_or(Error::UnknownUnit(unit))?;
        Ok(f(&graph))
    }

    /// Removes `unit` from the optimizer and returns its graph.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownUnit`] if no such unit is registered.
    pub fn take_unit(&self, unit: u32) -> Result<Graph> {
        self.units
            .remove(&unit)
            .map(|(_, graph)| graph)
            .ok_or(Error::UnknownUnit(unit))
    }

    /// Optimizes a single unit.
    ///
    /// On error the unit keeps the graph it had before the run.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownUnit`] for an unregistered unit, otherwise the first pass
    /// or verification error.
    pub fn optimize_unit(&self, unit: u32) -> Result<bool> {
        let (_, mut graph) = self.units.remove(&unit).ok_or(Error::UnknownUnit(unit))?;
        let snapshot = graph.clone();

        let base = PassContext::new(&self.config, self.runtime.as_ref(), &self.events);
        let ctx = base.for_unit(unit);
        let result = self.scheduler.run(&mut graph, &ctx);

        match result {
            Ok(changed) => {
                self.units.insert(unit, graph);
                Ok(changed)
            }
            Err(error) => {
                self.units.insert(unit, snapshot);
                Err(error)
            }
        }
    }

    /// Optimizes every registered unit in parallel and returns how many changed.
    ///
    /// A failing unit is restored, reported as an [`EventKind::Error`] event and
    /// does not stop the others.
    pub fn optimize_all(&self) -> usize {
        let mut units: Vec<u32> = self.units.iter().map(|entry| *entry.key()).collect();
        units.sort_unstable();

        let changed = AtomicUsize::new(0);
        units.par_iter().for_each(|&unit| match self.optimize_unit(unit) {
            Ok(true) => {
                changed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => {}
            Err(error) => {
                warn!("unit {unit}: optimization failed: {error}");
                self.events
                    .record(EventKind::Error)
                    .unit(unit)
                    .message(error.to_string());
            }
        });

        let changed = changed.load(Ordering::Relaxed);
        debug!(
            "optimized {} units, {changed} changed: {}",
            units.len(),
            self.events.summary()
        );
        changed
    }
}
