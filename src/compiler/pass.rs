//! Pass trait and the per-run context handed to every pass.

use crate::{
    compiler::{EventBuilder, EventKind, EventLog, OptimizerConfig},
    ir::Graph,
    runtime::RuntimeInfo,
    Result,
};

/// Everything a pass may consult besides the graph it transforms.
///
/// The context is shared by reference across worker threads; only the event log
/// is written to, and it is append-only.
#[derive(Clone, Copy)]
pub struct PassContext<'a> {
    /// Pipeline options
    pub config: &'a OptimizerConfig,
    /// Layout provider
    pub runtime: &'a dyn RuntimeInfo,
    /// Change journal
    pub events: &'a EventLog,
    /// Identifier of the compilation unit being optimized
    pub unit: u32,
}

impl<'a> PassContext<'a> {
    /// Context for a single unit.
    #[must_use]
    pub fn new(config: &'a OptimizerConfig, runtime: &'a dyn RuntimeInfo, events: &'a EventLog) -> Self {
        Self {
            config,
            runtime,
            events,
            unit: 0,
        }
    }

    /// Same context for another unit.
    #[must_use]
    pub fn for_unit(&self, unit: u32) -> Self {
        Self { unit, ..*self }
    }

    /// Starts an event attributed to this unit and to `pass`.
    pub fn record(&self, kind: EventKind, pass: &str, location: usize) -> EventBuilder<'a> {
        self.events.record(kind).at(self.unit, location).pass(pass)
    }
}

/// A transformation over one graph.
///
/// All passes must be thread-safe (Send + Sync) so that the [`Optimizer`](crate::compiler::Optimizer)
/// can run them on several units in parallel. A pass either fully applies its
/// transformation or leaves the graph untouched; inapplicability is reported as
/// `Ok(false)`, never as an error.
pub trait GraphPass: Send + Sync {
    /// Unique name for logging and debugging.
    fn name(&self) -> &'static str;

    /// Runs the pass on `graph`.
    ///
    /// Returns `true` if any changes were made, `false` otherwise. Events should be
    /// recorded to `ctx.events`.
    ///
    /// # Errors
    ///
    /// Returns an error if a graph invariant was found broken.
    fn run(&self, graph: &mut Graph, ctx: &PassContext<'_>) -> Result<bool>;

    /// Whether the pass should run under `config`.
    fn enabled(&self, _config: &OptimizerConfig) -> bool {
        true
    }

    /// Whether a change by this pass leaves work for Cleanup.
    fn is_structural(&self) -> bool {
        false
    }

    /// Get a description of what this pass does.
    fn description(&self) -> &'static str {
        "No description available"
    }
}
