//! Configuration for the optimizer pipeline.

use crate::ir::Arch;

/// Options threaded through every pass via [`PassContext`](crate::compiler::PassContext).
///
/// Controls pass selection, the loop-unrolling budget and the SafePoint policy.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Target architecture the graphs are compiled for (default: `X86_64`).
    pub arch: Arch,

    /// Instruction budget of an unrolled loop body (default: 100).
    pub unroll_inst_limit: usize,

    /// Requested unroll factor (default: 4).
    pub unroll_factor: usize,

    /// Allow unrolling loops that contain calls (default: false).
    pub unroll_with_calls: bool,

    /// Allow peeling loops that contain calls (default: false).
    pub peel_with_calls: bool,

    /// Largest trip count a loop may have to be fully unrolled (default: 16).
    pub full_unroll_max_trip_count: u64,

    /// SafePoints must keep every input for the register map (default: false).
    ///
    /// When set, SafePoint inputs keep their producers alive and are never pruned.
    pub safepoints_require_regmap: bool,

    /// Fixpoint cap of the Cleanup pass (default: 32).
    pub cleanup_max_iterations: usize,

    /// Enable the Cleanup pass.
    pub enable_cleanup: bool,

    /// Enable loop peeling.
    pub enable_peeling: bool,

    /// Enable loop unrolling.
    pub enable_unrolling: bool,

    /// Enable array-access rebasing onto raw pointers.
    pub enable_adjust_refs: bool,

    /// Enable removal of loops without observable effects.
    pub enable_redundant_loop_elimination: bool,

    /// Enable pruning of dead SafePoint inputs.
    pub enable_safepoint_optimization: bool,

    /// Enable merging of adjacent memory barriers.
    pub enable_barrier_placement: bool,

    /// Run the graph checker after every pass (default: on in debug builds).
    pub verify_after_each_pass: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            arch: Arch::X86_64,
            unroll_inst_limit: 100,
            unroll_factor: 4,
            unroll_with_calls: false,
            peel_with_calls: false,
            full_unroll_max_trip_count: 16,
            safepoints_require_regmap: false,
            cleanup_max_iterations: 32,
            enable_cleanup: true,
            enable_peeling: false,
            enable_unrolling: true,
            enable_adjust_refs: true,
            enable_redundant_loop_elimination: true,
            enable_safepoint_optimization: true,
            enable_barrier_placement: true,
            verify_after_each_pass: cfg!(debug_assertions),
        }
    }
}

impl OptimizerConfig {
    /// Configuration for a single unroll run with the given budget and factor.
    #[must_use]
    pub fn unroll(inst_limit: usize, factor: usize) -> Self {
        Self {
            unroll_inst_limit: inst_limit,
            unroll_factor: factor,
            ..Self::default()
        }
    }
}
