//! Built-in graph optimization passes.
//!
//! Each pass implements [`GraphPass`](crate::compiler::GraphPass), transforms a
//! single [`Graph`](crate::ir::Graph) and records its changes in the
//! [`EventLog`](crate::compiler::EventLog) of the [`PassContext`](crate::compiler::PassContext).
//!
//! # Default Pipeline
//!
//! The [`PassScheduler`](crate::compiler::PassScheduler) runs the passes in this
//! order. [`CleanupPass`] is re-run after every structural pass that changed the
//! graph.
//!
//! | Pass | Description |
//! |------|-------------|
//! | [`CleanupPass`] | Removes dead code, trivial Phis, unreachable and redundant blocks |
//! | [`RedundantLoopEliminationPass`] | Removes terminating loops whose results are unused |
//! | [`LoopPeelingPass`] | Peels the first iteration of innermost loops (off by default) |
//! | [`LoopUnrollPass`] | Fully unrolls short loops, otherwise replicates the body |
//! | [`SafePointOptimizationPass`] | Drops SafePoint inputs that are dead after the SafePoint |
//! | [`AdjustRefsPass`] | Rewrites array accesses into raw pointer chains |
//! | [`MemoryBarrierPlacementPass`] | Merges consecutive memory barriers |
//!
//! # Loop Transformations
//!
//! Peeling and unrolling share the shape check in `loop_shape`: an innermost,
//! reducible loop with one back edge whose header is the only exiting block.
//! Both keep loop-closed SSA through a resolver block, see
//! [`close_loop`](crate::ir::ssa::close_loop).

mod adjust_refs;
mod barriers;
mod cleanup;
mod loop_shape;
mod peeling;
mod redundant_loop;
mod safepoints;
mod unroll;

pub use adjust_refs::AdjustRefsPass;
pub use barriers::MemoryBarrierPlacementPass;
pub use cleanup::CleanupPass;
pub use peeling::LoopPeelingPass;
pub use redundant_loop::RedundantLoopEliminationPass;
pub use safepoints::SafePointOptimizationPass;
pub use unroll::LoopUnrollPass;
