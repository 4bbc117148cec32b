//! # ssaopt Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! of the optimizer. Import it to build graphs, run passes and check the results.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all graph and pass operations
pub use crate::Error;

/// The result type used throughout ssaopt
pub use crate::Result;

// ================================================================================================
// Graph Model
// ================================================================================================

/// The graph and its building blocks
pub use crate::ir::{
    Arch, BasicBlock, BlockFlags, BlockId, ConditionCode, DataType, Graph, InstFlags, InstId,
    Instruction, Opcode,
};

/// Construction, verification and comparison
pub use crate::ir::{GraphBuilder, GraphChecker, GraphComparator};

// ================================================================================================
// Analyses
// ================================================================================================

/// Dominance and loop structure
pub use crate::analysis::{CountableLoop, Dominance, Loop, LoopForest};

/// Reference evaluation
pub use crate::analysis::{GraphEvaluator, HeapArray, Value};

// ================================================================================================
// Pipeline
// ================================================================================================

/// Pass interface, context and drivers
pub use crate::compiler::{GraphPass, Optimizer, OptimizerConfig, PassContext, PassScheduler};

/// Change journal
pub use crate::compiler::{Event, EventKind, EventLog};

/// Built-in passes
pub use crate::compiler::{
    AdjustRefsPass, CleanupPass, LoopPeelingPass, LoopUnrollPass, MemoryBarrierPlacementPass,
    RedundantLoopEliminationPass, SafePointOptimizationPass,
};

/// Runtime layout provider
pub use crate::runtime::{MockRuntime, RuntimeInfo};
