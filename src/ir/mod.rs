//! The SSA intermediate representation.
//!
//! This module provides the graph the optimizer works on and the tools around it.
//!
//! # Key Components
//!
//! - [`Graph`] - Arena-owned CFG with blocks, instructions and cached analyses
//! - [`Instruction`], [`BasicBlock`], [`Opcode`] - The graph contents
//! - [`GraphBuilder`] - Closure DSL for constructing graphs
//! - [`RegionCloner`] - Duplicates a set of blocks with value remapping
//! - [`ssa`] - Phi utilities, loop-closing resolver Phis and SafePoint bridges
//! - [`GraphChecker`] - Structural verifier
//! - [`GraphComparator`] - Structural equivalence of two graphs
//!
//! # Invariants
//!
//! Between passes a graph is closed: every edge is recorded at both ends, every
//! input has a matching user entry, Phis have one input per predecessor and every
//! value dominates its uses. [`GraphChecker`] verifies all of them.

pub mod builder;
mod block;
mod checker;
mod clone;
mod compare;
mod dump;
mod graph;
mod instruction;
mod opcode;
pub mod ssa;
mod types;

pub use block::BasicBlock;
pub use builder::{BlockBuilder, FunctionBuilder, GraphBuilder};
pub use checker::GraphChecker;
pub use clone::{CloneMap, RegionCloner};
pub use compare::GraphComparator;
pub use dump::GraphDump;
pub use graph::Graph;
pub use instruction::Instruction;
pub use opcode::{Opcode, OpcodeKind, SafePointData, VirtualRegister};
pub use types::{Arch, BlockFlags, BlockId, ConditionCode, DataType, InstFlags, InstId};
