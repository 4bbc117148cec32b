//! Analyses over the SSA graph.
//!
//! - [`Dominance`] - Dominator tree, reverse post-order and instruction-level
//!   dominance queries
//! - [`LoopForest`] / [`Loop`] - Natural loops with headers, latches, exits and
//!   pre-headers; [`ensure_preheader`] creates a pre-header on demand
//! - [`CountableLoop`] - Induction variable, step and bound of simple counted loops
//! - [`GraphEvaluator`] - Reference interpreter used to check that passes preserve
//!   semantics
//!
//! Dominance and loops are cached on the [`Graph`](crate::ir::Graph) and stamped
//! with its generation; fetch them through [`Graph::dominance`](crate::ir::Graph::dominance)
//! and [`Graph::loops`](crate::ir::Graph::loops).

mod countable;
mod dominance;
mod eval;
mod loops;

pub use countable::{CountableLoop, LoopBound, LoopGuard};
pub use dominance::Dominance;
pub use eval::{GraphEvaluator, HeapArray, Outcome, Value};
pub use loops::{detect_loops, ensure_preheader, Loop, LoopExit, LoopForest, LoopKind};
