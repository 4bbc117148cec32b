//! Shared utilities that are independent of the IR.
//!
//! - [`graph`] - Generic graph traits and algorithms (traversal orders, dominators)
//!   that the IR and the analyses build upon.
//! - [`escape_dot`] - Label escaping for Graphviz output.
//! - `math` - Small integer helpers used by the passes.

mod dot;
pub mod graph;
pub(crate) mod math;

pub use dot::escape_dot;
