//! Generic directed-graph abstractions.
//!
//! The IR [`Graph`](crate::ir::Graph) implements the traits in this module so that
//! the generic algorithms (post-order, reverse post-order, dominators) can run on it
//! without knowing anything about instructions.
//!
//! # Key Components
//!
//! - [`NodeId`] - Strongly typed node index
//! - [`GraphBase`], [`Successors`], [`Predecessors`], [`RootedGraph`] - Minimal
//!   capability traits
//! - [`algorithms`] - Traversal orders and dominator computation

mod node;
mod traits;

pub mod algorithms;

pub use node::NodeId;
pub use traits::{GraphBase, Predecessors, RootedGraph, Successors};
