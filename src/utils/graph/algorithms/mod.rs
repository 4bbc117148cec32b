//! Graph algorithms over the traits in [`crate::utils::graph`].
//!
//! - [`traversal`] - Post-order, reverse post-order and reachability
//! - [`dominators`] - Immediate dominators (iterative, reverse post-order based)

pub mod dominators;
pub mod traversal;

pub use dominators::{compute_dominators, DominatorTree};
pub use traversal::{postorder, reachable, reverse_postorder};
