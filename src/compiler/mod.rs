//! Optimization passes and the infrastructure that runs them.
//!
//! This module sits on top of the IR and the analyses:
//!
//! - [`crate::ir`] - graph model, construction, checking, cloning
//! - [`crate::analysis`] - dominance, loops, countable loops, evaluator
//! - [`compiler`](self) - passes, scheduling, configuration, change journal
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       Optimizer Pipeline                         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  Optimizer                   Parallel driver                     │
//! │    ├─ DashMap<u32, Graph>     (one graph per compilation unit)   │
//! │    ├─ rayon workers           (one unit per task, no shared IR)  │
//! │    └─ EventLog                                                   │
//! │                                                                  │
//! │  PassScheduler               Fixed-order execution               │
//! │    ├─ passes in order         (disabled passes are skipped)      │
//! │    ├─ Cleanup after every structural change                      │
//! │    └─ GraphChecker after every pass (verify_after_each_pass)     │
//! │                                                                  │
//! │  GraphPass trait             Interface for all passes            │
//! │    ├─ run()                   Graph -> changed                   │
//! │    ├─ enabled()               Configuration switch               │
//! │    └─ is_structural()         Whether Cleanup should follow      │
//! │                                                                  │
//! │  Passes (7 built-in)                                             │
//! │    ├─ Cleanup                 DCE, Phi resolution, CFG cleanup   │
//! │    ├─ Loops                   peeling, unrolling, dead loops     │
//! │    └─ Lowering                AdjustRefs, SafePoints, barriers   │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod events;
mod pass;
pub mod passes;
mod scheduler;

pub use config::OptimizerConfig;
pub use events::{Event, EventBuilder, EventKind, EventLog};
pub use pass::{GraphPass, PassContext};
pub use passes::{
    AdjustRefsPass, CleanupPass, LoopPeelingPass, LoopUnrollPass, MemoryBarrierPlacementPass,
    RedundantLoopEliminationPass, SafePointOptimizationPass,
};
pub use scheduler::{Optimizer, PassScheduler};
