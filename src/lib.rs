// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # ssaopt
//!
//! The middle-end optimizer core of a managed-language compiler. It transforms a
//! control-flow graph in SSA form through a pipeline of passes and keeps the graph
//! structurally valid after every one of them.
//!
//! ## Features
//!
//! - **Arena-owned SSA graph** - blocks and instructions addressed by ids, with
//!   explicit def/use lists kept symmetric by every mutation
//! - **Cached analyses** - dominance and natural loops, stamped with a generation
//!   and invalidated by control-flow edits
//! - **Cleanup** - dead code, trivial Phis, unreachable and pass-through blocks
//! - **Loop transformations** - peeling, unrolling with side exits, countable-loop
//!   unrolling with a remainder, full unrolling of short loops
//! - **AdjustRefs** - array accesses rewritten into raw pointer chains that never
//!   cross a SafePoint
//! - **Verification** - a structural [`GraphChecker`](ir::GraphChecker) and a reference
//!   [`GraphEvaluator`](analysis::GraphEvaluator) for semantic checks
//! - **Parallel driver** - independent compilation units optimized on rayon workers
//!
//! ## Quick Start
//!
//! ```rust
//! use ssaopt::prelude::*;
//!
//! // s = 0; for (i = 0; i < 10; i++) s += i; return s
//! let mut graph = GraphBuilder::new("sum").build(|f| {
//!     let zero = f.constant(0, DataType::Int32);
//!     let one = f.constant(1, DataType::Int32);
//!     let ten = f.constant(10, DataType::Int32);
//!     f.block(0, |b| b.jump(1));
//!     let s = f.block(1, |b| {
//!         let i = b.phi(DataType::Int32, &[(0, zero)]);
//!         let s = b.phi(DataType::Int32, &[(0, zero)]);
//!         b.safepoint(&[]);
//!         let s2 = b.add(s, i);
//!         let i2 = b.add(i, one);
//!         b.phi_input(i, 1, i2);
//!         b.phi_input(s, 1, s2);
//!         b.branch(ConditionCode::Lt, i2, ten, 1, 2);
//!         s2
//!     });
//!     f.block(2, |b| b.ret(s));
//! })?;
//!
//! let config = OptimizerConfig::default();
//! let runtime = MockRuntime::default();
//! let events = EventLog::new();
//! let ctx = PassContext::new(&config, &runtime, &events);
//! PassScheduler::standard().run(&mut graph, &ctx)?;
//!
//! assert!(graph.loops().is_empty());
//! let outcome = GraphEvaluator::new(&graph, &runtime).run(&[], Vec::new())?;
//! assert_eq!(outcome.value, Some(Value::Int(45)));
//! # Ok::<(), ssaopt::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`ir`] - the graph, its builder, cloner, checker and comparator
//! - [`analysis`] - dominance, loops, countable loops, the evaluator
//! - [`compiler`] - passes, the scheduler, configuration and the event log
//! - [`runtime`] - the layout queries the passes need from the managed runtime
//! - [`utils`] - generic graph algorithms shared by the IR and the analyses
//!
//! ## Error Handling
//!
//! Every fallible operation returns [`Result<T>`](Result). Errors describe
//! compiler-internal problems, a broken graph invariant or a failed check. A pass
//! that does not apply returns `Ok(false)` and leaves the graph untouched.
//!
//! ```rust
//! use ssaopt::{ir::GraphChecker, prelude::*};
//!
//! let graph = GraphBuilder::new("id").build(|f| {
//!     let x = f.param(0, DataType::Int32);
//!     f.block(0, |b| b.ret(x));
//! })?;
//! match GraphChecker::new().check(&graph) {
//!     Ok(()) => println!("well formed"),
//!     Err(Error::Malformed { message, .. }) => println!("malformed: {message}"),
//!     Err(e) => println!("other error: {e}"),
//! }
//! # Ok::<(), ssaopt::Error>(())
//! ```

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types.
pub mod prelude;

/// Graph model, construction and verification.
pub mod ir;

/// Analyses over the graph.
pub mod analysis;

/// Passes, scheduling and the change journal.
pub mod compiler;

/// Runtime layout provider.
pub mod runtime;

/// Generic utilities.
pub mod utils;

/// The result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for all graph and pass operations.
pub use error::Error;
