use thiserror::Error;

use crate::ir::{BlockId, InstId};

/// Helper macro for creating malformed-graph errors with source location information.
///
/// Captures the current file and line so that a checker failure points at the
/// check that fired rather than at the caller.
macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every variant describes a compiler-internal problem: a structural invariant of the
/// [`Graph`](crate::ir::Graph) was about to be violated, or a checker found one. None of
/// them is a user-facing diagnostic; a pass whose preconditions are not met reports
/// `Ok(false)` instead of an error.
///
/// # Error Categories
///
/// ## Graph Mutation Errors
/// - [`Error::HasUsers`] - Removing an instruction that is still consumed
/// - [`Error::InvalidInstruction`] - Referencing a removed or unknown instruction
/// - [`Error::InvalidBlock`] - Referencing a removed or unknown block
/// - [`Error::InvalidEdge`] - Editing an edge that does not exist (or already exists)
/// - [`Error::InvalidInput`] - Input index out of range
///
/// ## Verification Errors
/// - [`Error::Malformed`] - A graph checker rule failed
/// - [`Error::Evaluation`] - The reference evaluator could not execute the graph
#[derive(Error, Debug)]
pub enum Error {
    /// The instruction still has users and cannot be removed.
    ///
    /// Raised by [`Graph::remove_inst`](crate::ir::Graph::remove_inst) unless the
    /// removal is forced.
    #[error("Instruction {0} still has users")]
    HasUsers(InstId),

    /// The instruction id does not refer to a live instruction.
    #[error("Invalid instruction - {0}")]
    InvalidInstruction(InstId),

    /// The block id does not refer to a live block.
    #[error("Invalid block - {0}")]
    InvalidBlock(BlockId),

    /// The control-flow edge does not exist, or adding it would duplicate an
    /// existing edge.
    ///
    /// # Fields
    ///
    /// * `from` - Source block of the edge
    /// * `to` - Target block of the edge
    #[error("Invalid edge {from} -> {to}")]
    InvalidEdge {
        /// Source block of the edge
        from: BlockId,
        /// Target block of the edge
        to: BlockId,
    },

    /// An input index is out of range for the instruction.
    #[error("Instruction {inst} has no input #{index}")]
    InvalidInput {
        /// The instruction that was addressed
        inst: InstId,
        /// The requested input index
        index: usize,
    },

    /// The graph violates a structural rule.
    ///
    /// Produced by the [`GraphChecker`](crate::ir::GraphChecker). The error includes the
    /// source location of the failed check for debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The reference evaluator failed (unsupported opcode, step limit, bad operand).
    #[error("Evaluation failed - {0}")]
    Evaluation(String),

    /// A compilation unit was requested that the optimizer does not know.
    #[error("Unknown compilation unit - {0}")]
    UnknownUnit(u32),
}
