//! IR instructions.
//!
//! An [`Instruction`] is an [`Opcode`] with a result type, ordered inputs and the
//! reverse edges to its users. The [`Graph`](crate::ir::Graph) owns every
//! instruction and is the only place that edits inputs and users, which keeps
//! def/use symmetric:
//!
//! ```text
//! v5 = Add v3, v3      v3.users == [v5, v5]
//! ```
//!
//! The user list is a multiset: an instruction that reads the same value twice
//! appears twice.

use crate::ir::{BlockId, DataType, InstFlags, InstId, Opcode};

/// A single SSA instruction.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub(crate) opcode: Opcode,
    pub(crate) ty: DataType,
    pub(crate) inputs: Vec<InstId>,
    pub(crate) users: Vec<InstId>,
    pub(crate) block: Option<BlockId>,
    pub(crate) flags: InstFlags,
}

impl Instruction {
    pub(crate) fn new(opcode: Opcode, ty: DataType) -> Self {
        Self {
            opcode,
            ty,
            inputs: Vec::new(),
            users: Vec::new(),
            block: None,
            flags: InstFlags::empty(),
        }
    }

    /// The operation.
    #[must_use]
    pub fn opcode(&self) -> &Opcode {
        &self.opcode
    }

    /// The result type.
    #[must_use]
    pub fn ty(&self) -> DataType {
        self.ty
    }

    /// Ordered inputs.
    #[must_use]
    pub fn inputs(&self) -> &[InstId] {
        &self.inputs
    }

    /// Input at `index`.
    #[must_use]
    pub fn input(&self, index: usize) -> Option<InstId> {
        self.inputs.get(index).copied()
    }

    /// Users, one entry per input occurrence.
    #[must_use]
    pub fn users(&self) -> &[InstId] {
        &self.users
    }

    /// Returns `true` if anything reads this instruction.
    #[must_use]
    pub fn has_users(&self) -> bool {
        !self.users.is_empty()
    }

    /// The block the instruction is placed in, `None` while detached.
    #[must_use]
    pub fn block(&self) -> Option<BlockId> {
        self.block
    }

    /// Instruction flags.
    #[must_use]
    pub fn flags(&self) -> InstFlags {
        self.flags
    }

    /// Returns `true` for `Phi`.
    #[must_use]
    pub fn is_phi(&self) -> bool {
        self.opcode.is_phi()
    }

    /// Returns `true` for an inlined `CallStatic`.
    #[must_use]
    pub fn is_inlined_call(&self) -> bool {
        matches!(self.opcode, Opcode::CallStatic { .. }) && self.flags.contains(InstFlags::INLINED)
    }

    /// Returns `true` if the instruction must survive dead-code elimination.
    #[must_use]
    pub fn is_must_keep(&self) -> bool {
        self.opcode.has_side_effects()
            || self
                .flags
                .intersects(InstFlags::VOLATILE | InstFlags::MEM_BARRIER)
    }
}
