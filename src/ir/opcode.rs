//! The closed set of IR operations.
//!
//! [`Opcode`] is a tagged union: per-opcode immediates live in the variant, the
//! operands live in the owning [`Instruction`](crate::ir::Instruction)'s input list.
//! Operand layouts:
//!
//! | Opcode | Inputs |
//! |--------|--------|
//! | binary arithmetic, `Compare`, `If` | `[lhs, rhs]` |
//! | `Neg`, `Not`, `IfImm`, `NullCheck`, `NewArray`, `AddI`, `SubI` | `[value]` |
//! | `LoadArray` | `[array, index]` |
//! | `StoreArray` | `[array, index, value]` |
//! | `Load` | `[base]` or `[base, index]` when `indexed` |
//! | `Store` | `[base, value]` or `[base, index, value]` when `indexed` |
//! | `SafePoint` | live values, parallel to [`SafePointData::vregs`] |
//! | calls | arguments |
//! | `ReturnInlined` | `[inlined call]` |
//! | `Return` | `[value]` |

use strum::{Display, EnumDiscriminants, EnumIter};

use crate::ir::{ConditionCode, DataType};

/// Location a SafePoint input is recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum VirtualRegister {
    /// Frame slot of the original program
    Slot(u16),
    /// Save-state bridge added by a loop transformation
    Bridge,
}

/// Register map of a SafePoint, one entry per input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SafePointData {
    /// Virtual register of each input, in input order
    pub vregs: Vec<VirtualRegister>,
}

/// IR operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumDiscriminants)]
#[strum_discriminants(
    name(OpcodeKind),
    derive(Display, EnumIter, Hash),
    doc = "Fieldless kind of an [`Opcode`], used for counting and dispatch."
)]
pub enum Opcode {
    /// Incoming argument; lives in the start block
    Parameter {
        /// Argument position
        index: u32,
    },
    /// Integer constant; lives in the start block
    Constant(i64),
    /// SSA merge, inputs positional by predecessor
    Phi,
    /// `lhs + rhs`
    Add,
    /// `lhs - rhs`
    Sub,
    /// `lhs * rhs`
    Mul,
    /// `lhs / rhs`, throws on zero
    Div,
    /// `lhs % rhs`, throws on zero
    Mod,
    /// Bitwise and
    And,
    /// Bitwise or
    Or,
    /// Bitwise xor
    Xor,
    /// Shift left
    Shl,
    /// Logical shift right
    Shr,
    /// Arithmetic shift right
    AShr,
    /// Negation
    Neg,
    /// Bitwise not
    Not,
    /// Boolean comparison
    Compare {
        /// Condition
        cc: ConditionCode,
        /// Type the operands are compared as
        operand_type: DataType,
    },
    /// Two-way branch on `lhs cc rhs`; `succs[0]` is taken when true
    If {
        /// Condition
        cc: ConditionCode,
        /// Type the operands are compared as
        operand_type: DataType,
    },
    /// Two-way branch on `value cc imm`
    IfImm {
        /// Condition
        cc: ConditionCode,
        /// Immediate right-hand side
        imm: i64,
        /// Type the operands are compared as
        operand_type: DataType,
    },
    /// Array element read
    LoadArray,
    /// Array element write
    StoreArray,
    /// `base + imm` as a raw pointer
    AddI(i64),
    /// `base - imm` as a raw pointer
    SubI(i64),
    /// Read at `base + imm (+ index << shift)`
    Load {
        /// Index scale
        shift: u8,
        /// Byte offset
        imm: i64,
        /// Whether an index input is present
        indexed: bool,
    },
    /// Write at `base + imm (+ index << shift)`
    Store {
        /// Index scale
        shift: u8,
        /// Byte offset
        imm: i64,
        /// Whether an index input is present
        indexed: bool,
    },
    /// Throws if the reference is null, otherwise yields it
    NullCheck,
    /// Allocates a zeroed array of the given length
    NewArray,
    /// GC and deoptimization point
    SafePoint(SafePointData),
    /// Direct call
    CallStatic {
        /// Callee identifier
        callee: u32,
    },
    /// Call into the runtime
    CallRuntime {
        /// Runtime entry identifier
        entry: u32,
    },
    /// End of an inlined call body
    ReturnInlined,
    /// Return a value
    Return,
    /// Return without a value
    ReturnVoid,
}

impl Opcode {
    /// Returns the discriminant of the opcode.
    #[must_use]
    pub fn kind(&self) -> OpcodeKind {
        OpcodeKind::from(self)
    }

    /// Returns `true` for `Phi`.
    #[must_use]
    pub const fn is_phi(&self) -> bool {
        matches!(self, Self::Phi)
    }

    /// Returns `true` for `Constant`.
    #[must_use]
    pub const fn is_constant(&self) -> bool {
        matches!(self, Self::Constant(_))
    }

    /// Returns the constant value of a `Constant`.
    #[must_use]
    pub const fn as_constant(&self) -> Option<i64> {
        match self {
            Self::Constant(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns `true` for `Parameter`.
    #[must_use]
    pub const fn is_parameter(&self) -> bool {
        matches!(self, Self::Parameter { .. })
    }

    /// Returns `true` for conditional branches.
    #[must_use]
    pub const fn is_branch(&self) -> bool {
        matches!(self, Self::If { .. } | Self::IfImm { .. })
    }

    /// Returns `true` for returns.
    #[must_use]
    pub const fn is_return(&self) -> bool {
        matches!(self, Self::Return | Self::ReturnVoid)
    }

    /// Returns `true` for instructions that must end their block.
    #[must_use]
    pub const fn is_terminator(&self) -> bool {
        self.is_branch() || self.is_return()
    }

    /// Returns `true` for calls.
    #[must_use]
    pub const fn is_call(&self) -> bool {
        matches!(self, Self::CallStatic { .. } | Self::CallRuntime { .. })
    }

    /// Returns `true` for `SafePoint`.
    #[must_use]
    pub const fn is_safepoint(&self) -> bool {
        matches!(self, Self::SafePoint(_))
    }

    /// Returns `true` for memory writes.
    #[must_use]
    pub const fn is_store(&self) -> bool {
        matches!(self, Self::StoreArray | Self::Store { .. })
    }

    /// Returns `true` for the operations that may throw.
    #[must_use]
    pub const fn can_throw(&self) -> bool {
        matches!(
            self,
            Self::Div
                | Self::Mod
                | Self::NullCheck
                | Self::NewArray
                | Self::LoadArray
                | Self::StoreArray
        )
    }

    /// Returns `true` if the instruction must be kept even without users.
    #[must_use]
    pub const fn has_side_effects(&self) -> bool {
        self.is_terminator()
            || self.is_call()
            || self.is_store()
            || self.can_throw()
            || self.is_parameter()
            || matches!(self, Self::ReturnInlined | Self::SafePoint(_))
    }

    /// Returns `true` for binary operations whose operands may be swapped.
    #[must_use]
    pub const fn is_commutative(&self) -> bool {
        matches!(
            self,
            Self::Add | Self::Mul | Self::And | Self::Or | Self::Xor
        )
    }

    /// Returns the SafePoint register map.
    #[must_use]
    pub const fn safepoint_data(&self) -> Option<&SafePointData> {
        match self {
            Self::SafePoint(data) => Some(data),
            _ => None,
        }
    }

    /// Returns the mutable SafePoint register map.
    pub fn safepoint_data_mut(&mut self) -> Option<&mut SafePointData> {
        match self {
            Self::SafePoint(data) => Some(data),
            _ => None,
        }
    }

    /// Fixed number of inputs, or `None` for variadic opcodes.
    #[must_use]
    pub const fn fixed_arity(&self) -> Option<usize> {
        match self {
            Self::Parameter { .. } | Self::Constant(_) | Self::ReturnVoid => Some(0),
            Self::Neg
            | Self::Not
            | Self::IfImm { .. }
            | Self::NullCheck
            | Self::NewArray
            | Self::AddI(_)
            | Self::SubI(_)
            | Self::ReturnInlined
            | Self::Return => Some(1),
            Self::Add
            | Self::Sub
            | Self::Mul
            | Self::Div
            | Self::Mod
            | Self::And
            | Self::Or
            | Self::Xor
            | Self::Shl
            | Self::Shr
            | Self::AShr
            | Self::Compare { .. }
            | Self::If { .. }
            | Self::LoadArray => Some(2),
            Self::StoreArray => Some(3),
            Self::Load { indexed, .. } => Some(if *indexed { 2 } else { 1 }),
            Self::Store { indexed, .. } => Some(if *indexed { 3 } else { 2 }),
            Self::Phi | Self::SafePoint(_) | Self::CallStatic { .. } | Self::CallRuntime { .. } => {
                None
            }
        }
    }
}
