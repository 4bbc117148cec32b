//! Core value types of the IR: arena ids, data types, condition codes, target
//! architectures and the instruction/block flag sets.

use std::fmt;

use bitflags::bitflags;
use strum::{Display, EnumIter};

/// Index of an instruction in the [`Graph`](crate::ir::Graph) arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(u32);

impl InstId {
    /// Creates an id from a raw arena index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for InstId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Index of a basic block in the [`Graph`](crate::ir::Graph) arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);

impl BlockId {
    /// Creates an id from a raw arena index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// Result type of an instruction.
///
/// Integral types carry their width and signedness; arithmetic on them wraps at
/// the type width. `Reference` is a GC-managed object reference, `Pointer` a raw
/// derived address that the collector does not know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum DataType {
    /// Boolean (result of comparisons)
    Bool,
    /// Signed 8-bit integer
    Int8,
    /// Signed 16-bit integer
    Int16,
    /// Signed 32-bit integer
    Int32,
    /// Signed 64-bit integer
    Int64,
    /// Unsigned 8-bit integer
    Uint8,
    /// Unsigned 16-bit integer
    Uint16,
    /// Unsigned 32-bit integer
    Uint32,
    /// Unsigned 64-bit integer
    Uint64,
    /// 32-bit float
    Float32,
    /// 64-bit float
    Float64,
    /// Managed object reference
    Reference,
    /// Raw pointer derived from a reference
    Pointer,
    /// No value
    Void,
}

impl DataType {
    /// Returns `true` for the integer types (not `Bool`).
    #[must_use]
    pub const fn is_integral(self) -> bool {
        matches!(
            self,
            Self::Int8
                | Self::Int16
                | Self::Int32
                | Self::Int64
                | Self::Uint8
                | Self::Uint16
                | Self::Uint32
                | Self::Uint64
        )
    }

    /// Returns `true` for signed integer types.
    #[must_use]
    pub const fn is_signed(self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    /// Returns `true` for GC-managed references.
    #[must_use]
    pub const fn is_reference(self) -> bool {
        matches!(self, Self::Reference)
    }

    /// Bit width of integral types and `Bool`.
    #[must_use]
    pub const fn bit_width(self) -> Option<u32> {
        match self {
            Self::Bool => Some(1),
            Self::Int8 | Self::Uint8 => Some(8),
            Self::Int16 | Self::Uint16 => Some(16),
            Self::Int32 | Self::Uint32 | Self::Float32 => Some(32),
            Self::Int64 | Self::Uint64 | Self::Float64 | Self::Pointer => Some(64),
            Self::Reference | Self::Void => None,
        }
    }

    /// Smallest representable value of an integral type.
    #[must_use]
    pub fn min_value(self) -> Option<i128> {
        let bits = self.bit_width()?;
        if !self.is_integral() {
            return None;
        }
        Some(if self.is_signed() {
            -(1i128 << (bits - 1))
        } else {
            0
        })
    }

    /// Largest representable value of an integral type.
    #[must_use]
    pub fn max_value(self) -> Option<i128> {
        let bits = self.bit_width()?;
        if !self.is_integral() {
            return None;
        }
        Some(if self.is_signed() {
            (1i128 << (bits - 1)) - 1
        } else {
            (1i128 << bits) - 1
        })
    }

    /// Returns `true` if `value` is representable in this integral type.
    #[must_use]
    pub fn contains(self, value: i128) -> bool {
        match (self.min_value(), self.max_value()) {
            (Some(min), Some(max)) => (min..=max).contains(&value),
            _ => false,
        }
    }

    /// Truncates `value` to the type width and re-extends it according to the
    /// type's signedness. Unsigned 64-bit values are kept in their two's
    /// complement `i64` bit pattern.
    #[must_use]
    pub fn wrap(self, value: i64) -> i64 {
        match self {
            Self::Bool => i64::from(value & 1 != 0),
            Self::Int8 => i64::from(value as i8),
            Self::Int16 => i64::from(value as i16),
            Self::Int32 => i64::from(value as i32),
            Self::Uint8 => i64::from(value as u8),
            Self::Uint16 => i64::from(value as u16),
            Self::Uint32 => i64::from(value as u32),
            _ => value,
        }
    }

    /// Widens a wrapped value to `i128` using the type's signedness.
    #[must_use]
    pub fn widen(self, value: i64) -> i128 {
        if self == Self::Uint64 {
            i128::from(value as u64)
        } else {
            i128::from(self.wrap(value))
        }
    }
}

/// Comparison condition of `Compare`, `If` and `IfImm`.
///
/// Signedness comes from the operand type carried by the instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum ConditionCode {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl ConditionCode {
    /// The condition that holds exactly when `self` does not.
    #[must_use]
    pub const fn inverse(self) -> Self {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Lt => Self::Ge,
            Self::Le => Self::Gt,
            Self::Gt => Self::Le,
            Self::Ge => Self::Lt,
        }
    }

    /// The condition with swapped operands (`a < b` ⇔ `b > a`).
    #[must_use]
    pub const fn swap(self) -> Self {
        match self {
            Self::Eq => Self::Eq,
            Self::Ne => Self::Ne,
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
        }
    }

    /// Returns `true` for the ordering conditions `<`, `<=`, `>`, `>=`.
    #[must_use]
    pub const fn is_ordering(self) -> bool {
        matches!(self, Self::Lt | Self::Le | Self::Gt | Self::Ge)
    }

    /// Evaluates the condition on two values of `operand_type`.
    #[must_use]
    pub fn evaluate(self, lhs: i64, rhs: i64, operand_type: DataType) -> bool {
        let lhs = operand_type.widen(lhs);
        let rhs = operand_type.widen(rhs);
        match self {
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
        }
    }
}

/// Target architecture of a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumIter)]
pub enum Arch {
    /// 64-bit x86
    #[default]
    X86_64,
    /// 64-bit ARM
    Aarch64,
    /// 32-bit ARM
    Aarch32,
}

impl Arch {
    /// Size of a pointer in bytes.
    #[must_use]
    pub const fn pointer_size(self) -> u32 {
        match self {
            Self::X86_64 | Self::Aarch64 => 8,
            Self::Aarch32 => 4,
        }
    }
}

bitflags! {
    /// Per-instruction flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InstFlags: u8 {
        /// Call whose body was inlined; paired with a `ReturnInlined`
        const INLINED = 0x01;
        /// Instruction requires a memory barrier after it
        const MEM_BARRIER = 0x02;
        /// Volatile memory access, never removed or reordered
        const VOLATILE = 0x04;
    }
}

bitflags! {
    /// Per-block flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BlockFlags: u8 {
        /// Block is the header of a loop (refreshed by loop analysis)
        const LOOP_HEADER = 0x01;
        /// Block is an on-stack-replacement entry
        const OSR_ENTRY = 0x02;
        /// Block slot is in use
        const ALIVE = 0x04;
    }
}
