//! Target and runtime layout information.
//!
//! The optimizer never hard-codes object layout. Passes that compute raw addresses
//! (AdjustRefs, the evaluator) ask a [`RuntimeInfo`] implementation for the offset
//! of the first array element and for element sizes.

use crate::ir::{Arch, DataType};

/// Layout queries answered by the managed runtime.
pub trait RuntimeInfo: Send + Sync {
    /// Byte offset of element 0 from the start of an array object.
    fn array_data_offset(&self, arch: Arch) -> i64;

    /// Size in bytes of a value of `ty` stored in an array.
    fn type_size(&self, ty: DataType, arch: Arch) -> u32;
}

/// Fixed layout used by tests and benchmarks.
///
/// Arrays carry a 16 byte header on every architecture; element sizes follow the
/// type width, references and pointers take a machine word.
#[derive(Debug, Clone, Copy)]
pub struct MockRuntime {
    /// Offset returned by [`RuntimeInfo::array_data_offset`]
    pub data_offset: i64,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self { data_offset: 16 }
    }
}

impl RuntimeInfo for MockRuntime {
    fn array_data_offset(&self, _arch: Arch) -> i64 {
        self.data_offset
    }

    fn type_size(&self, ty: DataType, arch: Arch) -> u32 {
        match ty {
            DataType::Bool | DataType::Int8 | DataType::Uint8 => 1,
            DataType::Int16 | DataType::Uint16 => 2,
            DataType::Int32 | DataType::Uint32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::Uint64 | DataType::Float64 => 8,
            DataType::Reference | DataType::Pointer => arch.pointer_size(),
            DataType::Void => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_layout() {
        let runtime = MockRuntime::default();
        assert_eq!(runtime.array_data_offset(Arch::Aarch64), 16);
        assert_eq!(runtime.type_size(DataType::Int32, Arch::X86_64), 4);
        assert_eq!(runtime.type_size(DataType::Reference, Arch::Aarch32), 4);
        assert_eq!(runtime.type_size(DataType::Reference, Arch::X86_64), 8);
    }
}
