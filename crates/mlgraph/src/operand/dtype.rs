//! Enumerates the scalar element types an operand may carry.

use serde::{Deserialize, Serialize};

/// Logical dtype identifier shared between operand descriptors and tensor payloads.
///
/// The enumeration is closed; every consumption site matches exhaustively so a
/// new variant cannot be silently ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// 32-bit floating point following IEEE-754 semantics.
    F32,
    /// 16-bit floating point with full mantissa (fp16).
    F16,
    /// 32-bit signed integer.
    I32,
    /// 32-bit unsigned integer.
    U32,
    /// 64-bit signed integer, also the index type produced by arg-min/max.
    I64,
    /// 64-bit unsigned integer.
    U64,
    /// 8-bit signed integer.
    I8,
    /// 8-bit unsigned integer, doubling as the boolean-equivalent comparison output.
    U8,
}

impl DataType {
    /// Returns the number of bytes required per scalar element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DataType::F32 | DataType::I32 | DataType::U32 => 4,
            DataType::F16 => 2,
            DataType::I64 | DataType::U64 => 8,
            DataType::I8 | DataType::U8 => 1,
        }
    }

    /// Returns `true` when the dtype is a floating-point representation.
    pub fn is_float(self) -> bool {
        matches!(self, DataType::F32 | DataType::F16)
    }

    /// Returns `true` when the dtype is any signed or unsigned integer.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DataType::I32
                | DataType::U32
                | DataType::I64
                | DataType::U64
                | DataType::I8
                | DataType::U8
        )
    }

    /// Returns `true` for the dtypes accepted as gather indices.
    pub fn is_index(self) -> bool {
        matches!(self, DataType::I32 | DataType::U32 | DataType::I64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_sizes_match_storage_widths() {
        assert_eq!(DataType::F32.size_in_bytes(), 4);
        assert_eq!(DataType::F16.size_in_bytes(), 2);
        assert_eq!(DataType::I64.size_in_bytes(), 8);
        assert_eq!(DataType::U8.size_in_bytes(), 1);
    }
}
