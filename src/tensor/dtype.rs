//! Element types of lowered data
//!
//! Maps between element types and their encoded codes.

use crate::error::{CompileError, CompileResult};

/// Element type of a data buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataType {
    /// IEEE half precision
    #[default]
    Fp16,
    /// IEEE single precision
    Fp32,
    /// Unsigned byte
    U8,
    /// Signed 32-bit integer
    I32,
}

impl DataType {
    /// Size in bytes of one element
    pub fn size(&self) -> usize {
        match self {
            DataType::Fp16 => 2,
            DataType::Fp32 => 4,
            DataType::U8 => 1,
            DataType::I32 => 4,
        }
    }

    /// Code written into data headers
    pub fn code(&self) -> u32 {
        match self {
            DataType::Fp16 => 0,
            DataType::U8 => 1,
            DataType::Fp32 => 2,
            DataType::I32 => 3,
        }
    }

    /// Decode a header code
    pub fn from_code(code: u32) -> CompileResult<Self> {
        match code {
            0 => Ok(DataType::Fp16),
            1 => Ok(DataType::U8),
            2 => Ok(DataType::Fp32),
            3 => Ok(DataType::I32),
            other => Err(CompileError::InvalidConfiguration(format!(
                "unknown data type code {}",
                other
            ))),
        }
    }

    /// Check if data type is floating point
    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Fp16 | DataType::Fp32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_size() {
        assert_eq!(DataType::Fp16.size(), 2);
        assert_eq!(DataType::Fp32.size(), 4);
        assert_eq!(DataType::U8.size(), 1);
    }

    #[test]
    fn test_from_code() {
        for dtype in [DataType::Fp16, DataType::Fp32, DataType::U8, DataType::I32] {
            assert_eq!(DataType::from_code(dtype.code()).unwrap(), dtype);
        }
        assert!(DataType::from_code(999).is_err());
    }

    #[test]
    fn test_is_float() {
        assert!(DataType::Fp16.is_float());
        assert!(!DataType::I32.is_float());
    }
}
