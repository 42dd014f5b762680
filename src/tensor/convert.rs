//! Tensor conversion utilities
//!
//! Convert ndarray weights to the half-precision byte layout of the blob.

use half::f16;
use ndarray::ArrayD;

use crate::error::{CompileError, CompileResult};

/// Half-precision bit pattern of an `f32`
pub fn f16_bits(value: f32) -> u16 {
    f16::from_f32(value).to_bits()
}

/// Encode values as little-endian half precision
pub fn to_f16_bytes<I>(values: I) -> Vec<u8>
where
    I: IntoIterator<Item = f32>,
{
    values
        .into_iter()
        .flat_map(|v| f16_bits(v).to_le_bytes())
        .collect()
}

/// Decode little-endian half precision back to `f32`
pub fn from_f16_bytes(bytes: &[u8]) -> CompileResult<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(CompileError::Internal(format!(
            "odd byte count {} for half precision data",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| f16::from_bits(u16::from_le_bytes([pair[0], pair[1]])).to_f32())
        .collect())
}

/// Encode an array in logical (row-major) order
pub fn array_to_f16_bytes(array: &ArrayD<f32>) -> Vec<u8> {
    to_f16_bytes(array.iter().copied())
}
