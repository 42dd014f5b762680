//! Tensor utilities for lowered data
//!
//! This module provides:
//! - Element types (`dtype`)
//! - Buffer dims, order and strides (`shape`)
//! - Half-precision conversion of weights (`convert`)
//!
//! # Example
//!
//! ```ignore
//! use vpu_compiler::tensor::{calc_strides, DataType, DimOrder, Dims};
//!
//! let dims = Dims::from_shape(&[1, 16, 8, 8])?;
//! let strides = calc_strides(dims, DataType::Fp16, DimOrder::Xyz)?;
//! ```

pub mod convert;
pub mod dtype;
pub mod shape;

// Re-export commonly used items
pub use convert::{array_to_f16_bytes, f16_bits, from_f16_bytes, to_f16_bytes};
pub use dtype::DataType;
pub use shape::{calc_strides, Dim, DimOrder, Dims};
