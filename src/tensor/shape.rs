//! Three-dimensional buffer geometry
//!
//! Lowered data is described by X (width), Y (height) and Z (channels).
//! Strides are a pure function of dims, element type and order.

use std::fmt;
use std::ops::{Index, IndexMut};

use crate::error::{CompileError, CompileResult};

use super::dtype::DataType;

/// Buffer axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dim {
    /// Width
    X = 0,
    /// Height
    Y = 1,
    /// Channels
    Z = 2,
}

/// Memory order, innermost axis first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DimOrder {
    /// Planar: X innermost, then Y, then Z
    #[default]
    Xyz,
    /// Interleaved: Z innermost, then X, then Y
    Zxy,
}

impl DimOrder {
    /// Axes from innermost to outermost
    pub fn axes(&self) -> [Dim; 3] {
        match self {
            DimOrder::Xyz => [Dim::X, Dim::Y, Dim::Z],
            DimOrder::Zxy => [Dim::Z, Dim::X, Dim::Y],
        }
    }

    /// Code written into data headers
    pub fn code(&self) -> u32 {
        match self {
            DimOrder::Xyz => 0,
            DimOrder::Zxy => 1,
        }
    }
}

/// Sizes along X, Y and Z
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dims(pub [u32; 3]);

impl Default for Dims {
    fn default() -> Self {
        Dims([0; 3])
    }
}

impl Dims {
    /// Create dims from X, Y, Z
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Dims([x, y, z])
    }

    /// Number of elements
    ///
    /// Fails if the count does not fit the 32-bit fields of a data header.
    pub fn total_size(&self) -> CompileResult<u32> {
        self.0
            .iter()
            .try_fold(1u32, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| {
                CompileError::InvalidConfiguration(format!("dims {} hold too many elements", self))
            })
    }

    /// Convert an NCHW-style graph shape
    ///
    /// Accepted ranks: `[n, c, h, w]`, `[c, h, w]`, `[n, c]` and `[c]`, with
    /// a batch of 1 where present.
    pub fn from_shape(shape: &[usize]) -> CompileResult<Self> {
        let (batch, c, h, w) = match *shape {
            [n, c, h, w] => (n, c, h, w),
            [c, h, w] => (1, c, h, w),
            [n, c] => (n, c, 1, 1),
            [c] => (1, c, 1, 1),
            _ => {
                return Err(CompileError::InvalidConfiguration(format!(
                    "unsupported tensor rank {} for shape {:?}",
                    shape.len(),
                    shape
                )))
            }
        };

        if batch != 1 {
            return Err(CompileError::InvalidConfiguration(format!(
                "batch {} is not supported for shape {:?}",
                batch, shape
            )));
        }

        let narrow = |v: usize| {
            u32::try_from(v).map_err(|_| {
                CompileError::InvalidConfiguration(format!("dimension {} out of range", v))
            })
        };
        Ok(Dims([narrow(w)?, narrow(h)?, narrow(c)?]))
    }
}

impl Index<Dim> for Dims {
    type Output = u32;

    fn index(&self, dim: Dim) -> &u32 {
        &self.0[dim as usize]
    }
}

impl IndexMut<Dim> for Dims {
    fn index_mut(&mut self, dim: Dim) -> &mut u32 {
        &mut self.0[dim as usize]
    }
}

impl fmt::Display for Dims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.0[0], self.0[1], self.0[2])
    }
}

/// Byte strides along X, Y and Z
///
/// Fails if a stride does not fit in 32 bits.
pub fn calc_strides(dims: Dims, dtype: DataType, order: DimOrder) -> CompileResult<Dims> {
    let [inner, middle, outer] = order.axes();
    let mut strides = Dims::default();
    strides[inner] = dtype.size() as u32;

    let overflow = || {
        CompileError::InvalidConfiguration(format!("byte strides of dims {} overflow", dims))
    };
    strides[middle] = strides[inner]
        .checked_mul(dims[inner])
        .ok_or_else(overflow)?;
    strides[outer] = strides[middle]
        .checked_mul(dims[middle])
        .ok_or_else(overflow)?;
    Ok(strides)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_shape() {
        assert_eq!(Dims::from_shape(&[1, 3, 4, 5]).unwrap(), Dims::new(5, 4, 3));
        assert_eq!(Dims::from_shape(&[1, 10]).unwrap(), Dims::new(1, 1, 10));
        assert_eq!(Dims::from_shape(&[7]).unwrap(), Dims::new(1, 1, 7));
        assert!(Dims::from_shape(&[2, 3, 4, 5]).is_err());
        assert!(Dims::from_shape(&[1, 1, 1, 1, 1]).is_err());
    }

    #[test]
    fn test_total_size() {
        assert_eq!(Dims::new(5, 4, 3).total_size().unwrap(), 60);
        assert!(matches!(
            Dims::new(1024, 1024, 4096).total_size(),
            Err(CompileError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_strides_xyz() {
        let strides = calc_strides(Dims::new(5, 4, 3), DataType::Fp16, DimOrder::Xyz).unwrap();
        assert_eq!(strides, Dims::new(2, 10, 40));
    }

    #[test]
    fn test_strides_zxy() {
        let strides = calc_strides(Dims::new(5, 4, 3), DataType::Fp32, DimOrder::Zxy).unwrap();
        assert_eq!(strides[Dim::Z], 4);
        assert_eq!(strides[Dim::X], 12);
        assert_eq!(strides[Dim::Y], 60);
    }

    #[test]
    fn test_strides_overflow() {
        let dims = Dims::new(65536, 65536, 2);
        assert!(calc_strides(dims, DataType::Fp16, DimOrder::Xyz).is_err());

        // the outermost extent is never multiplied in
        let strides = calc_strides(Dims::new(1, 1, u32::MAX), DataType::Fp32, DimOrder::Xyz).unwrap();
        assert_eq!(strides, Dims::new(4, 4, 4));
    }
}
