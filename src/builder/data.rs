//! Lowered data buffers
//!
//! A `Data` describes a named, typed, strided buffer. Parameter buffers carry
//! a deferred [`DataContent`] that produces their bytes when the weights
//! blob is laid out.

use std::fmt;
use std::sync::Arc;

use ndarray::{Array1, ArrayD};

use crate::error::{CompileError, CompileResult};
use crate::tensor::{calc_strides, to_f16_bytes, DataType, DimOrder, Dims};

/// Stable handle of a data object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DataId(pub usize);

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}", self.0)
    }
}

/// Where a buffer lives at run time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataLocation {
    /// Intermediate buffer
    #[default]
    None,
    /// Network input
    Input,
    /// Network output
    Output,
    /// Constant stored in the weights blob
    Blob,
}

impl DataLocation {
    /// Code written into data headers
    pub fn code(&self) -> u32 {
        match self {
            DataLocation::None => 0,
            DataLocation::Input => 1,
            DataLocation::Output => 2,
            DataLocation::Blob => 3,
        }
    }
}

/// Deferred producer of a buffer's bytes
pub trait DataContent: fmt::Debug + Send + Sync {
    /// Number of elements the content provides
    fn element_count(&self) -> usize;

    /// Encode the content for the given buffer
    fn materialize(&self, data: &Data) -> CompileResult<Vec<u8>>;
}

/// Content backed by a parameter tensor, written in logical order
#[derive(Debug, Clone)]
pub struct ArrayContent {
    values: ArrayD<f32>,
}

impl ArrayContent {
    /// Wrap a weights tensor
    pub fn new(values: ArrayD<f32>) -> Self {
        Self { values }
    }

    /// Wrap a biases vector
    pub fn from_vec(values: &Array1<f32>) -> Self {
        Self {
            values: values.clone().into_dyn(),
        }
    }
}

impl DataContent for ArrayContent {
    fn element_count(&self) -> usize {
        self.values.len()
    }

    fn materialize(&self, data: &Data) -> CompileResult<Vec<u8>> {
        let expected = data.dims.total_size()? as usize;
        if self.values.len() != expected {
            return Err(CompileError::InvalidConfiguration(format!(
                "{} holds {} values but its dims {} need {}",
                data.name,
                self.values.len(),
                data.dims,
                expected
            )));
        }

        match data.data_type {
            DataType::Fp16 => Ok(to_f16_bytes(self.values.iter().copied())),
            DataType::Fp32 => Ok(self
                .values
                .iter()
                .flat_map(|v| v.to_le_bytes())
                .collect()),
            other => Err(CompileError::InvalidConfiguration(format!(
                "{} cannot be stored as {:?}",
                data.name, other
            ))),
        }
    }
}

/// Named, typed, strided buffer
#[derive(Debug, Clone, Default)]
pub struct Data {
    /// Handle
    pub id: DataId,
    /// Buffer name
    pub name: String,
    /// Run-time location
    pub location: DataLocation,
    /// Element type
    pub data_type: DataType,
    /// Memory order
    pub order: DimOrder,
    /// Sizes along X, Y, Z
    pub dims: Dims,
    /// Byte strides along X, Y, Z
    pub strides: Dims,
    /// Byte offset inside its location
    pub offset: u32,
    /// Deferred content, for blob data
    pub content: Option<Arc<dyn DataContent>>,
}

impl Data {
    /// Recompute strides from dims, type and order
    ///
    /// Fails if the buffer cannot be addressed with 32-bit byte offsets.
    pub fn update_strides(&mut self) -> CompileResult<()> {
        self.strides = calc_strides(self.dims, self.data_type, self.order)?;
        let size = self.byte_size()?;
        if u32::try_from(size).is_err() {
            return Err(CompileError::InvalidConfiguration(format!(
                "{} needs {} bytes, beyond 32-bit offsets",
                self.name, size
            )));
        }
        Ok(())
    }

    /// Size of the buffer in bytes
    pub fn byte_size(&self) -> CompileResult<usize> {
        Ok(self.dims.total_size()? as usize * self.data_type.size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, IxDyn};

    fn make_data(dims: Dims, data_type: DataType) -> Data {
        let mut data = Data {
            name: "fc@weights".to_string(),
            location: DataLocation::Blob,
            data_type,
            dims,
            ..Default::default()
        };
        data.update_strides().unwrap();
        data
    }

    #[test]
    fn test_update_strides() {
        let data = make_data(Dims::new(4, 2, 3), DataType::Fp16);
        assert_eq!(data.strides, Dims::new(2, 8, 16));
        assert_eq!(data.byte_size().unwrap(), 48);
    }

    #[test]
    fn test_materialize_fp16() {
        let data = make_data(Dims::new(2, 1, 1), DataType::Fp16);
        let content = ArrayContent::from_vec(&arr1(&[1.0, 1.5]));

        let bytes = content.materialize(&data).unwrap();
        assert_eq!(bytes, vec![0x00, 0x3C, 0x00, 0x3E]);
    }

    #[test]
    fn test_materialize_size_mismatch() {
        let data = make_data(Dims::new(3, 1, 1), DataType::Fp16);
        let content = ArrayContent::new(ArrayD::zeros(IxDyn(&[2, 2])));

        assert_eq!(content.element_count(), 4);
        assert!(content.materialize(&data).is_err());
    }

    #[test]
    fn test_update_strides_rejects_oversized_buffer() {
        let mut data = Data {
            name: "conv1".to_string(),
            dims: Dims::new(1024, 1024, 4096),
            ..Default::default()
        };
        assert!(matches!(
            data.update_strides(),
            Err(CompileError::InvalidConfiguration(_))
        ));

        // every stride fits, the byte size does not
        data.dims = Dims::new(1024, 1024, 2048);
        assert!(data.update_strides().is_err());
    }
}
