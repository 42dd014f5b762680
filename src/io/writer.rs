//! Instruction stream writer
//!
//! Serialize the lowered stage list into the binary stream consumed by the
//! device. All fields are little-endian; the stream is the concatenation of
//! stage records in list order, with no header of its own.

use log::debug;

use crate::builder::{Data, DataId, Stage, StageBuilder, StageKind, StageParams};
use crate::error::{CompileError, CompileResult};
use crate::tensor::{f16_bits, Dim};

/// Size in bytes of a serialized data header
pub const DATA_HEADER_SIZE: usize = 40;

/// Append-only little-endian byte sink
#[derive(Debug, Default, Clone)]
pub struct BlobWriter {
    bytes: Vec<u8>,
}

impl BlobWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an unsigned 32-bit word
    pub fn write_u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a value as IEEE half precision (2 bytes)
    pub fn write_f16(&mut self, value: f32) {
        self.bytes.extend_from_slice(&f16_bits(value).to_le_bytes());
    }

    /// Append `count` zero bytes
    pub fn write_padding(&mut self, count: usize) {
        self.bytes.resize(self.bytes.len() + count, 0);
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether nothing was written
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Written bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Take the written bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Append a data header: dims, strides, type, order, location, offset
    pub fn write_data(&mut self, data: &Data) {
        for dim in [Dim::X, Dim::Y, Dim::Z] {
            self.write_u32(data.dims[dim]);
        }
        for dim in [Dim::X, Dim::Y, Dim::Z] {
            self.write_u32(data.strides[dim]);
        }
        self.write_u32(data.data_type.code());
        self.write_u32(data.order.code());
        self.write_u32(data.location.code());
        self.write_u32(data.offset);
    }
}

/// Serialize every stage of the builder, in list order
pub fn encode_stages(builder: &StageBuilder) -> CompileResult<Vec<u8>> {
    let mut writer = BlobWriter::new();
    for stage in builder.stages() {
        encode_stage(&mut writer, builder, stage)?;
    }

    debug!(
        "Encoded {} stages into {} bytes",
        builder.stages().len(),
        writer.len()
    );
    Ok(writer.into_bytes())
}

/// Serialize one stage record
pub fn encode_stage(
    writer: &mut BlobWriter,
    builder: &StageBuilder,
    stage: &Stage,
) -> CompileResult<()> {
    let data = |list: &[DataId], index: usize| port_data(builder, stage, list, index);

    match (stage.kind, stage.params) {
        (StageKind::None, _) | (StageKind::Bias, _) => {
            for id in stage.inputs.iter().chain(&stage.outputs) {
                writer.write_data(builder.try_data(*id)?);
            }
        }
        (StageKind::Elu, StageParams::Elu { alpha }) => {
            writer.write_f16(alpha);
            writer.write_padding(2);
            writer.write_data(data(&stage.inputs, 0)?);
            writer.write_data(data(&stage.outputs, 0)?);
        }
        (StageKind::Relu, StageParams::Relu { negative_slope }) => {
            writer.write_f16(negative_slope);
            writer.write_padding(2);
            writer.write_data(data(&stage.inputs, 0)?);
            writer.write_data(data(&stage.outputs, 0)?);
        }
        (
            StageKind::Lrn,
            StageParams::Lrn {
                size,
                k,
                alpha,
                beta,
            },
        ) => {
            writer.write_u32(size);
            writer.write_f16(k);
            writer.write_f16(alpha);
            writer.write_f16(beta);
            writer.write_padding(2);
            writer.write_data(data(&stage.inputs, 0)?);
            writer.write_data(data(&stage.outputs, 0)?);
        }
        (StageKind::FullyConnected, _) => {
            writer.write_data(data(&stage.inputs, 0)?);
            writer.write_data(data(&stage.outputs, 0)?);
            writer.write_data(data(&stage.inputs, 1)?);
            // biases are applied by a separate Bias stage
            writer.write_data(&Data::default());
        }
        (kind, params) => {
            return Err(CompileError::Internal(format!(
                "stage {} of kind {} carries mismatched parameters {:?}",
                stage.name, kind, params
            )))
        }
    }
    Ok(())
}

fn port_data<'a>(
    builder: &'a StageBuilder,
    stage: &Stage,
    list: &[DataId],
    index: usize,
) -> CompileResult<&'a Data> {
    let id = list.get(index).copied().ok_or_else(|| {
        CompileError::InvalidGraph(format!("stage {} has no data at port {}", stage.name, index))
    })?;
    builder.try_data(id)
}
