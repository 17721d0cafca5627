//! Minimal ONNX `ModelProto` reader for pulling constant tensors out of a model file.
//!
//! Only the fields needed to locate graph initializers are declared; prost
//! skips everything else while decoding. Field tags follow `onnx.proto`.

use bytes::Bytes;
use prost::Message;
use std::path::Path;
use thiserror::Error;

/// `TensorProto.DataType.FLOAT`
const ONNX_FLOAT: i32 = 1;

#[derive(Error, Debug)]
pub enum OnnxError {
    #[error("cannot read model: {0}")]
    Read(#[from] std::io::Error),
    #[error("not an ONNX model: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("model graph has no initializers")]
    NoInitializers,
    #[error("initializer {name}: {reason}")]
    Unsupported { name: String, reason: String },
}

#[derive(Clone, PartialEq, Message)]
struct ModelProto {
    #[prost(message, optional, tag = "7")]
    graph: Option<GraphProto>,
}

#[derive(Clone, PartialEq, Message)]
struct GraphProto {
    #[prost(message, repeated, tag = "5")]
    initializer: Vec<TensorProto>,
}

#[derive(Clone, PartialEq, Message)]
struct TensorProto {
    #[prost(int64, repeated, tag = "1")]
    dims: Vec<i64>,
    #[prost(int32, tag = "2")]
    data_type: i32,
    #[prost(float, repeated, tag = "4")]
    float_data: Vec<f32>,
    #[prost(string, tag = "8")]
    name: String,
    #[prost(bytes = "bytes", tag = "9")]
    raw_data: Bytes,
}

/// A float initializer copied out of a model.
#[derive(Debug, Clone, PartialEq)]
pub struct FloatTensor {
    pub name: String,
    pub dims: Vec<usize>,
    pub values: Vec<f32>,
}

/// Read the float initializer called `name` from the model at `path`, or
/// the graph's last initializer when none has that name.
///
/// Weight payloads stay slices of the file buffer; only the selected tensor
/// is copied out.
pub fn read_initializer(path: &Path, name: &str) -> Result<FloatTensor, OnnxError> {
    let data = Bytes::from(std::fs::read(path)?);
    let model = ModelProto::decode(data)?;
    let initializers = model.graph.map(|g| g.initializer).unwrap_or_default();

    let tensor = initializers
        .iter()
        .find(|t| t.name == name)
        .or_else(|| initializers.last())
        .ok_or(OnnxError::NoInitializers)?;

    tracing::debug!(
        path = %path.display(),
        initializer = %tensor.name,
        dims = ?tensor.dims,
        "reading model initializer"
    );
    to_float_tensor(tensor)
}

fn to_float_tensor(tensor: &TensorProto) -> Result<FloatTensor, OnnxError> {
    let unsupported = |reason: String| OnnxError::Unsupported {
        name: tensor.name.clone(),
        reason,
    };

    if tensor.data_type != ONNX_FLOAT {
        return Err(unsupported(format!("data type {} is not float", tensor.data_type)));
    }

    let dims = tensor
        .dims
        .iter()
        .map(|&d| usize::try_from(d).map_err(|_| unsupported(format!("negative dimension {d}"))))
        .collect::<Result<Vec<_>, _>>()?;
    let count: usize = dims.iter().product();

    let values = if !tensor.float_data.is_empty() {
        tensor.float_data.clone()
    } else if !tensor.raw_data.is_empty() {
        if tensor.raw_data.len() % 4 != 0 {
            return Err(unsupported(format!("{} raw bytes is not a whole number of floats", tensor.raw_data.len())));
        }
        tensor
            .raw_data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    } else {
        return Err(unsupported("no inline data (external data is not supported)".into()));
    };

    if values.len() != count {
        return Err(unsupported(format!("{} values for shape {dims:?}", values.len())));
    }

    Ok(FloatTensor {
        name: tensor.name.clone(),
        dims,
        values,
    })
}
