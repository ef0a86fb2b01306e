//! Imports weights exported from another framework as a tree of `.npy` files.
//!
//! Each parameter lives in its own file. A module's parameters are stored under a
//! directory named after the module's state-dict path, with dots turned into path
//! separators (`conv0.module.0.weight` becomes `conv0/module/0/weight.npy`). Every file
//! holds a flat f32 array whose first `D` values are the tensor shape, followed by the
//! row-major data.
//!
//! Hyper-parameters that cannot be recovered from tensor shapes come from the model
//! config; the loaded tensors must match the shapes that config produces.

use super::*;

use std::io::Read;
use std::path::Path;

use burn::{
    module::{Param, RunningState},
    nn::{conv::Conv2d, conv::Conv3d, BatchNorm},
    tensor::{backend::Backend, Tensor, TensorData},
};
use npy::NpyData;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse npy data in {path}: {source}")]
    Npy {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} holds {found} values, not enough for a rank {rank} shape header")]
    MissingHeader {
        path: String,
        rank: usize,
        found: usize,
    },
    #[error("{path} has an invalid shape header {header:?}")]
    BadHeader {
        path: String,
        header: Vec<f32>,
    },
    #[error("{path} declares shape {shape:?} but holds {found} values")]
    Truncated {
        path: String,
        shape: Vec<usize>,
        found: usize,
    },
    #[error("{path} has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        path: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
}

pub type Result<T> = std::result::Result<T, LoadError>;

fn tensor_path(name: &str, path: &str) -> String {
    format!("{}/{}.npy", path, name)
}

/// Dimensions must be whole, non-negative and small enough that their product fits a `usize`.
fn parse_shape(header: &[f32]) -> Option<(Vec<usize>, usize)> {
    let shape = header
        .iter()
        .map(|&v| {
            let whole = v.is_finite() && v >= 0.0 && v.fract() == 0.0 && v < usize::MAX as f32;
            whole.then_some(v as usize)
        })
        .collect::<Option<Vec<usize>>>()?;
    let n_values = shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))?;

    Some((shape, n_values))
}

fn numpy_to_tensor<B: Backend, const D: usize>(
    values: Vec<f32>,
    file: &str,
    device: &B::Device,
) -> Result<Tensor<B, D>> {
    if values.len() < D {
        return Err(LoadError::MissingHeader {
            path: file.to_string(),
            rank: D,
            found: values.len(),
        });
    }

    let header = &values[0..D];
    let (shape, n_values) = parse_shape(header).ok_or_else(|| LoadError::BadHeader {
        path: file.to_string(),
        header: header.to_vec(),
    })?;
    let data = values[D..].to_vec();

    if n_values != data.len() {
        return Err(LoadError::Truncated {
            path: file.to_string(),
            shape,
            found: data.len(),
        });
    }

    Ok(Tensor::from_data(TensorData::new(data, shape), device))
}

/// Reads a shape-prefixed `.npy` file into a tensor of rank `D`.
pub fn read_tensor<B: Backend, const D: usize>(
    file: &str,
    device: &B::Device,
) -> Result<Tensor<B, D>> {
    debug!("loading {}", file);

    let mut buf = vec![];
    std::fs::File::open(file)
        .and_then(|mut f| f.read_to_end(&mut buf))
        .map_err(|source| LoadError::Io {
            path: file.to_string(),
            source,
        })?;

    let numpy: NpyData<f32> = NpyData::from_bytes(&buf).map_err(|source| LoadError::Npy {
        path: file.to_string(),
        source,
    })?;

    numpy_to_tensor(numpy.to_vec(), file, device)
}

/// Writes a tensor in the shape-prefixed `.npy` layout read by [`read_tensor`].
pub fn write_tensor<B: Backend, const D: usize>(tensor: Tensor<B, D>, file: &str) -> Result<()> {
    let io_error = |source| LoadError::Io {
        path: file.to_string(),
        source,
    };

    if let Some(parent) = Path::new(file).parent() {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }

    let header = tensor.dims().map(|d| d as f32);
    let data = tensor.into_data().convert::<f32>();
    let values: Vec<f32> = header.into_iter().chain(data.iter::<f32>()).collect();

    npy::to_file(file, values).map_err(io_error)?;
    debug!("wrote {}", file);

    Ok(())
}

pub fn load_tensor<B: Backend, const D: usize>(
    name: &str,
    path: &str,
    device: &B::Device,
) -> Result<Tensor<B, D>> {
    read_tensor(&tensor_path(name, path), device)
}

/// Loads `name` and checks it against the shape it is meant to replace.
fn load_checked<B: Backend, const D: usize>(
    name: &str,
    path: &str,
    expected: [usize; D],
    device: &B::Device,
) -> Result<Tensor<B, D>> {
    let tensor = load_tensor::<B, D>(name, path, device)?;
    let found = tensor.dims();

    if found != expected {
        return Err(LoadError::ShapeMismatch {
            path: tensor_path(name, path),
            expected: expected.to_vec(),
            found: found.to_vec(),
        });
    }

    Ok(tensor)
}

fn load_param<B: Backend, const D: usize>(
    name: &str,
    path: &str,
    current: &Param<Tensor<B, D>>,
    device: &B::Device,
) -> Result<Param<Tensor<B, D>>> {
    load_checked(name, path, current.val().dims(), device).map(Param::from_tensor)
}

fn load_bias<B: Backend>(
    path: &str,
    current: &Option<Param<Tensor<B, 1>>>,
    device: &B::Device,
) -> Result<Option<Param<Tensor<B, 1>>>> {
    current
        .as_ref()
        .map(|bias| load_param("bias", path, bias, device))
        .transpose()
}

fn load_conv2d<B: Backend>(path: &str, mut conv: Conv2d<B>, device: &B::Device) -> Result<Conv2d<B>> {
    conv.weight = load_param("weight", path, &conv.weight, device)?;
    conv.bias = load_bias(path, &conv.bias, device)?;
    Ok(conv)
}

fn load_conv3d<B: Backend>(path: &str, mut conv: Conv3d<B>, device: &B::Device) -> Result<Conv3d<B>> {
    conv.weight = load_param("weight", path, &conv.weight, device)?;
    conv.bias = load_bias(path, &conv.bias, device)?;
    Ok(conv)
}

fn load_batch_norm<B: Backend>(
    path: &str,
    mut norm: BatchNorm<B, 2>,
    device: &B::Device,
) -> Result<BatchNorm<B, 2>> {
    let n_features = norm.gamma.val().dims();

    norm.gamma = load_param("weight", path, &norm.gamma, device)?;
    norm.beta = load_param("bias", path, &norm.beta, device)?;
    norm.running_mean = RunningState::new(load_checked("running_mean", path, n_features, device)?);
    norm.running_var = RunningState::new(load_checked("running_var", path, n_features, device)?);

    Ok(norm)
}

fn load_conv_layer<B: Backend>(
    path: &str,
    mut layer: ConvLayer<B>,
    device: &B::Device,
) -> Result<ConvLayer<B>> {
    layer.conv = load_conv2d(&format!("{}/0", path), layer.conv, device)?;
    layer.norm = layer
        .norm
        .map(|norm| load_batch_norm(&format!("{}/1", path), norm, device))
        .transpose()?;

    Ok(layer)
}

fn load_coord_conv<B: Backend>(
    path: &str,
    mut coord: CoordConv<B>,
    device: &B::Device,
) -> Result<CoordConv<B>> {
    coord.conv = load_conv2d(&format!("{}/conv", path), coord.conv, device)?;
    Ok(coord)
}

fn load_weight_norm_conv3d<B: Backend>(
    path: &str,
    mut conv: WeightNormConv3d<B>,
    device: &B::Device,
) -> Result<WeightNormConv3d<B>> {
    conv.weight_g = load_param("weight_g", path, &conv.weight_g, device)?;
    conv.weight_v = load_param("weight_v", path, &conv.weight_v, device)?;
    conv.bias = load_bias(path, &conv.bias, device)?;
    Ok(conv)
}

fn load_temporal_block<B: Backend>(
    path: &str,
    mut block: TemporalBlock3d<B>,
    device: &B::Device,
) -> Result<TemporalBlock3d<B>> {
    block.conv1 = load_weight_norm_conv3d(&format!("{}/conv1", path), block.conv1, device)?;
    block.conv2 = load_weight_norm_conv3d(&format!("{}/conv2", path), block.conv2, device)?;
    block.downsample = block
        .downsample
        .map(|conv| load_conv3d(&format!("{}/downsample", path), conv, device))
        .transpose()?;

    Ok(block)
}

fn load_upsample_block<B: Backend>(
    path: &str,
    mut block: UpsampleBlock<B>,
    device: &B::Device,
) -> Result<UpsampleBlock<B>> {
    block.shuf.conv = load_conv_layer(&format!("{}/shuf/0", path), block.shuf.conv, device)?;
    block.side_norm = block
        .side_norm
        .map(|norm| load_batch_norm(&format!("{}/bn", path), norm, device))
        .transpose()?;
    block.conv1 = load_conv_layer(&format!("{}/conv1", path), block.conv1, device)?;
    block.conv2 = load_conv_layer(&format!("{}/conv2", path), block.conv2, device)?;

    Ok(block)
}

/// Per-frame modules are wrapped in a time-distributing container in the exported tree.
fn distributed(path: &str, name: &str) -> String {
    format!("{}/{}/module", path, name)
}

fn block(path: &str, name: &str) -> String {
    format!("{}/{}", path, name)
}

pub fn load_simple_tcn<B: Backend>(
    path: &str,
    config: &SimpleTcnConfig,
    device: &B::Device,
) -> Result<SimpleTcn<B>> {
    let model = config.init(device);

    Ok(SimpleTcn {
        coord: load_coord_conv(&distributed(path, "coord"), model.coord, device)?,
        conv0: load_conv_layer(&distributed(path, "conv0"), model.conv0, device)?,
        tcn1: load_temporal_block(&block(path, "tcn1"), model.tcn1, device)?,
        conv1: load_conv_layer(&distributed(path, "conv1"), model.conv1, device)?,
        tcn2: load_temporal_block(&block(path, "tcn2"), model.tcn2, device)?,
        conv2: load_conv_layer(&distributed(path, "conv2"), model.conv2, device)?,
        tcn3: load_temporal_block(&block(path, "tcn3"), model.tcn3, device)?,
        tcn1_u: load_temporal_block(&block(path, "tcn1_u"), model.tcn1_u, device)?,
        conv1_u: load_upsample_block(&distributed(path, "conv1_u"), model.conv1_u, device)?,
        tcn2_u: load_temporal_block(&block(path, "tcn2_u"), model.tcn2_u, device)?,
        conv2_u: load_upsample_block(&distributed(path, "conv2_u"), model.conv2_u, device)?,
        tcn3_u: load_temporal_block(&block(path, "tcn3_u"), model.tcn3_u, device)?,
        conv3_u: load_upsample_block(&distributed(path, "conv3_u"), model.conv3_u, device)?,
    })
}

pub fn load_simple_tcn2<B: Backend>(
    path: &str,
    config: &SimpleTcn2Config,
    device: &B::Device,
) -> Result<SimpleTcn2<B>> {
    let model = config.init(device);

    Ok(SimpleTcn2 {
        coord: load_coord_conv(&distributed(path, "coord"), model.coord, device)?,
        conv0: load_conv_layer(&distributed(path, "conv0"), model.conv0, device)?,
        tcn1: load_temporal_block(&block(path, "tcn1"), model.tcn1, device)?,
        conv1: load_conv_layer(&distributed(path, "conv1"), model.conv1, device)?,
        tcn2: load_temporal_block(&block(path, "tcn2"), model.tcn2, device)?,
        conv2: load_conv_layer(&distributed(path, "conv2"), model.conv2, device)?,
        tcn3: load_temporal_block(&block(path, "tcn3"), model.tcn3, device)?,
        tcn1_u: load_temporal_block(&block(path, "tcn1_u"), model.tcn1_u, device)?,
        conv1_u: load_conv_layer(&distributed(path, "conv1_u"), model.conv1_u, device)?,
        tcn2_u: load_temporal_block(&block(path, "tcn2_u"), model.tcn2_u, device)?,
        conv2_u: load_conv_layer(&distributed(path, "conv2_u"), model.conv2_u, device)?,
        tcn3_u: load_temporal_block(&block(path, "tcn3_u"), model.tcn3_u, device)?,
        conv3_u: load_conv_layer(&distributed(path, "conv3_u"), model.conv3_u, device)?,
    })
}

pub fn load_tcn3d<B: Backend>(path: &str, config: &Tcn3dConfig, device: &B::Device) -> Result<Tcn3d<B>> {
    let mut model = config.init(device);

    model.tcn.blocks = model
        .tcn
        .blocks
        .into_iter()
        .enumerate()
        .map(|(i, b)| load_temporal_block(&format!("{}/tcn/network/{}", path, i), b, device))
        .collect::<Result<_>>()?;

    Ok(model)
}
