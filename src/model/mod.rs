pub mod layers;
pub mod load;
pub mod simple_tcn;
pub mod temporal;
pub mod vgg;

pub use layers::*;
pub use simple_tcn::*;
pub use temporal::*;
pub use vgg::*;

use burn::{
    module::Param,
    nn::{BatchNorm, BatchNormConfig},
    tensor::{activation, backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Activation applied after a convolution.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Default)]
pub enum Activation {
    #[default]
    Relu,
    LeakyRelu {
        negative_slope: f64,
    },
    Gelu,
    Identity,
}

impl Activation {
    pub fn apply<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::Relu => activation::relu(x),
            Activation::LeakyRelu { negative_slope } => activation::leaky_relu(x, *negative_slope),
            Activation::Gelu => activation::gelu(x),
            Activation::Identity => x,
        }
    }
}

/// Normalization following a convolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NormKind {
    #[default]
    Batch,
    /// Batch norm whose scale starts at zero, so the layer initially outputs its shift only.
    BatchZero,
    None,
}

impl NormKind {
    pub fn init<B: Backend>(&self, n_features: usize, device: &B::Device) -> Option<BatchNorm<B, 2>> {
        match self {
            NormKind::Batch => Some(BatchNormConfig::new(n_features).init(device)),
            NormKind::BatchZero => {
                let mut norm: BatchNorm<B, 2> = BatchNormConfig::new(n_features).init(device);
                norm.gamma = Param::from_tensor(Tensor::zeros([n_features], device));
                Some(norm)
            }
            NormKind::None => None,
        }
    }

    /// Convolutions feeding a batch norm carry no bias of their own.
    pub fn conv_bias(&self) -> bool {
        *self == NormKind::None
    }
}

/// A model mapping a video clip to a video clip.
pub trait VideoModel<B: Backend> {
    fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5>;
}

/// Video models selectable from the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Architecture {
    SimpleTcn,
    SimpleTcn2,
    Tcn3d,
}

impl Architecture {
    /// Whether clips are laid out `[batch, time, channels, ..]` rather than `[batch, channels, time, ..]`.
    pub fn time_major(&self) -> bool {
        *self == Architecture::Tcn3d
    }
}

impl FromStr for Architecture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simple-tcn" => Ok(Architecture::SimpleTcn),
            "simple-tcn2" => Ok(Architecture::SimpleTcn2),
            "tcn3d" => Ok(Architecture::Tcn3d),
            other => Err(format!(
                "unknown architecture '{}', expected one of simple-tcn, simple-tcn2, tcn3d",
                other
            )),
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Architecture::SimpleTcn => "simple-tcn",
            Architecture::SimpleTcn2 => "simple-tcn2",
            Architecture::Tcn3d => "tcn3d",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::ElementConversion;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn activations_apply_elementwise() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 1>::from_floats([-2.0f32, 0.0, 3.0], &device);

        let relu = Activation::Relu.apply(x.clone()).into_data().to_vec::<f32>().unwrap();
        assert_eq!(relu, vec![0.0, 0.0, 3.0]);

        let leaky = Activation::LeakyRelu { negative_slope: 0.5 }
            .apply(x.clone())
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert_eq!(leaky, vec![-1.0, 0.0, 3.0]);

        let identity = Activation::Identity.apply(x.clone());
        assert_eq!((identity - x).abs().sum().into_scalar().elem::<f32>(), 0.0);
    }

    #[test]
    fn batch_zero_starts_with_zero_scale() {
        let device = Default::default();
        let norm = NormKind::BatchZero.init::<TestBackend>(4, &device).unwrap();
        let gamma = norm.gamma.val().abs().sum().into_scalar().elem::<f32>();
        assert_eq!(gamma, 0.0);

        assert!(NormKind::None.init::<TestBackend>(4, &device).is_none());
        assert!(NormKind::None.conv_bias());
        assert!(!NormKind::Batch.conv_bias());
    }

    #[test]
    fn architecture_names_round_trip() {
        for arch in [Architecture::SimpleTcn, Architecture::SimpleTcn2, Architecture::Tcn3d] {
            assert_eq!(arch.to_string().parse::<Architecture>(), Ok(arch));
        }
        assert!("unet".parse::<Architecture>().is_err());
        assert!(Architecture::Tcn3d.time_major());
    }
}
