use super::{Activation, NormKind};
use crate::helper::{add_coords, pixel_shuffle};

use std::f64::consts::SQRT_2;

use burn::{
    config::Config,
    module::{Ignored, Module, Param},
    nn::{
        conv::{Conv1d, Conv1dConfig, Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d,
    },
    tensor::{
        activation::{relu, softmax},
        backend::Backend,
        Distribution, Tensor,
    },
};

#[derive(Config, Debug)]
pub struct ConvLayerConfig {
    n_in: usize,
    n_out: usize,
    #[config(default = 3)]
    kernel_size: usize,
    #[config(default = 1)]
    stride: usize,
    #[config(default = "NormKind::Batch")]
    norm: NormKind,
    #[config(default = "Activation::Relu")]
    activation: Activation,
}

impl ConvLayerConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvLayer<B> {
        assert!(
            self.n_in > 0 && self.n_out > 0,
            "Conv layer channels must be positive, got {} -> {}.",
            self.n_in,
            self.n_out
        );

        let padding = (self.kernel_size - 1) / 2;
        let conv = Conv2dConfig::new([self.n_in, self.n_out], [self.kernel_size, self.kernel_size])
            .with_stride([self.stride, self.stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_bias(self.norm.conv_bias())
            .with_initializer(Initializer::KaimingNormal {
                gain: SQRT_2,
                fan_out_only: false,
            })
            .init(device);
        let norm = self.norm.init(self.n_out, device);

        ConvLayer {
            conv,
            norm,
            activation: Ignored(self.activation),
        }
    }
}

/// Conv2d, then optional batch norm, then activation.
#[derive(Module, Debug)]
pub struct ConvLayer<B: Backend> {
    pub(crate) conv: Conv2d<B>,
    pub(crate) norm: Option<BatchNorm<B, 2>>,
    activation: Ignored<Activation>,
}

impl<B: Backend> ConvLayer<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        };

        self.activation.apply(x)
    }
}

#[derive(Config, Debug)]
pub struct CoordConvConfig {
    n_in: usize,
    n_out: usize,
    #[config(default = 1)]
    kernel_size: usize,
}

impl CoordConvConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> CoordConv<B> {
        let padding = (self.kernel_size - 1) / 2;
        let conv = Conv2dConfig::new([self.n_in + 2, self.n_out], [self.kernel_size, self.kernel_size])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .init(device);

        CoordConv { conv }
    }
}

/// Convolution over the input extended with its pixel coordinates.
#[derive(Module, Debug)]
pub struct CoordConv<B: Backend> {
    pub(crate) conv: Conv2d<B>,
}

impl<B: Backend> CoordConv<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.conv.forward(add_coords(x))
    }
}

#[derive(Config, Debug)]
pub struct PixelShuffleIcnrConfig {
    n_in: usize,
    n_out: usize,
    #[config(default = 2)]
    scale: usize,
    #[config(default = "Activation::Relu")]
    activation: Activation,
}

impl PixelShuffleIcnrConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> PixelShuffleIcnr<B> {
        let r2 = self.scale * self.scale;

        let mut conv = ConvLayerConfig::new(self.n_in, self.n_out * r2)
            .with_kernel_size(1)
            .with_norm(NormKind::None)
            .with_activation(self.activation)
            .init(device);

        conv.conv.weight = Param::from_tensor(icnr_weight(self.n_out, self.n_in, self.scale, device));
        conv.conv.bias = Some(Param::from_tensor(Tensor::zeros([self.n_out * r2], device)));

        PixelShuffleIcnr {
            conv,
            scale: self.scale,
        }
    }
}

/// 1x1 conv to `n_out * scale^2` channels followed by a pixel shuffle.
#[derive(Module, Debug)]
pub struct PixelShuffleIcnr<B: Backend> {
    pub(crate) conv: ConvLayer<B>,
    scale: usize,
}

impl<B: Backend> PixelShuffleIcnr<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        pixel_shuffle(self.conv.forward(x), self.scale)
    }
}

/// ICNR kernel for a 1x1 sub-pixel conv: each run of `scale^2` output kernels is identical,
/// so the shuffled output starts as a nearest-neighbour upsampling.
pub fn icnr_weight<B: Backend>(
    n_out: usize,
    n_in: usize,
    scale: usize,
    device: &B::Device,
) -> Tensor<B, 4> {
    let r2 = scale * scale;
    let std = (2.0 / n_in as f64).sqrt();

    Tensor::<B, 3>::random([n_out, 1, n_in], Distribution::Normal(0.0, std), device)
        .expand([n_out, r2, n_in])
        .reshape([n_out * r2, n_in, 1, 1])
}

#[derive(Config, Debug)]
pub struct UpsampleBlockConfig {
    in_channels: usize,
    out_channels: usize,
    #[config(default = true)]
    residual: bool,
    #[config(default = "NormKind::Batch")]
    norm: NormKind,
    #[config(default = "Activation::Relu")]
    activation: Activation,
}

impl UpsampleBlockConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> UpsampleBlock<B> {
        assert!(
            self.in_channels % 2 == 0,
            "Upsample block input channels {} must be even.",
            self.in_channels
        );

        let n_up = self.in_channels / 2;
        let shuf = PixelShuffleIcnrConfig::new(self.in_channels, n_up)
            .with_activation(self.activation)
            .init(device);

        let (side_norm, n_cat) = if self.residual {
            let norm = BatchNormConfig::new(self.out_channels).init(device);
            (Some(norm), n_up + self.out_channels)
        } else {
            (None, n_up)
        };

        let conv1 = ConvLayerConfig::new(n_cat, self.out_channels)
            .with_norm(self.norm)
            .with_activation(self.activation)
            .init(device);
        let conv2 = ConvLayerConfig::new(self.out_channels, self.out_channels)
            .with_norm(self.norm)
            .with_activation(self.activation)
            .init(device);

        UpsampleBlock {
            shuf,
            side_norm,
            conv1,
            conv2,
        }
    }
}

/// Doubles the spatial size, optionally merging a skip connection of `out_channels` channels.
#[derive(Module, Debug)]
pub struct UpsampleBlock<B: Backend> {
    pub(crate) shuf: PixelShuffleIcnr<B>,
    pub(crate) side_norm: Option<BatchNorm<B, 2>>,
    pub(crate) conv1: ConvLayer<B>,
    pub(crate) conv2: ConvLayer<B>,
}

impl<B: Backend> UpsampleBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>, side: Option<Tensor<B, 4>>) -> Tensor<B, 4> {
        let up = self.shuf.forward(x);

        let x = match (&self.side_norm, side) {
            (Some(norm), Some(side)) => relu(Tensor::cat(vec![up, norm.forward(side)], 1)),
            (None, None) => up,
            (Some(_), None) => panic!("Residual upsample block requires a skip connection."),
            (None, Some(_)) => panic!("Upsample block was built without a skip connection."),
        };

        self.conv2.forward(self.conv1.forward(x))
    }

    pub fn is_residual(&self) -> bool {
        self.side_norm.is_some()
    }
}

#[derive(Config, Debug)]
pub struct SelfAttentionConfig {
    n_channels: usize,
}

impl SelfAttentionConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> SelfAttention<B> {
        assert!(
            self.n_channels >= 8,
            "Self attention needs at least 8 channels, got {}.",
            self.n_channels
        );

        let n_key = self.n_channels / 8;
        let projection = |n_out: usize| {
            Conv1dConfig::new(self.n_channels, n_out, 1)
                .with_bias(false)
                .init(device)
        };

        SelfAttention {
            query: projection(n_key),
            key: projection(n_key),
            value: projection(self.n_channels),
            gamma: Param::from_tensor(Tensor::zeros([1], device)),
        }
    }
}

/// Attention over the spatial positions of a feature map, blended in through `gamma`.
#[derive(Module, Debug)]
pub struct SelfAttention<B: Backend> {
    query: Conv1d<B>,
    key: Conv1d<B>,
    value: Conv1d<B>,
    gamma: Param<Tensor<B, 1>>,
}

impl<B: Backend> SelfAttention<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [n_batch, n_channel, height, width] = x.dims();
        let x = x.reshape([n_batch, n_channel, height * width]);

        let f = self.query.forward(x.clone());
        let g = self.key.forward(x.clone());
        let h = self.value.forward(x.clone());

        // [n_batch, positions, positions], normalized over the query positions
        let beta = softmax(f.swap_dims(1, 2).matmul(g), 1);
        let o = h.matmul(beta) * self.gamma.val().reshape([1, 1, 1]) + x;

        o.reshape([n_batch, n_channel, height, width])
    }
}
