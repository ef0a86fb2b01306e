use super::{Activation, SelfAttention, SelfAttentionConfig};

use burn::{
    config::Config,
    module::{Ignored, Module},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d,
    },
    tensor::{backend::Backend, Tensor},
};

#[derive(Config, Debug)]
pub struct VggBlockConfig {
    n_in: usize,
    n_out: usize,
    #[config(default = 3)]
    kernel_size: usize,
    #[config(default = true)]
    pool: bool,
    #[config(default = "Activation::Relu")]
    activation: Activation,
    #[config(default = false)]
    self_attention: bool,
}

impl VggBlockConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> VggBlock<B> {
        let padding = (self.kernel_size - 1) / 2;
        let conv = Conv2dConfig::new([self.n_in, self.n_out], [self.kernel_size, self.kernel_size])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .init(device);
        let norm = BatchNormConfig::new(self.n_out).init(device);
        let pool = self
            .pool
            .then(|| MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init());
        let attention = self
            .self_attention
            .then(|| SelfAttentionConfig::new(self.n_out).init(device));

        VggBlock {
            conv,
            norm,
            activation: Ignored(self.activation),
            pool,
            attention,
        }
    }
}

/// Conv, batch norm and activation, optionally followed by a 2x2 max pool and self attention.
#[derive(Module, Debug)]
pub struct VggBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
    activation: Ignored<Activation>,
    pool: Option<MaxPool2d>,
    attention: Option<SelfAttention<B>>,
}

impl<B: Backend> VggBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.norm.forward(x);
        let x = self.activation.apply(x);

        let x = match &self.pool {
            Some(pool) => pool.forward(x),
            None => x,
        };

        match &self.attention {
            Some(attention) => attention.forward(x),
            None => x,
        }
    }
}

#[derive(Config, Debug)]
pub struct VggConfig {
    #[config(default = 3)]
    n_in: usize,
    /// Number of blocks in each stage.
    #[config(default = "vec![1, 1, 2]")]
    layers: Vec<usize>,
    #[config(default = 3)]
    kernel_size: usize,
    #[config(default = "Activation::Relu")]
    activation: Activation,
    /// Width of the stem; stage `i` starts at `2^i` times this.
    #[config(default = 64)]
    n_filters: usize,
    #[config(default = false)]
    last_pool: bool,
    #[config(default = false)]
    self_attention: bool,
}

/// Channel plan of a single [`VggBlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VggBlockPlan {
    pub n_in: usize,
    pub n_out: usize,
    pub pool: bool,
}

impl VggConfig {
    /// Lists every block of the encoder, stem first.
    pub fn plan(&self) -> Vec<VggBlockPlan> {
        assert!(!self.layers.is_empty(), "VGG needs at least one stage.");

        let ni = self.n_filters;
        let n_stage = self.layers.len();

        let mut blocks = vec![VggBlockPlan {
            n_in: self.n_in,
            n_out: ni,
            pool: true,
        }];

        for (i, &n_layer) in self.layers.iter().enumerate() {
            let last = i + 1 == n_stage;
            let nf = if last { (1 << i) * ni } else { (1 << (i + 1)) * ni };
            let pool = if last { self.last_pool } else { true };

            let mut filters = vec![(1 << i) * ni; n_layer];
            filters.push(nf);

            blocks.extend(filters.windows(2).map(|pair| VggBlockPlan {
                n_in: pair[0],
                n_out: pair[1],
                pool,
            }));
        }

        blocks
    }

    pub fn out_channels(&self) -> usize {
        self.plan().last().map(|block| block.n_out).unwrap_or(self.n_filters)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Vgg<B> {
        let blocks: Vec<_> = self
            .plan()
            .into_iter()
            .map(|block| {
                VggBlockConfig::new(block.n_in, block.n_out)
                    .with_kernel_size(self.kernel_size)
                    .with_pool(block.pool)
                    .with_activation(self.activation)
                    .init(device)
            })
            .collect();

        let out_channels = self.out_channels();
        let attention = self
            .self_attention
            .then(|| SelfAttentionConfig::new(out_channels).init(device));

        Vgg {
            blocks,
            attention,
            out_channels,
        }
    }
}

/// VGG-style image encoder.
#[derive(Module, Debug)]
pub struct Vgg<B: Backend> {
    blocks: Vec<VggBlock<B>>,
    attention: Option<SelfAttention<B>>,
    out_channels: usize,
}

impl<B: Backend> Vgg<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));

        match &self.attention {
            Some(attention) => attention.forward(x),
            None => x,
        }
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }
}
