use super::{
    ConvLayer, ConvLayerConfig, CoordConv, CoordConvConfig, NormKind, TemporalBlock3d,
    TemporalBlock3dConfig, UpsampleBlock, UpsampleBlockConfig, VideoModel,
};
use crate::helper::{time_distributed, time_distributed2};

use burn::{
    config::Config,
    module::Module,
    tensor::{backend::Backend, Tensor},
};
use tracing::trace;

/// Channel widths of the coordinate stem and the three encoder stages.
const STEM_WIDTH: usize = 8;
const WIDTHS: [usize; 3] = [16, 32, 64];

/// Temporal blocks on the longest path from input to output.
const TEMPORAL_DEPTH: usize = 4;

fn receptive_field(kernel_size: usize, dilation: usize) -> usize {
    1 + TEMPORAL_DEPTH * 2 * (kernel_size - 1) * dilation
}

fn temporal_block<B: Backend>(
    n_channel: usize,
    kernel_size: usize,
    dilation: usize,
    device: &B::Device,
) -> TemporalBlock3d<B> {
    TemporalBlock3dConfig::new(n_channel, n_channel)
        .with_kernel_size(kernel_size)
        .with_dilation(dilation)
        .init(device)
}

fn conv_layer<B: Backend>(
    n_in: usize,
    n_out: usize,
    stride: usize,
    norm: NormKind,
    device: &B::Device,
) -> ConvLayer<B> {
    ConvLayerConfig::new(n_in, n_out)
        .with_stride(stride)
        .with_norm(norm)
        .init(device)
}

#[derive(Config, Debug)]
pub struct SimpleTcnConfig {
    #[config(default = 1)]
    n_in: usize,
    #[config(default = 3)]
    kernel_size: usize,
    #[config(default = 1)]
    n_out: usize,
    #[config(default = "NormKind::Batch")]
    norm: NormKind,
    #[config(default = 2)]
    dilation: usize,
}

impl SimpleTcnConfig {
    /// Number of input frames that can influence one output frame.
    pub fn receptive_field(&self) -> usize {
        receptive_field(self.kernel_size, self.dilation)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> SimpleTcn<B> {
        let [w1, w2, w3] = WIDTHS;
        let tb = |n| temporal_block(n, self.kernel_size, self.dilation, device);
        let up = |n_in, n_out| {
            UpsampleBlockConfig::new(n_in, n_out)
                .with_norm(self.norm)
                .init(device)
        };

        SimpleTcn {
            coord: CoordConvConfig::new(self.n_in, STEM_WIDTH).init(device),
            conv0: conv_layer(STEM_WIDTH, w1, 2, self.norm, device),
            tcn1: tb(w1),
            conv1: conv_layer(w1, w2, 2, self.norm, device),
            tcn2: tb(w2),
            conv2: conv_layer(w2, w3, 2, self.norm, device),
            tcn3: tb(w3),
            tcn1_u: tb(w3),
            conv1_u: up(w3, w2),
            tcn2_u: tb(w2),
            conv2_u: up(w2, w1),
            tcn3_u: tb(w1),
            conv3_u: UpsampleBlockConfig::new(w1, self.n_out)
                .with_residual(false)
                .with_norm(self.norm)
                .init(device),
        }
    }
}

/// Encoder-decoder video model.
///
/// Three stride-2 per-frame convolutions downsample the clip by 8, each stage followed by a
/// temporal block. The decoder mirrors it with pixel-shuffle upsampling and merges the first
/// two encoder stages back in as skip connections. Height and width must be multiples of 8.
#[derive(Module, Debug)]
pub struct SimpleTcn<B: Backend> {
    pub(crate) coord: CoordConv<B>,
    pub(crate) conv0: ConvLayer<B>,
    pub(crate) tcn1: TemporalBlock3d<B>,
    pub(crate) conv1: ConvLayer<B>,
    pub(crate) tcn2: TemporalBlock3d<B>,
    pub(crate) conv2: ConvLayer<B>,
    pub(crate) tcn3: TemporalBlock3d<B>,
    pub(crate) tcn1_u: TemporalBlock3d<B>,
    pub(crate) conv1_u: UpsampleBlock<B>,
    pub(crate) tcn2_u: TemporalBlock3d<B>,
    pub(crate) conv2_u: UpsampleBlock<B>,
    pub(crate) tcn3_u: TemporalBlock3d<B>,
    pub(crate) conv3_u: UpsampleBlock<B>,
}

impl<B: Backend> SimpleTcn<B> {
    /// Maps `[batch, n_in, time, height, width]` to `[batch, n_out, time, height, width]`.
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let [_, _, _, height, width] = x.dims();

        assert!(
            height % 8 == 0 && width % 8 == 0,
            "Frame size {}x{} must be divisible by 8.",
            height,
            width
        );

        let x = time_distributed(x, |x| self.coord.forward(x));

        // encoder
        let x = time_distributed(x, |x| self.conv0.forward(x));
        let x1 = self.tcn1.forward(x.clone());
        let x = time_distributed(x, |x| self.conv1.forward(x));
        let x2 = self.tcn2.forward(x.clone());
        let x = time_distributed(x, |x| self.conv2.forward(x));
        let x = self.tcn3.forward(x);
        trace!(shape = ?x.dims(), "encoded");

        // decoder
        let x = self.tcn1_u.forward(x);
        let x = time_distributed2(x, x2, |x, side| self.conv1_u.forward(x, Some(side)));
        trace!(shape = ?x.dims(), "conv1_u");
        let x = self.tcn2_u.forward(x);
        let x = time_distributed2(x, x1, |x, side| self.conv2_u.forward(x, Some(side)));
        trace!(shape = ?x.dims(), "conv2_u");
        let x = self.tcn3_u.forward(x);
        let x = time_distributed(x, |x| self.conv3_u.forward(x, None));
        trace!(shape = ?x.dims(), "decoded");

        x
    }
}

impl<B: Backend> VideoModel<B> for SimpleTcn<B> {
    fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        SimpleTcn::forward(self, x)
    }
}

#[derive(Config, Debug)]
pub struct SimpleTcn2Config {
    #[config(default = 1)]
    n_in: usize,
    #[config(default = 3)]
    kernel_size: usize,
    #[config(default = 1)]
    n_out: usize,
    #[config(default = "NormKind::Batch")]
    norm: NormKind,
    #[config(default = 2)]
    dilation: usize,
}

impl SimpleTcn2Config {
    pub fn receptive_field(&self) -> usize {
        receptive_field(self.kernel_size, self.dilation)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> SimpleTcn2<B> {
        let [w1, w2, w3] = WIDTHS;
        let tb = |n| temporal_block(n, self.kernel_size, self.dilation, device);
        let conv = |n_in, n_out| conv_layer(n_in, n_out, 1, self.norm, device);

        SimpleTcn2 {
            coord: CoordConvConfig::new(self.n_in, STEM_WIDTH).init(device),
            conv0: conv(STEM_WIDTH, w1),
            tcn1: tb(w1),
            conv1: conv(w1, w2),
            tcn2: tb(w2),
            conv2: conv(w2, w3),
            tcn3: tb(w3),
            tcn1_u: tb(w3),
            conv1_u: conv(w3, w2),
            tcn2_u: tb(w2),
            conv2_u: conv(w2, w1),
            tcn3_u: tb(w1),
            conv3_u: conv(w1, self.n_out),
        }
    }
}

/// Full-resolution variant of [`SimpleTcn`]: every convolution keeps the frame size and
/// there are no skip connections.
#[derive(Module, Debug)]
pub struct SimpleTcn2<B: Backend> {
    pub(crate) coord: CoordConv<B>,
    pub(crate) conv0: ConvLayer<B>,
    pub(crate) tcn1: TemporalBlock3d<B>,
    pub(crate) conv1: ConvLayer<B>,
    pub(crate) tcn2: TemporalBlock3d<B>,
    pub(crate) conv2: ConvLayer<B>,
    pub(crate) tcn3: TemporalBlock3d<B>,
    pub(crate) tcn1_u: TemporalBlock3d<B>,
    pub(crate) conv1_u: ConvLayer<B>,
    pub(crate) tcn2_u: TemporalBlock3d<B>,
    pub(crate) conv2_u: ConvLayer<B>,
    pub(crate) tcn3_u: TemporalBlock3d<B>,
    pub(crate) conv3_u: ConvLayer<B>,
}

impl<B: Backend> SimpleTcn2<B> {
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let x = time_distributed(x, |x| self.coord.forward(x));

        // encoder; tcn1 and tcn2 would only feed skips, which this variant does not have
        let x = time_distributed(x, |x| self.conv0.forward(x));
        let x = time_distributed(x, |x| self.conv1.forward(x));
        let x = time_distributed(x, |x| self.conv2.forward(x));
        let x = self.tcn3.forward(x);
        trace!(shape = ?x.dims(), "encoded");

        // decoder
        let x = self.tcn1_u.forward(x);
        let x = time_distributed(x, |x| self.conv1_u.forward(x));
        let x = self.tcn2_u.forward(x);
        let x = time_distributed(x, |x| self.conv2_u.forward(x));
        let x = self.tcn3_u.forward(x);
        let x = time_distributed(x, |x| self.conv3_u.forward(x));
        trace!(shape = ?x.dims(), "decoded");

        x
    }
}

impl<B: Backend> VideoModel<B> for SimpleTcn2<B> {
    fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        SimpleTcn2::forward(self, x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::{Distribution, ElementConversion};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn simple_tcn_restores_input_resolution() {
        let device = Default::default();
        let model = SimpleTcnConfig::new().init::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 5>::random([1, 1, 4, 16, 16], Distribution::Default, &device);
        assert_eq!(model.forward(x).dims(), [1, 1, 4, 16, 16]);
    }

    #[test]
    fn simple_tcn_maps_channels() {
        let device = Default::default();
        let model = SimpleTcnConfig::new()
            .with_n_in(3)
            .with_n_out(2)
            .with_norm(NormKind::None)
            .init::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 5>::random([2, 3, 3, 8, 8], Distribution::Default, &device);
        assert_eq!(VideoModel::forward(&model, x).dims(), [2, 2, 3, 8, 8]);
    }

    #[test]
    #[should_panic(expected = "divisible by 8")]
    fn simple_tcn_rejects_odd_frames() {
        let device = Default::default();
        let model = SimpleTcnConfig::new().init::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 5>::zeros([1, 1, 2, 12, 16], &device);
        model.forward(x);
    }

    #[test]
    fn simple_tcn_is_causal_through_skips() {
        let device = Default::default();
        let model = SimpleTcnConfig::new()
            .with_dilation(1)
            .init::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 5>::random([1, 1, 5, 8, 8], Distribution::Default, &device);
        let perturbed = x
            .clone()
            .slice_assign([0..1, 0..1, 4..5, 0..8, 0..8], Tensor::ones([1, 1, 1, 8, 8], &device));

        let y = model.forward(x).slice([0..1, 0..1, 0..4]);
        let y_perturbed = model.forward(perturbed).slice([0..1, 0..1, 0..4]);
        let diff = (y - y_perturbed).abs().max().into_scalar().elem::<f32>();
        assert!(diff < 1e-4);
    }

    #[test]
    fn receptive_field_spans_four_blocks() {
        assert_eq!(SimpleTcnConfig::new().receptive_field(), 33);
        assert_eq!(SimpleTcn2Config::new().with_dilation(1).receptive_field(), 17);
    }

    #[test]
    fn simple_tcn2_keeps_frame_size() {
        let device = Default::default();
        let model = SimpleTcn2Config::new().init::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 5>::random([1, 1, 3, 6, 5], Distribution::Default, &device);
        let y = model.forward(x);

        assert_eq!(y.dims(), [1, 1, 3, 6, 5]);
        assert!(y.min().into_scalar().elem::<f32>() >= 0.0);
    }

    #[test]
    fn simple_tcn2_is_causal() {
        let device = Default::default();
        let model = SimpleTcn2Config::new()
            .with_dilation(1)
            .init::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 5>::random([1, 1, 5, 4, 4], Distribution::Default, &device);
        let perturbed = x
            .clone()
            .slice_assign([0..1, 0..1, 4..5, 0..4, 0..4], Tensor::ones([1, 1, 1, 4, 4], &device));

        let y = model.forward(x).slice([0..1, 0..1, 0..4]);
        let y_perturbed = model.forward(perturbed).slice([0..1, 0..1, 0..4]);
        let diff = (y - y_perturbed).abs().max().into_scalar().elem::<f32>();
        assert!(diff < 1e-4);
    }
}
