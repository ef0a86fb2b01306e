use super::VideoModel;

use burn::{
    config::Config,
    module::{Module, Param},
    nn::{
        conv::{Conv3d, Conv3dConfig},
        Dropout, DropoutConfig,
    },
    tensor::{
        activation::relu,
        backend::Backend,
        module::conv3d,
        ops::ConvOptions,
        Tensor,
    },
};

/// Removes the trailing `chomp_size` steps of the time axis (dim 2).
///
/// A convolution padded by `p` on both ends of the time axis sees `p` future steps
/// at its tail; chomping them leaves a causal output of the input's length.
#[derive(Module, Clone, Debug)]
pub struct Chomp1d {
    chomp_size: usize,
}

impl Chomp1d {
    pub fn new(chomp_size: usize) -> Self {
        Self { chomp_size }
    }

    pub fn chomp_size(&self) -> usize {
        self.chomp_size
    }

    pub fn forward<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        assert!(D >= 3, "Chomp needs a time axis at dim 2, got a rank {} tensor.", D);

        if self.chomp_size == 0 {
            return x;
        }

        let n_time = x.dims()[2];
        assert!(
            self.chomp_size < n_time,
            "Cannot chomp {} steps from a sequence of length {}.",
            self.chomp_size,
            n_time
        );

        x.narrow(2, 0, n_time - self.chomp_size)
    }
}

#[derive(Config, Debug)]
pub struct WeightNormConv3dConfig {
    channels: [usize; 2],
    kernel_size: [usize; 3],
    #[config(default = "[1, 1, 1]")]
    stride: [usize; 3],
    #[config(default = "[1, 1, 1]")]
    dilation: [usize; 3],
    #[config(default = "[0, 0, 0]")]
    padding: [usize; 3],
    #[config(default = true)]
    bias: bool,
}

impl WeightNormConv3dConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> WeightNormConv3d<B> {
        let conv = Conv3dConfig::new(self.channels, self.kernel_size)
            .with_bias(self.bias)
            .init(device);

        let weight_v = conv.weight.val();
        let weight_g = channel_norm(weight_v.clone());

        WeightNormConv3d {
            weight_g: Param::from_tensor(weight_g),
            weight_v: Param::from_tensor(weight_v),
            bias: conv.bias,
            stride: self.stride,
            dilation: self.dilation,
            padding: self.padding,
        }
    }
}

/// 3D convolution whose kernel is `g * v / |v|`, with one magnitude per output channel.
#[derive(Module, Debug)]
pub struct WeightNormConv3d<B: Backend> {
    pub(crate) weight_g: Param<Tensor<B, 5>>,
    pub(crate) weight_v: Param<Tensor<B, 5>>,
    pub(crate) bias: Option<Param<Tensor<B, 1>>>,
    stride: [usize; 3],
    dilation: [usize; 3],
    padding: [usize; 3],
}

impl<B: Backend> WeightNormConv3d<B> {
    /// The effective convolution kernel.
    pub fn weight(&self) -> Tensor<B, 5> {
        let v = self.weight_v.val();
        let norm = channel_norm(v.clone());

        v * (self.weight_g.val() / norm)
    }

    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        conv3d(
            x,
            self.weight(),
            self.bias.as_ref().map(|bias| bias.val()),
            ConvOptions::new(self.stride, self.padding, self.dilation, 1),
        )
    }
}

/// L2 norm of each output kernel, shaped `[n_out, 1, 1, 1, 1]`.
fn channel_norm<B: Backend>(v: Tensor<B, 5>) -> Tensor<B, 5> {
    let [n_out, n_in, kt, kh, kw] = v.dims();

    v.powf_scalar(2.0)
        .reshape([n_out, n_in * kt * kh * kw])
        .sum_dim(1)
        .sqrt()
        .reshape([n_out, 1, 1, 1, 1])
}

#[derive(Config, Debug)]
pub struct TemporalBlock3dConfig {
    n_in: usize,
    n_out: usize,
    /// Temporal extent of the kernel; the spatial extent is fixed at 3x3.
    #[config(default = 3)]
    kernel_size: usize,
    #[config(default = 1)]
    stride: usize,
    #[config(default = 2)]
    dilation: usize,
    #[config(default = 0.2)]
    dropout: f64,
}

impl TemporalBlock3dConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> TemporalBlock3d<B> {
        assert!(
            self.kernel_size > 0 && self.dilation > 0 && self.stride > 0,
            "Temporal kernel size, dilation and stride must be positive."
        );

        let time_padding = (self.kernel_size - 1) * self.dilation;
        let conv = |n_in: usize| {
            WeightNormConv3dConfig::new([n_in, self.n_out], [self.kernel_size, 3, 3])
                .with_stride([self.stride, 1, 1])
                .with_dilation([self.dilation, 1, 1])
                .with_padding([time_padding, 1, 1])
                .init(device)
        };

        let downsample = (self.n_in != self.n_out)
            .then(|| Conv3dConfig::new([self.n_in, self.n_out], [1, 1, 1]).init(device));

        TemporalBlock3d {
            conv1: conv(self.n_in),
            chomp1: Chomp1d::new(time_padding),
            conv2: conv(self.n_out),
            chomp2: Chomp1d::new(time_padding),
            dropout: DropoutConfig::new(self.dropout).init(),
            downsample,
        }
    }
}

/// Residual block of two causal, dilated, weight-normalized 3D convolutions.
///
/// Input and output are `[batch, channels, time, height, width]`. With unit stride the
/// time and spatial sizes are preserved and the output at step `t` only sees steps `<= t`.
#[derive(Module, Debug)]
pub struct TemporalBlock3d<B: Backend> {
    pub(crate) conv1: WeightNormConv3d<B>,
    chomp1: Chomp1d,
    pub(crate) conv2: WeightNormConv3d<B>,
    chomp2: Chomp1d,
    dropout: Dropout,
    pub(crate) downsample: Option<Conv3d<B>>,
}

impl<B: Backend> TemporalBlock3d<B> {
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let out = self.conv1.forward(x.clone());
        let out = self.dropout.forward(relu(self.chomp1.forward(out)));
        let out = self.conv2.forward(out);
        let out = self.dropout.forward(relu(self.chomp2.forward(out)));

        let res = match &self.downsample {
            Some(downsample) => downsample.forward(x),
            None => x,
        };

        relu(out + res)
    }

    /// Number of input steps that can influence one output step.
    pub fn receptive_field(&self) -> usize {
        1 + self.chomp1.chomp_size() + self.chomp2.chomp_size()
    }
}

#[derive(Config, Debug)]
pub struct TemporalConvNet3dConfig {
    n_inputs: usize,
    /// Output channels of each level; level `i` is dilated by `2^i`.
    channels: Vec<usize>,
    #[config(default = 3)]
    kernel_size: usize,
    #[config(default = 0.2)]
    dropout: f64,
}

impl TemporalConvNet3dConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> TemporalConvNet3d<B> {
        assert!(
            !self.channels.is_empty(),
            "Temporal conv net needs at least one level."
        );

        let blocks = self
            .channels
            .iter()
            .enumerate()
            .map(|(i, &n_out)| {
                let n_in = if i == 0 {
                    self.n_inputs
                } else {
                    self.channels[i - 1]
                };

                TemporalBlock3dConfig::new(n_in, n_out)
                    .with_kernel_size(self.kernel_size)
                    .with_dilation(1 << i)
                    .with_dropout(self.dropout)
                    .init(device)
            })
            .collect();

        TemporalConvNet3d { blocks }
    }

    pub fn receptive_field(&self) -> usize {
        1 + (0..self.channels.len())
            .map(|i| 2 * (self.kernel_size - 1) * (1 << i))
            .sum::<usize>()
    }
}

/// Stack of temporal blocks with exponentially growing dilation.
#[derive(Module, Debug)]
pub struct TemporalConvNet3d<B: Backend> {
    pub(crate) blocks: Vec<TemporalBlock3d<B>>,
}

impl<B: Backend> TemporalConvNet3d<B> {
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }

    pub fn receptive_field(&self) -> usize {
        1 + self
            .blocks
            .iter()
            .map(|block| block.receptive_field() - 1)
            .sum::<usize>()
    }
}

#[derive(Config, Debug)]
pub struct Tcn3dConfig {
    input_size: usize,
    channels: Vec<usize>,
    #[config(default = 3)]
    kernel_size: usize,
    #[config(default = 0.2)]
    dropout: f64,
}

impl Tcn3dConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Tcn3d<B> {
        let tcn = self.network_config().init(device);
        Tcn3d { tcn }
    }

    pub fn receptive_field(&self) -> usize {
        self.network_config().receptive_field()
    }

    pub fn network_config(&self) -> TemporalConvNet3dConfig {
        TemporalConvNet3dConfig::new(self.input_size, self.channels.clone())
            .with_kernel_size(self.kernel_size)
            .with_dropout(self.dropout)
    }
}

/// Temporal conv net over `[batch, time, channels, height, width]` clips.
#[derive(Module, Debug)]
pub struct Tcn3d<B: Backend> {
    pub(crate) tcn: TemporalConvNet3d<B>,
}

impl<B: Backend> Tcn3d<B> {
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        self.tcn.forward(x.swap_dims(1, 2)).swap_dims(1, 2)
    }

    pub fn receptive_field(&self) -> usize {
        self.tcn.receptive_field()
    }
}

impl<B: Backend> VideoModel<B> for Tcn3d<B> {
    fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        Tcn3d::forward(self, x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::{Distribution, ElementConversion};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn max_abs_diff<const D: usize>(a: Tensor<TestBackend, D>, b: Tensor<TestBackend, D>) -> f32 {
        (a - b).abs().max().into_scalar().elem::<f32>()
    }

    #[test]
    fn chomp_trims_trailing_steps() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 5>::random([2, 3, 7, 4, 4], Distribution::Default, &device);

        let y = Chomp1d::new(3).forward(x.clone());
        assert_eq!(y.dims(), [2, 3, 4, 4, 4]);
        assert_eq!(max_abs_diff(x.slice([0..2, 0..3, 0..4]), y), 0.0);
    }

    #[test]
    fn zero_chomp_is_identity() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 3>::random([1, 2, 5], Distribution::Default, &device);

        let y = Chomp1d::new(0).forward(x.clone());
        assert_eq!(y.dims(), [1, 2, 5]);
        assert_eq!(max_abs_diff(x, y), 0.0);
    }

    #[test]
    #[should_panic(expected = "Cannot chomp")]
    fn chomping_whole_sequence_panics() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 3>::zeros([1, 1, 2], &device);
        Chomp1d::new(2).forward(x);
    }

    #[test]
    fn weight_norm_starts_at_plain_kernel() {
        let device = Default::default();
        let conv = WeightNormConv3dConfig::new([2, 4], [3, 3, 3]).init::<TestBackend>(&device);

        assert_eq!(conv.weight_g.val().dims(), [4, 1, 1, 1, 1]);
        assert!(max_abs_diff(conv.weight(), conv.weight_v.val()) < 1e-5);
    }

    #[test]
    fn weight_norm_magnitude_scales_output() {
        let device = Default::default();
        let mut conv = WeightNormConv3dConfig::new([2, 3], [1, 3, 3])
            .with_padding([0, 1, 1])
            .with_bias(false)
            .init::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 5>::random([1, 2, 2, 4, 4], Distribution::Default, &device);
        let y = conv.forward(x.clone());

        conv.weight_g = Param::from_tensor(conv.weight_g.val() * 2.0);
        let y2 = conv.forward(x);

        assert_eq!(y.dims(), [1, 3, 2, 4, 4]);
        assert!(max_abs_diff(y * 2.0, y2) < 1e-4);
    }

    #[test]
    fn weight_norm_ignores_direction_scale() {
        let device = Default::default();
        let mut conv = WeightNormConv3dConfig::new([2, 3], [2, 3, 3]).init::<TestBackend>(&device);
        let before = conv.weight();

        conv.weight_v = Param::from_tensor(conv.weight_v.val() * 10.0);
        assert!(max_abs_diff(before, conv.weight()) < 1e-5);
    }

    #[test]
    fn temporal_block_preserves_shape() {
        let device = Default::default();
        let block = TemporalBlock3dConfig::new(3, 5).init::<TestBackend>(&device);
        assert!(block.downsample.is_some());

        let x = Tensor::<TestBackend, 5>::random([2, 3, 6, 5, 4], Distribution::Default, &device);
        assert_eq!(block.forward(x).dims(), [2, 5, 6, 5, 4]);
    }

    #[test]
    fn temporal_block_identity_shortcut_when_widths_match() {
        let device = Default::default();
        let block = TemporalBlock3dConfig::new(4, 4).init::<TestBackend>(&device);
        assert!(block.downsample.is_none());
        assert_eq!(block.receptive_field(), 9);
    }

    #[test]
    fn temporal_block_is_causal() {
        let device = Default::default();
        let block = TemporalBlock3dConfig::new(2, 3)
            .with_dilation(2)
            .init::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 5>::random([1, 2, 8, 4, 4], Distribution::Default, &device);
        let future = Tensor::<TestBackend, 5>::random([1, 2, 3, 4, 4], Distribution::Default, &device);
        let perturbed = x.clone().slice_assign([0..1, 0..2, 5..8, 0..4, 0..4], future);

        let y = block.forward(x);
        let y_perturbed = block.forward(perturbed);

        let past = y.slice([0..1, 0..3, 0..5]);
        let past_perturbed = y_perturbed.slice([0..1, 0..3, 0..5]);
        assert!(max_abs_diff(past, past_perturbed) < 1e-5);
    }

    #[test]
    fn network_dilates_exponentially() {
        let device = Default::default();
        let config = TemporalConvNet3dConfig::new(2, vec![4, 4, 6]);
        let network = config.init::<TestBackend>(&device);

        let chomps: Vec<_> = network
            .blocks
            .iter()
            .map(|block| block.chomp1.chomp_size())
            .collect();
        assert_eq!(chomps, vec![2, 4, 8]);

        assert_eq!(config.receptive_field(), 29);
        assert_eq!(network.receptive_field(), 29);
    }

    #[test]
    fn network_is_causal_across_levels() {
        let device = Default::default();
        let network = TemporalConvNet3dConfig::new(1, vec![2, 2])
            .init::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 5>::random([1, 1, 10, 3, 3], Distribution::Default, &device);
        let perturbed = x
            .clone()
            .slice_assign([0..1, 0..1, 9..10, 0..3, 0..3], Tensor::ones([1, 1, 1, 3, 3], &device));

        let y = network.forward(x).slice([0..1, 0..2, 0..9]);
        let y_perturbed = network.forward(perturbed).slice([0..1, 0..2, 0..9]);
        assert!(max_abs_diff(y, y_perturbed) < 1e-5);
    }

    #[test]
    #[should_panic(expected = "at least one level")]
    fn network_needs_levels() {
        let device = Default::default();
        TemporalConvNet3dConfig::new(1, vec![]).init::<TestBackend>(&device);
    }

    #[test]
    fn tcn3d_keeps_time_major_layout() {
        let device = Default::default();
        let tcn = Tcn3dConfig::new(3, vec![4, 6]).init::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 5>::random([2, 5, 3, 4, 4], Distribution::Default, &device);
        assert_eq!(VideoModel::forward(&tcn, x).dims(), [2, 5, 6, 4, 4]);
        assert_eq!(tcn.receptive_field(), 13);
    }
}
