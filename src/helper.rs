use burn::tensor::{backend::Backend, Int, Tensor};

/// Folds the time axis into the batch axis: `[b, c, t, h, w]` becomes `[b * t, c, h, w]`.
///
/// Returns the folded frames and the number of time steps needed to unfold them.
pub fn fold_time<B: Backend>(x: Tensor<B, 5>) -> (Tensor<B, 4>, usize) {
    let [n_batch, n_channel, n_time, height, width] = x.dims();

    let frames = x
        .swap_dims(1, 2)
        .reshape([n_batch * n_time, n_channel, height, width]);

    (frames, n_time)
}

/// Inverse of [`fold_time`]. Channel count and spatial size may differ from the folded input.
pub fn unfold_time<B: Backend>(frames: Tensor<B, 4>, n_time: usize) -> Tensor<B, 5> {
    let [n_frame, n_channel, height, width] = frames.dims();

    assert!(
        n_time > 0 && n_frame % n_time == 0,
        "Frame count {} is not a multiple of the time steps {}.",
        n_frame,
        n_time
    );

    frames
        .reshape([n_frame / n_time, n_time, n_channel, height, width])
        .swap_dims(1, 2)
}

/// Applies a per-frame operation to every time step of a video tensor.
pub fn time_distributed<B, F>(x: Tensor<B, 5>, f: F) -> Tensor<B, 5>
where
    B: Backend,
    F: FnOnce(Tensor<B, 4>) -> Tensor<B, 4>,
{
    let (frames, n_time) = fold_time(x);
    unfold_time(f(frames), n_time)
}

/// Like [`time_distributed`] with a second, time-aligned input such as a skip connection.
pub fn time_distributed2<B, F>(x: Tensor<B, 5>, side: Tensor<B, 5>, f: F) -> Tensor<B, 5>
where
    B: Backend,
    F: FnOnce(Tensor<B, 4>, Tensor<B, 4>) -> Tensor<B, 4>,
{
    let n_time_side = side.dims()[2];
    let (frames, n_time) = fold_time(x);

    assert!(
        n_time == n_time_side,
        "Side input has {} time steps, expected {}.",
        n_time_side,
        n_time
    );

    let (side, _) = fold_time(side);
    unfold_time(f(frames, side), n_time)
}

/// Rearranges `[n, c * r^2, h, w]` into `[n, c, h * r, w * r]`.
///
/// Output pixel `(h * r + i, w * r + j)` of channel `c` is read from input channel `c * r^2 + i * r + j`.
pub fn pixel_shuffle<B: Backend>(x: Tensor<B, 4>, scale: usize) -> Tensor<B, 4> {
    let [n_batch, n_channel, height, width] = x.dims();
    let r2 = scale * scale;

    assert!(
        scale > 0 && n_channel % r2 == 0,
        "Channel count {} must be divisible by the squared upscale factor {}.",
        n_channel,
        r2
    );

    let n_out = n_channel / r2;

    x.reshape([n_batch, n_out, scale, scale, height, width])
        .permute([0, 1, 4, 2, 5, 3])
        .reshape([n_batch, n_out, height * scale, width * scale])
}

/// Evenly spaced coordinates in [-1, 1]. A single position maps to 0.
pub fn coord_grid<B: Backend>(size: usize, device: &B::Device) -> Tensor<B, 1> {
    if size <= 1 {
        return Tensor::zeros([size], device);
    }

    Tensor::<B, 1, Int>::arange(0..size as i64, device)
        .float()
        .mul_scalar(2.0 / (size - 1) as f64)
        .sub_scalar(1.0)
}

/// Appends two coordinate channels to `[b, c, h, w]`: the row position (varying along `h`)
/// then the column position (varying along `w`).
pub fn add_coords<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    let [n_batch, _, height, width] = x.dims();
    let device = x.device();

    let rows = coord_grid::<B>(height, &device)
        .reshape([1, 1, height, 1])
        .expand([n_batch, 1, height, width]);
    let cols = coord_grid::<B>(width, &device)
        .reshape([1, 1, 1, width])
        .expand([n_batch, 1, height, width]);

    Tensor::cat(vec![x, rows, cols], 1)
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
    fn fold_then_unfold_is_identity() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 5>::random([2, 3, 4, 5, 6], Distribution::Default, &device);

        let (frames, n_time) = fold_time(x.clone());
        assert_eq!(frames.dims(), [8, 3, 5, 6]);
        assert_eq!(n_time, 4);

        let back = unfold_time(frames, n_time);
        assert_eq!(back.dims(), [2, 3, 4, 5, 6]);
        assert!(max_abs_diff(x, back) == 0.0);
    }

    #[test]
    fn time_distributed_keeps_frames_separate() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 5>::random([2, 1, 3, 2, 2], Distribution::Default, &device);

        // frame t of batch b is scaled by its own index in the folded batch
        let y = time_distributed(x.clone(), |frames| {
            let [n, c, h, w] = frames.dims();
            let scale = Tensor::<TestBackend, 1, Int>::arange(0..n as i64, &frames.device())
                .float()
                .reshape([n, 1, 1, 1])
                .expand([n, c, h, w]);
            frames * scale
        });

        // folded index is b * t_len + t
        let expected = x.clone().slice([1..2, 0..1, 2..3, 0..2, 0..2]) * 5.0;
        let actual = y.slice([1..2, 0..1, 2..3, 0..2, 0..2]);
        assert!(max_abs_diff(expected, actual) < 1e-6);
    }

    #[test]
    fn pixel_shuffle_matches_channel_ordering() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 1, Int>::arange(0..8, &device)
            .float()
            .reshape([1, 4, 1, 2]);

        let y = pixel_shuffle(x, 2);
        assert_eq!(y.dims(), [1, 1, 2, 4]);

        let values = y.into_data().to_vec::<f32>().unwrap();
        assert_eq!(values, vec![0.0, 2.0, 1.0, 3.0, 4.0, 6.0, 5.0, 7.0]);
    }

    #[test]
    #[should_panic]
    fn pixel_shuffle_rejects_indivisible_channels() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::zeros([1, 3, 2, 2], &device);
        pixel_shuffle(x, 2);
    }

    #[test]
    fn coordinates_span_unit_interval() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::zeros([2, 3, 4, 5], &device);

        let y = add_coords(x);
        assert_eq!(y.dims(), [2, 5, 4, 5]);

        let top = y.clone().slice([0..1, 3..4, 0..1, 3..4]).into_scalar().elem::<f32>();
        let bottom = y.clone().slice([0..1, 3..4, 3..4, 3..4]).into_scalar().elem::<f32>();
        let left = y.clone().slice([1..2, 4..5, 2..3, 0..1]).into_scalar().elem::<f32>();
        let right = y.slice([1..2, 4..5, 2..3, 4..5]).into_scalar().elem::<f32>();

        assert!((left + 1.0).abs() < 1e-6);
        assert!((right - 1.0).abs() < 1e-6);
        assert!((top + 1.0).abs() < 1e-6);
        assert!((bottom - 1.0).abs() < 1e-6);
    }

    #[test]
    fn row_coordinate_comes_first() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::zeros([1, 1, 3, 5], &device);
        let y = add_coords(x);

        let rows = y.clone().slice([0..1, 1..2, 0..3, 0..5]);
        let cols = y.slice([0..1, 2..3, 0..3, 0..5]);

        // the row channel is constant along each row, the column channel along each column
        let first_row = rows.clone().slice([0..1, 0..1, 0..1, 0..5]).into_data().to_vec::<f32>().unwrap();
        let first_col = rows.slice([0..1, 0..1, 0..3, 0..1]).into_data().to_vec::<f32>().unwrap();
        assert_eq!(first_row, vec![-1.0; 5]);
        assert_eq!(first_col, vec![-1.0, 0.0, 1.0]);

        let first_row = cols.clone().slice([0..1, 0..1, 0..1, 0..5]).into_data().to_vec::<f32>().unwrap();
        let first_col = cols.slice([0..1, 0..1, 0..3, 0..1]).into_data().to_vec::<f32>().unwrap();
        assert_eq!(first_row, vec![-1.0, -0.5, 0.0, 0.5, 1.0]);
        assert_eq!(first_col, vec![-1.0; 3]);
    }

    #[test]
    fn single_position_grid_is_centered() {
        let device = Default::default();
        let grid = coord_grid::<TestBackend>(1, &device);
        assert_eq!(grid.into_data().to_vec::<f32>().unwrap(), vec![0.0]);
    }
}
