//! Backend used by the binaries, chosen at build time through cargo features.

#[cfg(feature = "wgpu")]
pub type DefaultBackend = burn_wgpu::Wgpu;

#[cfg(all(feature = "tch", not(feature = "wgpu")))]
pub type DefaultBackend = burn_tch::LibTorch<f32>;

#[cfg(not(any(feature = "wgpu", feature = "tch")))]
pub type DefaultBackend = burn_ndarray::NdArray<f32>;

pub type DefaultDevice = <DefaultBackend as burn::tensor::backend::Backend>::Device;

pub fn default_device() -> DefaultDevice {
    DefaultDevice::default()
}
