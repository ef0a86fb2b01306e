//! Saving and restoring models as burn records next to their JSON configs.

use burn::{
    config::Config,
    module::Module,
    record::{DefaultRecorder, RecorderError},
    tensor::backend::Backend,
};
use tracing::info;

/// Path of the config saved alongside the record `model_name`.
pub fn config_path(model_name: &str) -> String {
    format!("{}.cfg", model_name)
}

/// Loads the record `model_name` into a freshly initialized model.
pub fn load_model_file<B: Backend, M: Module<B>>(
    model: M,
    model_name: &str,
    device: &B::Device,
) -> Result<M, RecorderError> {
    info!("Loading model record {}", model_name);
    model.load_file(model_name, &DefaultRecorder::new(), device)
}

/// Saves `model` as the record `model_name` and `config` as `<model_name>.cfg`.
pub fn save_model_file<B: Backend, M: Module<B>, C: Config>(
    model: M,
    config: &C,
    model_name: &str,
) -> Result<(), RecorderError> {
    info!("Saving model record {}", model_name);
    model.save_file(model_name, &DefaultRecorder::new())?;

    config
        .save(config_path(model_name))
        .map_err(|e| RecorderError::Unknown(format!("failed to save config: {}", e)))
}
