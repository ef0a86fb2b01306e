//! Runs a saved video model on a clip and writes the prediction.
//!
//! ```text
//! tcn-video clip.npy models/moving_mnist --arch simple-tcn --output prediction.npy
//! ```

use tcn_video::backend::{default_device, DefaultBackend, DefaultDevice};
use tcn_video::load::{config_path, load_model_file};
use tcn_video::model::load::{read_tensor, write_tensor};
use tcn_video::model::*;

use anyhow::{anyhow, Context, Result};
use burn::{
    config::Config,
    tensor::{backend::Backend, Tensor},
};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(author, version, about = "Predict a video clip with a saved model")]
struct Args {
    /// Input clip as a shape-prefixed .npy file
    input: String,

    /// Model name; the record is read from here and the config from `<model>.cfg`
    model: String,

    /// Model architecture: simple-tcn, simple-tcn2 or tcn3d
    #[arg(long, default_value = "simple-tcn")]
    arch: Architecture,

    /// Where to write the prediction
    #[arg(long, short, default_value = "prediction.npy")]
    output: String,

    /// Log debug output
    #[arg(long, short)]
    verbose: bool,
}

fn load_config<C: Config>(model_name: &str) -> Result<C> {
    let path = config_path(model_name);
    C::load(&path).map_err(|e| anyhow!("Failed to load config {}: {}", path, e))
}

fn predict<B: Backend, M: VideoModel<B>>(model: &M, args: &Args, device: &B::Device) -> Result<()> {
    let clip: Tensor<B, 5> = read_tensor(&args.input, device)
        .with_context(|| format!("Failed to load clip {}", args.input))?;
    info!(shape = ?clip.dims(), "Running {}", args.arch);

    let prediction = model.forward(clip);
    info!(shape = ?prediction.dims(), "Writing prediction to {}", args.output);

    write_tensor(prediction, &args.output)
        .with_context(|| format!("Failed to write prediction {}", args.output))
}

fn run(args: &Args, device: &DefaultDevice) -> Result<()> {
    let load_error = |e| anyhow!("Failed to load model file {}: {}", args.model, e);

    match args.arch {
        Architecture::SimpleTcn => {
            let config: SimpleTcnConfig = load_config(&args.model)?;
            let model = load_model_file(config.init::<DefaultBackend>(device), &args.model, device)
                .map_err(load_error)?;
            predict(&model, args, device)
        }
        Architecture::SimpleTcn2 => {
            let config: SimpleTcn2Config = load_config(&args.model)?;
            let model = load_model_file(config.init::<DefaultBackend>(device), &args.model, device)
                .map_err(load_error)?;
            predict(&model, args, device)
        }
        Architecture::Tcn3d => {
            let config: Tcn3dConfig = load_config(&args.model)?;
            let model = load_model_file(config.init::<DefaultBackend>(device), &args.model, device)
                .map_err(load_error)?;
            predict(&model, args, device)
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let device = default_device();
    run(&args, &device)
}
