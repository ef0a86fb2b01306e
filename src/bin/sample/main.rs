//! Builds a freshly initialized model, runs it on a random clip and optionally saves it.
//!
//! ```text
//! sample --arch simple-tcn --frames 10 --size 64 --output models/untrained
//! ```

use tcn_video::backend::{default_device, DefaultBackend};
use tcn_video::load::save_model_file;
use tcn_video::model::*;

use anyhow::{anyhow, Result};
use burn::{
    config::Config,
    module::Module,
    tensor::{backend::Backend, Distribution, Tensor},
};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(author, version, about = "Initialize a video model and run it on a random clip")]
struct Args {
    /// Model architecture: simple-tcn, simple-tcn2 or tcn3d
    #[arg(long, default_value = "simple-tcn")]
    arch: Architecture,

    /// Clips per batch
    #[arg(long, default_value = "1")]
    batch: usize,

    /// Time steps per clip
    #[arg(long, default_value = "8")]
    frames: usize,

    /// Frame height and width
    #[arg(long, default_value = "64")]
    size: usize,

    /// Input channels
    #[arg(long, default_value = "1")]
    n_in: usize,

    /// Channels of each tcn3d level
    #[arg(long, value_delimiter = ',', default_value = "16,16,1")]
    channels: Vec<usize>,

    /// Seed for weight and clip initialization
    #[arg(long)]
    seed: Option<u64>,

    /// Save the initialized model and its config under this name
    #[arg(long, short)]
    output: Option<String>,

    /// Log debug output
    #[arg(long, short)]
    verbose: bool,
}

fn sample<B: Backend, M: VideoModel<B> + Module<B>, C: Config>(
    model: M,
    config: &C,
    receptive_field: usize,
    args: &Args,
    device: &B::Device,
) -> Result<()> {
    info!("Initialized {} with {} parameters", args.arch, model.num_params());
    info!("Receptive field: {} frames", receptive_field);

    let shape = if args.arch.time_major() {
        [args.batch, args.frames, args.n_in, args.size, args.size]
    } else {
        [args.batch, args.n_in, args.frames, args.size, args.size]
    };
    let clip = Tensor::<B, 5>::random(shape, Distribution::Normal(0.0, 1.0), device);

    let prediction = model.forward(clip);
    info!(input = ?shape, output = ?prediction.dims(), "Forward pass complete");

    if let Some(name) = &args.output {
        save_model_file(model, config, name)
            .map_err(|e| anyhow!("Failed to save model {}: {}", name, e))?;
        info!("Saved model to {}", name);
    }

    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(seed) = args.seed {
        DefaultBackend::seed(seed);
    }

    let device = default_device();

    match args.arch {
        Architecture::SimpleTcn => {
            let config = SimpleTcnConfig::new().with_n_in(args.n_in);
            let model = config.init::<DefaultBackend>(&device);
            sample(model, &config, config.receptive_field(), &args, &device)
        }
        Architecture::SimpleTcn2 => {
            let config = SimpleTcn2Config::new().with_n_in(args.n_in);
            let model = config.init::<DefaultBackend>(&device);
            sample(model, &config, config.receptive_field(), &args, &device)
        }
        Architecture::Tcn3d => {
            let config = Tcn3dConfig::new(args.n_in, args.channels.clone());
            let model = config.init::<DefaultBackend>(&device);
            sample(model, &config, config.receptive_field(), &args, &device)
        }
    }
}
