//! Converts an exported `.npy` weight tree into a burn record and config.
//!
//! ```text
//! convert dumps/simple_tcn models/moving_mnist --arch simple-tcn
//! ```

use tcn_video::backend::{default_device, DefaultBackend, DefaultDevice};
use tcn_video::load::save_model_file;
use tcn_video::model::load::{load_simple_tcn, load_simple_tcn2, load_tcn3d};
use tcn_video::model::*;

use anyhow::{anyhow, Context, Result};
use burn::config::Config;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(author, version, about = "Convert exported weights into a burn record")]
struct Args {
    /// Directory holding the exported .npy tree
    dump: String,

    /// Name of the record to write; the config goes to `<name>.cfg`
    name: String,

    /// Model architecture: simple-tcn, simple-tcn2 or tcn3d
    #[arg(long, default_value = "simple-tcn")]
    arch: Architecture,

    /// Config to build the model from instead of the architecture defaults
    #[arg(long)]
    config: Option<String>,

    /// Input channels, when no config is given
    #[arg(long, default_value = "1")]
    n_in: usize,

    /// Channels of each tcn3d level, when no config is given
    #[arg(long, value_delimiter = ',', default_value = "16,16,1")]
    channels: Vec<usize>,

    /// Log debug output
    #[arg(long, short)]
    verbose: bool,
}

fn config_or<C: Config>(path: &Option<String>, default: impl FnOnce() -> C) -> Result<C> {
    match path {
        Some(path) => C::load(path).map_err(|e| anyhow!("Failed to load config {}: {}", path, e)),
        None => Ok(default()),
    }
}

fn convert(args: &Args, device: &DefaultDevice) -> Result<()> {
    let save_error = |e| anyhow!("Failed to save model {}: {}", args.name, e);
    let load_context = || format!("Failed to load weights from {}", args.dump);

    info!("Loading {} weights from {}", args.arch, args.dump);

    match args.arch {
        Architecture::SimpleTcn => {
            let config = config_or(&args.config, || SimpleTcnConfig::new().with_n_in(args.n_in))?;
            let model = load_simple_tcn::<DefaultBackend>(&args.dump, &config, device)
                .with_context(load_context)?;
            save_model_file(model, &config, &args.name).map_err(save_error)
        }
        Architecture::SimpleTcn2 => {
            let config = config_or(&args.config, || SimpleTcn2Config::new().with_n_in(args.n_in))?;
            let model = load_simple_tcn2::<DefaultBackend>(&args.dump, &config, device)
                .with_context(load_context)?;
            save_model_file(model, &config, &args.name).map_err(save_error)
        }
        Architecture::Tcn3d => {
            let config = config_or(&args.config, || {
                Tcn3dConfig::new(args.n_in, args.channels.clone())
            })?;
            let model = load_tcn3d::<DefaultBackend>(&args.dump, &config, device)
                .with_context(load_context)?;
            save_model_file(model, &config, &args.name).map_err(save_error)
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let device = default_device();
    convert(&args, &device)?;

    info!("Finished.");
    Ok(())
}
