use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use semiseg::{
    backend::{create_device, get_backend_name, TrainBackend},
    demo::{run_demo, DemoConfig},
    model::ReCoConfig,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "semiseg")]
#[command(about = "Domain-mixed normalization and regional contrastive semi-supervised segmentation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show backend information
    Info,

    /// Load and validate a ReCo configuration file
    CheckConfig {
        /// JSON configuration file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Run a few ReCo steps and a mixed batch normalization pass on synthetic data
    Demo {
        /// Optional JSON ReCo configuration; defaults are used otherwise
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of semantic classes when no configuration is given
        #[arg(long, default_value_t = 3)]
        num_classes: usize,

        /// Training steps
        #[arg(long, default_value_t = 2)]
        steps: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let device = create_device();

    match cli.command {
        Commands::Info => {
            info!(backend = get_backend_name(), device = ?device, "semiseg");
            Ok(())
        }

        Commands::CheckConfig { config } => {
            let reco = ReCoConfig::from_file(&config)
                .with_context(|| format!("invalid configuration {}", config.display()))?;
            info!(path = %config.display(), "configuration is valid");
            println!("{reco}");
            Ok(())
        }

        Commands::Demo {
            config,
            num_classes,
            steps,
        } => {
            let reco = match config {
                Some(path) => {
                    info!(path = %path.display(), "loading ReCo configuration");
                    ReCoConfig::from_file(&path)?
                }
                None => ReCoConfig::new(num_classes)
                    .with_num_queries(32)
                    .with_num_negatives(32)
                    .with_seed(Some(0)),
            };
            info!(backend = get_backend_name(), steps, "running synthetic ReCo demo");

            let report = run_demo::<TrainBackend>(&DemoConfig::new(reco).with_steps(steps), &device)?;
            for (step, losses) in report.steps.iter().enumerate() {
                println!(
                    "step {step}: loss {:.4} (sup {:.4}, unsup {:.4}, reco {:.4})",
                    losses.loss, losses.sup_loss, losses.unsup_loss, losses.reco_loss
                );
            }
            println!("teacher updates: {}", report.teacher_step);
            Ok(())
        }
    }
}
