//! Holo command-line interface.
//!
//! Drive an SLM hologram job from a TOML configuration file:
//! ```sh
//! holo-cli compose job.toml -o hologram.png
//! holo-cli mesh job.toml --save surface.json
//! holo-cli optimise job.toml < routes.txt
//! holo-cli validate job.toml
//! ```

mod config;
mod runner;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "holo-cli")]
#[command(about = "Holo: SLM phase patterns and zone-based wavefront optimisation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compose all active elements into an 8-bit hologram.
    Compose {
        /// Path to the job configuration file.
        config: PathBuf,
        /// Output PNG (default: <output dir>/hologram.png).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Mesh the SLM surface and export the zone map.
    Mesh {
        /// Path to the job configuration file.
        config: PathBuf,
        /// Also save the engine's mesh file here.
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Run the wavefront optimiser, reading control routes from stdin.
    #[command(alias = "optimize")]
    Optimise {
        /// Path to the job configuration file.
        config: PathBuf,
    },
    /// Validate a configuration file without running anything.
    Validate {
        /// Path to the job configuration file.
        config: PathBuf,
    },
    /// Serve the meshing protocol on stdin/stdout.
    #[command(hide = true)]
    MeshWorker,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Compose { config, output } => {
            let job = config::load_config(&config)?;
            println!("Configuration: {}", config.display());
            let path = output.unwrap_or_else(|| job.output.directory.join("hologram.png"));
            runner::run_compose(&job, &path)
        }
        Commands::Mesh { config, save } => {
            let job = config::load_config(&config)?;
            println!("Configuration: {}", config.display());
            runner::run_mesh(&job, save.as_deref())
        }
        Commands::Optimise { config } => {
            let job = config::load_config(&config)?;
            println!("Configuration: {}", config.display());
            let stdin = std::io::stdin();
            runner::run_optimiser(&job, stdin.lock(), std::io::stdout())
        }
        Commands::Validate { config } => {
            let _job = config::load_config(&config)?;
            println!("Configuration is valid: {}", config.display());
            Ok(())
        }
        // stdout carries the protocol; everything else goes to stderr.
        Commands::MeshWorker => runner::serve_mesh_worker(),
    }
}
