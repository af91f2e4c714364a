mod batch;
mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "infraproc")]
#[command(about = "Run infrastructure orchestration batches", long_about = None)]
struct Cli {
    /// Log protocol steps at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a batch file against the in-memory backends
    Run {
        /// Batch file (YAML)
        file: PathBuf,
        /// Run the commands of each batch in parallel
        #[arg(short, long)]
        parallel: bool,
        /// Processor config file (default: discovered)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Persist started nodes under this directory
        #[arg(long)]
        state_dir: Option<PathBuf>,
        /// Drop every created node and infrastructure afterwards
        #[arg(long)]
        teardown: bool,
    },
    /// Check a batch file without running it
    Validate {
        /// Batch file (YAML)
        file: PathBuf,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command results
    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            file,
            parallel,
            config,
            state_dir,
            teardown,
        } => {
            commands::run::handle(commands::run::RunOptions {
                file,
                parallel,
                config,
                state_dir,
                teardown,
            })
            .await?;
        }
        Commands::Validate { file } => {
            commands::validate::handle(&file)?;
        }
        Commands::Version => {
            println!("infraproc {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
