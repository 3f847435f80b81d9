//! AVALANCHE CLI
//!
//! Runs, validates and inspects task-graph jobs described by a JSON file.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing_subscriber::EnvFilter;

use crate::commands::{GraphFormat, RunArgs};

#[derive(Parser)]
#[command(name = "avalanche")]
#[command(about = "AVALANCHE - multi-event task-graph scheduler", long_about = None)]
struct Cli {
    /// Log filter such as `debug` or `avalanche_runtime=trace`; falls back to RUST_LOG, then `info`
    #[arg(long, global = true)]
    log_level: Option<String>,
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a job
    Run(RunArgs),
    /// Validate a job and report every configuration error
    Check {
        /// Path to job file
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Print the precedence graph of a job
    Graph {
        /// Path to job file
        #[arg(short, long)]
        file: PathBuf,
        /// Output format
        #[arg(long, value_enum, default_value_t = GraphFormat::Text)]
        format: GraphFormat,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_tracing(level: Option<&str>, json: bool) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_thread_names(true);
    let installed = if json { builder.json().try_init() } else { builder.try_init() };
    installed.map_err(|e| color_eyre::eyre::eyre!("cannot install log subscriber: {}", e))
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref(), cli.log_json)?;

    let code = match cli.command {
        Commands::Run(args) => commands::run(args).await?,
        Commands::Check { file } => commands::check(&file)?,
        Commands::Graph { file, format, output } => commands::graph(&file, format, output.as_deref())?,
    };
    std::process::exit(code);
}
