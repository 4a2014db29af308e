mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "cdcflow",
    version,
    about = "Compose and run change-data-capture pipelines"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline to completion
    Run {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
        /// Print the rows the values sink ended up with
        #[arg(long)]
        dump: bool,
    },
    /// Validate a pipeline and compose it without running
    Check {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
    },
    /// List built-in connectors and their options
    Connectors,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run { pipeline, dump } => commands::run::execute(&pipeline, dump).await,
        Commands::Check { pipeline } => commands::check::execute(&pipeline),
        Commands::Connectors => commands::connectors::execute(),
    }
}
