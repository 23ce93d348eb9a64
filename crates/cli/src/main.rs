// Crawlfleet CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Support text/json/yaml output formats for scripting.
// Design Decision: Fleet tuning comes from CRAWLFLEET_* environment variables
// (optionally via .env) so the CLI and embedding services share one source.

mod commands;
mod output;
mod process;
mod telemetry;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use crawlfleet_pool::FleetConfig;

#[derive(Parser)]
#[command(name = "crawlfleet")]
#[command(about = "Crawlfleet CLI - Size, run and inspect browser worker fleets")]
#[command(version)]
pub struct Cli {
    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json", "yaml"])]
    pub output: String,

    /// Suppress non-essential output
    #[arg(long, short)]
    pub quiet: bool,

    /// Container registry file
    #[arg(
        long,
        env = "CRAWLFLEET_REGISTRY_PATH",
        default_value = "crawlfleet-registry.json"
    )]
    pub registry_path: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show host resources and the safe worker capacity
    Capacity,

    /// Print the config signature of a worker config file
    Signature {
        /// JSON or YAML worker config
        file: PathBuf,
    },

    /// Inspect the container registry
    Registry {
        #[command(subcommand)]
        command: commands::registry::RegistryCommand,
    },

    /// Run a local fleet of browser processes until interrupted
    Run(commands::run::RunArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    telemetry::init(cli.quiet);
    let output_format = output::OutputFormat::from_str(&cli.output);

    match cli.command {
        Commands::Capacity => {
            let config = FleetConfig::from_env();
            commands::capacity::run(
                &config.failover.sizing,
                config.failover.auto_size_capacity,
                output_format,
            )
        }
        Commands::Signature { file } => commands::signature::run(&file, output_format),
        Commands::Registry { command } => {
            commands::registry::run(command, &cli.registry_path, output_format, cli.quiet)
        }
        Commands::Run(args) => commands::run::run(args, output_format, cli.quiet).await,
    }
}
