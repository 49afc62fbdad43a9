pub mod commands;
pub mod config;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "speed-pipeline")]
#[command(about = "Provision and exercise the street segment speed pipeline on AWS")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub target: TargetArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Where the SDK calls go. Overrides `.speed-pipeline.toml`.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// AWS region
    #[arg(long, global = true, env = "AWS_REGION")]
    pub region: Option<String>,

    /// Use LocalStack endpoints on localhost:4566
    #[arg(long, global = true, conflicts_with = "endpoint_url")]
    pub localstack: bool,

    /// Custom endpoint for every service
    #[arg(long, global = true)]
    pub endpoint_url: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write .speed-pipeline.toml
    Init(InitArgs),
    /// Dry-run: show what would be created
    Plan(PlanArgs),
    /// Provision the pipeline
    Create(CreateArgs),
    /// Show which pipeline resources exist
    Status(StatusArgs),
    /// Delete the pipeline resources
    Destroy(DestroyArgs),
    /// Run the raw data ETL job
    Etl(EtlArgs),
    /// Simulate drivers producing segment speeds
    Simulate(SimulateArgs),
    /// Send a sample record through the WebSocket API
    SendTest(SendTestArgs),
}

#[derive(clap::Args)]
pub struct InitArgs {
    /// Environment name
    #[arg(long)]
    pub env: String,

    /// Directory holding the Lambda zip artifacts
    #[arg(long)]
    pub artifacts_dir: Option<String>,

    /// Overwrite an existing config
    #[arg(long)]
    pub force: bool,
}

#[derive(clap::Args)]
pub struct PlanArgs {}

#[derive(clap::Args)]
pub struct CreateArgs {
    /// Directory holding preprocessing.zip, kinesis_data_forwarder.zip and dynamo_getter.zip
    #[arg(long)]
    pub artifacts_dir: Option<PathBuf>,
}

#[derive(clap::Args)]
pub struct StatusArgs {}

#[derive(clap::Args)]
pub struct DestroyArgs {
    /// Skip confirmation prompt
    #[arg(long)]
    pub force: bool,
}

#[derive(clap::Args)]
pub struct EtlArgs {
    /// Start the run and return without waiting for it to finish
    #[arg(long)]
    pub no_wait: bool,
}

#[derive(clap::Args)]
pub struct SimulateArgs {
    /// Seconds between speed updates
    #[arg(long, default_value = "5")]
    pub interval: f64,

    /// Put every update on the Kinesis stream
    #[arg(long)]
    pub publish: bool,

    /// Stop after this many ticks (runs until interrupted if unset)
    #[arg(long)]
    pub count: Option<u64>,
}

#[derive(clap::Args)]
pub struct SendTestArgs {
    /// WebSocket URL of the deployed API, e.g. wss://<id>.execute-api.<region>.amazonaws.com/dev
    #[arg(long)]
    pub url: String,
}
