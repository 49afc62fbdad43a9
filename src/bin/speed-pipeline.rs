use clap::Parser;
use speed_pipeline::cli::{commands, Cli, Commands};
use speed_pipeline::telemetry::init_cli_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_cli_tracing();

    let target = cli.target;
    match cli.command {
        Commands::Init(args) => commands::execute_init(args, &target)?,
        Commands::Plan(args) => commands::execute_plan(args, &target)?,
        Commands::Create(args) => commands::execute_create(args, &target).await?,
        Commands::Status(args) => commands::execute_status(args, &target).await?,
        Commands::Destroy(args) => commands::execute_destroy(args, &target).await?,
        Commands::Etl(args) => commands::execute_etl(args, &target).await?,
        Commands::Simulate(args) => commands::execute_simulate(args, &target).await?,
        Commands::SendTest(args) => commands::execute_send_test(args).await?,
    }

    Ok(())
}
