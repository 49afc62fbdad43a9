use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Tracing for the operator CLI. Uses RUST_LOG for filtering (defaults to info)
/// and writes to stderr so command output stays on stdout.
pub fn init_cli_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}

/// JSON tracing for the Lambda handlers; CloudWatch adds the timestamps.
pub fn init_lambda_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .json()
        .with_target(false)
        .without_time()
        .init();
}
