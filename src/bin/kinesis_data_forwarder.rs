//! Lambda entry point behind the WebSocket route.
//!
//! Build with: cargo lambda build --release --features lambda --bin kinesis_data_forwarder

use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde_json::Value as JsonValue;
use speed_pipeline::aws::{load_env_sdk_config, KinesisService};
use speed_pipeline::handler::{forward, proxy_response, HandlerConfig};
use speed_pipeline::telemetry::init_lambda_tracing;
use std::sync::Arc;
use tracing::info;

struct Forwarder {
    kinesis: KinesisService,
    stream: String,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_lambda_tracing();
    info!("Lambda cold start - initializing");

    let config = HandlerConfig::from_env()?;
    let (sdk, _) = load_env_sdk_config().await;
    let forwarder = Arc::new(Forwarder {
        kinesis: KinesisService::from_client(aws_sdk_kinesis::Client::new(&sdk)),
        stream: config.stream_name,
    });

    run(service_fn(|event: LambdaEvent<JsonValue>| {
        let forwarder = forwarder.clone();
        async move { handler(event, &forwarder).await }
    }))
    .await
}

async fn handler(event: LambdaEvent<JsonValue>, forwarder: &Forwarder) -> Result<JsonValue, Error> {
    let body = event.payload.get("body").and_then(JsonValue::as_str);
    let result = forward(&forwarder.kinesis, &forwarder.stream, body).await;
    Ok(proxy_response(result))
}
