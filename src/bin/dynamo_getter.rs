//! Lambda entry point behind `GET /dynamo-getter?id=...`.
//!
//! Build with: cargo lambda build --release --features lambda --bin dynamo_getter

use lambda_http::{run, service_fn, Body, Error, Request, RequestExt, Response};
use speed_pipeline::aws::{load_env_sdk_config, DynamoService};
use speed_pipeline::handler::{get_segment, response_parts, HandlerConfig};
use speed_pipeline::telemetry::init_lambda_tracing;
use std::sync::Arc;
use tracing::info;

struct Getter {
    dynamo: DynamoService,
    table: String,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_lambda_tracing();
    info!("Lambda cold start - initializing");

    let config = HandlerConfig::from_env()?;
    let (sdk, _) = load_env_sdk_config().await;
    let getter = Arc::new(Getter {
        dynamo: DynamoService::from_client(aws_sdk_dynamodb::Client::new(&sdk)),
        table: config.table_name,
    });

    run(service_fn(|event: Request| {
        let getter = getter.clone();
        async move { handler(event, &getter).await }
    }))
    .await
}

async fn handler(event: Request, getter: &Getter) -> Result<Response<Body>, Error> {
    let params = event.query_string_parameters();
    let result = get_segment(&getter.dynamo, &getter.table, params.first("id")).await;
    let (status, body) = response_parts(result);

    Ok(Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))?)
}
