//! Lambda entry point for the stream consumer.
//!
//! Build with: cargo lambda build --release --features lambda --bin preprocessing

use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use speed_pipeline::aws::{
    load_env_sdk_config, s3_client, CloudWatchService, DynamoService, S3Service,
};
use speed_pipeline::handler::{HandlerConfig, KinesisEvent, PreprocessSummary, Preprocessor};
use speed_pipeline::telemetry::init_lambda_tracing;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_lambda_tracing();
    info!("Lambda cold start - initializing");

    let config = HandlerConfig::from_env()?;
    let (sdk, endpoints) = load_env_sdk_config().await;

    let preprocessor = Arc::new(Preprocessor::new(
        DynamoService::from_client(aws_sdk_dynamodb::Client::new(&sdk)),
        S3Service::from_client(s3_client(&sdk, &endpoints)),
        CloudWatchService::from_client(aws_sdk_cloudwatch::Client::new(&sdk)),
        config,
    ));

    run(service_fn(|event: LambdaEvent<KinesisEvent>| {
        let preprocessor = preprocessor.clone();
        async move { handler(event, &preprocessor).await }
    }))
    .await
}

async fn handler(
    event: LambdaEvent<KinesisEvent>,
    preprocessor: &Preprocessor,
) -> Result<PreprocessSummary, Error> {
    Ok(preprocessor.handle(&event.payload).await?)
}
