//! SDK-backed adapters, one per AWS service.
//!
//! Every adapter is split in two: an `*Api` trait with one method per SDK
//! call (implemented for the SDK client), and a `*Service` wrapper that owns
//! the fixed configuration literals and talks to the trait object. Tests swap
//! the trait object for a recording mock.

mod api_gateway;
mod aurora;
mod cloudwatch;
mod dynamodb;
mod glue;
mod iam;
mod kinesis;
mod lambda;
mod s3;

pub use api_gateway::{
    execute_api_arn, lambda_invocation_uri, ApiGatewayApi, ApiGatewayService, ApiProtocol,
    EndpointOptions, IntegrationSpec, RouteSpec, DEFAULT_STAGE,
};
pub use aurora::{
    AuroraApi, AuroraService, ClusterHandle, ClusterInfo, ClusterSpec, AVAILABLE_STATUS,
    CLUSTER_ENGINE,
};
pub use cloudwatch::{AlarmSpec, CloudWatchApi, CloudWatchService};
pub use dynamodb::{DynamoApi, DynamoService, Item, REPLICA_REGIONS, TABLE_KEY};
pub use glue::{GlueApi, GlueService, JobSpec};
pub use iam::{
    assume_role, policy_document, trust_policy, IamApi, IamService, ProvisionedRole, RoleInfo,
    ServiceRole,
};
pub use kinesis::{KinesisApi, KinesisService, StreamInfo, SHARD_COUNT};
pub use lambda::{FunctionSpec, FunctionState, LambdaApi, LambdaService, MappingSpec};
pub use s3::{S3Api, S3Service};

use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_s3::error::ProvideErrorMetadata;
use std::time::Duration;

pub const DEFAULT_REGION: &str = "us-east-1";

/// LocalStack edge endpoint shared by every service except S3
pub const LOCALSTACK_URL: &str = "http://localhost:4566";
/// LocalStack S3 endpoint (virtual-host capable)
pub const LOCALSTACK_S3_URL: &str = "http://s3.localhost.localstack.cloud:4566";

/// Endpoint overrides; both `None` means real AWS endpoints
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoints {
    pub default: Option<String>,
    pub s3: Option<String>,
}

impl Endpoints {
    pub fn localstack() -> Self {
        Self {
            default: Some(LOCALSTACK_URL.to_string()),
            s3: Some(LOCALSTACK_S3_URL.to_string()),
        }
    }

    /// Endpoints as seen from inside a LocalStack-hosted Lambda
    pub fn for_localstack_host(host: &str) -> Self {
        let url = format!("http://{}:4566", host);
        Self {
            default: Some(url.clone()),
            s3: Some(url),
        }
    }

    /// Read `LOCALSTACK_HOSTNAME`, set by LocalStack for Lambda containers.
    pub fn from_env() -> Self {
        match std::env::var("LOCALSTACK_HOSTNAME") {
            Ok(host) if !host.is_empty() => Self::for_localstack_host(&host),
            _ => Self::default(),
        }
    }

    /// S3 endpoint, falling back to the shared override
    pub fn s3_endpoint(&self) -> Option<&str> {
        self.s3.as_deref().or(self.default.as_deref())
    }
}

/// Load shared SDK config for a region, with an optional endpoint override.
pub async fn load_sdk_config(region: &str, endpoints: &Endpoints) -> SdkConfig {
    let mut loader =
        aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_string()));
    if let Some(url) = endpoints.default.as_deref() {
        loader = loader.endpoint_url(url);
    }
    loader.load().await
}

/// Config for code running inside a function: region from `AWS_REGION`,
/// endpoints from `LOCALSTACK_HOSTNAME`.
pub async fn load_env_sdk_config() -> (SdkConfig, Endpoints) {
    let region = std::env::var("AWS_REGION")
        .ok()
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| DEFAULT_REGION.to_string());
    let endpoints = Endpoints::from_env();
    (load_sdk_config(&region, &endpoints).await, endpoints)
}

/// Build an S3 client; overridden endpoints use path-style addressing.
pub fn s3_client(config: &SdkConfig, endpoints: &Endpoints) -> aws_sdk_s3::Client {
    let mut builder = aws_sdk_s3::config::Builder::from(config);
    if let Some(url) = endpoints.s3_endpoint() {
        builder = builder.endpoint_url(url).force_path_style(true);
    }
    aws_sdk_s3::Client::from_conf(builder.build())
}

/// True when the SDK error carries one of the given error codes.
pub(crate) fn has_code<E: ProvideErrorMetadata>(err: &E, codes: &[&str]) -> bool {
    err.code().is_some_and(|code| codes.contains(&code))
}

/// Account id segment of an ARN (`arn:partition:service:region:account:...`)
pub fn account_from_arn(arn: &str) -> Option<&str> {
    arn.split(':').nth(4).filter(|s| !s.is_empty())
}

/// Fixed-interval polling settings used by the readiness waits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollConfig {
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}
