use anyhow::{anyhow, Result};
use aws_config::SdkConfig;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::aws::{
    assume_role, s3_client, ApiGatewayService, AuroraService, CloudWatchService, ClusterSpec,
    DynamoService, Endpoints, GlueService, KinesisService, LambdaService, ProvisionedRole,
    S3Service, ServiceRole,
};
use crate::handler::{HandlerConfig, DEFAULT_RAW_BUCKET, DEFAULT_STREAM, DEFAULT_TABLE};

pub const LAMBDA_BUCKET: &str = "lambda-bucket";
pub const RAW_BUCKET: &str = DEFAULT_RAW_BUCKET;
pub const TRANSFORMED_BUCKET: &str = "transformed-data";
pub const BUCKETS: [&str; 3] = [LAMBDA_BUCKET, RAW_BUCKET, TRANSFORMED_BUCKET];

pub const ETL_SCRIPT_KEY: &str = "scripts/raw_data_etl.py";
pub const GLUE_JOB: &str = "raw-data-etl";

pub const WEBSOCKET_API: &str = "my-kinesis-api";
pub const HTTP_API: &str = "dynamo-getter";
pub const WEBSOCKET_ROUTE: &str = "kinesis-data-forwarder";
pub const HTTP_ROUTE_PATH: &str = "/dynamo-getter";
pub const ID_QUERY_PARAMETER: &str = "route.request.querystring.id";

pub const STREAM: &str = DEFAULT_STREAM;
pub const TABLE: &str = DEFAULT_TABLE;
pub const ALARM: &str = "no-records-processed";

pub const CLUSTER_ID: &str = "db1";
pub const DATABASE: &str = "test";
pub const DB_USER: &str = "dbpass";
pub const DB_PASSWORD: &str = "test";

pub const DEFAULT_ARTIFACTS_DIR: &str = "artifacts";

pub fn etl_script_location() -> String {
    format!("s3://{}/{}", RAW_BUCKET, ETL_SCRIPT_KEY)
}

pub fn cluster_spec() -> ClusterSpec {
    ClusterSpec {
        identifier: CLUSTER_ID.to_string(),
        database: DATABASE.to_string(),
        username: DB_USER.to_string(),
        password: DB_PASSWORD.to_string(),
    }
}

/// The three handler functions, in creation order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineFunction {
    Preprocessing,
    KinesisDataForwarder,
    DynamoGetter,
}

impl PipelineFunction {
    pub const ALL: [PipelineFunction; 3] = [
        PipelineFunction::Preprocessing,
        PipelineFunction::KinesisDataForwarder,
        PipelineFunction::DynamoGetter,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PipelineFunction::Preprocessing => "Preprocessing",
            PipelineFunction::KinesisDataForwarder => "KinesisDataForwarder",
            PipelineFunction::DynamoGetter => "DynamoGetter",
        }
    }

    /// Zip name in the artifacts directory and object key in the lambda bucket
    pub fn zip(&self) -> &'static str {
        match self {
            PipelineFunction::Preprocessing => "preprocessing.zip",
            PipelineFunction::KinesisDataForwarder => "kinesis_data_forwarder.zip",
            PipelineFunction::DynamoGetter => "dynamo_getter.zip",
        }
    }
}

/// Settings shared by every provisioning step
#[derive(Debug, Clone)]
pub struct ProvisionContext {
    pub region: String,
    pub artifacts_dir: PathBuf,
}

impl ProvisionContext {
    pub fn new(region: impl Into<String>, artifacts_dir: impl Into<PathBuf>) -> Self {
        Self {
            region: region.into(),
            artifacts_dir: artifacts_dir.into(),
        }
    }

    pub fn artifact_path(&self, function: PipelineFunction) -> PathBuf {
        self.artifacts_dir.join(function.zip())
    }
}

/// One adapter per service the pipeline touches
#[derive(Clone)]
pub struct Services {
    pub s3: S3Service,
    pub kinesis: KinesisService,
    pub lambda: LambdaService,
    pub dynamo: DynamoService,
    pub glue: GlueService,
    pub aurora: AuroraService,
    pub cloudwatch: CloudWatchService,
    pub api_gateway: ApiGatewayService,
}

impl Services {
    /// Adapters acting with the caller's own credentials. Enough for
    /// everything except creating functions and jobs, which need role ARNs.
    pub fn from_conf(config: &SdkConfig, endpoints: &Endpoints) -> Self {
        Self::build(|_| config, endpoints, String::new(), String::new())
    }

    /// Assume every provisioned role and build each adapter with its
    /// service's credentials.
    pub async fn assume_roles(
        base: &SdkConfig,
        endpoints: &Endpoints,
        roles: &[ProvisionedRole],
    ) -> Result<Self> {
        let mut configs = HashMap::new();
        for role in roles {
            let session = format!("speed-pipeline-{}", role.role.service());
            configs.insert(role.role, assume_role(base, &role.arn, &session).await);
        }

        let arn_of = |wanted: ServiceRole| {
            roles
                .iter()
                .find(|r| r.role == wanted)
                .map(|r| r.arn.clone())
                .ok_or_else(|| anyhow!("role {} was not provisioned", wanted.role_name()))
        };
        let lambda_role = arn_of(ServiceRole::Lambda)?;
        let glue_role = arn_of(ServiceRole::Glue)?;

        Ok(Self::build(
            |role| configs.get(&role).unwrap_or(base),
            endpoints,
            lambda_role,
            glue_role,
        ))
    }

    fn build<'a>(
        config_for: impl Fn(ServiceRole) -> &'a SdkConfig,
        endpoints: &Endpoints,
        lambda_role: String,
        glue_role: String,
    ) -> Self {
        let rds = config_for(ServiceRole::Rds);
        Self {
            s3: S3Service::from_client(s3_client(config_for(ServiceRole::S3), endpoints)),
            kinesis: KinesisService::from_client(aws_sdk_kinesis::Client::new(config_for(
                ServiceRole::Kinesis,
            ))),
            lambda: LambdaService::from_client(
                aws_sdk_lambda::Client::new(config_for(ServiceRole::Lambda)),
                lambda_role,
            )
            .with_environment(HandlerConfig::default().to_env()),
            dynamo: DynamoService::from_client(aws_sdk_dynamodb::Client::new(config_for(
                ServiceRole::DynamoDb,
            ))),
            glue: GlueService::from_client(
                aws_sdk_glue::Client::new(config_for(ServiceRole::Glue)),
                glue_role,
            ),
            aurora: AuroraService::from_clients(
                aws_sdk_rds::Client::new(rds),
                aws_sdk_rdsdata::Client::new(rds),
                aws_sdk_secretsmanager::Client::new(rds),
            ),
            cloudwatch: CloudWatchService::from_client(aws_sdk_cloudwatch::Client::new(
                config_for(ServiceRole::CloudWatch),
            )),
            api_gateway: ApiGatewayService::from_client(aws_sdk_apigatewayv2::Client::new(
                config_for(ServiceRole::ApiGateway),
            )),
        }
    }
}
