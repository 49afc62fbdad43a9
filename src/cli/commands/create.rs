use anyhow::{anyhow, Context, Result};
use tracing::info;

use super::context::{
    cluster_spec, etl_script_location, PipelineFunction, ProvisionContext, Services, ALARM,
    ETL_SCRIPT_KEY, GLUE_JOB, HTTP_API, HTTP_ROUTE_PATH, ID_QUERY_PARAMETER, LAMBDA_BUCKET,
    RAW_BUCKET, STREAM, TABLE, TRANSFORMED_BUCKET, WEBSOCKET_API, WEBSOCKET_ROUTE,
};
use super::helpers::{resolve_artifacts_dir, Target};
use crate::aws::{
    account_from_arn, execute_api_arn, lambda_invocation_uri, ApiProtocol, ClusterHandle,
    EndpointOptions, IamService, ProvisionedRole, ServiceRole,
};
use crate::cli::{CreateArgs, TargetArgs};
use crate::handler::{DEFAULT_METRICS_NAMESPACE, RECORDS_PROCESSED_METRIC};
use crate::segment::CREATE_TABLE_SQL;

/// Glue script uploaded next to the raw data
const ETL_SCRIPT: &str = include_str!("../../../templates/glue/raw_data_etl.py");

/// Identifiers produced by a provisioning run
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub function_arns: Vec<(PipelineFunction, String)>,
    pub websocket_api_id: String,
    pub http_api_id: String,
    pub stream_arn: String,
    pub cluster: ClusterHandle,
}

impl Provisioned {
    pub fn function_arn(&self, function: PipelineFunction) -> Option<&str> {
        self.function_arns
            .iter()
            .find(|(f, _)| *f == function)
            .map(|(_, arn)| arn.as_str())
    }
}

pub async fn execute_create(args: CreateArgs, target_args: &TargetArgs) -> Result<()> {
    let target = Target::resolve(target_args)?;
    let artifacts_dir = resolve_artifacts_dir(args.artifacts_dir, &target.config);
    let ctx = ProvisionContext::new(&target.region, artifacts_dir);

    eprintln!("==> Provisioning speed pipeline");
    eprintln!("    Target:    {}", target.describe());
    eprintln!("    Artifacts: {}", ctx.artifacts_dir.display());

    let base = target.sdk_config().await;

    eprintln!("\n==> Step 1: IAM roles");
    let roles = provision_roles(&IamService::from_conf(&base)).await?;
    let services = Services::assume_roles(&base, &target.endpoints, &roles).await?;

    let provisioned = provision(&services, &ctx).await?;

    eprintln!("\n==========================================");
    eprintln!("Provisioning complete!");
    eprintln!("==========================================\n");
    eprintln!("WebSocket API: {}", provisioned.websocket_api_id);
    eprintln!("HTTP API:      {}", provisioned.http_api_id);
    eprintln!("Stream:        {}", provisioned.stream_arn);
    eprintln!("Cluster:       {}", provisioned.cluster.cluster_arn);
    eprintln!();
    eprintln!("Check status:");
    eprintln!("  speed-pipeline status");

    Ok(())
}

/// Step 1: a role and policy for every service
pub async fn provision_roles(iam: &IamService) -> Result<Vec<ProvisionedRole>> {
    let mut roles = Vec::with_capacity(ServiceRole::ALL.len());
    for role in ServiceRole::ALL {
        let provisioned = iam
            .create_role_with_policy(role)
            .await
            .with_context(|| format!("failed to provision role {}", role.role_name()))?;
        eprintln!("    {} -> {}", provisioned.name, provisioned.arn);
        roles.push(provisioned);
    }
    Ok(roles)
}

/// Steps 2 to 11, in order. The first failure aborts the run.
pub async fn provision(services: &Services, ctx: &ProvisionContext) -> Result<Provisioned> {
    create_buckets(services).await?;
    create_etl_job(services).await?;
    let function_arns = create_functions(services, ctx).await?;

    let arn_of = |function: PipelineFunction| {
        function_arns
            .iter()
            .find(|(f, _)| *f == function)
            .map(|(_, arn)| arn.clone())
            .ok_or_else(|| anyhow!("function {} was not created", function.name()))
    };
    let forwarder_arn = arn_of(PipelineFunction::KinesisDataForwarder)?;
    let getter_arn = arn_of(PipelineFunction::DynamoGetter)?;
    let account = account_from_arn(&forwarder_arn)
        .ok_or_else(|| anyhow!("cannot read account id from {}", forwarder_arn))?
        .to_string();

    eprintln!("\n==> Step 5: APIs");
    let websocket_api_id = services
        .api_gateway
        .create_websocket_api(WEBSOCKET_API)
        .await
        .context("failed to create websocket api")?;
    let http_api_id = services
        .api_gateway
        .create_http_api(HTTP_API)
        .await
        .context("failed to create http api")?;
    eprintln!("    {} ({})", WEBSOCKET_API, websocket_api_id);
    eprintln!("    {} ({})", HTTP_API, http_api_id);

    eprintln!("\n==> Step 6: Routes");
    services
        .api_gateway
        .create_websocket(
            &websocket_api_id,
            &EndpointOptions {
                protocol: ApiProtocol::WebSocket,
                path: WEBSOCKET_ROUTE.to_string(),
                method: "POST".to_string(),
                uri: lambda_invocation_uri(&ctx.region, &forwarder_arn),
                request_parameters: Vec::new(),
            },
        )
        .await
        .context("failed to create websocket route")?;
    services
        .api_gateway
        .create_endpoint(
            &http_api_id,
            &EndpointOptions {
                protocol: ApiProtocol::Http,
                path: HTTP_ROUTE_PATH.to_string(),
                method: "GET".to_string(),
                uri: lambda_invocation_uri(&ctx.region, &getter_arn),
                request_parameters: vec![ID_QUERY_PARAMETER.to_string()],
            },
        )
        .await
        .context("failed to create http route")?;
    for (function, api_id) in [
        (PipelineFunction::KinesisDataForwarder, &websocket_api_id),
        (PipelineFunction::DynamoGetter, &http_api_id),
    ] {
        services
            .lambda
            .allow_api_gateway(
                function.name(),
                &execute_api_arn(&ctx.region, &account, api_id),
            )
            .await
            .with_context(|| format!("failed to grant invoke on {}", function.name()))?;
    }
    eprintln!("    {} -> {}", WEBSOCKET_ROUTE, PipelineFunction::KinesisDataForwarder.name());
    eprintln!("    GET {} -> {}", HTTP_ROUTE_PATH, PipelineFunction::DynamoGetter.name());

    eprintln!("\n==> Step 7: Deploy");
    services
        .api_gateway
        .deploy(&websocket_api_id)
        .await
        .context("failed to deploy websocket api")?;
    services
        .api_gateway
        .deploy(&http_api_id)
        .await
        .context("failed to deploy http api")?;
    info!(websocket = %websocket_api_id, http = %http_api_id, "deployed apis");
    eprintln!("    Deployed websocket API with ID: {}", websocket_api_id);
    eprintln!("    Deployed http API with ID: {}", http_api_id);

    let stream_arn = create_stream(services).await?;
    create_table(services).await?;

    eprintln!("\n==> Step 10: Alarm");
    services
        .cloudwatch
        .put_metric_alarm(ALARM, RECORDS_PROCESSED_METRIC, DEFAULT_METRICS_NAMESPACE)
        .await
        .context("failed to create alarm")?;
    eprintln!("    {} on {}", ALARM, RECORDS_PROCESSED_METRIC);

    let cluster = create_cluster(services).await?;

    Ok(Provisioned {
        function_arns,
        websocket_api_id,
        http_api_id,
        stream_arn,
        cluster,
    })
}

async fn create_buckets(services: &Services) -> Result<()> {
    eprintln!("\n==> Step 2: Buckets");
    for bucket in [LAMBDA_BUCKET, RAW_BUCKET] {
        create_bucket(services, bucket).await?;
    }

    services
        .s3
        .put_object(RAW_BUCKET, ETL_SCRIPT_KEY, ETL_SCRIPT.as_bytes().to_vec())
        .await
        .context("failed to upload etl script")?;
    eprintln!("    Uploaded {}", etl_script_location());

    create_bucket(services, TRANSFORMED_BUCKET).await
}

async fn create_bucket(services: &Services, bucket: &str) -> Result<()> {
    let created = services
        .s3
        .create_bucket(bucket)
        .await
        .with_context(|| format!("failed to create bucket {}", bucket))?;
    eprintln!(
        "    {}: {}",
        bucket,
        if created { "created" } else { "already exists" }
    );
    Ok(())
}

async fn create_etl_job(services: &Services) -> Result<()> {
    eprintln!("\n==> Step 3: Glue job");
    let created = services
        .glue
        .create_job(GLUE_JOB, &etl_script_location())
        .await
        .context("failed to create glue job")?;
    eprintln!(
        "    {}: {}",
        GLUE_JOB,
        if created { "created" } else { "already exists" }
    );
    Ok(())
}

async fn create_functions(
    services: &Services,
    ctx: &ProvisionContext,
) -> Result<Vec<(PipelineFunction, String)>> {
    eprintln!("\n==> Step 4: Functions");
    let mut arns = Vec::with_capacity(PipelineFunction::ALL.len());
    for function in PipelineFunction::ALL {
        let path = ctx.artifact_path(function);
        let zip = std::fs::read(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        services
            .s3
            .put_object(LAMBDA_BUCKET, function.zip(), zip)
            .await
            .with_context(|| format!("failed to upload {}", function.zip()))?;

        let arn = services
            .lambda
            .create_function(function.name(), LAMBDA_BUCKET, function.zip())
            .await
            .with_context(|| format!("failed to create function {}", function.name()))?;
        services.lambda.wait_active(function.name()).await?;
        eprintln!("    {} ({})", function.name(), arn);
        arns.push((function, arn));
    }
    Ok(arns)
}

async fn create_stream(services: &Services) -> Result<String> {
    eprintln!("\n==> Step 8: Stream");
    services
        .kinesis
        .create(STREAM)
        .await
        .with_context(|| format!("failed to create stream {}", STREAM))?;
    services.kinesis.wait_active(STREAM).await?;
    let stream_arn = services.kinesis.get_arn(STREAM).await?;
    eprintln!("    {} ({})", STREAM, stream_arn);

    let preprocessing = PipelineFunction::Preprocessing.name();
    let bound = services
        .lambda
        .bind_to_service(preprocessing, &stream_arn)
        .await
        .with_context(|| format!("failed to bind {} to {}", preprocessing, STREAM))?;
    eprintln!(
        "    {} bound to stream{}",
        preprocessing,
        if bound { "" } else { " (existing mapping)" }
    );
    Ok(stream_arn)
}

async fn create_table(services: &Services) -> Result<()> {
    eprintln!("\n==> Step 9: DynamoDB table");
    let created = services
        .dynamo
        .create_table(TABLE)
        .await
        .with_context(|| format!("failed to create table {}", TABLE))?;
    services.dynamo.wait_active(TABLE).await?;
    eprintln!(
        "    {}: {}",
        TABLE,
        if created { "created" } else { "already exists" }
    );
    Ok(())
}

async fn create_cluster(services: &Services) -> Result<ClusterHandle> {
    eprintln!("\n==> Step 11: Aurora cluster");
    let spec = cluster_spec();
    let cluster = services
        .aurora
        .create_db_cluster(&spec)
        .await
        .with_context(|| format!("failed to create cluster {}", spec.identifier))?;
    eprintln!("    Waiting for {} to be available...", spec.identifier);
    services.aurora.wait_until_available(&spec.identifier).await?;

    services
        .aurora
        .execute_statement(&cluster, CREATE_TABLE_SQL)
        .await
        .context("failed to create street_segment_speeds table")?;
    eprintln!("    {} available, table created", spec.identifier);
    Ok(cluster)
}
