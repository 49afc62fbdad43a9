use anyhow::Result;
use std::fmt::Write;

use super::context::{
    etl_script_location, PipelineFunction, ProvisionContext, ALARM, CLUSTER_ID, DATABASE,
    DB_USER, GLUE_JOB, HTTP_API, HTTP_ROUTE_PATH, LAMBDA_BUCKET, RAW_BUCKET, STREAM, TABLE,
    TRANSFORMED_BUCKET, WEBSOCKET_API, WEBSOCKET_ROUTE,
};
use super::helpers::{resolve_artifacts_dir, Target};
use crate::aws::{ServiceRole, DEFAULT_STAGE};
use crate::cli::{PlanArgs, TargetArgs};
use crate::handler::{DEFAULT_METRICS_NAMESPACE, RECORDS_PROCESSED_METRIC};

pub fn execute_plan(_args: PlanArgs, target_args: &TargetArgs) -> Result<()> {
    let target = Target::resolve(target_args)?;
    let artifacts_dir = resolve_artifacts_dir(None, &target.config);
    let ctx = ProvisionContext::new(&target.region, artifacts_dir);

    eprintln!("==> Provisioning Plan (Dry Run)\n");
    eprintln!("Target:    {}", target.describe());
    eprintln!("Artifacts: {}", ctx.artifacts_dir.display());
    eprintln!();
    eprint!("{}", render_plan(&ctx));
    eprintln!("==> To provision, run:");
    eprintln!("  speed-pipeline create");

    Ok(())
}

/// Every resource `create` makes, grouped by step
pub fn render_plan(ctx: &ProvisionContext) -> String {
    let mut out = String::new();
    // writing into a String cannot fail
    let _ = write_plan(&mut out, ctx);
    out
}

fn write_plan(out: &mut String, ctx: &ProvisionContext) -> std::fmt::Result {
    writeln!(out, "Step 1: IAM roles")?;
    for role in ServiceRole::ALL {
        writeln!(out, "  - Role: {} (policy {})", role.role_name(), role.policy_name())?;
    }
    writeln!(out)?;

    writeln!(out, "Step 2: Buckets")?;
    writeln!(out, "  - Bucket: {}", LAMBDA_BUCKET)?;
    writeln!(out, "  - Bucket: {}", RAW_BUCKET)?;
    writeln!(out, "  - Object: {}", etl_script_location())?;
    writeln!(out, "  - Bucket: {}", TRANSFORMED_BUCKET)?;
    writeln!(out)?;

    writeln!(out, "Step 3: Glue job")?;
    writeln!(out, "  - Job: {} ({})", GLUE_JOB, etl_script_location())?;
    writeln!(out)?;

    writeln!(out, "Step 4: Functions")?;
    for function in PipelineFunction::ALL {
        writeln!(
            out,
            "  - Function: {} from {}",
            function.name(),
            ctx.artifact_path(function).display()
        )?;
    }
    writeln!(out)?;

    writeln!(out, "Step 5: APIs")?;
    writeln!(out, "  - WebSocket API: {}", WEBSOCKET_API)?;
    writeln!(out, "  - HTTP API: {}", HTTP_API)?;
    writeln!(out)?;

    writeln!(out, "Step 6: Routes")?;
    writeln!(
        out,
        "  - {} -> {}",
        WEBSOCKET_ROUTE,
        PipelineFunction::KinesisDataForwarder.name()
    )?;
    writeln!(
        out,
        "  - GET {} (id required) -> {}",
        HTTP_ROUTE_PATH,
        PipelineFunction::DynamoGetter.name()
    )?;
    writeln!(out)?;

    writeln!(out, "Step 7: Deployments")?;
    writeln!(out, "  - Stage '{}' on both APIs", DEFAULT_STAGE)?;
    writeln!(out)?;

    writeln!(out, "Step 8: Stream")?;
    writeln!(out, "  - Stream: {} (1 shard)", STREAM)?;
    writeln!(
        out,
        "  - Event source mapping: {} -> {}",
        STREAM,
        PipelineFunction::Preprocessing.name()
    )?;
    writeln!(out)?;

    writeln!(out, "Step 9: DynamoDB")?;
    writeln!(out, "  - Table: {}", TABLE)?;
    writeln!(out)?;

    writeln!(out, "Step 10: Alarm")?;
    writeln!(
        out,
        "  - Alarm: {} on {}/{}",
        ALARM, DEFAULT_METRICS_NAMESPACE, RECORDS_PROCESSED_METRIC
    )?;
    writeln!(out)?;

    writeln!(out, "Step 11: Aurora")?;
    writeln!(
        out,
        "  - Cluster: {} (database {}, user {})",
        CLUSTER_ID, DATABASE, DB_USER
    )?;
    writeln!(out, "  - Table: {}", TABLE)?;
    writeln!(out)?;

    Ok(())
}
