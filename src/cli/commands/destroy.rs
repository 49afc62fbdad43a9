use anyhow::{Context, Result};
use std::io::{self, Write};

use super::context::{
    PipelineFunction, Services, BUCKETS, HTTP_API, STREAM, TABLE, WEBSOCKET_API,
};
use super::helpers::Target;
use crate::cli::{DestroyArgs, TargetArgs};

pub async fn execute_destroy(args: DestroyArgs, target_args: &TargetArgs) -> Result<()> {
    let target = Target::resolve(target_args)?;

    eprintln!("==> Speed Pipeline Deletion");
    eprintln!("    Target: {}", target.describe());
    eprintln!();

    if !args.force {
        eprintln!("WARNING: This will delete:");
        eprintln!("  - APIs {} and {}", WEBSOCKET_API, HTTP_API);
        for function in PipelineFunction::ALL {
            eprintln!("  - Function {}", function.name());
        }
        eprintln!("  - Stream {}", STREAM);
        eprintln!("  - Table {} and all items", TABLE);
        eprintln!("  - Buckets {} and all objects", BUCKETS.join(", "));
        eprintln!();
        eprint!("Are you sure? [y/N] ");
        io::stderr().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            eprintln!("Aborted.");
            return Ok(());
        }
    }

    let services = Services::from_conf(&target.sdk_config().await, &target.endpoints);
    for (resource, deleted) in teardown(&services).await? {
        eprintln!(
            "    {}: {}",
            resource,
            if deleted { "deleted" } else { "not found, skipped" }
        );
    }
    eprintln!();
    eprintln!("Pipeline deleted.");
    Ok(())
}

/// Delete every resource `create` leaves behind except roles and the
/// cluster. Returns each resource with whether it existed.
pub async fn teardown(services: &Services) -> Result<Vec<(String, bool)>> {
    let mut results = Vec::new();

    for api in [WEBSOCKET_API, HTTP_API] {
        let deleted = match services.api_gateway.find_by_name(api).await? {
            Some(id) => services
                .api_gateway
                .delete(&id)
                .await
                .with_context(|| format!("failed to delete api {}", api))?,
            None => false,
        };
        results.push((format!("api {}", api), deleted));
    }

    for function in PipelineFunction::ALL {
        let deleted = services
            .lambda
            .delete(function.name())
            .await
            .with_context(|| format!("failed to delete function {}", function.name()))?;
        results.push((format!("function {}", function.name()), deleted));
    }

    let deleted = services
        .kinesis
        .delete(STREAM)
        .await
        .with_context(|| format!("failed to delete stream {}", STREAM))?;
    results.push((format!("stream {}", STREAM), deleted));

    let deleted = services
        .dynamo
        .delete_table(TABLE)
        .await
        .with_context(|| format!("failed to delete table {}", TABLE))?;
    results.push((format!("table {}", TABLE), deleted));

    for bucket in BUCKETS {
        let deleted = services
            .s3
            .remove_bucket(bucket)
            .await
            .with_context(|| format!("failed to delete bucket {}", bucket))?;
        results.push((format!("bucket {}", bucket), deleted));
    }

    Ok(results)
}
