use anyhow::{bail, Result};
use std::path::Path;

use crate::aws::{LOCALSTACK_S3_URL, LOCALSTACK_URL};
use crate::cli::config::{Config, CONFIG_FILENAME};
use crate::cli::{InitArgs, TargetArgs};

pub fn execute_init(args: InitArgs, target: &TargetArgs) -> Result<()> {
    if Path::new(CONFIG_FILENAME).exists() && !args.force {
        bail!(
            "{} already exists. Use --force to overwrite.",
            CONFIG_FILENAME
        );
    }

    let config = build_config(args, target);
    config.save()?;

    eprintln!("Created {}", CONFIG_FILENAME);
    eprintln!("  environment: {}", config.environment);
    if let Some(ref region) = config.region {
        eprintln!("  region: {}", region);
    }
    if let Some(ref url) = config.endpoint_url {
        eprintln!("  endpoint_url: {}", url);
    }
    if let Some(ref url) = config.s3_endpoint_url {
        eprintln!("  s3_endpoint_url: {}", url);
    }
    if let Some(ref dir) = config.artifacts_dir {
        eprintln!("  artifacts_dir: {}", dir);
    }
    eprintln!();
    eprintln!("Next: speed-pipeline plan");

    Ok(())
}

fn build_config(args: InitArgs, target: &TargetArgs) -> Config {
    let (endpoint_url, s3_endpoint_url) = if target.localstack {
        (
            Some(LOCALSTACK_URL.to_string()),
            Some(LOCALSTACK_S3_URL.to_string()),
        )
    } else {
        (target.endpoint_url.clone(), None)
    };

    Config {
        environment: args.env,
        region: target.region.clone(),
        endpoint_url,
        s3_endpoint_url,
        artifacts_dir: args.artifacts_dir,
    }
}
