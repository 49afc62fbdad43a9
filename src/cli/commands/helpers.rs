use anyhow::Result;
use aws_config::SdkConfig;
use std::path::{Path, PathBuf};

use super::context::DEFAULT_ARTIFACTS_DIR;
use crate::aws::{load_sdk_config, Endpoints, DEFAULT_REGION};
use crate::cli::config::{Config, CONFIG_FILENAME};
use crate::cli::TargetArgs;

/// Load config, distinguishing between "file not found" and "file invalid"
pub fn load_config() -> Result<Option<Config>> {
    if !Path::new(CONFIG_FILENAME).exists() {
        return Ok(None);
    }
    Config::load().map(Some)
}

/// Resolve region from args or config, warning if falling back to default
pub fn resolve_region(region_arg: Option<String>, config: &Option<Config>) -> String {
    region_arg
        .or_else(|| config.as_ref().and_then(|c| c.region.clone()))
        .unwrap_or_else(|| {
            eprintln!(
                "    Note: No region specified, using default: {}",
                DEFAULT_REGION
            );
            DEFAULT_REGION.to_string()
        })
}

/// Flags win over the config file; neither means real AWS endpoints
pub fn resolve_endpoints(target: &TargetArgs, config: &Option<Config>) -> Endpoints {
    if target.localstack {
        return Endpoints::localstack();
    }
    if let Some(url) = &target.endpoint_url {
        return Endpoints {
            default: Some(url.clone()),
            s3: None,
        };
    }
    match config {
        Some(config) => Endpoints {
            default: config.endpoint_url.clone(),
            s3: config.s3_endpoint_url.clone(),
        },
        None => Endpoints::default(),
    }
}

pub fn resolve_artifacts_dir(arg: Option<PathBuf>, config: &Option<Config>) -> PathBuf {
    arg.or_else(|| {
        config
            .as_ref()
            .and_then(|c| c.artifacts_dir.as_ref())
            .map(PathBuf::from)
    })
    .unwrap_or_else(|| PathBuf::from(DEFAULT_ARTIFACTS_DIR))
}

/// Region and endpoints every command talks to
#[derive(Debug, Clone)]
pub struct Target {
    pub region: String,
    pub endpoints: Endpoints,
    pub config: Option<Config>,
}

impl Target {
    pub fn resolve(args: &TargetArgs) -> Result<Self> {
        let config = load_config()?;
        let region = resolve_region(args.region.clone(), &config);
        let endpoints = resolve_endpoints(args, &config);
        Ok(Self {
            region,
            endpoints,
            config,
        })
    }

    pub async fn sdk_config(&self) -> SdkConfig {
        load_sdk_config(&self.region, &self.endpoints).await
    }

    pub fn describe(&self) -> String {
        match &self.endpoints.default {
            Some(url) => format!("{} via {}", self.region, url),
            None => self.region.clone(),
        }
    }
}
