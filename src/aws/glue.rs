use super::has_code;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_sdk_glue::types::JobCommand;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const COMMAND_NAME: &str = "pythonshell";
const PYTHON_VERSION: &str = "3.9";
const JOB_EXISTS: &[&str] = &["AlreadyExistsException", "IdempotentParameterMismatchException"];

/// Run states that mean the job has not finished yet
const IN_PROGRESS: &[&str] = &["RUNNING", "STARTING", "WAITING", "STOPPING"];

const RUN_POLL: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: String,
    pub script_location: String,
    pub role_arn: String,
}

#[async_trait]
pub trait GlueApi: Send + Sync {
    /// Returns false if the job already existed
    async fn create_job(&self, spec: &JobSpec) -> Result<bool>;
    async fn start_job_run(&self, name: &str) -> Result<String>;
    async fn job_run_state(&self, name: &str, run_id: &str) -> Result<String>;
}

#[async_trait]
impl GlueApi for aws_sdk_glue::Client {
    async fn create_job(&self, spec: &JobSpec) -> Result<bool> {
        let command = JobCommand::builder()
            .name(COMMAND_NAME)
            .script_location(&spec.script_location)
            .python_version(PYTHON_VERSION)
            .build();
        match self
            .create_job()
            .name(&spec.name)
            .role(&spec.role_arn)
            .command(command)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if has_code(&err, JOB_EXISTS) => Ok(false),
            Err(err) => Err(err).with_context(|| format!("failed to create job {}", spec.name)),
        }
    }

    async fn start_job_run(&self, name: &str) -> Result<String> {
        let output = self
            .start_job_run()
            .job_name(name)
            .send()
            .await
            .with_context(|| format!("failed to start job {}", name))?;
        output
            .job_run_id()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("start-job-run returned no run id for {}", name))
    }

    async fn job_run_state(&self, name: &str, run_id: &str) -> Result<String> {
        let output = self
            .get_job_run()
            .job_name(name)
            .run_id(run_id)
            .send()
            .await
            .with_context(|| format!("failed to get run {} of job {}", run_id, name))?;
        output
            .job_run()
            .and_then(|run| run.job_run_state())
            .map(|state| state.as_str().to_string())
            .ok_or_else(|| anyhow!("get-job-run returned no state for {}", run_id))
    }
}

/// ETL job adapter. Jobs run as the glue role.
#[derive(Clone)]
pub struct GlueService {
    client: Arc<dyn GlueApi>,
    role_arn: String,
}

impl GlueService {
    pub fn new(client: Arc<dyn GlueApi>, role_arn: impl Into<String>) -> Self {
        Self {
            client,
            role_arn: role_arn.into(),
        }
    }

    pub fn from_client(client: aws_sdk_glue::Client, role_arn: impl Into<String>) -> Self {
        Self::new(Arc::new(client), role_arn)
    }

    pub async fn create_job(&self, name: &str, script_location: &str) -> Result<bool> {
        let spec = JobSpec {
            name: name.to_string(),
            script_location: script_location.to_string(),
            role_arn: self.role_arn.clone(),
        };
        let created = self.client.create_job(&spec).await?;
        info!(job = %name, script = %script_location, created, "job ready");
        Ok(created)
    }

    pub async fn start_job_run(&self, name: &str) -> Result<String> {
        let run_id = self.client.start_job_run(name).await?;
        info!(job = %name, run_id = %run_id, "started job run");
        Ok(run_id)
    }

    pub async fn job_run_state(&self, name: &str, run_id: &str) -> Result<String> {
        self.client.job_run_state(name, run_id).await
    }

    /// Poll while the run is in progress and return its final state
    pub async fn wait_for_run(&self, name: &str, run_id: &str) -> Result<String> {
        self.wait_for_run_every(name, run_id, RUN_POLL).await
    }

    pub async fn wait_for_run_every(
        &self,
        name: &str,
        run_id: &str,
        interval: Duration,
    ) -> Result<String> {
        loop {
            let state = self.job_run_state(name, run_id).await?;
            if !IN_PROGRESS.contains(&state.as_str()) {
                return Ok(state);
            }
            debug!(job = %name, run_id, state = %state, "job still running");
            tokio::time::sleep(interval).await;
        }
    }
}
