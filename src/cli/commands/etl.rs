use anyhow::{bail, Context, Result};

use super::context::{Services, GLUE_JOB};
use super::helpers::Target;
use crate::aws::GlueService;
use crate::cli::{EtlArgs, TargetArgs};

const SUCCEEDED: &str = "SUCCEEDED";

pub async fn execute_etl(args: EtlArgs, target_args: &TargetArgs) -> Result<()> {
    let target = Target::resolve(target_args)?;
    let services = Services::from_conf(&target.sdk_config().await, &target.endpoints);

    eprintln!("==> Running glue job {}", GLUE_JOB);
    let outcome = run_etl(&services.glue, !args.no_wait).await?;
    eprintln!("    Run id: {}", outcome.run_id);

    match outcome.final_state {
        None => eprintln!("    Started; check the run in the Glue console"),
        Some(state) if state == SUCCEEDED => eprintln!("    Finished: {}", state),
        Some(state) => bail!("glue job {} run {} ended {}", GLUE_JOB, outcome.run_id, state),
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtlOutcome {
    pub run_id: String,
    /// None unless the run was waited on
    pub final_state: Option<String>,
}

pub async fn run_etl(glue: &GlueService, wait: bool) -> Result<EtlOutcome> {
    let run_id = glue
        .start_job_run(GLUE_JOB)
        .await
        .with_context(|| format!("failed to start glue job {}", GLUE_JOB))?;

    let final_state = if wait {
        eprintln!("    Waiting for run {}...", run_id);
        Some(glue.wait_for_run(GLUE_JOB, &run_id).await?)
    } else {
        None
    };

    Ok(EtlOutcome {
        run_id,
        final_state,
    })
}
