use anyhow::Result;
use std::fmt;

use super::context::{PipelineFunction, Services, CLUSTER_ID, HTTP_API, STREAM, TABLE, WEBSOCKET_API};
use super::helpers::Target;
use crate::cli::{StatusArgs, TargetArgs};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceStatus {
    pub kind: &'static str,
    pub name: String,
    /// None when the resource does not exist
    pub state: Option<String>,
}

impl ResourceStatus {
    fn new(kind: &'static str, name: &str, state: Option<String>) -> Self {
        Self {
            kind,
            name: name.to_string(),
            state,
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<10} {:<24} {}",
            self.kind,
            self.name,
            self.state.as_deref().unwrap_or("missing")
        )
    }
}

pub async fn execute_status(_args: StatusArgs, target_args: &TargetArgs) -> Result<()> {
    let target = Target::resolve(target_args)?;
    let services = Services::from_conf(&target.sdk_config().await, &target.endpoints);

    eprintln!("==> Speed Pipeline Status");
    eprintln!("    Target: {}", target.describe());
    eprintln!();

    for status in collect_status(&services).await? {
        println!("{}", status);
    }
    Ok(())
}

pub async fn collect_status(services: &Services) -> Result<Vec<ResourceStatus>> {
    let mut statuses = vec![
        ResourceStatus::new("stream", STREAM, services.kinesis.status(STREAM).await?),
        ResourceStatus::new("table", TABLE, services.dynamo.describe_table(TABLE).await?),
        ResourceStatus::new(
            "cluster",
            CLUSTER_ID,
            services.aurora.get_db_cluster(CLUSTER_ID).await?,
        ),
    ];

    for function in PipelineFunction::ALL {
        let state = services.lambda.state(function.name()).await?;
        statuses.push(ResourceStatus::new(
            "function",
            function.name(),
            state.map(|s| s.to_string()),
        ));
    }

    for api in [WEBSOCKET_API, HTTP_API] {
        let id = services.api_gateway.find_by_name(api).await?;
        statuses.push(ResourceStatus::new("api", api, id.map(|id| format!("id {}", id))));
    }

    Ok(statuses)
}
