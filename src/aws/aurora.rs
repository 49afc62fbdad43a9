use super::{has_code, PollConfig};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub const CLUSTER_ENGINE: &str = "aurora-postgresql";
pub const AVAILABLE_STATUS: &str = "available";

const CLUSTER_EXISTS: &[&str] = &["DBClusterAlreadyExistsFault"];
const CLUSTER_NOT_FOUND: &[&str] = &["DBClusterNotFoundFault"];
const SECRET_EXISTS: &[&str] = &["ResourceExistsException"];

const AVAILABLE_POLL: PollConfig = PollConfig::new(Duration::from_secs(2), 300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSpec {
    pub identifier: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

/// What the Data API needs to run statements against a cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterHandle {
    pub identifier: String,
    pub database: String,
    pub cluster_arn: String,
    pub secret_arn: String,
    pub status: String,
}

/// Cluster ARN + status
pub type ClusterInfo = (String, String);

#[async_trait]
pub trait AuroraApi: Send + Sync {
    /// Returns None if the cluster already exists
    async fn create_db_cluster(&self, spec: &ClusterSpec) -> Result<Option<ClusterInfo>>;
    async fn describe_db_cluster(&self, identifier: &str) -> Result<Option<ClusterInfo>>;
    /// Returns the secret ARN, or None if the secret already exists
    async fn create_secret(&self, name: &str, secret: &str) -> Result<Option<String>>;
    async fn secret_arn(&self, name: &str) -> Result<String>;
    /// Number of records updated
    async fn execute_statement(
        &self,
        cluster_arn: &str,
        secret_arn: &str,
        database: &str,
        sql: &str,
    ) -> Result<i64>;
}

/// The three SDK clients behind the cluster adapter
struct SdkAurora {
    rds: aws_sdk_rds::Client,
    data: aws_sdk_rdsdata::Client,
    secrets: aws_sdk_secretsmanager::Client,
}

fn cluster_info(cluster: &aws_sdk_rds::types::DbCluster) -> Result<ClusterInfo> {
    let arn = cluster
        .db_cluster_arn()
        .ok_or_else(|| anyhow!("cluster has no ARN"))?;
    Ok((
        arn.to_string(),
        cluster.status().unwrap_or("unknown").to_string(),
    ))
}

#[async_trait]
impl AuroraApi for SdkAurora {
    async fn create_db_cluster(&self, spec: &ClusterSpec) -> Result<Option<ClusterInfo>> {
        match self
            .rds
            .create_db_cluster()
            .db_cluster_identifier(&spec.identifier)
            .engine(CLUSTER_ENGINE)
            .database_name(&spec.database)
            .master_username(&spec.username)
            .master_user_password(&spec.password)
            .enable_http_endpoint(true)
            .send()
            .await
        {
            Ok(output) => {
                let cluster = output.db_cluster().ok_or_else(|| {
                    anyhow!("create-db-cluster returned no cluster for {}", spec.identifier)
                })?;
                cluster_info(cluster).map(Some)
            }
            Err(err) if has_code(&err, CLUSTER_EXISTS) => Ok(None),
            Err(err) => Err(err)
                .with_context(|| format!("failed to create cluster {}", spec.identifier)),
        }
    }

    async fn describe_db_cluster(&self, identifier: &str) -> Result<Option<ClusterInfo>> {
        let output = match self
            .rds
            .describe_db_clusters()
            .db_cluster_identifier(identifier)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) if has_code(&err, CLUSTER_NOT_FOUND) => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to describe cluster {}", identifier))
            }
        };
        output
            .db_clusters()
            .first()
            .map(cluster_info)
            .transpose()
    }

    async fn create_secret(&self, name: &str, secret: &str) -> Result<Option<String>> {
        match self
            .secrets
            .create_secret()
            .name(name)
            .secret_string(secret)
            .send()
            .await
        {
            Ok(output) => output
                .arn()
                .map(|arn| Some(arn.to_string()))
                .ok_or_else(|| anyhow!("create-secret returned no ARN for {}", name)),
            Err(err) if has_code(&err, SECRET_EXISTS) => Ok(None),
            Err(err) => Err(err).with_context(|| format!("failed to create secret {}", name)),
        }
    }

    async fn secret_arn(&self, name: &str) -> Result<String> {
        let output = self
            .secrets
            .describe_secret()
            .secret_id(name)
            .send()
            .await
            .with_context(|| format!("failed to describe secret {}", name))?;
        output
            .arn()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("describe-secret returned no ARN for {}", name))
    }

    async fn execute_statement(
        &self,
        cluster_arn: &str,
        secret_arn: &str,
        database: &str,
        sql: &str,
    ) -> Result<i64> {
        let output = self
            .data
            .execute_statement()
            .resource_arn(cluster_arn)
            .secret_arn(secret_arn)
            .database(database)
            .sql(sql)
            .include_result_metadata(true)
            .send()
            .await
            .with_context(|| format!("failed to execute statement on {}", cluster_arn))?;
        Ok(output.number_of_records_updated())
    }
}

/// Relational cluster adapter (RDS, RDS Data API and Secrets Manager)
#[derive(Clone)]
pub struct AuroraService {
    client: Arc<dyn AuroraApi>,
}

impl AuroraService {
    pub fn new(client: Arc<dyn AuroraApi>) -> Self {
        Self { client }
    }

    pub fn from_clients(
        rds: aws_sdk_rds::Client,
        data: aws_sdk_rdsdata::Client,
        secrets: aws_sdk_secretsmanager::Client,
    ) -> Self {
        Self::new(Arc::new(SdkAurora { rds, data, secrets }))
    }

    /// Create the cluster with the Data API enabled, then store its
    /// credentials in a secret named after the user.
    pub async fn create_db_cluster(&self, spec: &ClusterSpec) -> Result<ClusterHandle> {
        let (cluster_arn, status) = match self.client.create_db_cluster(spec).await? {
            Some(info) => {
                info!(cluster = %spec.identifier, arn = %info.0, "created cluster");
                info
            }
            None => {
                debug!(cluster = %spec.identifier, "cluster exists, reusing");
                self.client
                    .describe_db_cluster(&spec.identifier)
                    .await?
                    .ok_or_else(|| {
                        anyhow!("cluster {} reported as existing but not found", spec.identifier)
                    })?
            }
        };

        let credentials = serde_json::json!({
            "username": spec.username,
            "password": spec.password,
        })
        .to_string();
        let secret_arn = match self.client.create_secret(&spec.username, &credentials).await? {
            Some(arn) => arn,
            None => self.client.secret_arn(&spec.username).await?,
        };

        Ok(ClusterHandle {
            identifier: spec.identifier.clone(),
            database: spec.database.clone(),
            cluster_arn,
            secret_arn,
            status,
        })
    }

    /// Cluster status, or None if the cluster does not exist
    pub async fn get_db_cluster(&self, identifier: &str) -> Result<Option<String>> {
        Ok(self
            .client
            .describe_db_cluster(identifier)
            .await?
            .map(|(_, status)| status))
    }

    pub async fn wait_until_available(&self, identifier: &str) -> Result<()> {
        self.wait_until_available_with(identifier, AVAILABLE_POLL)
            .await
    }

    pub async fn wait_until_available_with(
        &self,
        identifier: &str,
        poll: PollConfig,
    ) -> Result<()> {
        for attempt in 1..=poll.max_attempts {
            match self.get_db_cluster(identifier).await? {
                Some(status) if status == AVAILABLE_STATUS => {
                    info!(cluster = %identifier, attempt, "cluster available");
                    return Ok(());
                }
                Some(status) => {
                    debug!(cluster = %identifier, status = %status, attempt, "waiting for cluster")
                }
                None => bail!("cluster {} does not exist", identifier),
            }
            tokio::time::sleep(poll.interval).await;
        }
        bail!(
            "cluster {} not available after {} attempts",
            identifier,
            poll.max_attempts
        )
    }

    pub async fn execute_statement(&self, handle: &ClusterHandle, sql: &str) -> Result<i64> {
        self.client
            .execute_statement(
                &handle.cluster_arn,
                &handle.secret_arn,
                &handle.database,
                sql,
            )
            .await
    }
}
