use super::{has_code, PollConfig};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use aws_sdk_kinesis::primitives::Blob;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Every stream is provisioned with a single shard
pub const SHARD_COUNT: i32 = 1;

const IN_USE: &[&str] = &["ResourceInUseException"];
const NOT_FOUND: &[&str] = &["ResourceNotFoundException"];

const ACTIVE_POLL: PollConfig = PollConfig::new(Duration::from_secs(2), 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub arn: String,
    pub status: String,
}

#[async_trait]
pub trait KinesisApi: Send + Sync {
    /// Returns false if the stream already existed
    async fn create_stream(&self, name: &str, shard_count: i32) -> Result<bool>;
    /// Returns false if the stream did not exist
    async fn delete_stream(&self, name: &str) -> Result<bool>;
    async fn put_record(&self, name: &str, partition_key: &str, data: Vec<u8>) -> Result<()>;
    async fn describe_stream(&self, name: &str) -> Result<Option<StreamInfo>>;
}

#[async_trait]
impl KinesisApi for aws_sdk_kinesis::Client {
    async fn create_stream(&self, name: &str, shard_count: i32) -> Result<bool> {
        match self
            .create_stream()
            .stream_name(name)
            .shard_count(shard_count)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if has_code(&err, IN_USE) => Ok(false),
            Err(err) => Err(err).with_context(|| format!("failed to create stream {}", name)),
        }
    }

    async fn delete_stream(&self, name: &str) -> Result<bool> {
        match self.delete_stream().stream_name(name).send().await {
            Ok(_) => Ok(true),
            Err(err) if has_code(&err, NOT_FOUND) => Ok(false),
            Err(err) => Err(err).with_context(|| format!("failed to delete stream {}", name)),
        }
    }

    async fn put_record(&self, name: &str, partition_key: &str, data: Vec<u8>) -> Result<()> {
        self.put_record()
            .stream_name(name)
            .partition_key(partition_key)
            .data(Blob::new(data))
            .send()
            .await
            .with_context(|| format!("failed to put record on stream {}", name))?;
        Ok(())
    }

    async fn describe_stream(&self, name: &str) -> Result<Option<StreamInfo>> {
        let output = match self.describe_stream_summary().stream_name(name).send().await {
            Ok(output) => output,
            Err(err) if has_code(&err, NOT_FOUND) => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to describe stream {}", name))
            }
        };
        let summary = output
            .stream_description_summary()
            .ok_or_else(|| anyhow!("describe-stream returned no summary for {}", name))?;
        Ok(Some(StreamInfo {
            arn: summary.stream_arn().to_string(),
            status: summary.stream_status().as_str().to_string(),
        }))
    }
}

/// Stream adapter
#[derive(Clone)]
pub struct KinesisService {
    client: Arc<dyn KinesisApi>,
}

impl KinesisService {
    pub fn new(client: Arc<dyn KinesisApi>) -> Self {
        Self { client }
    }

    pub fn from_client(client: aws_sdk_kinesis::Client) -> Self {
        Self::new(Arc::new(client))
    }

    pub async fn create(&self, name: &str) -> Result<bool> {
        let created = self.client.create_stream(name, SHARD_COUNT).await?;
        info!(stream = %name, created, "stream ready");
        Ok(created)
    }

    pub async fn delete(&self, name: &str) -> Result<bool> {
        self.client.delete_stream(name).await
    }

    pub async fn put_record(&self, name: &str, partition_key: &str, data: Vec<u8>) -> Result<()> {
        self.client.put_record(name, partition_key, data).await
    }

    pub async fn get_arn(&self, name: &str) -> Result<String> {
        self.client
            .describe_stream(name)
            .await?
            .map(|info| info.arn)
            .ok_or_else(|| anyhow!("stream {} does not exist", name))
    }

    /// Stream status, or None if the stream does not exist
    pub async fn status(&self, name: &str) -> Result<Option<String>> {
        Ok(self.client.describe_stream(name).await?.map(|info| info.status))
    }

    /// Poll until the stream leaves CREATING/UPDATING
    pub async fn wait_active(&self, name: &str) -> Result<()> {
        self.wait_active_with(name, ACTIVE_POLL).await
    }

    pub async fn wait_active_with(&self, name: &str, poll: PollConfig) -> Result<()> {
        for attempt in 1..=poll.max_attempts {
            match self.status(name).await?.as_deref() {
                Some("ACTIVE") => return Ok(()),
                Some(status @ ("CREATING" | "UPDATING")) => {
                    debug!(stream = %name, status, attempt, "waiting for stream");
                }
                Some(other) => bail!("stream {} is {}", name, other),
                None => bail!("stream {} does not exist", name),
            }
            tokio::time::sleep(poll.interval).await;
        }
        bail!(
            "stream {} not active after {} attempts",
            name,
            poll.max_attempts
        )
    }
}
