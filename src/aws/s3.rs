use super::has_code;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use std::sync::Arc;
use tracing::debug;

/// `BucketAlreadyExists` means another account owns the name and is an error
const BUCKET_EXISTS: &[&str] = &["BucketAlreadyOwnedByYou"];
const NO_SUCH_BUCKET: &[&str] = &["NoSuchBucket"];

#[async_trait]
pub trait S3Api: Send + Sync {
    /// Returns false if the bucket already existed
    async fn create_bucket(&self, bucket: &str) -> Result<bool>;
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()>;
    /// Returns false if the bucket did not exist
    async fn delete_bucket(&self, bucket: &str) -> Result<bool>;
    /// All keys in the bucket, or None if the bucket does not exist
    async fn list_keys(&self, bucket: &str) -> Result<Option<Vec<String>>>;
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;
}

#[async_trait]
impl S3Api for aws_sdk_s3::Client {
    async fn create_bucket(&self, bucket: &str) -> Result<bool> {
        let mut request = self.create_bucket().bucket(bucket);
        // us-east-1 rejects an explicit location constraint
        if let Some(region) = self.config().region().map(|r| r.as_ref().to_string()) {
            if region != "us-east-1" {
                request = request.create_bucket_configuration(
                    CreateBucketConfiguration::builder()
                        .location_constraint(BucketLocationConstraint::from(region.as_str()))
                        .build(),
                );
            }
        }
        match request.send().await {
            Ok(_) => Ok(true),
            Err(err) if has_code(&err, BUCKET_EXISTS) => Ok(false),
            Err(err) => Err(err).with_context(|| format!("failed to create bucket {}", bucket)),
        }
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()> {
        self.put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .with_context(|| format!("failed to put s3://{}/{}", bucket, key))?;
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<bool> {
        match self.delete_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) if has_code(&err, NO_SUCH_BUCKET) => Ok(false),
            Err(err) => Err(err).with_context(|| format!("failed to delete bucket {}", bucket)),
        }
    }

    async fn list_keys(&self, bucket: &str) -> Result<Option<Vec<String>>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let output = match self
                .list_objects_v2()
                .bucket(bucket)
                .set_continuation_token(token.take())
                .send()
                .await
            {
                Ok(output) => output,
                Err(err) if has_code(&err, NO_SUCH_BUCKET) => return Ok(None),
                Err(err) => {
                    return Err(err).with_context(|| format!("failed to list bucket {}", bucket))
                }
            };
            keys.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );
            match output.next_continuation_token() {
                Some(next) => token = Some(next.to_string()),
                None => break,
            }
        }
        Ok(Some(keys))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("failed to delete s3://{}/{}", bucket, key))?;
        Ok(())
    }
}

/// Object storage adapter
#[derive(Clone)]
pub struct S3Service {
    client: Arc<dyn S3Api>,
}

impl S3Service {
    pub fn new(client: Arc<dyn S3Api>) -> Self {
        Self { client }
    }

    pub fn from_client(client: aws_sdk_s3::Client) -> Self {
        Self::new(Arc::new(client))
    }

    pub async fn create_bucket(&self, name: &str) -> Result<bool> {
        self.client.create_bucket(name).await
    }

    pub async fn put_object(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<()> {
        self.client.put_object(bucket, key, data).await
    }

    pub async fn delete_bucket(&self, name: &str) -> Result<bool> {
        self.client.delete_bucket(name).await
    }

    /// Delete every object in the bucket. Returns false if the bucket is missing.
    pub async fn empty_bucket(&self, name: &str) -> Result<bool> {
        let Some(keys) = self.client.list_keys(name).await? else {
            return Ok(false);
        };
        for key in &keys {
            self.client.delete_object(name, key).await?;
        }
        debug!(bucket = %name, objects = keys.len(), "emptied bucket");
        Ok(true)
    }

    /// Empty and delete the bucket. Returns false if it did not exist.
    pub async fn remove_bucket(&self, name: &str) -> Result<bool> {
        if !self.empty_bucket(name).await? {
            return Ok(false);
        }
        self.delete_bucket(name).await
    }
}
