use super::{has_code, PollConfig};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, CreateReplicationGroupMemberAction,
    KeySchemaElement, KeyType, ReplicationGroupUpdate, ScalarAttributeType, StreamSpecification,
    StreamViewType,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// DynamoDB item: attribute name to typed value
pub type Item = HashMap<String, AttributeValue>;

/// Hash key of every table the pipeline creates
pub const TABLE_KEY: &str = "id";

/// Regions that receive a replica on `update_replicas`
pub const REPLICA_REGIONS: [&str; 2] = ["eu-central-1", "us-west-1"];

const IN_USE: &[&str] = &["ResourceInUseException"];
const NOT_FOUND: &[&str] = &["ResourceNotFoundException"];

const ACTIVE_POLL: PollConfig = PollConfig::new(Duration::from_secs(2), 60);

#[async_trait]
pub trait DynamoApi: Send + Sync {
    /// Returns false if the table already existed
    async fn create_table(&self, name: &str) -> Result<bool>;
    async fn add_replicas(&self, name: &str, regions: &[&str]) -> Result<()>;
    /// Returns false if the table did not exist
    async fn delete_table(&self, name: &str) -> Result<bool>;
    /// Table status, or None if the table does not exist
    async fn describe_table(&self, name: &str) -> Result<Option<String>>;
    async fn put_item(&self, name: &str, item: Item) -> Result<()>;
    async fn get_item(&self, name: &str, key: Item) -> Result<Option<Item>>;
    async fn delete_item(&self, name: &str, key: Item) -> Result<()>;
}

#[async_trait]
impl DynamoApi for aws_sdk_dynamodb::Client {
    async fn create_table(&self, name: &str) -> Result<bool> {
        let attribute = AttributeDefinition::builder()
            .attribute_name(TABLE_KEY)
            .attribute_type(ScalarAttributeType::S)
            .build()?;
        let key = KeySchemaElement::builder()
            .attribute_name(TABLE_KEY)
            .key_type(KeyType::Hash)
            .build()?;
        // replicas require a stream with both images
        let stream = StreamSpecification::builder()
            .stream_enabled(true)
            .stream_view_type(StreamViewType::NewAndOldImages)
            .build()?;

        match self
            .create_table()
            .table_name(name)
            .attribute_definitions(attribute)
            .key_schema(key)
            .billing_mode(BillingMode::PayPerRequest)
            .stream_specification(stream)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if has_code(&err, IN_USE) => Ok(false),
            Err(err) => Err(err).with_context(|| format!("failed to create table {}", name)),
        }
    }

    async fn add_replicas(&self, name: &str, regions: &[&str]) -> Result<()> {
        let mut updates = Vec::with_capacity(regions.len());
        for region in regions {
            let create = CreateReplicationGroupMemberAction::builder()
                .region_name(*region)
                .build()?;
            updates.push(ReplicationGroupUpdate::builder().create(create).build());
        }
        self.update_table()
            .table_name(name)
            .set_replica_updates(Some(updates))
            .send()
            .await
            .with_context(|| format!("failed to add replicas to table {}", name))?;
        Ok(())
    }

    async fn delete_table(&self, name: &str) -> Result<bool> {
        match self.delete_table().table_name(name).send().await {
            Ok(_) => Ok(true),
            Err(err) if has_code(&err, NOT_FOUND) => Ok(false),
            Err(err) => Err(err).with_context(|| format!("failed to delete table {}", name)),
        }
    }

    async fn describe_table(&self, name: &str) -> Result<Option<String>> {
        let output = match self.describe_table().table_name(name).send().await {
            Ok(output) => output,
            Err(err) if has_code(&err, NOT_FOUND) => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to describe table {}", name))
            }
        };
        let status = output
            .table()
            .and_then(|table| table.table_status())
            .ok_or_else(|| anyhow!("describe-table returned no status for {}", name))?;
        Ok(Some(status.as_str().to_string()))
    }

    async fn put_item(&self, name: &str, item: Item) -> Result<()> {
        self.put_item()
            .table_name(name)
            .set_item(Some(item))
            .send()
            .await
            .with_context(|| format!("failed to put item into {}", name))?;
        Ok(())
    }

    async fn get_item(&self, name: &str, key: Item) -> Result<Option<Item>> {
        let output = self
            .get_item()
            .table_name(name)
            .set_key(Some(key))
            .send()
            .await
            .with_context(|| format!("failed to get item from {}", name))?;
        Ok(output.item().cloned())
    }

    async fn delete_item(&self, name: &str, key: Item) -> Result<()> {
        self.delete_item()
            .table_name(name)
            .set_key(Some(key))
            .send()
            .await
            .with_context(|| format!("failed to delete item from {}", name))?;
        Ok(())
    }
}

fn id_key(id: &str) -> Item {
    HashMap::from([(TABLE_KEY.to_string(), AttributeValue::S(id.to_string()))])
}

/// Table adapter
#[derive(Clone)]
pub struct DynamoService {
    client: Arc<dyn DynamoApi>,
}

impl DynamoService {
    pub fn new(client: Arc<dyn DynamoApi>) -> Self {
        Self { client }
    }

    pub fn from_client(client: aws_sdk_dynamodb::Client) -> Self {
        Self::new(Arc::new(client))
    }

    /// Create a pay-per-request table keyed on a string `id`
    pub async fn create_table(&self, name: &str) -> Result<bool> {
        let created = self.client.create_table(name).await?;
        info!(table = %name, created, "table ready");
        Ok(created)
    }

    /// Turn the table into a global table with replicas in [`REPLICA_REGIONS`]
    pub async fn update_replicas(&self, name: &str) -> Result<()> {
        self.client.add_replicas(name, &REPLICA_REGIONS).await?;
        info!(table = %name, regions = ?REPLICA_REGIONS, "requested replicas");
        Ok(())
    }

    pub async fn delete_table(&self, name: &str) -> Result<bool> {
        self.client.delete_table(name).await
    }

    pub async fn describe_table(&self, name: &str) -> Result<Option<String>> {
        self.client.describe_table(name).await
    }

    pub async fn wait_active(&self, name: &str) -> Result<()> {
        self.wait_active_with(name, ACTIVE_POLL).await
    }

    pub async fn wait_active_with(&self, name: &str, poll: PollConfig) -> Result<()> {
        for attempt in 1..=poll.max_attempts {
            match self.describe_table(name).await?.as_deref() {
                Some("ACTIVE") => return Ok(()),
                None => bail!("table {} does not exist", name),
                Some(status) => debug!(table = %name, status, attempt, "waiting for table"),
            }
            tokio::time::sleep(poll.interval).await;
        }
        bail!(
            "table {} not active after {} attempts",
            name,
            poll.max_attempts
        )
    }

    pub async fn put_item(&self, name: &str, item: Item) -> Result<()> {
        self.client.put_item(name, item).await
    }

    pub async fn delete_item(&self, name: &str, id: &str) -> Result<()> {
        self.client.delete_item(name, id_key(id)).await
    }

    pub async fn get_item_by_id(&self, name: &str, id: &str) -> Result<Option<Item>> {
        self.client.get_item(name, id_key(id)).await
    }
}
