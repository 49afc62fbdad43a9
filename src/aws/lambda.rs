use super::{has_code, PollConfig};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use aws_sdk_lambda::types::{Environment, EventSourcePosition, FunctionCode, Runtime};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const RUNTIME: &str = "provided.al2023";
const HANDLER: &str = "bootstrap";
const TIMEOUT_SECS: i32 = 60;
const MEMORY_MB: i32 = 128;
const MAPPING_BATCH_SIZE: i32 = 100;
const API_GATEWAY_PRINCIPAL: &str = "apigateway.amazonaws.com";

const CONFLICT: &[&str] = &["ResourceConflictException"];
const NOT_FOUND: &[&str] = &["ResourceNotFoundException"];

const ACTIVE_POLL: PollConfig = PollConfig::new(Duration::from_secs(2), 60);

/// Everything `create_function` sends besides the fixed literals
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSpec {
    pub name: String,
    pub bucket: String,
    pub key: String,
    pub role_arn: String,
    pub environment: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionState {
    Pending,
    Active,
    Inactive,
    Failed(String),
    Other(String),
}

impl FunctionState {
    fn parse(state: &str, reason: Option<&str>) -> Self {
        match state {
            "Pending" => FunctionState::Pending,
            "Active" => FunctionState::Active,
            "Inactive" => FunctionState::Inactive,
            "Failed" => FunctionState::Failed(reason.unwrap_or("no reason given").to_string()),
            other => FunctionState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for FunctionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionState::Pending => write!(f, "Pending"),
            FunctionState::Active => write!(f, "Active"),
            FunctionState::Inactive => write!(f, "Inactive"),
            FunctionState::Failed(reason) => write!(f, "Failed ({})", reason),
            FunctionState::Other(state) => write!(f, "{}", state),
        }
    }
}

/// Stream → function binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingSpec {
    pub function: String,
    pub source_arn: String,
    pub batch_size: i32,
}

#[async_trait]
pub trait LambdaApi: Send + Sync {
    /// Returns the function ARN, or None if the function already exists
    async fn create_function(&self, spec: &FunctionSpec) -> Result<Option<String>>;
    /// ARN and state, or None if the function does not exist
    async fn get_function(&self, name: &str) -> Result<Option<(String, FunctionState)>>;
    /// Returns false if the function did not exist
    async fn delete_function(&self, name: &str) -> Result<bool>;
    /// Returns the mapping UUID, or None if the mapping already exists
    async fn create_event_source_mapping(&self, spec: &MappingSpec) -> Result<Option<String>>;
    /// Returns false if the statement already exists
    async fn add_permission(
        &self,
        name: &str,
        statement_id: &str,
        principal: &str,
        source_arn: &str,
    ) -> Result<bool>;
}

#[async_trait]
impl LambdaApi for aws_sdk_lambda::Client {
    async fn create_function(&self, spec: &FunctionSpec) -> Result<Option<String>> {
        let code = FunctionCode::builder()
            .s3_bucket(&spec.bucket)
            .s3_key(&spec.key)
            .build();
        let environment = Environment::builder()
            .set_variables(Some(spec.environment.clone()))
            .build();
        match self
            .create_function()
            .function_name(&spec.name)
            .runtime(Runtime::from(RUNTIME))
            .role(&spec.role_arn)
            .handler(HANDLER)
            .code(code)
            .timeout(TIMEOUT_SECS)
            .memory_size(MEMORY_MB)
            .publish(true)
            .environment(environment)
            .send()
            .await
        {
            Ok(output) => output
                .function_arn()
                .map(|arn| Some(arn.to_string()))
                .ok_or_else(|| anyhow!("create-function returned no ARN for {}", spec.name)),
            Err(err) if has_code(&err, CONFLICT) => Ok(None),
            Err(err) => {
                Err(err).with_context(|| format!("failed to create function {}", spec.name))
            }
        }
    }

    async fn get_function(&self, name: &str) -> Result<Option<(String, FunctionState)>> {
        let output = match self
            .get_function_configuration()
            .function_name(name)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) if has_code(&err, NOT_FOUND) => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to get function {}", name))
            }
        };
        let arn = output
            .function_arn()
            .ok_or_else(|| anyhow!("get-function returned no ARN for {}", name))?
            .to_string();
        // functions created before state tracking report no state
        let state = output
            .state()
            .map(|s| FunctionState::parse(s.as_str(), output.state_reason()))
            .unwrap_or(FunctionState::Active);
        Ok(Some((arn, state)))
    }

    async fn delete_function(&self, name: &str) -> Result<bool> {
        match self.delete_function().function_name(name).send().await {
            Ok(_) => Ok(true),
            Err(err) if has_code(&err, NOT_FOUND) => Ok(false),
            Err(err) => Err(err).with_context(|| format!("failed to delete function {}", name)),
        }
    }

    async fn create_event_source_mapping(&self, spec: &MappingSpec) -> Result<Option<String>> {
        match self
            .create_event_source_mapping()
            .function_name(&spec.function)
            .event_source_arn(&spec.source_arn)
            .starting_position(EventSourcePosition::Latest)
            .batch_size(spec.batch_size)
            .send()
            .await
        {
            Ok(output) => Ok(Some(output.uuid().unwrap_or_default().to_string())),
            Err(err) if has_code(&err, CONFLICT) => Ok(None),
            Err(err) => Err(err).with_context(|| {
                format!(
                    "failed to bind {} to {}",
                    spec.function, spec.source_arn
                )
            }),
        }
    }

    async fn add_permission(
        &self,
        name: &str,
        statement_id: &str,
        principal: &str,
        source_arn: &str,
    ) -> Result<bool> {
        match self
            .add_permission()
            .function_name(name)
            .statement_id(statement_id)
            .action("lambda:InvokeFunction")
            .principal(principal)
            .source_arn(source_arn)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if has_code(&err, CONFLICT) => Ok(false),
            Err(err) => {
                Err(err).with_context(|| format!("failed to add permission to {}", name))
            }
        }
    }
}

/// Function adapter. Holds the execution role every function runs as.
#[derive(Clone)]
pub struct LambdaService {
    client: Arc<dyn LambdaApi>,
    role_arn: String,
    environment: HashMap<String, String>,
}

impl LambdaService {
    pub fn new(client: Arc<dyn LambdaApi>, role_arn: impl Into<String>) -> Self {
        Self {
            client,
            role_arn: role_arn.into(),
            environment: HashMap::new(),
        }
    }

    pub fn from_client(client: aws_sdk_lambda::Client, role_arn: impl Into<String>) -> Self {
        Self::new(Arc::new(client), role_arn)
    }

    /// Environment variables passed to every created function
    pub fn with_environment(mut self, environment: HashMap<String, String>) -> Self {
        self.environment = environment;
        self
    }

    /// Create a function from a zip in S3 and return its ARN.
    /// An existing function is kept and its ARN returned.
    pub async fn create_function(&self, name: &str, bucket: &str, key: &str) -> Result<String> {
        let spec = FunctionSpec {
            name: name.to_string(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            role_arn: self.role_arn.clone(),
            environment: self.environment.clone(),
        };
        if let Some(arn) = self.client.create_function(&spec).await? {
            info!(function = %name, arn = %arn, "created function");
            return Ok(arn);
        }
        debug!(function = %name, "function exists, reusing");
        self.client
            .get_function(name)
            .await?
            .map(|(arn, _)| arn)
            .ok_or_else(|| anyhow!("function {} reported as existing but not found", name))
    }

    pub async fn delete(&self, name: &str) -> Result<bool> {
        self.client.delete_function(name).await
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.client.get_function(name).await?.is_some())
    }

    pub async fn state(&self, name: &str) -> Result<Option<FunctionState>> {
        Ok(self.client.get_function(name).await?.map(|(_, state)| state))
    }

    /// Invoke `function` for new records on the stream at `source_arn`
    pub async fn bind_to_service(&self, function: &str, source_arn: &str) -> Result<bool> {
        let spec = MappingSpec {
            function: function.to_string(),
            source_arn: source_arn.to_string(),
            batch_size: MAPPING_BATCH_SIZE,
        };
        let created = self.client.create_event_source_mapping(&spec).await?;
        if let Some(uuid) = &created {
            info!(function, source = source_arn, uuid = %uuid, "created event source mapping");
        }
        Ok(created.is_some())
    }

    /// Let API Gateway invoke the function from any route of the API at `source_arn`
    pub async fn allow_api_gateway(&self, name: &str, source_arn: &str) -> Result<bool> {
        let statement_id = format!("{}-apigateway-invoke", name);
        self.client
            .add_permission(name, &statement_id, API_GATEWAY_PRINCIPAL, source_arn)
            .await
    }

    pub async fn wait_active(&self, name: &str) -> Result<()> {
        self.wait_active_with(name, ACTIVE_POLL).await
    }

    pub async fn wait_active_with(&self, name: &str, poll: PollConfig) -> Result<()> {
        for attempt in 1..=poll.max_attempts {
            match self.state(name).await? {
                Some(FunctionState::Active) => return Ok(()),
                Some(FunctionState::Failed(reason)) => {
                    bail!("function {} failed to activate: {}", name, reason)
                }
                None => bail!("function {} does not exist", name),
                Some(state) => debug!(function = %name, %state, attempt, "waiting for function"),
            }
            tokio::time::sleep(poll.interval).await;
        }
        bail!(
            "function {} not active after {} attempts",
            name,
            poll.max_attempts
        )
    }
}
