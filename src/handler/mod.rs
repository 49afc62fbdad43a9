use serde_json::Value as JsonValue;
use tracing::{error, warn};

mod dynamo_getter;
mod forwarder;
mod preprocessing;

pub use dynamo_getter::get_segment;
pub use forwarder::{forward, ForwardRequest};
pub use preprocessing::{
    batch_key, Batcher, KinesisEvent, KinesisEventRecord, KinesisPayload, PreprocessSummary,
    Preprocessor,
};

pub const DEFAULT_TABLE: &str = "street_segment_speeds";
pub const DEFAULT_RAW_BUCKET: &str = "raw-data";
pub const DEFAULT_STREAM: &str = "my-kinesis-stream";
pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_METRICS_NAMESPACE: &str = "SpeedPipeline";
pub const RECORDS_PROCESSED_METRIC: &str = "RecordsProcessed";

#[derive(Debug)]
pub enum HandleError {
    BadRequest(String),
    NotFound(String),
    Downstream(String),
    Config(String),
}

impl std::fmt::Display for HandleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandleError::BadRequest(e) => write!(f, "{}", e),
            HandleError::NotFound(e) => write!(f, "{}", e),
            HandleError::Downstream(e) => write!(f, "downstream failure: {}", e),
            HandleError::Config(e) => write!(f, "configuration error: {}", e),
        }
    }
}

impl std::error::Error for HandleError {}

impl HandleError {
    pub fn status(&self) -> u16 {
        match self {
            HandleError::BadRequest(_) => 400,
            HandleError::NotFound(_) => 404,
            HandleError::Downstream(_) => 502,
            HandleError::Config(_) => 500,
        }
    }

    /// Wrap an SDK failure, logging it with the full cause chain
    pub(crate) fn downstream(context: &str, err: anyhow::Error) -> Self {
        error!(error = %format!("{:#}", err), context, "downstream call failed");
        HandleError::Downstream(format!("{}: {:#}", context, err))
    }
}

/// Handler settings, read from the function environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerConfig {
    pub table_name: String,
    pub raw_bucket: String,
    pub stream_name: String,
    pub batch_size: usize,
    pub metrics_namespace: String,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE.to_string(),
            raw_bucket: DEFAULT_RAW_BUCKET.to_string(),
            stream_name: DEFAULT_STREAM.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            metrics_namespace: DEFAULT_METRICS_NAMESPACE.to_string(),
        }
    }
}

impl HandlerConfig {
    /// Load from environment variables, falling back to the provisioned names.
    pub fn from_env() -> Result<Self, HandleError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, HandleError> {
        let var = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let batch_size = match lookup("BATCH_SIZE").filter(|v| !v.is_empty()) {
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(HandleError::Config(format!(
                        "BATCH_SIZE must be a positive integer, got {:?}",
                        raw
                    )))
                }
            },
            None => DEFAULT_BATCH_SIZE,
        };

        Ok(Self {
            table_name: var("TABLE_NAME", DEFAULT_TABLE),
            raw_bucket: var("RAW_BUCKET", DEFAULT_RAW_BUCKET),
            stream_name: var("STREAM_NAME", DEFAULT_STREAM),
            batch_size,
            metrics_namespace: var("METRICS_NAMESPACE", DEFAULT_METRICS_NAMESPACE),
        })
    }

    /// Environment map handed to every function at creation
    pub fn to_env(&self) -> std::collections::HashMap<String, String> {
        std::collections::HashMap::from([
            ("TABLE_NAME".to_string(), self.table_name.clone()),
            ("RAW_BUCKET".to_string(), self.raw_bucket.clone()),
            ("STREAM_NAME".to_string(), self.stream_name.clone()),
            ("BATCH_SIZE".to_string(), self.batch_size.to_string()),
            (
                "METRICS_NAMESPACE".to_string(),
                self.metrics_namespace.clone(),
            ),
        ])
    }
}

/// Status code and JSON body for a handler result
pub fn response_parts(result: Result<JsonValue, HandleError>) -> (u16, JsonValue) {
    match result {
        Ok(body) => (200, body),
        Err(e) => {
            if e.status() < 500 {
                warn!(error = %e, status = e.status(), "request rejected");
            }
            (e.status(), serde_json::json!({ "message": e.to_string() }))
        }
    }
}

/// API Gateway proxy response: `{statusCode, headers, body}`
pub fn proxy_response(result: Result<JsonValue, HandleError>) -> JsonValue {
    let (status, body) = response_parts(result);
    serde_json::json!({
        "statusCode": status,
        "headers": { "content-type": "application/json" },
        "body": body.to_string(),
    })
}
