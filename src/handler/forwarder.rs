use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::info;

use super::HandleError;
use crate::aws::KinesisService;
use crate::segment::SegmentSpeed;

/// WebSocket message body: `{"action": "...", "data": {segment}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardRequest {
    #[serde(default)]
    pub action: String,
    pub data: SegmentSpeed,
}

/// Put the segment carried by a WebSocket message on the stream, keyed by its id
pub async fn forward(
    kinesis: &KinesisService,
    stream: &str,
    body: Option<&str>,
) -> Result<JsonValue, HandleError> {
    let body = body
        .filter(|b| !b.trim().is_empty())
        .ok_or_else(|| HandleError::BadRequest("message body is required".to_string()))?;
    let request: ForwardRequest = serde_json::from_str(body)
        .map_err(|e| HandleError::BadRequest(format!("invalid message: {}", e)))?;

    let segment = request.data.with_derived_id();
    let data = serde_json::to_vec(&segment)
        .map_err(|e| HandleError::BadRequest(format!("cannot encode segment: {}", e)))?;

    kinesis
        .put_record(stream, &segment.id, data)
        .await
        .map_err(|e| HandleError::downstream("put record", e))?;

    info!(id = %segment.id, action = %request.action, stream, "forwarded segment");
    Ok(serde_json::json!({ "message": format!("forwarded {}", segment.id) }))
}
