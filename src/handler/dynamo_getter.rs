use serde_json::Value as JsonValue;
use tracing::debug;

use super::HandleError;
use crate::aws::DynamoService;
use crate::segment::item_to_json;

/// Look up one record by id and return `{"item": {...}}`
pub async fn get_segment(
    dynamo: &DynamoService,
    table: &str,
    id: Option<&str>,
) -> Result<JsonValue, HandleError> {
    let id = id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| HandleError::BadRequest("id is required".to_string()))?;

    let item = dynamo
        .get_item_by_id(table, id)
        .await
        .map_err(|e| HandleError::downstream("get item", e))?
        .ok_or_else(|| HandleError::NotFound(format!("item with id {} not found", id)))?;

    debug!(id, attributes = item.len(), "found item");
    Ok(serde_json::json!({ "item": item_to_json(&item) }))
}
