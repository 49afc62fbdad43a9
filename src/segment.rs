//! Street segment speed record.
//!
//! One record is an aggregated speed observation for a road segment between
//! two junctions during one hour. It travels as JSON over the WebSocket API
//! and the stream, is stored as a DynamoDB item keyed on `id`, and lands in
//! the raw bucket as CSV.

use crate::aws::Item;
use aws_sdk_dynamodb::types::AttributeValue;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;

/// CSV column order, identical to the struct field order
pub const CSV_HEADER: [&str; 13] = [
    "id",
    "year",
    "month",
    "day",
    "hour",
    "utc_timestamp",
    "start_junction_id",
    "end_junction_id",
    "osm_way_id",
    "osm_start_node_id",
    "osm_end_node_id",
    "speed_mph_mean",
    "speed_mph_stddev",
];

/// Table created in the relational cluster for the ETL output
pub const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS street_segment_speeds (
    id SERIAL PRIMARY KEY,
    year INT,
    month INT,
    day INT,
    hour INT,
    utc_timestamp VARCHAR(100),
    start_junction_id VARCHAR(200),
    end_junction_id VARCHAR(200),
    osm_way_id BIGINT,
    osm_start_node_id BIGINT,
    osm_end_node_id BIGINT,
    speed_mph_mean FLOAT,
    speed_mph_stddev FLOAT
)";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentSpeed {
    #[serde(default)]
    pub id: String,
    pub year: i32,
    pub month: i32,
    pub day: i32,
    pub hour: i32,
    pub utc_timestamp: String,
    pub start_junction_id: String,
    pub end_junction_id: String,
    pub osm_way_id: i64,
    pub osm_start_node_id: i64,
    pub osm_end_node_id: i64,
    pub speed_mph_mean: f32,
    pub speed_mph_stddev: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemError {
    Missing(&'static str),
    Invalid(&'static str, String),
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemError::Missing(field) => write!(f, "missing attribute {}", field),
            ItemError::Invalid(field, e) => write!(f, "invalid attribute {}: {}", field, e),
        }
    }
}

impl std::error::Error for ItemError {}

impl SegmentSpeed {
    /// `<start_junction_id>-<end_junction_id>-<utc_timestamp>`
    pub fn derived_id(&self) -> String {
        format!(
            "{}-{}-{}",
            self.start_junction_id, self.end_junction_id, self.utc_timestamp
        )
    }

    /// Fill in `id` when the producer left it out
    pub fn with_derived_id(mut self) -> Self {
        if self.id.is_empty() {
            self.id = self.derived_id();
        }
        self
    }

    pub fn to_item(&self) -> Item {
        let s = |v: &str| AttributeValue::S(v.to_string());
        let n = |v: String| AttributeValue::N(v);
        HashMap::from([
            ("id".to_string(), s(&self.id)),
            ("year".to_string(), n(self.year.to_string())),
            ("month".to_string(), n(self.month.to_string())),
            ("day".to_string(), n(self.day.to_string())),
            ("hour".to_string(), n(self.hour.to_string())),
            ("utc_timestamp".to_string(), s(&self.utc_timestamp)),
            ("start_junction_id".to_string(), s(&self.start_junction_id)),
            ("end_junction_id".to_string(), s(&self.end_junction_id)),
            ("osm_way_id".to_string(), n(self.osm_way_id.to_string())),
            (
                "osm_start_node_id".to_string(),
                n(self.osm_start_node_id.to_string()),
            ),
            (
                "osm_end_node_id".to_string(),
                n(self.osm_end_node_id.to_string()),
            ),
            (
                "speed_mph_mean".to_string(),
                n(self.speed_mph_mean.to_string()),
            ),
            (
                "speed_mph_stddev".to_string(),
                n(self.speed_mph_stddev.to_string()),
            ),
        ])
    }

    pub fn from_item(item: &Item) -> Result<Self, ItemError> {
        Ok(Self {
            id: string_attr(item, "id")?,
            year: number_attr(item, "year")?,
            month: number_attr(item, "month")?,
            day: number_attr(item, "day")?,
            hour: number_attr(item, "hour")?,
            utc_timestamp: string_attr(item, "utc_timestamp")?,
            start_junction_id: string_attr(item, "start_junction_id")?,
            end_junction_id: string_attr(item, "end_junction_id")?,
            osm_way_id: number_attr(item, "osm_way_id")?,
            osm_start_node_id: number_attr(item, "osm_start_node_id")?,
            osm_end_node_id: number_attr(item, "osm_end_node_id")?,
            speed_mph_mean: number_attr(item, "speed_mph_mean")?,
            speed_mph_stddev: number_attr(item, "speed_mph_stddev")?,
        })
    }
}

fn string_attr(item: &Item, field: &'static str) -> Result<String, ItemError> {
    match item.get(field) {
        Some(AttributeValue::S(v)) => Ok(v.clone()),
        Some(other) => Err(ItemError::Invalid(field, format!("expected S, got {:?}", other))),
        None => Err(ItemError::Missing(field)),
    }
}

fn number_attr<T>(item: &Item, field: &'static str) -> Result<T, ItemError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match item.get(field) {
        Some(AttributeValue::N(v)) => v
            .parse()
            .map_err(|e: T::Err| ItemError::Invalid(field, e.to_string())),
        Some(other) => Err(ItemError::Invalid(field, format!("expected N, got {:?}", other))),
        None => Err(ItemError::Missing(field)),
    }
}

/// Render an item as plain JSON, dropping the DynamoDB type tags
pub fn item_to_json(item: &Item) -> JsonValue {
    JsonValue::Object(
        item.iter()
            .map(|(k, v)| (k.clone(), attribute_to_json(v)))
            .collect(),
    )
}

fn number_to_json(n: &str) -> JsonValue {
    if let Ok(i) = n.parse::<i64>() {
        return JsonValue::from(i);
    }
    n.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(n.to_string()))
}

fn attribute_to_json(value: &AttributeValue) -> JsonValue {
    match value {
        AttributeValue::S(s) => JsonValue::String(s.clone()),
        AttributeValue::N(n) => number_to_json(n),
        AttributeValue::Bool(b) => JsonValue::Bool(*b),
        AttributeValue::Null(_) => JsonValue::Null,
        AttributeValue::L(items) => JsonValue::Array(items.iter().map(attribute_to_json).collect()),
        AttributeValue::M(map) => item_to_json(map),
        AttributeValue::Ss(values) => {
            JsonValue::Array(values.iter().cloned().map(JsonValue::String).collect())
        }
        AttributeValue::Ns(values) => {
            JsonValue::Array(values.iter().map(|n| number_to_json(n)).collect())
        }
        // binary attributes are not part of the record
        _ => JsonValue::Null,
    }
}

/// CSV bytes with a header row, in [`CSV_HEADER`] order
pub fn to_csv(records: &[SegmentSpeed]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}
