//! Stream consumer: every record is stored in the table and batched into CSV
//! objects in the raw bucket.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, error, info, Span};

use super::{HandleError, HandlerConfig, RECORDS_PROCESSED_METRIC};
use crate::aws::{CloudWatchService, DynamoService, S3Service};
use crate::segment::{self, SegmentSpeed};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KinesisEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<KinesisEventRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KinesisEventRecord {
    pub kinesis: KinesisPayload,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KinesisPayload {
    #[serde(default)]
    pub partition_key: String,
    #[serde(default)]
    pub sequence_number: String,
    /// Base64 record data
    pub data: String,
}

impl KinesisPayload {
    fn decode(&self) -> Result<SegmentSpeed, HandleError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&self.data)
            .map_err(|e| {
                HandleError::BadRequest(format!(
                    "record {} is not base64: {}",
                    self.sequence_number, e
                ))
            })?;
        let segment: SegmentSpeed = serde_json::from_slice(&bytes).map_err(|e| {
            HandleError::BadRequest(format!(
                "record {} is not a segment speed: {}",
                self.sequence_number, e
            ))
        })?;
        Ok(segment.with_derived_id())
    }
}

/// Accumulates records until a batch is full
#[derive(Debug)]
pub struct Batcher {
    records: Vec<SegmentSpeed>,
    size: usize,
}

impl Batcher {
    pub fn new(size: usize) -> Self {
        Self {
            records: Vec::with_capacity(size.min(1024)),
            size: size.max(1),
        }
    }

    /// Add a record; returns the full batch once it reaches the batch size
    pub fn push(&mut self, record: SegmentSpeed) -> Option<Vec<SegmentSpeed>> {
        self.records.push(record);
        if self.records.len() >= self.size {
            return Some(self.take());
        }
        None
    }

    pub fn take(&mut self) -> Vec<SegmentSpeed> {
        std::mem::take(&mut self.records)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// `year=YYYY/month=MM/day=DD/batch-from-<first>-to-<last>.csv`, or None for an empty batch
pub fn batch_key(now: DateTime<Utc>, batch: &[SegmentSpeed]) -> Option<String> {
    let first = batch.first()?;
    let last = batch.last()?;
    Some(format!(
        "{}/batch-from-{}-to-{}.csv",
        now.format("year=%Y/month=%m/day=%d"),
        first.id,
        last.id
    ))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct PreprocessSummary {
    pub records: usize,
    pub batches: usize,
}

pub struct Preprocessor {
    dynamo: DynamoService,
    s3: S3Service,
    cloudwatch: CloudWatchService,
    config: HandlerConfig,
}

impl Preprocessor {
    pub fn new(
        dynamo: DynamoService,
        s3: S3Service,
        cloudwatch: CloudWatchService,
        config: HandlerConfig,
    ) -> Self {
        Self {
            dynamo,
            s3,
            cloudwatch,
            config,
        }
    }

    pub async fn handle(&self, event: &KinesisEvent) -> Result<PreprocessSummary, HandleError> {
        self.handle_at(event, Utc::now()).await
    }

    /// Process one invocation; `now` dates the uploaded objects
    #[tracing::instrument(
        name = "preprocess",
        skip(self, event, now),
        fields(records = event.records.len(), batches = tracing::field::Empty)
    )]
    pub async fn handle_at(
        &self,
        event: &KinesisEvent,
        now: DateTime<Utc>,
    ) -> Result<PreprocessSummary, HandleError> {
        let mut batcher = Batcher::new(self.config.batch_size);
        let mut summary = PreprocessSummary::default();

        for record in &event.records {
            let segment = record.kinesis.decode()?;
            debug!(
                id = %segment.id,
                partition_key = %record.kinesis.partition_key,
                "decoded record"
            );

            self.dynamo
                .put_item(&self.config.table_name, segment.to_item())
                .await
                .map_err(|e| HandleError::downstream("put item", e))?;
            summary.records += 1;

            if let Some(batch) = batcher.push(segment) {
                self.flush(&batch, now).await?;
                summary.batches += 1;
            }
        }

        let remainder = batcher.take();
        if !remainder.is_empty() {
            match self.flush(&remainder, now).await {
                Ok(()) => summary.batches += 1,
                Err(e) => error!(error = %e, records = remainder.len(), "final flush failed"),
            }
        }

        if let Err(e) = self
            .cloudwatch
            .put_metric_data(
                RECORDS_PROCESSED_METRIC,
                &self.config.metrics_namespace,
                summary.records as f64,
            )
            .await
        {
            error!(error = %format!("{:#}", e), "failed to publish metric");
        }

        Span::current().record("batches", summary.batches);
        info!(
            records = summary.records,
            batches = summary.batches,
            "invocation complete"
        );
        Ok(summary)
    }

    async fn flush(&self, batch: &[SegmentSpeed], now: DateTime<Utc>) -> Result<(), HandleError> {
        let Some(key) = batch_key(now, batch) else {
            return Ok(());
        };
        let body = segment::to_csv(batch)
            .map_err(|e| HandleError::Downstream(format!("csv encoding failed: {}", e)))?;
        self.s3
            .put_object(&self.config.raw_bucket, &key, body)
            .await
            .map_err(|e| HandleError::downstream("upload batch", e))?;
        info!(bucket = %self.config.raw_bucket, key = %key, records = batch.len(), "uploaded batch");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::{CloudWatchApi, DynamoApi, Item, S3Api};
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder {
        items: Mutex<Vec<Item>>,
        objects: Mutex<Vec<(String, String, String)>>,
        metrics: Mutex<Vec<(String, String, f64)>>,
        fail_put_item: bool,
        fail_upload_after: Option<usize>,
        fail_metric: bool,
    }

    #[async_trait]
    impl DynamoApi for Recorder {
        async fn create_table(&self, _name: &str) -> Result<bool> {
            Ok(true)
        }
        async fn add_replicas(&self, _name: &str, _regions: &[&str]) -> Result<()> {
            Ok(())
        }
        async fn delete_table(&self, _name: &str) -> Result<bool> {
            Ok(true)
        }
        async fn describe_table(&self, _name: &str) -> Result<Option<String>> {
            Ok(None)
        }
        async fn put_item(&self, _name: &str, item: Item) -> Result<()> {
            if self.fail_put_item {
                bail!("ProvisionedThroughputExceededException");
            }
            self.items.lock().unwrap().push(item);
            Ok(())
        }
        async fn get_item(&self, _name: &str, _key: Item) -> Result<Option<Item>> {
            Ok(None)
        }
        async fn delete_item(&self, _name: &str, _key: Item) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl S3Api for Recorder {
        async fn create_bucket(&self, _bucket: &str) -> Result<bool> {
            Ok(true)
        }
        async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()> {
            let mut objects = self.objects.lock().unwrap();
            if self.fail_upload_after == Some(objects.len()) {
                bail!("SlowDown");
            }
            objects.push((
                bucket.to_string(),
                key.to_string(),
                String::from_utf8(body).unwrap(),
            ));
            Ok(())
        }
        async fn delete_bucket(&self, _bucket: &str) -> Result<bool> {
            Ok(true)
        }
        async fn list_keys(&self, _bucket: &str) -> Result<Option<Vec<String>>> {
            Ok(None)
        }
        async fn delete_object(&self, _bucket: &str, _key: &str) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl CloudWatchApi for Recorder {
        async fn put_metric_alarm(&self, _spec: &crate::aws::AlarmSpec) -> Result<()> {
            Ok(())
        }
        async fn put_metric_data(&self, namespace: &str, metric: &str, value: f64) -> Result<()> {
            if self.fail_metric {
                bail!("throttled");
            }
            self.metrics
                .lock()
                .unwrap()
                .push((namespace.to_string(), metric.to_string(), value));
            Ok(())
        }
    }

    fn preprocessor(recorder: Arc<Recorder>, batch_size: usize) -> Preprocessor {
        Preprocessor::new(
            DynamoService::new(recorder.clone()),
            S3Service::new(recorder.clone()),
            CloudWatchService::new(recorder),
            HandlerConfig {
                batch_size,
                ..HandlerConfig::default()
            },
        )
    }

    fn segment_json(id: &str, hour: i32) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "year": 2020, "month": 1, "day": 1, "hour": hour,
            "utc_timestamp": "2020-01-01T09:00:00.000Z",
            "start_junction_id": "j1", "end_junction_id": "j2",
            "osm_way_id": 1, "osm_start_node_id": 2, "osm_end_node_id": 3,
            "speed_mph_mean": 26.5, "speed_mph_stddev": 4.5
        })
    }

    fn event(payloads: &[serde_json::Value]) -> KinesisEvent {
        let records: Vec<serde_json::Value> = payloads
            .iter()
            .enumerate()
            .map(|(i, p)| {
                serde_json::json!({
                    "kinesis": {
                        "partitionKey": "pk",
                        "sequenceNumber": i.to_string(),
                        "data": base64::engine::general_purpose::STANDARD.encode(p.to_string()),
                    }
                })
            })
            .collect();
        serde_json::from_value(serde_json::json!({ "Records": records })).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 7, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_batch_key_format() {
        let batch: Vec<SegmentSpeed> = [segment_json("a", 1), segment_json("z", 2)]
            .into_iter()
            .map(|v| serde_json::from_value(v).unwrap())
            .collect();
        assert_eq!(
            batch_key(now(), &batch).unwrap(),
            "year=2024/month=03/day=07/batch-from-a-to-z.csv"
        );
        assert_eq!(batch_key(now(), &[]), None);
    }

    #[test]
    fn test_batcher_releases_full_batches() {
        let mut batcher = Batcher::new(2);
        let s: SegmentSpeed = serde_json::from_value(segment_json("a", 1)).unwrap();

        assert!(batcher.push(s.clone()).is_none());
        let full = batcher.push(s.clone()).unwrap();
        assert_eq!(full.len(), 2);
        assert!(batcher.is_empty());

        assert!(batcher.push(s).is_none());
        assert_eq!(batcher.len(), 1);
        assert_eq!(batcher.take().len(), 1);
    }

    #[tokio::test]
    async fn test_records_stored_and_flushed_in_batches() {
        let recorder = Arc::new(Recorder::default());
        let handler = preprocessor(recorder.clone(), 2);
        let payloads: Vec<_> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|id| segment_json(id, 1))
            .collect();

        let summary = handler.handle_at(&event(&payloads), now()).await.unwrap();

        assert_eq!(summary, PreprocessSummary { records: 5, batches: 3 });
        assert_eq!(recorder.items.lock().unwrap().len(), 5);

        let objects = recorder.objects.lock().unwrap();
        let keys: Vec<&str> = objects.iter().map(|(_, k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            [
                "year=2024/month=03/day=07/batch-from-a-to-b.csv",
                "year=2024/month=03/day=07/batch-from-c-to-d.csv",
                "year=2024/month=03/day=07/batch-from-e-to-e.csv",
            ]
        );
        assert!(objects.iter().all(|(bucket, _, _)| bucket == "raw-data"));
        let body = &objects[0].2;
        assert!(body.starts_with("id,year,month,day,hour,"));
        assert_eq!(body.lines().count(), 3);

        assert_eq!(
            recorder.metrics.lock().unwrap()[0],
            ("SpeedPipeline".to_string(), "RecordsProcessed".to_string(), 5.0)
        );
    }

    #[tokio::test]
    async fn test_missing_id_is_derived_before_storing() {
        let recorder = Arc::new(Recorder::default());
        let handler = preprocessor(recorder.clone(), 1000);
        let mut payload = segment_json("", 1);
        payload.as_object_mut().unwrap().remove("id");

        handler.handle_at(&event(&[payload]), now()).await.unwrap();

        let items = recorder.items.lock().unwrap();
        let stored = SegmentSpeed::from_item(&items[0]).unwrap();
        assert_eq!(stored.id, "j1-j2-2020-01-01T09:00:00.000Z");
    }

    #[tokio::test]
    async fn test_bad_record_aborts_invocation() {
        let recorder = Arc::new(Recorder::default());
        let handler = preprocessor(recorder.clone(), 1000);
        let mut bad = event(&[segment_json("a", 1)]);
        bad.records[0].kinesis.data = base64::engine::general_purpose::STANDARD.encode("{nope");

        let err = handler.handle_at(&bad, now()).await.unwrap_err();
        assert!(matches!(err, HandleError::BadRequest(_)));
        assert!(recorder.items.lock().unwrap().is_empty());

        bad.records[0].kinesis.data = "***".to_string();
        assert!(handler.handle_at(&bad, now()).await.is_err());
    }

    #[tokio::test]
    async fn test_put_item_failure_aborts_invocation() {
        let recorder = Arc::new(Recorder {
            fail_put_item: true,
            ..Default::default()
        });
        let handler = preprocessor(recorder.clone(), 1000);

        let err = handler
            .handle_at(&event(&[segment_json("a", 1)]), now())
            .await
            .unwrap_err();
        assert_eq!(err.status(), 502);
        assert!(recorder.objects.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_full_batch_upload_aborts() {
        let recorder = Arc::new(Recorder {
            fail_upload_after: Some(0),
            ..Default::default()
        });
        let handler = preprocessor(recorder, 1);
        let result = handler
            .handle_at(&event(&[segment_json("a", 1), segment_json("b", 1)]), now())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_failed_final_flush_is_only_logged() {
        let recorder = Arc::new(Recorder {
            fail_upload_after: Some(1),
            ..Default::default()
        });
        let handler = preprocessor(recorder.clone(), 2);
        let payloads: Vec<_> = ["a", "b", "c"].iter().map(|id| segment_json(id, 1)).collect();

        let summary = handler.handle_at(&event(&payloads), now()).await.unwrap();

        assert_eq!(summary, PreprocessSummary { records: 3, batches: 1 });
        assert_eq!(recorder.objects.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_metric_failure_is_only_logged() {
        let recorder = Arc::new(Recorder {
            fail_metric: true,
            ..Default::default()
        });
        let handler = preprocessor(recorder, 1000);
        let summary = handler
            .handle_at(&event(&[segment_json("a", 1)]), now())
            .await
            .unwrap();
        assert_eq!(summary.records, 1);
    }

    #[tokio::test]
    async fn test_empty_event_uploads_nothing() {
        let recorder = Arc::new(Recorder::default());
        let handler = preprocessor(recorder.clone(), 1000);
        let summary = handler
            .handle_at(&KinesisEvent::default(), now())
            .await
            .unwrap();
        assert_eq!(summary, PreprocessSummary::default());
        assert!(recorder.objects.lock().unwrap().is_empty());
        assert_eq!(recorder.metrics.lock().unwrap()[0].2, 0.0);
    }
}
