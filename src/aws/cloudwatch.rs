use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_cloudwatch::types::{ComparisonOperator, MetricDatum, StandardUnit, Statistic};
use std::sync::Arc;
use tracing::info;

/// Alarm definition; `new` fills in the fixed thresholds
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmSpec {
    pub alarm_name: String,
    pub metric_name: String,
    pub namespace: String,
    pub threshold: f64,
    pub evaluation_periods: i32,
    pub period_secs: i32,
}

impl AlarmSpec {
    /// Fires when the metric minimum drops below 1 within one 30 s period
    pub fn new(alarm_name: &str, metric_name: &str, namespace: &str) -> Self {
        Self {
            alarm_name: alarm_name.to_string(),
            metric_name: metric_name.to_string(),
            namespace: namespace.to_string(),
            threshold: 1.0,
            evaluation_periods: 1,
            period_secs: 30,
        }
    }
}

#[async_trait]
pub trait CloudWatchApi: Send + Sync {
    async fn put_metric_alarm(&self, spec: &AlarmSpec) -> Result<()>;
    async fn put_metric_data(&self, namespace: &str, metric: &str, value: f64) -> Result<()>;
}

#[async_trait]
impl CloudWatchApi for aws_sdk_cloudwatch::Client {
    async fn put_metric_alarm(&self, spec: &AlarmSpec) -> Result<()> {
        self.put_metric_alarm()
            .alarm_name(&spec.alarm_name)
            .metric_name(&spec.metric_name)
            .namespace(&spec.namespace)
            .threshold(spec.threshold)
            .comparison_operator(ComparisonOperator::LessThanThreshold)
            .evaluation_periods(spec.evaluation_periods)
            .period(spec.period_secs)
            .statistic(Statistic::Minimum)
            .treat_missing_data("notBreaching")
            .send()
            .await
            .with_context(|| format!("failed to put alarm {}", spec.alarm_name))?;
        Ok(())
    }

    async fn put_metric_data(&self, namespace: &str, metric: &str, value: f64) -> Result<()> {
        let datum = MetricDatum::builder()
            .metric_name(metric)
            .value(value)
            .unit(StandardUnit::Count)
            .build();
        self.put_metric_data()
            .namespace(namespace)
            .metric_data(datum)
            .send()
            .await
            .with_context(|| format!("failed to put metric {}/{}", namespace, metric))?;
        Ok(())
    }
}

/// Metrics and alarms adapter
#[derive(Clone)]
pub struct CloudWatchService {
    client: Arc<dyn CloudWatchApi>,
}

impl CloudWatchService {
    pub fn new(client: Arc<dyn CloudWatchApi>) -> Self {
        Self { client }
    }

    pub fn from_client(client: aws_sdk_cloudwatch::Client) -> Self {
        Self::new(Arc::new(client))
    }

    pub async fn put_metric_alarm(&self, alarm: &str, metric: &str, namespace: &str) -> Result<()> {
        let spec = AlarmSpec::new(alarm, metric, namespace);
        self.client.put_metric_alarm(&spec).await?;
        info!(alarm, metric, namespace, "alarm ready");
        Ok(())
    }

    /// Record a count
    pub async fn put_metric_data(&self, metric: &str, namespace: &str, value: f64) -> Result<()> {
        self.client.put_metric_data(namespace, metric, value).await
    }
}
