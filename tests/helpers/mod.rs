#![allow(dead_code)] // Test helpers appear unused when compiled independently

use anyhow::{bail, Result};
use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use speed_pipeline::aws::{
    AlarmSpec, ApiGatewayApi, ApiGatewayService, ApiProtocol, AuroraApi, AuroraService,
    CloudWatchApi, CloudWatchService, ClusterInfo, ClusterSpec, DynamoApi, DynamoService,
    FunctionSpec, FunctionState, GlueApi, GlueService, IamApi, IamService, IntegrationSpec,
    Item, JobSpec, KinesisApi, KinesisService, LambdaApi, LambdaService, MappingSpec, RoleInfo,
    RouteSpec, S3Api, S3Service, StreamInfo, TABLE_KEY,
};
use speed_pipeline::cli::commands::context::Services;
use speed_pipeline::HandlerConfig;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

pub const REGION: &str = "us-east-1";
pub const ACCOUNT: &str = "000000000000";

/// In-memory stand-in for every service the pipeline touches. Each call is
/// appended to `log` as `"<call> <resource>"`.
#[derive(Default)]
pub struct FakeCloud {
    log: Mutex<Vec<String>>,
    fail_on: Mutex<Option<String>>,
    counter: Mutex<u32>,
    pub buckets: Mutex<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
    pub streams: Mutex<BTreeMap<String, Vec<(String, Vec<u8>)>>>,
    pub functions: Mutex<BTreeMap<String, FunctionSpec>>,
    pub mappings: Mutex<Vec<MappingSpec>>,
    pub permissions: Mutex<Vec<(String, String)>>,
    pub tables: Mutex<BTreeMap<String, HashMap<String, Item>>>,
    pub apis: Mutex<Vec<(String, String, ApiProtocol)>>,
    pub routes: Mutex<Vec<RouteSpec>>,
    route_ids: Mutex<BTreeMap<(String, String), String>>,
    pub integrations: Mutex<Vec<IntegrationSpec>>,
    pub alarms: Mutex<Vec<AlarmSpec>>,
    pub metrics: Mutex<Vec<(String, String, f64)>>,
    pub jobs: Mutex<Vec<JobSpec>>,
    pub clusters: Mutex<BTreeMap<String, String>>,
    pub secrets: Mutex<BTreeMap<String, String>>,
    pub statements: Mutex<Vec<String>>,
    pub roles: Mutex<BTreeMap<String, String>>,
    pub policies: Mutex<BTreeMap<String, String>>,
    pub attachments: Mutex<Vec<(String, String)>>,
}

impl FakeCloud {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every later call whose log line starts with `prefix` fail
    pub fn fail_on(&self, prefix: &str) {
        *self.fail_on.lock().unwrap() = Some(prefix.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Index of the first call starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.calls().iter().position(|c| c.starts_with(prefix))
    }

    pub fn services(self: &Arc<Self>) -> Services {
        Services {
            s3: S3Service::new(self.clone()),
            kinesis: KinesisService::new(self.clone()),
            lambda: LambdaService::new(
                self.clone(),
                format!("arn:aws:iam::{}:role/lambda-role", ACCOUNT),
            )
            .with_environment(HandlerConfig::default().to_env()),
            dynamo: DynamoService::new(self.clone()),
            glue: GlueService::new(self.clone(), format!("arn:aws:iam::{}:role/glue-role", ACCOUNT)),
            aurora: AuroraService::new(self.clone()),
            cloudwatch: CloudWatchService::new(self.clone()),
            api_gateway: ApiGatewayService::new(self.clone()),
        }
    }

    pub fn iam(self: &Arc<Self>) -> IamService {
        IamService::new(self.clone())
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.buckets.lock().unwrap().get(bucket)?.get(key).cloned()
    }

    pub fn object_keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .lock()
            .unwrap()
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn call(&self, line: String) -> Result<()> {
        let failing = self
            .fail_on
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|prefix| line.starts_with(prefix.as_str()));
        self.log.lock().unwrap().push(line.clone());
        if failing {
            bail!("injected failure: {}", line);
        }
        Ok(())
    }

    fn next_id(&self, prefix: &str) -> String {
        let mut counter = self.counter.lock().unwrap();
        *counter += 1;
        format!("{}-{}", prefix, counter)
    }
}

pub fn function_arn(name: &str) -> String {
    format!("arn:aws:lambda:{}:{}:function:{}", REGION, ACCOUNT, name)
}

pub fn stream_arn(name: &str) -> String {
    format!("arn:aws:kinesis:{}:{}:stream/{}", REGION, ACCOUNT, name)
}

fn key_id(key: &Item) -> Result<String> {
    match key.get(TABLE_KEY) {
        Some(AttributeValue::S(id)) => Ok(id.clone()),
        other => bail!("bad key {:?}", other),
    }
}

#[async_trait]
impl S3Api for FakeCloud {
    async fn create_bucket(&self, bucket: &str) -> Result<bool> {
        self.call(format!("create_bucket {}", bucket))?;
        let mut buckets = self.buckets.lock().unwrap();
        if buckets.contains_key(bucket) {
            return Ok(false);
        }
        buckets.insert(bucket.to_string(), BTreeMap::new());
        Ok(true)
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()> {
        self.call(format!("put_object {}/{}", bucket, key))?;
        match self.buckets.lock().unwrap().get_mut(bucket) {
            Some(objects) => {
                objects.insert(key.to_string(), body);
                Ok(())
            }
            None => bail!("NoSuchBucket: {}", bucket),
        }
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<bool> {
        self.call(format!("delete_bucket {}", bucket))?;
        let mut buckets = self.buckets.lock().unwrap();
        match buckets.get(bucket) {
            Some(objects) if !objects.is_empty() => bail!("BucketNotEmpty: {}", bucket),
            Some(_) => Ok(buckets.remove(bucket).is_some()),
            None => Ok(false),
        }
    }

    async fn list_keys(&self, bucket: &str) -> Result<Option<Vec<String>>> {
        self.call(format!("list_keys {}", bucket))?;
        Ok(self
            .buckets
            .lock()
            .unwrap()
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect()))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.call(format!("delete_object {}/{}", bucket, key))?;
        if let Some(objects) = self.buckets.lock().unwrap().get_mut(bucket) {
            objects.remove(key);
        }
        Ok(())
    }
}

#[async_trait]
impl KinesisApi for FakeCloud {
    async fn create_stream(&self, name: &str, shard_count: i32) -> Result<bool> {
        self.call(format!("create_stream {} shards={}", name, shard_count))?;
        let mut streams = self.streams.lock().unwrap();
        if streams.contains_key(name) {
            return Ok(false);
        }
        streams.insert(name.to_string(), Vec::new());
        Ok(true)
    }

    async fn delete_stream(&self, name: &str) -> Result<bool> {
        self.call(format!("delete_stream {}", name))?;
        Ok(self.streams.lock().unwrap().remove(name).is_some())
    }

    async fn put_record(&self, name: &str, partition_key: &str, data: Vec<u8>) -> Result<()> {
        self.call(format!("put_record {} {}", name, partition_key))?;
        match self.streams.lock().unwrap().get_mut(name) {
            Some(records) => {
                records.push((partition_key.to_string(), data));
                Ok(())
            }
            None => bail!("ResourceNotFoundException: stream {}", name),
        }
    }

    async fn describe_stream(&self, name: &str) -> Result<Option<StreamInfo>> {
        self.call(format!("describe_stream {}", name))?;
        Ok(self
            .streams
            .lock()
            .unwrap()
            .contains_key(name)
            .then(|| StreamInfo {
                arn: stream_arn(name),
                status: "ACTIVE".to_string(),
            }))
    }
}

#[async_trait]
impl LambdaApi for FakeCloud {
    async fn create_function(&self, spec: &FunctionSpec) -> Result<Option<String>> {
        self.call(format!("create_function {}", spec.name))?;
        let mut functions = self.functions.lock().unwrap();
        if functions.contains_key(&spec.name) {
            return Ok(None);
        }
        functions.insert(spec.name.clone(), spec.clone());
        Ok(Some(function_arn(&spec.name)))
    }

    async fn get_function(&self, name: &str) -> Result<Option<(String, FunctionState)>> {
        self.call(format!("get_function {}", name))?;
        Ok(self
            .functions
            .lock()
            .unwrap()
            .contains_key(name)
            .then(|| (function_arn(name), FunctionState::Active)))
    }

    async fn delete_function(&self, name: &str) -> Result<bool> {
        self.call(format!("delete_function {}", name))?;
        Ok(self.functions.lock().unwrap().remove(name).is_some())
    }

    async fn create_event_source_mapping(&self, spec: &MappingSpec) -> Result<Option<String>> {
        self.call(format!("create_event_source_mapping {}", spec.function))?;
        let mut mappings = self.mappings.lock().unwrap();
        if mappings.contains(spec) {
            return Ok(None);
        }
        mappings.push(spec.clone());
        Ok(Some(self.next_id("mapping")))
    }

    async fn add_permission(
        &self,
        name: &str,
        statement_id: &str,
        _principal: &str,
        source_arn: &str,
    ) -> Result<bool> {
        self.call(format!("add_permission {} {}", name, statement_id))?;
        let mut permissions = self.permissions.lock().unwrap();
        let entry = (name.to_string(), source_arn.to_string());
        if permissions.contains(&entry) {
            return Ok(false);
        }
        permissions.push(entry);
        Ok(true)
    }
}

#[async_trait]
impl DynamoApi for FakeCloud {
    async fn create_table(&self, name: &str) -> Result<bool> {
        self.call(format!("create_table {}", name))?;
        let mut tables = self.tables.lock().unwrap();
        if tables.contains_key(name) {
            return Ok(false);
        }
        tables.insert(name.to_string(), HashMap::new());
        Ok(true)
    }

    async fn add_replicas(&self, name: &str, regions: &[&str]) -> Result<()> {
        self.call(format!("add_replicas {} {}", name, regions.join(",")))
    }

    async fn delete_table(&self, name: &str) -> Result<bool> {
        self.call(format!("delete_table {}", name))?;
        Ok(self.tables.lock().unwrap().remove(name).is_some())
    }

    async fn describe_table(&self, name: &str) -> Result<Option<String>> {
        self.call(format!("describe_table {}", name))?;
        Ok(self
            .tables
            .lock()
            .unwrap()
            .contains_key(name)
            .then(|| "ACTIVE".to_string()))
    }

    async fn put_item(&self, name: &str, item: Item) -> Result<()> {
        let id = key_id(&item)?;
        self.call(format!("put_item {} {}", name, id))?;
        match self.tables.lock().unwrap().get_mut(name) {
            Some(items) => {
                items.insert(id, item);
                Ok(())
            }
            None => bail!("ResourceNotFoundException: table {}", name),
        }
    }

    async fn get_item(&self, name: &str, key: Item) -> Result<Option<Item>> {
        let id = key_id(&key)?;
        self.call(format!("get_item {} {}", name, id))?;
        match self.tables.lock().unwrap().get(name) {
            Some(items) => Ok(items.get(&id).cloned()),
            None => bail!("ResourceNotFoundException: table {}", name),
        }
    }

    async fn delete_item(&self, name: &str, key: Item) -> Result<()> {
        let id = key_id(&key)?;
        self.call(format!("delete_item {} {}", name, id))?;
        if let Some(items) = self.tables.lock().unwrap().get_mut(name) {
            items.remove(&id);
        }
        Ok(())
    }
}

#[async_trait]
impl GlueApi for FakeCloud {
    async fn create_job(&self, spec: &JobSpec) -> Result<bool> {
        self.call(format!("create_job {}", spec.name))?;
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.iter().any(|job| job.name == spec.name) {
            return Ok(false);
        }
        jobs.push(spec.clone());
        Ok(true)
    }

    async fn start_job_run(&self, name: &str) -> Result<String> {
        self.call(format!("start_job_run {}", name))?;
        Ok(self.next_id("jr"))
    }

    async fn job_run_state(&self, name: &str, run_id: &str) -> Result<String> {
        self.call(format!("job_run_state {} {}", name, run_id))?;
        Ok("SUCCEEDED".to_string())
    }
}

#[async_trait]
impl AuroraApi for FakeCloud {
    async fn create_db_cluster(&self, spec: &ClusterSpec) -> Result<Option<ClusterInfo>> {
        self.call(format!("create_db_cluster {}", spec.identifier))?;
        let mut clusters = self.clusters.lock().unwrap();
        if clusters.contains_key(&spec.identifier) {
            return Ok(None);
        }
        let arn = format!("arn:aws:rds:{}:{}:cluster:{}", REGION, ACCOUNT, spec.identifier);
        clusters.insert(spec.identifier.clone(), arn.clone());
        Ok(Some((arn, "creating".to_string())))
    }

    async fn describe_db_cluster(&self, identifier: &str) -> Result<Option<ClusterInfo>> {
        self.call(format!("describe_db_cluster {}", identifier))?;
        Ok(self
            .clusters
            .lock()
            .unwrap()
            .get(identifier)
            .map(|arn| (arn.clone(), "available".to_string())))
    }

    async fn create_secret(&self, name: &str, secret: &str) -> Result<Option<String>> {
        self.call(format!("create_secret {}", name))?;
        let mut secrets = self.secrets.lock().unwrap();
        if secrets.contains_key(name) {
            return Ok(None);
        }
        secrets.insert(name.to_string(), secret.to_string());
        Ok(Some(secret_arn(name)))
    }

    async fn secret_arn(&self, name: &str) -> Result<String> {
        self.call(format!("secret_arn {}", name))?;
        Ok(secret_arn(name))
    }

    async fn execute_statement(
        &self,
        cluster_arn: &str,
        _secret_arn: &str,
        database: &str,
        sql: &str,
    ) -> Result<i64> {
        self.call(format!("execute_statement {} {}", cluster_arn, database))?;
        self.statements.lock().unwrap().push(sql.to_string());
        Ok(0)
    }
}

fn secret_arn(name: &str) -> String {
    format!("arn:aws:secretsmanager:{}:{}:secret:{}", REGION, ACCOUNT, name)
}

#[async_trait]
impl CloudWatchApi for FakeCloud {
    async fn put_metric_alarm(&self, spec: &AlarmSpec) -> Result<()> {
        self.call(format!("put_metric_alarm {}", spec.alarm_name))?;
        self.alarms.lock().unwrap().push(spec.clone());
        Ok(())
    }

    async fn put_metric_data(&self, namespace: &str, metric: &str, value: f64) -> Result<()> {
        self.call(format!("put_metric_data {}/{}", namespace, metric))?;
        self.metrics
            .lock()
            .unwrap()
            .push((namespace.to_string(), metric.to_string(), value));
        Ok(())
    }
}

#[async_trait]
impl ApiGatewayApi for FakeCloud {
    async fn create_api(&self, name: &str, protocol: ApiProtocol) -> Result<String> {
        self.call(format!("create_api {}", name))?;
        let id = self.next_id("api");
        self.apis
            .lock()
            .unwrap()
            .push((name.to_string(), id.clone(), protocol));
        Ok(id)
    }

    async fn list_apis(&self) -> Result<Vec<(String, String)>> {
        self.call("list_apis".to_string())?;
        Ok(self
            .apis
            .lock()
            .unwrap()
            .iter()
            .map(|(name, id, _)| (name.clone(), id.clone()))
            .collect())
    }

    async fn create_integration(&self, spec: &IntegrationSpec) -> Result<String> {
        self.call(format!("create_integration {}", spec.api_id))?;
        self.integrations.lock().unwrap().push(spec.clone());
        Ok(self.next_id("integration"))
    }

    async fn list_routes(&self, api_id: &str) -> Result<Vec<(String, String)>> {
        self.call(format!("list_routes {}", api_id))?;
        Ok(self
            .route_ids
            .lock()
            .unwrap()
            .iter()
            .filter(|((api, _), _)| api == api_id)
            .map(|((_, key), id)| (key.clone(), id.clone()))
            .collect())
    }

    async fn create_route(&self, spec: &RouteSpec) -> Result<String> {
        self.call(format!("create_route {} {}", spec.api_id, spec.route_key))?;
        let key = (spec.api_id.clone(), spec.route_key.clone());
        if self.route_ids.lock().unwrap().contains_key(&key) {
            bail!("ConflictException: route {} already exists", spec.route_key);
        }
        let id = self.next_id("route");
        self.route_ids.lock().unwrap().insert(key, id.clone());
        self.routes.lock().unwrap().push(spec.clone());
        Ok(id)
    }

    async fn create_stage(&self, api_id: &str, stage: &str) -> Result<bool> {
        self.call(format!("create_stage {} {}", api_id, stage))?;
        Ok(true)
    }

    async fn create_deployment(&self, api_id: &str, stage: &str) -> Result<String> {
        self.call(format!("create_deployment {} {}", api_id, stage))?;
        Ok(self.next_id("deployment"))
    }

    async fn delete_api(&self, api_id: &str) -> Result<bool> {
        self.call(format!("delete_api {}", api_id))?;
        let mut apis = self.apis.lock().unwrap();
        let before = apis.len();
        apis.retain(|(_, id, _)| id != api_id);
        Ok(apis.len() < before)
    }
}

#[async_trait]
impl IamApi for FakeCloud {
    async fn create_role(&self, name: &str, trust_policy: &str) -> Result<Option<RoleInfo>> {
        self.call(format!("create_role {}", name))?;
        let mut roles = self.roles.lock().unwrap();
        if roles.contains_key(name) {
            return Ok(None);
        }
        roles.insert(name.to_string(), trust_policy.to_string());
        Ok(Some(role_info(name)))
    }

    async fn get_role(&self, name: &str) -> Result<RoleInfo> {
        self.call(format!("get_role {}", name))?;
        if !self.roles.lock().unwrap().contains_key(name) {
            bail!("NoSuchEntity: role {}", name);
        }
        Ok(role_info(name))
    }

    async fn create_policy(&self, name: &str, document: &str) -> Result<Option<String>> {
        self.call(format!("create_policy {}", name))?;
        let mut policies = self.policies.lock().unwrap();
        if policies.contains_key(name) {
            return Ok(None);
        }
        policies.insert(name.to_string(), document.to_string());
        Ok(Some(policy_arn(name)))
    }

    async fn attach_role_policy(&self, role: &str, policy_arn: &str) -> Result<()> {
        self.call(format!("attach_role_policy {}", role))?;
        self.attachments
            .lock()
            .unwrap()
            .push((role.to_string(), policy_arn.to_string()));
        Ok(())
    }
}

fn role_info(name: &str) -> RoleInfo {
    RoleInfo {
        name: name.to_string(),
        arn: format!("arn:aws:iam::{}:role/{}", ACCOUNT, name),
    }
}

pub fn policy_arn(name: &str) -> String {
    format!("arn:aws:iam::{}:policy/{}", ACCOUNT, name)
}
