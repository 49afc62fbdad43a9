use super::has_code;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_sdk_apigatewayv2::types::{IntegrationType, ParameterConstraints, ProtocolType};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Stage every deployment goes into
pub const DEFAULT_STAGE: &str = "dev";

const ROUTE_SELECTION: &str = "$request.body.action";
const CONFLICT: &[&str] = &["ConflictException"];
const NOT_FOUND: &[&str] = &["NotFoundException"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiProtocol {
    WebSocket,
    Http,
}

impl ApiProtocol {
    fn payload_format_version(&self) -> &'static str {
        match self {
            ApiProtocol::WebSocket => "1.0",
            ApiProtocol::Http => "2.0",
        }
    }
}

/// A route wired to a Lambda proxy integration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointOptions {
    pub protocol: ApiProtocol,
    /// WebSocket route key, or the HTTP path
    pub path: String,
    pub method: String,
    /// Integration target, usually [`lambda_invocation_uri`]
    pub uri: String,
    /// Required request parameters, e.g. `route.request.querystring.id`
    pub request_parameters: Vec<String>,
}

impl EndpointOptions {
    pub fn route_key(&self) -> String {
        match self.protocol {
            ApiProtocol::WebSocket => self.path.clone(),
            ApiProtocol::Http => format!("{} {}", self.method, self.path),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationSpec {
    pub api_id: String,
    pub uri: String,
    pub payload_format_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSpec {
    pub api_id: String,
    pub route_key: String,
    pub target: String,
    pub required_parameters: Vec<String>,
}

/// `arn:aws:apigateway:<region>:lambda:path/2015-03-31/functions/<arn>/invocations`
pub fn lambda_invocation_uri(region: &str, function_arn: &str) -> String {
    format!(
        "arn:aws:apigateway:{}:lambda:path/2015-03-31/functions/{}/invocations",
        region, function_arn
    )
}

/// Source ARN covering every route and stage of an API
pub fn execute_api_arn(region: &str, account: &str, api_id: &str) -> String {
    format!("arn:aws:execute-api:{}:{}:{}/*", region, account, api_id)
}

#[async_trait]
pub trait ApiGatewayApi: Send + Sync {
    async fn create_api(&self, name: &str, protocol: ApiProtocol) -> Result<String>;
    /// Name → id of every API in the account
    async fn list_apis(&self) -> Result<Vec<(String, String)>>;
    async fn create_integration(&self, spec: &IntegrationSpec) -> Result<String>;
    /// Route key → id of every route on the API
    async fn list_routes(&self, api_id: &str) -> Result<Vec<(String, String)>>;
    async fn create_route(&self, spec: &RouteSpec) -> Result<String>;
    /// Returns false if the stage already existed
    async fn create_stage(&self, api_id: &str, stage: &str) -> Result<bool>;
    async fn create_deployment(&self, api_id: &str, stage: &str) -> Result<String>;
    /// Returns false if the API did not exist
    async fn delete_api(&self, api_id: &str) -> Result<bool>;
}

#[async_trait]
impl ApiGatewayApi for aws_sdk_apigatewayv2::Client {
    async fn create_api(&self, name: &str, protocol: ApiProtocol) -> Result<String> {
        let mut request = self.create_api().name(name);
        request = match protocol {
            ApiProtocol::WebSocket => request
                .protocol_type(ProtocolType::Websocket)
                .route_selection_expression(ROUTE_SELECTION),
            ApiProtocol::Http => request.protocol_type(ProtocolType::Http),
        };
        let output = request
            .send()
            .await
            .with_context(|| format!("failed to create api {}", name))?;
        output
            .api_id()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("create-api returned no id for {}", name))
    }

    async fn list_apis(&self) -> Result<Vec<(String, String)>> {
        let mut apis = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let output = self
                .get_apis()
                .set_next_token(token.take())
                .send()
                .await
                .context("failed to list apis")?;
            apis.extend(output.items().iter().filter_map(|api| {
                api.api_id()
                    .zip(api.name())
                    .map(|(id, name)| (name.to_string(), id.to_string()))
            }));
            match output.next_token() {
                Some(next) => token = Some(next.to_string()),
                None => break,
            }
        }
        Ok(apis)
    }

    async fn create_integration(&self, spec: &IntegrationSpec) -> Result<String> {
        let output = self
            .create_integration()
            .api_id(&spec.api_id)
            .integration_type(IntegrationType::AwsProxy)
            .integration_method("POST")
            .integration_uri(&spec.uri)
            .payload_format_version(&spec.payload_format_version)
            .send()
            .await
            .with_context(|| format!("failed to create integration on {}", spec.api_id))?;
        output
            .integration_id()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("create-integration returned no id"))
    }

    async fn list_routes(&self, api_id: &str) -> Result<Vec<(String, String)>> {
        let mut routes = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let output = self
                .get_routes()
                .api_id(api_id)
                .set_next_token(token.take())
                .send()
                .await
                .with_context(|| format!("failed to list routes on {}", api_id))?;
            routes.extend(output.items().iter().filter_map(|route| {
                route
                    .route_key()
                    .zip(route.route_id())
                    .map(|(key, id)| (key.to_string(), id.to_string()))
            }));
            match output.next_token() {
                Some(next) => token = Some(next.to_string()),
                None => break,
            }
        }
        Ok(routes)
    }

    async fn create_route(&self, spec: &RouteSpec) -> Result<String> {
        let parameters: HashMap<String, ParameterConstraints> = spec
            .required_parameters
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    ParameterConstraints::builder().required(true).build(),
                )
            })
            .collect();
        let mut request = self
            .create_route()
            .api_id(&spec.api_id)
            .route_key(&spec.route_key)
            .target(&spec.target);
        if !parameters.is_empty() {
            request = request.set_request_parameters(Some(parameters));
        }
        let output = request.send().await.with_context(|| {
            format!("failed to create route {} on {}", spec.route_key, spec.api_id)
        })?;
        output
            .route_id()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("create-route returned no id for {}", spec.route_key))
    }

    async fn create_stage(&self, api_id: &str, stage: &str) -> Result<bool> {
        match self
            .create_stage()
            .api_id(api_id)
            .stage_name(stage)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if has_code(&err, CONFLICT) => Ok(false),
            Err(err) => {
                Err(err).with_context(|| format!("failed to create stage {} on {}", stage, api_id))
            }
        }
    }

    async fn create_deployment(&self, api_id: &str, stage: &str) -> Result<String> {
        let output = self
            .create_deployment()
            .api_id(api_id)
            .stage_name(stage)
            .send()
            .await
            .with_context(|| format!("failed to deploy {} to {}", api_id, stage))?;
        output
            .deployment_id()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("create-deployment returned no id for {}", api_id))
    }

    async fn delete_api(&self, api_id: &str) -> Result<bool> {
        match self.delete_api().api_id(api_id).send().await {
            Ok(_) => Ok(true),
            Err(err) if has_code(&err, NOT_FOUND) => Ok(false),
            Err(err) => Err(err).with_context(|| format!("failed to delete api {}", api_id)),
        }
    }
}

/// HTTP and WebSocket API adapter
#[derive(Clone)]
pub struct ApiGatewayService {
    client: Arc<dyn ApiGatewayApi>,
}

impl ApiGatewayService {
    pub fn new(client: Arc<dyn ApiGatewayApi>) -> Self {
        Self { client }
    }

    pub fn from_client(client: aws_sdk_apigatewayv2::Client) -> Self {
        Self::new(Arc::new(client))
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<String>> {
        Ok(self
            .client
            .list_apis()
            .await?
            .into_iter()
            .find(|(api_name, _)| api_name == name)
            .map(|(_, id)| id))
    }

    /// API names are not unique, so an API with the same name is reused
    async fn create_api(&self, name: &str, protocol: ApiProtocol) -> Result<String> {
        if let Some(id) = self.find_by_name(name).await? {
            debug!(api = %name, id = %id, "api exists, reusing");
            return Ok(id);
        }
        let id = self.client.create_api(name, protocol).await?;
        info!(api = %name, id = %id, ?protocol, "created api");
        Ok(id)
    }

    pub async fn create_websocket_api(&self, name: &str) -> Result<String> {
        self.create_api(name, ApiProtocol::WebSocket).await
    }

    pub async fn create_http_api(&self, name: &str) -> Result<String> {
        self.create_api(name, ApiProtocol::Http).await
    }

    /// Proxy integration to `options.uri` plus a route targeting it.
    /// Returns the route id. A route with the same key is kept as is.
    pub async fn create_endpoint(&self, api_id: &str, options: &EndpointOptions) -> Result<String> {
        let route_key = options.route_key();
        if let Some((_, route_id)) = self
            .client
            .list_routes(api_id)
            .await?
            .into_iter()
            .find(|(key, _)| *key == route_key)
        {
            debug!(api_id, route = %route_key, route_id = %route_id, "route exists, reusing");
            return Ok(route_id);
        }

        let integration = IntegrationSpec {
            api_id: api_id.to_string(),
            uri: options.uri.clone(),
            payload_format_version: options.protocol.payload_format_version().to_string(),
        };
        let integration_id = self.client.create_integration(&integration).await?;

        // route request parameters are a WebSocket-only feature
        let required_parameters = match options.protocol {
            ApiProtocol::WebSocket => options.request_parameters.clone(),
            ApiProtocol::Http => {
                if !options.request_parameters.is_empty() {
                    debug!(
                        parameters = ?options.request_parameters,
                        "http route parameters are checked by the handler"
                    );
                }
                Vec::new()
            }
        };
        let route = RouteSpec {
            api_id: api_id.to_string(),
            route_key,
            target: format!("integrations/{}", integration_id),
            required_parameters,
        };
        let route_id = self.client.create_route(&route).await?;
        info!(api_id, route = %route.route_key, route_id = %route_id, "created route");
        Ok(route_id)
    }

    pub async fn create_websocket(&self, api_id: &str, options: &EndpointOptions) -> Result<String> {
        let options = EndpointOptions {
            protocol: ApiProtocol::WebSocket,
            ..options.clone()
        };
        self.create_endpoint(api_id, &options).await
    }

    /// Deploy into the `dev` stage and return the deployment id
    pub async fn deploy(&self, api_id: &str) -> Result<String> {
        self.client.create_stage(api_id, DEFAULT_STAGE).await?;
        let deployment = self.client.create_deployment(api_id, DEFAULT_STAGE).await?;
        info!(api_id, stage = DEFAULT_STAGE, deployment = %deployment, "deployed api");
        Ok(deployment)
    }

    pub async fn delete(&self, api_id: &str) -> Result<bool> {
        self.client.delete_api(api_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use crate::aws::testing::CallLog;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockApiGateway {
        log: CallLog,
        apis: Mutex<Vec<(String, String)>>,
        routes: Mutex<Vec<RouteSpec>>,
        integrations: Mutex<Vec<IntegrationSpec>>,
        stages: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ApiGatewayApi for MockApiGateway {
        async fn create_api(&self, name: &str, protocol: ApiProtocol) -> Result<String> {
            self.log.push(format!("create_api {} {:?}", name, protocol));
            let mut apis = self.apis.lock().unwrap();
            let id = format!("api{}", apis.len() + 1);
            apis.push((name.to_string(), id.clone()));
            Ok(id)
        }

        async fn list_apis(&self) -> Result<Vec<(String, String)>> {
            Ok(self.apis.lock().unwrap().clone())
        }

        async fn create_integration(&self, spec: &IntegrationSpec) -> Result<String> {
            let mut integrations = self.integrations.lock().unwrap();
            integrations.push(spec.clone());
            Ok(format!("int{}", integrations.len()))
        }

        async fn list_routes(&self, api_id: &str) -> Result<Vec<(String, String)>> {
            Ok(self
                .routes
                .lock()
                .unwrap()
                .iter()
                .enumerate()
                .filter(|(_, route)| route.api_id == api_id)
                .map(|(n, route)| (route.route_key.clone(), format!("route{}", n + 1)))
                .collect())
        }

        async fn create_route(&self, spec: &RouteSpec) -> Result<String> {
            let mut routes = self.routes.lock().unwrap();
            if routes
                .iter()
                .any(|r| r.api_id == spec.api_id && r.route_key == spec.route_key)
            {
                bail!("ConflictException: route {} exists", spec.route_key);
            }
            routes.push(spec.clone());
            Ok(format!("route{}", routes.len()))
        }

        async fn create_stage(&self, api_id: &str, stage: &str) -> Result<bool> {
            self.log.push(format!("create_stage {} {}", api_id, stage));
            let mut stages = self.stages.lock().unwrap();
            let key = (api_id.to_string(), stage.to_string());
            if stages.contains(&key) {
                return Ok(false);
            }
            stages.push(key);
            Ok(true)
        }

        async fn create_deployment(&self, api_id: &str, stage: &str) -> Result<String> {
            self.log.push(format!("create_deployment {} {}", api_id, stage));
            Ok("dep1".to_string())
        }

        async fn delete_api(&self, api_id: &str) -> Result<bool> {
            let mut apis = self.apis.lock().unwrap();
            let before = apis.len();
            apis.retain(|(_, id)| id != api_id);
            Ok(apis.len() != before)
        }
    }

    const FUNCTION_ARN: &str = "arn:aws:lambda:us-east-1:000000000000:function:DynamoGetter";

    #[test]
    fn test_lambda_invocation_uri() {
        assert_eq!(
            lambda_invocation_uri("us-east-1", FUNCTION_ARN),
            "arn:aws:apigateway:us-east-1:lambda:path/2015-03-31/functions/arn:aws:lambda:us-east-1:000000000000:function:DynamoGetter/invocations"
        );
    }

    #[test]
    fn test_execute_api_arn() {
        assert_eq!(
            execute_api_arn("us-east-1", "000000000000", "abc123"),
            "arn:aws:execute-api:us-east-1:000000000000:abc123/*"
        );
    }

    #[tokio::test]
    async fn test_create_api_reuses_existing_name() {
        let mock = Arc::new(MockApiGateway::default());
        let gateway = ApiGatewayService::new(mock.clone());

        let first = gateway.create_websocket_api("my-kinesis-api").await.unwrap();
        let second = gateway.create_websocket_api("my-kinesis-api").await.unwrap();
        let http = gateway.create_http_api("dynamo-getter").await.unwrap();

        assert_eq!(first, second);
        assert_ne!(first, http);
        assert_eq!(
            mock.log.calls(),
            [
                "create_api my-kinesis-api WebSocket",
                "create_api dynamo-getter Http"
            ]
        );
    }

    #[tokio::test]
    async fn test_http_endpoint_route_key_and_target() {
        let mock = Arc::new(MockApiGateway::default());
        let gateway = ApiGatewayService::new(mock.clone());
        let options = EndpointOptions {
            protocol: ApiProtocol::Http,
            path: "/dynamo-getter".to_string(),
            method: "GET".to_string(),
            uri: lambda_invocation_uri("us-east-1", FUNCTION_ARN),
            request_parameters: vec!["route.request.querystring.id".to_string()],
        };

        gateway.create_endpoint("api1", &options).await.unwrap();

        let routes = mock.routes.lock().unwrap();
        assert_eq!(routes[0].route_key, "GET /dynamo-getter");
        assert_eq!(routes[0].target, "integrations/int1");
        assert!(routes[0].required_parameters.is_empty());
        let integrations = mock.integrations.lock().unwrap();
        assert_eq!(integrations[0].uri, options.uri);
        assert_eq!(integrations[0].payload_format_version, "2.0");
    }

    #[tokio::test]
    async fn test_websocket_endpoint_keeps_parameters() {
        let mock = Arc::new(MockApiGateway::default());
        let gateway = ApiGatewayService::new(mock.clone());
        let options = EndpointOptions {
            protocol: ApiProtocol::Http,
            path: "kinesis-data-forwarder".to_string(),
            method: "POST".to_string(),
            uri: "uri".to_string(),
            request_parameters: vec!["route.request.header.x-id".to_string()],
        };

        gateway.create_websocket("api1", &options).await.unwrap();

        let routes = mock.routes.lock().unwrap();
        assert_eq!(routes[0].route_key, "kinesis-data-forwarder");
        assert_eq!(routes[0].required_parameters, ["route.request.header.x-id"]);
        assert_eq!(
            mock.integrations.lock().unwrap()[0].payload_format_version,
            "1.0"
        );
    }

    #[tokio::test]
    async fn test_existing_route_is_reused() {
        let mock = Arc::new(MockApiGateway::default());
        let gateway = ApiGatewayService::new(mock.clone());
        let options = EndpointOptions {
            protocol: ApiProtocol::WebSocket,
            path: "kinesis-data-forwarder".to_string(),
            method: "POST".to_string(),
            uri: "uri".to_string(),
            request_parameters: Vec::new(),
        };

        let first = gateway.create_websocket("api1", &options).await.unwrap();
        let second = gateway.create_websocket("api1", &options).await.unwrap();
        let other_api = gateway.create_websocket("api2", &options).await.unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other_api);
        assert_eq!(mock.routes.lock().unwrap().len(), 2);
        assert_eq!(mock.integrations.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_deploy_tolerates_existing_stage() {
        let mock = Arc::new(MockApiGateway::default());
        let gateway = ApiGatewayService::new(mock.clone());

        gateway.deploy("api1").await.unwrap();
        gateway.deploy("api1").await.unwrap();

        assert_eq!(
            mock.log.calls(),
            [
                "create_stage api1 dev",
                "create_deployment api1 dev",
                "create_stage api1 dev",
                "create_deployment api1 dev",
            ]
        );
    }

    #[tokio::test]
    async fn test_find_and_delete() {
        let mock = Arc::new(MockApiGateway::default());
        let gateway = ApiGatewayService::new(mock);
        let id = gateway.create_http_api("dynamo-getter").await.unwrap();

        assert_eq!(
            gateway.find_by_name("dynamo-getter").await.unwrap(),
            Some(id.clone())
        );
        assert!(gateway.delete(&id).await.unwrap());
        assert_eq!(gateway.find_by_name("dynamo-getter").await.unwrap(), None);
        assert!(!gateway.delete(&id).await.unwrap());
    }
}
