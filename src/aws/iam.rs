use super::{account_from_arn, has_code};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_config::sts::AssumeRoleProvider;
use aws_config::SdkConfig;
use aws_credential_types::provider::SharedCredentialsProvider;
use std::sync::Arc;
use tracing::{debug, info};

const ENTITY_EXISTS: &[&str] = &["EntityAlreadyExists"];

/// A service the pipeline provisions with its own role and policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceRole {
    S3,
    Kinesis,
    Lambda,
    DynamoDb,
    Glue,
    Rds,
    ApiGateway,
    CloudWatch,
}

impl ServiceRole {
    pub const ALL: [ServiceRole; 8] = [
        ServiceRole::S3,
        ServiceRole::Kinesis,
        ServiceRole::Lambda,
        ServiceRole::DynamoDb,
        ServiceRole::Glue,
        ServiceRole::Rds,
        ServiceRole::ApiGateway,
        ServiceRole::CloudWatch,
    ];

    pub fn service(&self) -> &'static str {
        match self {
            ServiceRole::S3 => "s3",
            ServiceRole::Kinesis => "kinesis",
            ServiceRole::Lambda => "lambda",
            ServiceRole::DynamoDb => "dynamodb",
            ServiceRole::Glue => "glue",
            ServiceRole::Rds => "rds",
            ServiceRole::ApiGateway => "apigatewayv2",
            ServiceRole::CloudWatch => "cloudwatch",
        }
    }

    pub fn role_name(&self) -> String {
        format!("{}-role", self.service())
    }

    pub fn policy_name(&self) -> String {
        format!("{}-policy", self.role_name())
    }
}

/// Trust policy: any principal may assume the role
pub fn trust_policy() -> serde_json::Value {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Action": "sts:AssumeRole",
            "Principal": "*",
            "Effect": "Allow"
        }]
    })
}

/// Permission policy attached to each service role
pub fn policy_document(role: ServiceRole) -> serde_json::Value {
    let (actions, resource): (&[&str], serde_json::Value) = match role {
        ServiceRole::S3 => (
            &[
                "s3:PutObject",
                "s3:GetObject",
                "s3:CreateBucket",
                "s3:DeleteBucket",
                "s3:DeleteObject",
                "s3:ListBucket",
            ],
            serde_json::json!(["arn:aws:s3:::*/*", "arn:aws:s3:::*"]),
        ),
        ServiceRole::Kinesis => (
            &[
                "kinesis:CreateStream",
                "kinesis:DeleteStream",
                "kinesis:PutRecord",
                "kinesis:DescribeStream",
            ],
            serde_json::json!("*"),
        ),
        ServiceRole::Lambda => (
            &[
                "lambda:CreateFunction",
                "lambda:DeleteFunction",
                "lambda:GetFunction",
                "lambda:GetFunctionConfiguration",
                "lambda:AddPermission",
                "lambda:CreateEventSourceMapping",
                "iam:PassRole",
                "logs:CreateLogGroup",
                "logs:CreateLogStream",
                "logs:PutLogEvents",
                "s3:PutObject",
                "s3:GetObject",
                "dynamodb:PutItem",
                "dynamodb:GetItem",
                "kinesis:GetRecords",
                "kinesis:GetShardIterator",
                "kinesis:DescribeStream",
                "kinesis:ListShards",
                "kinesis:PutRecord",
                "cloudwatch:PutMetricData",
            ],
            serde_json::json!("*"),
        ),
        ServiceRole::DynamoDb => (
            &[
                "dynamodb:CreateTable",
                "dynamodb:DeleteTable",
                "dynamodb:PutItem",
                "dynamodb:GetItem",
                "dynamodb:DeleteItem",
                "dynamodb:UpdateTable",
                "dynamodb:DescribeTable",
                "iam:ListRolePolicies",
                "iam:GetRole",
                "iam:GetRolePolicy",
                "iam:PassRole",
            ],
            serde_json::json!("*"),
        ),
        ServiceRole::Glue => (
            &[
                "glue:*",
                "logs:CreateLogGroup",
                "logs:CreateLogStream",
                "logs:PutLogEvents",
                "rds:DescribeDBClusters",
                "secretsmanager:DescribeSecret",
                "rds-data:ExecuteStatement",
                "iam:ListRolePolicies",
                "iam:GetRole",
                "iam:GetRolePolicy",
                "iam:PassRole",
            ],
            serde_json::json!("*"),
        ),
        ServiceRole::Rds => (
            &[
                "rds:CreateDBCluster",
                "rds:CreateDBInstance",
                "rds:CreateDBSubnetGroup",
                "rds:CreateDBSecurityGroup",
                "rds:AddRoleToDBInstance",
                "rds:AddSourceIdentifierToSubscription",
                "rds:AddTagsToResource",
                "rds:DescribeDBClusters",
                "rds-data:ExecuteStatement",
                "secretsmanager:CreateSecret",
                "secretsmanager:DescribeSecret",
            ],
            serde_json::json!("*"),
        ),
        ServiceRole::ApiGateway => (&["apigateway:*"], serde_json::json!("*")),
        ServiceRole::CloudWatch => (
            &[
                "cloudwatch:PutMetricAlarm",
                "cloudwatch:PutMetricData",
                "cloudwatch:DescribeAlarms",
            ],
            serde_json::json!("*"),
        ),
    };

    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Action": actions,
            "Resource": resource
        }]
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleInfo {
    pub name: String,
    pub arn: String,
}

/// Role + attached policy created for one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedRole {
    pub role: ServiceRole,
    pub name: String,
    pub arn: String,
    pub policy_arn: String,
}

#[async_trait]
pub trait IamApi: Send + Sync {
    /// Returns None if the role already exists
    async fn create_role(&self, name: &str, trust_policy: &str) -> Result<Option<RoleInfo>>;
    async fn get_role(&self, name: &str) -> Result<RoleInfo>;
    /// Returns the policy ARN, or None if the policy already exists
    async fn create_policy(&self, name: &str, document: &str) -> Result<Option<String>>;
    async fn attach_role_policy(&self, role: &str, policy_arn: &str) -> Result<()>;
}

fn role_info(role: &aws_sdk_iam::types::Role) -> RoleInfo {
    RoleInfo {
        name: role.role_name().to_string(),
        arn: role.arn().to_string(),
    }
}

#[async_trait]
impl IamApi for aws_sdk_iam::Client {
    async fn create_role(&self, name: &str, trust_policy: &str) -> Result<Option<RoleInfo>> {
        match self
            .create_role()
            .role_name(name)
            .assume_role_policy_document(trust_policy)
            .send()
            .await
        {
            Ok(output) => output
                .role()
                .map(role_info)
                .map(Some)
                .ok_or_else(|| anyhow!("create-role returned no role for {}", name)),
            Err(err) if has_code(&err, ENTITY_EXISTS) => Ok(None),
            Err(err) => Err(err).with_context(|| format!("failed to create role {}", name)),
        }
    }

    async fn get_role(&self, name: &str) -> Result<RoleInfo> {
        let output = self
            .get_role()
            .role_name(name)
            .send()
            .await
            .with_context(|| format!("failed to get role {}", name))?;
        output
            .role()
            .map(role_info)
            .ok_or_else(|| anyhow!("get-role returned no role for {}", name))
    }

    async fn create_policy(&self, name: &str, document: &str) -> Result<Option<String>> {
        match self
            .create_policy()
            .policy_name(name)
            .policy_document(document)
            .send()
            .await
        {
            Ok(output) => output
                .policy()
                .and_then(|policy| policy.arn())
                .map(|arn| Some(arn.to_string()))
                .ok_or_else(|| anyhow!("create-policy returned no ARN for {}", name)),
            Err(err) if has_code(&err, ENTITY_EXISTS) => Ok(None),
            Err(err) => Err(err).with_context(|| format!("failed to create policy {}", name)),
        }
    }

    async fn attach_role_policy(&self, role: &str, policy_arn: &str) -> Result<()> {
        self.attach_role_policy()
            .role_name(role)
            .policy_arn(policy_arn)
            .send()
            .await
            .with_context(|| format!("failed to attach {} to role {}", policy_arn, role))?;
        Ok(())
    }
}

/// Identity adapter: roles and their policies
#[derive(Clone)]
pub struct IamService {
    client: Arc<dyn IamApi>,
}

impl IamService {
    pub fn new(client: Arc<dyn IamApi>) -> Self {
        Self { client }
    }

    pub fn from_conf(config: &SdkConfig) -> Self {
        Self::new(Arc::new(aws_sdk_iam::Client::new(config)))
    }

    /// Create the role for a service, create its policy, and attach the two.
    /// Existing roles and policies are reused.
    pub async fn create_role_with_policy(&self, role: ServiceRole) -> Result<ProvisionedRole> {
        let name = role.role_name();
        let trust = trust_policy().to_string();

        let info = match self.client.create_role(&name, &trust).await? {
            Some(info) => info,
            None => {
                debug!(role = %name, "role exists, reusing");
                self.client.get_role(&name).await?
            }
        };

        let policy_name = role.policy_name();
        let document = policy_document(role).to_string();
        let policy_arn = match self.client.create_policy(&policy_name, &document).await? {
            Some(arn) => arn,
            None => {
                let account = account_from_arn(&info.arn)
                    .ok_or_else(|| anyhow!("cannot read account id from {}", info.arn))?;
                format!("arn:aws:iam::{}:policy/{}", account, policy_name)
            }
        };

        self.client.attach_role_policy(&info.name, &policy_arn).await?;
        info!(role = %info.name, arn = %info.arn, "role ready");

        Ok(ProvisionedRole {
            role,
            name: info.name,
            arn: info.arn,
            policy_arn,
        })
    }
}

/// Derive SDK config whose credentials come from assuming `role_arn`.
/// The SDK identity cache refreshes the temporary credentials.
pub async fn assume_role(base: &SdkConfig, role_arn: &str, session_name: &str) -> SdkConfig {
    let provider = AssumeRoleProvider::builder(role_arn)
        .session_name(session_name)
        .configure(base)
        .build()
        .await;
    base.to_builder()
        .credentials_provider(SharedCredentialsProvider::new(provider))
        .build()
}
