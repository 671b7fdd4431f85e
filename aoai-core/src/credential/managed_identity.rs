use super::{AccessToken, CredentialError, CredentialProvider};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IMDS_API_VERSION: &str = "2018-02-01";
const APP_SERVICE_API_VERSION: &str = "2019-08-01";

/// 托管身份令牌端点
#[derive(Debug, Clone, PartialEq)]
enum IdentityEndpoint {
    /// 虚拟机 / AKS 的 IMDS
    Imds { url: String },
    /// App Service / Functions，由 IDENTITY_ENDPOINT 和 IDENTITY_HEADER 提供
    AppService { url: String, header: String },
}

/// Azure 托管身份凭证
pub struct ManagedIdentityCredential {
    client: Client,
    endpoint: IdentityEndpoint,
    resource: String,
    client_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ManagedIdentityTokenResponse {
    access_token: String,
    /// IMDS 以字符串返回unix时间戳
    #[serde(default)]
    expires_on: Option<serde_json::Value>,
}

impl ManagedIdentityCredential {
    pub fn new(resource: &str, client_id: Option<String>) -> Result<Self, CredentialError> {
        let endpoint = match (
            std::env::var("IDENTITY_ENDPOINT"),
            std::env::var("IDENTITY_HEADER"),
        ) {
            (Ok(url), Ok(header)) => IdentityEndpoint::AppService { url, header },
            _ => IdentityEndpoint::Imds {
                url: IMDS_ENDPOINT.to_string(),
            },
        };

        // IMDS 不可达时要尽快失败，以便链式凭证尝试下一个来源
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .timeout(Duration::from_secs(10))
            .no_proxy()
            .build()?;

        Ok(Self {
            client,
            endpoint,
            resource: resource.to_string(),
            client_id,
        })
    }

    /// 使用指定的 IMDS 兼容端点
    pub fn with_imds_endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint = IdentityEndpoint::Imds { url: url.into() };
        self
    }
}

#[async_trait]
impl CredentialProvider for ManagedIdentityCredential {
    fn name(&self) -> &'static str {
        "managed_identity"
    }

    async fn get_token(&self) -> Result<AccessToken, CredentialError> {
        let mut query = vec![("resource", self.resource.as_str())];
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.as_str()));
        }

        let request = match &self.endpoint {
            IdentityEndpoint::Imds { url } => {
                query.push(("api-version", IMDS_API_VERSION));
                self.client.get(url).header("Metadata", "true")
            }
            IdentityEndpoint::AppService { url, header } => {
                query.push(("api-version", APP_SERVICE_API_VERSION));
                self.client.get(url).header("X-IDENTITY-HEADER", header)
            }
        };

        debug!("Requesting managed identity token for resource {}", self.resource);

        let response = request
            .query(&query)
            .send()
            .await
            .map_err(|e| CredentialError::Unavailable {
                source_name: "managed_identity",
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::Unavailable {
                source_name: "managed_identity",
                message: format!("HTTP {}: {}", status, body),
            });
        }

        let body: ManagedIdentityTokenResponse = response.json().await?;
        let expires_on = body
            .expires_on
            .as_ref()
            .and_then(parse_expires_on)
            .unwrap_or_else(|| Utc::now() + chrono::Duration::minutes(5));

        Ok(AccessToken::new(body.access_token, Some(expires_on)))
    }
}

fn parse_expires_on(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    let seconds = match value {
        serde_json::Value::Number(n) => n.as_i64()?,
        serde_json::Value::String(s) => s.parse().ok()?,
        _ => return None,
    };
    DateTime::<Utc>::from_timestamp(seconds, 0)
}
