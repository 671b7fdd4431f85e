use super::{resource_scope, AccessToken, CredentialError, CredentialProvider};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// 服务主体（client credentials）凭证
pub struct ClientSecretCredential {
    client: Client,
    authority: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    scope: String,
}

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl ClientSecretCredential {
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        resource: &str,
    ) -> Result<Self, CredentialError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            authority: DEFAULT_AUTHORITY.to_string(),
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: resource_scope(resource),
        })
    }

    /// 从 AZURE_TENANT_ID / AZURE_CLIENT_ID / AZURE_CLIENT_SECRET 构造，缺少任一变量时返回 None
    pub fn from_env(resource: &str) -> Option<Result<Self, CredentialError>> {
        let tenant_id = std::env::var("AZURE_TENANT_ID").ok()?;
        let client_id = std::env::var("AZURE_CLIENT_ID").ok()?;
        let client_secret = std::env::var("AZURE_CLIENT_SECRET").ok()?;
        Some(Self::new(tenant_id, client_id, client_secret, resource))
    }

    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority.trim_end_matches('/'),
            self.tenant_id
        )
    }
}

#[async_trait]
impl CredentialProvider for ClientSecretCredential {
    fn name(&self) -> &'static str {
        "client_secret"
    }

    async fn get_token(&self) -> Result<AccessToken, CredentialError> {
        debug!("Requesting client credentials token for scope {}", self.scope);

        let response = self
            .client
            .post(self.token_url())
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", self.scope.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::InvalidResponse(format!(
                "token endpoint returned HTTP {}: {}",
                status, body
            )));
        }

        let body: OAuthTokenResponse = response.json().await?;
        let expires_on = Utc::now() + chrono::Duration::seconds(body.expires_in.unwrap_or(300));
        Ok(AccessToken::new(body.access_token, Some(expires_on)))
    }
}
