//! 后端认证凭证
//!
//! 网关对每个探测和每个转发请求都会向 [`CredentialProvider`] 索取 bearer token，
//! 自身不做缓存；需要缓存时用 [`CachedCredential`] 包装具体实现。

pub mod azure_cli;
pub mod cache;
pub mod chained;
pub mod client_secret;
pub mod managed_identity;
pub mod static_token;

use crate::config::model::{CredentialKind, CredentialSettings};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use thiserror::Error;

pub use azure_cli::AzureCliCredential;
pub use cache::CachedCredential;
pub use chained::ChainedCredential;
pub use client_secret::ClientSecretCredential;
pub use managed_identity::ManagedIdentityCredential;
pub use static_token::StaticCredential;

/// 直接提供 bearer token 的环境变量
pub const TOKEN_ENV_VAR: &str = "AZURE_OPENAI_AD_TOKEN";

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("credential not configured: {0}")]
    NotConfigured(String),
    #[error("{source_name} unavailable: {message}")]
    Unavailable {
        source_name: &'static str,
        message: String,
    },
    #[error("token request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid token response: {0}")]
    InvalidResponse(String),
    #[error("failed to run command: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse token response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no credential source succeeded: {}", .0.join("; "))]
    Exhausted(Vec<String>),
}

/// 访问令牌，`expires_on` 为空表示不会过期
#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_on: Option<DateTime<Utc>>) -> Self {
        Self {
            token: token.into(),
            expires_on,
        }
    }

    /// 令牌是否会在 `margin` 时间内过期
    pub fn expires_within(&self, margin: Duration) -> bool {
        match self.expires_on {
            Some(expires_on) => expires_on - margin <= Utc::now(),
            None => false,
        }
    }
}

// 令牌内容不进入日志
impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// 凭证提供者
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// 凭证来源名称，用于日志
    fn name(&self) -> &'static str;

    async fn get_token(&self) -> Result<AccessToken, CredentialError>;
}

#[async_trait]
impl<P: CredentialProvider + ?Sized> CredentialProvider for Arc<P> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn get_token(&self) -> Result<AccessToken, CredentialError> {
        (**self).get_token().await
    }
}

/// 把资源地址转换为 OAuth2 scope，如 `https://cognitiveservices.azure.com/.default`
pub fn resource_scope(resource: &str) -> String {
    format!("{}/.default", resource.trim_end_matches('/'))
}

/// 根据配置创建凭证提供者
pub fn build_credential(
    settings: &CredentialSettings,
) -> Result<Arc<dyn CredentialProvider>, CredentialError> {
    let provider: Arc<dyn CredentialProvider> = match settings.kind {
        CredentialKind::Static => {
            let token = settings
                .token
                .clone()
                .filter(|t| !t.is_empty())
                .or_else(|| std::env::var(TOKEN_ENV_VAR).ok().filter(|t| !t.is_empty()))
                .ok_or_else(|| {
                    CredentialError::NotConfigured(format!(
                        "static credential requires credential.token or {TOKEN_ENV_VAR}"
                    ))
                })?;
            Arc::new(StaticCredential::new(token))
        }
        CredentialKind::AzureCli => Arc::new(CachedCredential::new(AzureCliCredential::new(
            &settings.resource,
        ))),
        CredentialKind::ManagedIdentity => Arc::new(CachedCredential::new(
            ManagedIdentityCredential::new(&settings.resource, settings.client_id.clone())?,
        )),
        CredentialKind::Default => Arc::new(CachedCredential::new(ChainedCredential::default_chain(
            settings,
        )?)),
    };

    tracing::info!("Using credential provider: {}", provider.name());
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_scope() {
        assert_eq!(
            resource_scope("https://cognitiveservices.azure.com"),
            "https://cognitiveservices.azure.com/.default"
        );
        assert_eq!(
            resource_scope("https://cognitiveservices.azure.com/"),
            "https://cognitiveservices.azure.com/.default"
        );
    }

    #[test]
    fn test_expires_within() {
        let fresh = AccessToken::new("t", Some(Utc::now() + Duration::hours(1)));
        assert!(!fresh.expires_within(Duration::minutes(5)));

        let stale = AccessToken::new("t", Some(Utc::now() + Duration::minutes(2)));
        assert!(stale.expires_within(Duration::minutes(5)));

        let forever = AccessToken::new("t", None);
        assert!(!forever.expires_within(Duration::days(365)));
    }

    #[test]
    fn test_debug_redacts_token() {
        let token = AccessToken::new("super-secret", None);
        let printed = format!("{:?}", token);
        assert!(!printed.contains("super-secret"));
    }

    #[tokio::test]
    async fn test_build_static_credential() {
        let settings = CredentialSettings {
            kind: CredentialKind::Static,
            token: Some("configured-token".to_string()),
            ..Default::default()
        };

        let provider = build_credential(&settings).unwrap();
        assert_eq!(provider.name(), "static");
        assert_eq!(provider.get_token().await.unwrap().token, "configured-token");
    }
}
