use super::{AccessToken, CredentialError, CredentialProvider};
use async_trait::async_trait;

/// 固定令牌，不会过期
pub struct StaticCredential {
    token: String,
}

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// 从 `AZURE_OPENAI_AD_TOKEN` 读取
    pub fn from_env() -> Option<Self> {
        std::env::var(super::TOKEN_ENV_VAR)
            .ok()
            .filter(|token| !token.is_empty())
            .map(Self::new)
    }
}

#[async_trait]
impl CredentialProvider for StaticCredential {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn get_token(&self) -> Result<AccessToken, CredentialError> {
        Ok(AccessToken::new(self.token.clone(), None))
    }
}
