use super::{AccessToken, CredentialError, CredentialProvider};
use async_trait::async_trait;
use chrono::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// 缓存令牌直到过期前 `refresh_margin`
///
/// 刷新在锁内完成，同一时刻只有一个请求会去获取新令牌。
pub struct CachedCredential<P> {
    inner: P,
    cached: Mutex<Option<AccessToken>>,
    refresh_margin: Duration,
}

impl<P: CredentialProvider> CachedCredential<P> {
    pub fn new(inner: P) -> Self {
        Self::with_refresh_margin(inner, Duration::minutes(5))
    }

    pub fn with_refresh_margin(inner: P, refresh_margin: Duration) -> Self {
        Self {
            inner,
            cached: Mutex::new(None),
            refresh_margin,
        }
    }
}

#[async_trait]
impl<P: CredentialProvider> CredentialProvider for CachedCredential<P> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn get_token(&self) -> Result<AccessToken, CredentialError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if !token.expires_within(self.refresh_margin) {
                return Ok(token.clone());
            }
            debug!("Cached {} token is about to expire, refreshing", self.inner.name());
        }

        let token = self.inner.get_token().await?;
        *cached = Some(token.clone());
        Ok(token)
    }
}
