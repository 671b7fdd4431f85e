use super::{
    AccessToken, AzureCliCredential, ClientSecretCredential, CredentialError, CredentialProvider,
    ManagedIdentityCredential, StaticCredential,
};
use crate::config::model::CredentialSettings;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

const NONE_SELECTED: usize = usize::MAX;

/// 按顺序尝试多个凭证来源，第一个成功的来源会被记住并优先使用
pub struct ChainedCredential {
    sources: Vec<Box<dyn CredentialProvider>>,
    selected: AtomicUsize,
}

impl ChainedCredential {
    pub fn new(sources: Vec<Box<dyn CredentialProvider>>) -> Self {
        Self {
            sources,
            selected: AtomicUsize::new(NONE_SELECTED),
        }
    }

    /// 默认链：环境变量令牌 → 服务主体 → 托管身份 → Azure CLI
    pub fn default_chain(settings: &CredentialSettings) -> Result<Self, CredentialError> {
        let mut sources: Vec<Box<dyn CredentialProvider>> = Vec::new();

        if let Some(token) = settings.token.as_deref().filter(|t| !t.is_empty()) {
            sources.push(Box::new(StaticCredential::new(token)));
        } else if let Some(credential) = StaticCredential::from_env() {
            sources.push(Box::new(credential));
        }

        if let Some(credential) = ClientSecretCredential::from_env(&settings.resource) {
            sources.push(Box::new(credential?));
        }

        sources.push(Box::new(ManagedIdentityCredential::new(
            &settings.resource,
            settings.client_id.clone(),
        )?));
        sources.push(Box::new(AzureCliCredential::new(&settings.resource)));

        Ok(Self::new(sources))
    }

    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }
}

#[async_trait]
impl CredentialProvider for ChainedCredential {
    fn name(&self) -> &'static str {
        "chained"
    }

    async fn get_token(&self) -> Result<AccessToken, CredentialError> {
        let selected = self.selected.load(Ordering::Acquire);
        if let Some(source) = self.sources.get(selected) {
            match source.get_token().await {
                Ok(token) => return Ok(token),
                Err(e) => warn!(
                    "Previously selected credential source {} failed, retrying the full chain: {}",
                    source.name(),
                    e
                ),
            }
        }

        let mut failures = Vec::with_capacity(self.sources.len());
        for (index, source) in self.sources.iter().enumerate() {
            if index == selected {
                continue;
            }
            match source.get_token().await {
                Ok(token) => {
                    if self.selected.swap(index, Ordering::AcqRel) != index {
                        info!("Credential source selected: {}", source.name());
                    }
                    return Ok(token);
                }
                Err(e) => {
                    debug!("Credential source {} failed: {}", source.name(), e);
                    failures.push(format!("{}: {}", source.name(), e));
                }
            }
        }

        Err(CredentialError::Exhausted(failures))
    }
}
