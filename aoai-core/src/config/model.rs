use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub settings: GlobalSettings,
    #[serde(default)]
    pub credential: CredentialSettings,
}

/// 单个后端部署的描述
///
/// 加载后不可变，没有独立的ID，相等性按字段比较。
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub api_version: String,
    pub deployment: String,
    pub url: String,
}

impl Endpoint {
    pub fn new(
        url: impl Into<String>,
        deployment: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            deployment: deployment.into(),
            url: url.into(),
        }
    }

    /// 部署作用域下的完整URL: `{url}/openai/deployments/{deployment}/{path}`
    pub fn deployment_url(&self, path: &str) -> String {
        url_join(&self.url, &["openai/deployments", &self.deployment, path])
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} @ {})", self.url, self.deployment, self.api_version)
    }
}

/// 拼接URL片段：去掉base末尾的`/`和每个片段开头的`/`，再用`/`连接
///
/// 空片段会保留为末尾的`/`。
pub fn url_join(base: &str, parts: &[&str]) -> String {
    let mut joined = base.trim_end_matches('/').to_string();
    for part in parts {
        joined.push('/');
        joined.push_str(part.trim_start_matches('/'));
    }
    joined
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct GlobalSettings {
    /// 上游读取超时（两次读取之间的最大间隔），超时返回504
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_max_request_body_bytes")]
    pub max_request_body_bytes: usize,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            request_timeout_seconds: default_request_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
            max_request_body_bytes: default_max_request_body_bytes(),
        }
    }
}

/// 凭证来源类型
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    /// 依次尝试环境变量、托管身份、Azure CLI
    #[default]
    Default,
    Static,
    AzureCli,
    ManagedIdentity,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CredentialSettings {
    #[serde(default)]
    pub kind: CredentialKind,
    #[serde(default = "default_resource")]
    pub resource: String,
    /// 仅用于 `static`
    #[serde(default)]
    pub token: Option<String>,
    /// 用户分配的托管身份
    #[serde(default)]
    pub client_id: Option<String>,
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            kind: CredentialKind::default(),
            resource: default_resource(),
            token: None,
            client_id: None,
        }
    }
}

// Default value functions
fn default_request_timeout() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_request_body_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_resource() -> String {
    "https://cognitiveservices.azure.com".to_string()
}

/// 内置的默认后端列表，配置不可用时使用
pub fn default_endpoints() -> Vec<Endpoint> {
    const API_VERSION: &str = "2024-05-01-preview";
    vec![
        Endpoint::new(
            "https://aims-genalign-spot-eastus.openai.azure.com/",
            "gpt-4-0125-Preview-spot",
            API_VERSION,
        ),
        Endpoint::new(
            "https://aims-genalign-spot-japaneast.openai.azure.com/",
            "gpt-4-0125-Preview-spot",
            API_VERSION,
        ),
        Endpoint::new(
            "https://aims-datagen-spot-safrican.openai.azure.com/",
            "gpt4-t-1106",
            API_VERSION,
        ),
        Endpoint::new(
            "https://aims-genalign-spot-swedencentral.openai.azure.com/",
            "gpt-4-0125-Preview-spot",
            API_VERSION,
        ),
        Endpoint::new(
            "https://aims-genalign-spot-polandcentral.openai.azure.com/",
            "gpt-4-0613-spot",
            API_VERSION,
        ),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            settings: GlobalSettings::default(),
            credential: CredentialSettings::default(),
        }
    }
}

impl Config {
    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        for (index, endpoint) in self.endpoints.iter().enumerate() {
            Self::validate_endpoint(index, endpoint)?;
        }

        if self.settings.request_timeout_seconds == 0 {
            anyhow::bail!("settings.request_timeout_seconds must be greater than 0");
        }

        if self.settings.connect_timeout_seconds == 0 {
            anyhow::bail!("settings.connect_timeout_seconds must be greater than 0");
        }

        if self.credential.kind == CredentialKind::Static
            && self.credential.token.as_deref().map_or(true, str::is_empty)
            && std::env::var(crate::credential::TOKEN_ENV_VAR).is_err()
        {
            anyhow::bail!(
                "credential.kind = \"static\" requires credential.token or {}",
                crate::credential::TOKEN_ENV_VAR
            );
        }

        Ok(())
    }

    fn validate_endpoint(index: usize, endpoint: &Endpoint) -> Result<()> {
        if endpoint.url.is_empty() {
            anyhow::bail!("Endpoint #{} has empty url", index);
        }

        if !endpoint.url.starts_with("http://") && !endpoint.url.starts_with("https://") {
            anyhow::bail!(
                "Endpoint #{} has invalid url format: '{}'. Must start with http:// or https://",
                index,
                endpoint.url
            );
        }

        if endpoint.deployment.is_empty() {
            anyhow::bail!("Endpoint #{} ({}) has empty deployment", index, endpoint.url);
        }

        if endpoint.api_version.is_empty() {
            anyhow::bail!("Endpoint #{} ({}) has empty api_version", index, endpoint.url);
        }

        Ok(())
    }
}
