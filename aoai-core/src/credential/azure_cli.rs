use super::{AccessToken, CredentialError, CredentialProvider};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

const DEFAULT_PROCESS_TIMEOUT: Duration = Duration::from_secs(10);

/// 通过 `az account get-access-token` 获取令牌
///
/// 子进程超过 `timeout` 未退出时会被杀掉，返回 `Unavailable`。
pub struct AzureCliCredential {
    resource: String,
    program: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct CliTokenResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
    /// 新版CLI输出的unix时间戳
    #[serde(default)]
    expires_on: Option<i64>,
    /// 旧版CLI输出的本地时间，如 `2024-05-01 10:30:00.000000`
    #[serde(rename = "expiresOn", default)]
    expires_on_local: Option<String>,
}

impl AzureCliCredential {
    pub fn new(resource: &str) -> Self {
        Self {
            resource: resource.to_string(),
            program: "az".to_string(),
            timeout: DEFAULT_PROCESS_TIMEOUT,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl CredentialProvider for AzureCliCredential {
    fn name(&self) -> &'static str {
        "azure_cli"
    }

    async fn get_token(&self) -> Result<AccessToken, CredentialError> {
        debug!("Requesting token from Azure CLI for resource {}", self.resource);

        let mut command = Command::new(&self.program);
        command
            .args(["account", "get-access-token", "--output", "json", "--resource"])
            .arg(&self.resource)
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(result) => result.map_err(|e| CredentialError::Unavailable {
                source_name: "azure_cli",
                message: format!("failed to start '{}': {}", self.program, e),
            })?,
            Err(_) => {
                warn!(
                    "'{}' did not return a token within {:?}",
                    self.program, self.timeout
                );
                return Err(CredentialError::Unavailable {
                    source_name: "azure_cli",
                    message: format!("'{}' timed out after {:?}", self.program, self.timeout),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CredentialError::Unavailable {
                source_name: "azure_cli",
                message: format!("'{}' exited with {}: {}", self.program, output.status, stderr.trim()),
            });
        }

        parse_cli_output(&output.stdout)
    }
}

fn parse_cli_output(stdout: &[u8]) -> Result<AccessToken, CredentialError> {
    let response: CliTokenResponse = serde_json::from_slice(stdout)?;
    if response.access_token.is_empty() {
        return Err(CredentialError::InvalidResponse(
            "Azure CLI returned an empty accessToken".to_string(),
        ));
    }

    let expires_on = response
        .expires_on
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
        .or_else(|| response.expires_on_local.as_deref().and_then(parse_local_time))
        .unwrap_or_else(|| Utc::now() + chrono::Duration::minutes(5));

    Ok(AccessToken::new(response.access_token, Some(expires_on)))
}

fn parse_local_time(value: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc))
}
