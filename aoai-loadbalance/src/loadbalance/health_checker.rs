use super::selector::{EndpointPool, PoolError};
use aoai_core::config::model::Endpoint;
use aoai_core::credential::{CredentialError, CredentialProvider};
use reqwest::header::{ACCEPT, ACCEPT_ENCODING, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// 探测请求的部署内路径
pub const PROBE_PATH: &str = "chat/completions";

/// 固定的最小聊天请求
pub const PROBE_BODY: &str =
    r#"{"messages": [{"role": "user", "content": "Please write a haiku"}], "model": "gpt-4"}"#;

// 日志中保留的响应体长度
const MAX_LOGGED_BODY: usize = 512;

#[derive(Error, Debug)]
pub enum HealthCheckError {
    #[error("failed to obtain credential for health check: {0}")]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    EmptyPool(#[from] PoolError),
}

/// 单个后端的探测结果
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Healthy,
    /// 返回了非200状态码
    Unhealthy { status: u16, body: String },
    /// 传输层错误
    Failed { error: String },
}

impl ProbeOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeOutcome::Healthy)
    }
}

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub endpoint: Endpoint,
    pub outcome: ProbeOutcome,
    pub latency: Duration,
}

/// 一次健康检查的汇总，顺序与候选列表一致
#[derive(Debug, Clone, Default)]
pub struct HealthSummary {
    pub results: Vec<ProbeResult>,
}

impl HealthSummary {
    pub fn healthy_endpoints(&self) -> Vec<Endpoint> {
        self.results
            .iter()
            .filter(|r| r.outcome.is_healthy())
            .map(|r| r.endpoint.clone())
            .collect()
    }

    pub fn healthy_count(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_healthy()).count()
    }

    /// 构造服务池，没有健康后端时返回错误
    pub fn into_pool(self) -> Result<EndpointPool, PoolError> {
        let candidates = self.results.len();
        let healthy = self.healthy_endpoints();
        if healthy.is_empty() {
            return Err(PoolError::Empty { candidates });
        }
        EndpointPool::new(healthy)
    }
}

/// 启动时的健康过滤器
///
/// 用同一个令牌并发探测所有候选后端，只保留返回200的后端。
/// 单个后端的失败不会影响其他探测。
pub struct HealthChecker {
    client: Client,
    credential: Arc<dyn CredentialProvider>,
}

impl HealthChecker {
    pub fn new(client: Client, credential: Arc<dyn CredentialProvider>) -> Self {
        Self { client, credential }
    }

    /// 探测所有候选后端并构造服务池
    pub async fn filter(&self, candidates: &[Endpoint]) -> Result<EndpointPool, HealthCheckError> {
        let summary = self.check_all(candidates).await?;
        let pool = summary.into_pool()?;

        info!(
            "Health check completed: {}/{} endpoints healthy",
            pool.len(),
            candidates.len()
        );
        for endpoint in pool.endpoints() {
            info!("Valid endpoint: {}", endpoint);
        }

        Ok(pool)
    }

    /// 获取一次令牌后探测所有候选后端
    pub async fn check_all(&self, candidates: &[Endpoint]) -> Result<HealthSummary, HealthCheckError> {
        let token = self.credential.get_token().await?;
        Ok(self.check_all_with_token(candidates, &token.token).await)
    }

    pub async fn check_all_with_token(&self, candidates: &[Endpoint], token: &str) -> HealthSummary {
        debug!("Starting health check for {} candidate endpoints", candidates.len());

        let mut tasks = Vec::with_capacity(candidates.len());
        for endpoint in candidates {
            let client = self.client.clone();
            let endpoint_clone = endpoint.clone();
            let token = token.to_string();

            let task = tokio::spawn(async move {
                let start_time = Instant::now();
                let outcome = Self::probe_endpoint(&client, &endpoint_clone, &token).await;
                (outcome, start_time.elapsed())
            });

            tasks.push((endpoint.clone(), task));
        }

        // 按候选顺序等待，保证结果顺序
        let mut results = Vec::with_capacity(tasks.len());
        for (endpoint, task) in tasks {
            let (outcome, latency) = match task.await {
                Ok(result) => result,
                Err(e) => {
                    error!("Health check task failed for {}: {}", endpoint, e);
                    (
                        ProbeOutcome::Failed {
                            error: format!("health check task failed: {e}"),
                        },
                        Duration::ZERO,
                    )
                }
            };
            results.push(ProbeResult {
                endpoint,
                outcome,
                latency,
            });
        }

        HealthSummary { results }
    }

    /// 探测单个后端
    pub async fn probe_endpoint(client: &Client, endpoint: &Endpoint, token: &str) -> ProbeOutcome {
        let url = endpoint.deployment_url(PROBE_PATH);
        debug!("Probing endpoint {} with URL: {}", endpoint, url);

        let request = client
            .post(&url)
            .header(ACCEPT_ENCODING, "gzip, deflate")
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .query(&[("api-version", endpoint.api_version.as_str())])
            .body(PROBE_BODY);

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status == StatusCode::OK {
                    debug!("Endpoint {} passed health check", endpoint);
                    return ProbeOutcome::Healthy;
                }

                let body = match response.text().await {
                    Ok(text) => truncate(text, MAX_LOGGED_BODY),
                    Err(e) => format!("<failed to read body: {e}>"),
                };
                warn!("Status for {}: {}, {}", url, status.as_u16(), body);
                ProbeOutcome::Unhealthy {
                    status: status.as_u16(),
                    body,
                }
            }
            Err(e) => {
                warn!("Error for {}: {:?}", url, e);
                ProbeOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}

fn truncate(mut text: String, max_len: usize) -> String {
    if text.len() > max_len {
        let mut cut = max_len;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("...");
    }
    text
}
