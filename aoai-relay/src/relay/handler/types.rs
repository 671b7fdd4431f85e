use aoai_core::credential::CredentialError;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use thiserror::Error;

pub const TIMEOUT_MESSAGE: &str = "Request to Azure OpenAI endpoint timed out. Please try again later.";
pub const UNEXPECTED_MESSAGE: &str = "An unexpected error occurred.";
pub const INVALID_PATH_MESSAGE: &str = "Request path must not contain '.' or '..' segments.";

/// 由下游重新生成、不从上游透传的响应头
pub const STRIPPED_RESPONSE_HEADERS: [&str; 4] = [
    "content-encoding",
    "content-length",
    "transfer-encoding",
    "connection",
];

/// 单个请求转发失败的原因
///
/// 所有变体都会被转换为结构化的JSON响应，不会影响其他请求。
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("failed to obtain backend credential: {0}")]
    Credential(#[from] CredentialError),
    #[error("invalid outbound header: {0}")]
    InvalidHeader(String),
    /// 路径含点段，转发后会逃出部署作用域
    #[error("request path contains dot segments: /{0}")]
    InvalidPath(String),
    #[error("upstream request timed out: {0}")]
    Timeout(#[source] reqwest::Error),
    #[error("upstream request failed: {0}")]
    Upstream(#[source] reqwest::Error),
}

impl From<reqwest::Error> for RelayError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            RelayError::Timeout(error)
        } else {
            RelayError::Upstream(error)
        }
    }
}

impl RelayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            RelayError::InvalidPath(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RelayError::Timeout(_))
    }

    /// 超时只返回 `error`，其他错误额外带上 `details`
    pub fn to_json(&self) -> Value {
        match self {
            RelayError::Timeout(_) => json!({ "error": TIMEOUT_MESSAGE }),
            RelayError::InvalidPath(path) => json!({
                "error": INVALID_PATH_MESSAGE,
                "details": format!("/{path}"),
            }),
            _ => json!({
                "error": UNEXPECTED_MESSAGE,
                "details": error_chain(self),
            }),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.to_json())).into_response()
    }
}

/// 把错误及其所有 source 拼成一行
pub fn error_chain(error: &dyn std::error::Error) -> String {
    let mut description = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !description.contains(&cause_text) {
            description.push_str(": ");
            description.push_str(&cause_text);
        }
        source = cause.source();
    }
    description
}

/// 过滤上游响应头
pub fn filter_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = upstream.clone();
    for name in STRIPPED_RESPONSE_HEADERS {
        headers.remove(name);
    }
    headers
}
