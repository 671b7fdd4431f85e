use aoai_core::config::model::Endpoint;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderValue, Method};
use bytes::Bytes;

use super::handler::types::RelayError;

/// 由服务端决定、不转发给上游的请求头
pub const STRIPPED_REQUEST_HEADERS: [&str; 3] = ["host", "content-length", "connection"];

pub const API_VERSION_PARAM: &str = "api-version";
pub const STREAM_PARAM: &str = "stream";

/// 客户端发来的请求
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    /// 根路径之后的部分，不含开头的 `/`，可以为空
    pub path: String,
    pub headers: HeaderMap,
    /// 按原始顺序保存的查询参数
    pub query: Vec<(String, String)>,
    pub body: Bytes,
}

impl InboundRequest {
    pub fn new(
        method: Method,
        path: &str,
        headers: HeaderMap,
        query: Vec<(String, String)>,
        body: Bytes,
    ) -> Self {
        Self {
            method,
            path: path.trim_start_matches('/').to_string(),
            headers,
            query,
            body,
        }
    }

    /// `stream` 参数（多个时取最后一个）严格等于 `true` 时使用流式转发
    pub fn is_streaming(&self) -> bool {
        self.query
            .iter()
            .rev()
            .find(|(key, _)| key == STREAM_PARAM)
            .is_some_and(|(_, value)| value == "true")
    }

    /// 拒绝 `.` / `..` 段（包括 `%2e` 编码和 `\` 分隔的形式），否则上游URL会离开部署路径
    pub fn validate_path(&self) -> Result<(), RelayError> {
        if has_dot_segment(&self.path) {
            return Err(RelayError::InvalidPath(self.path.clone()));
        }
        Ok(())
    }
}

fn has_dot_segment(path: &str) -> bool {
    path.split(['/', '\\']).any(|segment| {
        let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
        decoded == "." || decoded == ".."
    })
}

/// 发往选中后端的请求，只在一次转发中存在
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: Bytes,
}

impl OutboundRequest {
    pub fn build(inbound: InboundRequest, endpoint: &Endpoint, token: &str) -> Result<Self, RelayError> {
        inbound.validate_path()?;
        Ok(Self {
            url: endpoint.deployment_url(&inbound.path),
            headers: translate_headers(&inbound.headers, token)?,
            query: translate_query(&inbound.query, &endpoint.api_version),
            method: inbound.method,
            body: inbound.body,
        })
    }
}

/// 去掉 host / content-length / connection，并用新令牌覆盖 authorization
///
/// `HeaderMap` 的键本身就是小写的，同名的多个值都会保留。
pub fn translate_headers(inbound: &HeaderMap, token: &str) -> Result<HeaderMap, RelayError> {
    let mut headers = inbound.clone();
    for name in STRIPPED_REQUEST_HEADERS {
        headers.remove(name);
    }

    let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|e| RelayError::InvalidHeader(format!("authorization: {e}")))?;
    headers.insert(AUTHORIZATION, bearer);

    Ok(headers)
}

/// 保留客户端的查询参数，但 `api-version` 总是使用后端配置的值
pub fn translate_query(query: &[(String, String)], api_version: &str) -> Vec<(String, String)> {
    query
        .iter()
        .filter(|(key, _)| key != API_VERSION_PARAM)
        .cloned()
        .chain(std::iter::once((
            API_VERSION_PARAM.to_string(),
            api_version.to_string(),
        )))
        .collect()
}
