use aoai_core::credential::CredentialProvider;
use aoai_loadbalance::EndpointPool;
use axum::body::Body;
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;
use reqwest::Client;
use std::sync::Arc;
use std::time::Instant;

use super::types::{filter_response_headers, RelayError};
use crate::relay::request::{InboundRequest, OutboundRequest};

/// 响应转发方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    /// 收到上游响应头后立即返回，响应体逐块转发
    Streaming,
    /// 读取完整响应体后一次性返回
    Buffered,
}

impl RelayMode {
    pub fn for_request(request: &InboundRequest) -> Self {
        if request.is_streaming() {
            RelayMode::Streaming
        } else {
            RelayMode::Buffered
        }
    }
}

/// 负载均衡的转发处理器
///
/// 每个请求独立地随机选择一个后端，注入新令牌后转发，不做重试。
pub struct LoadBalancedHandler {
    pool: EndpointPool,
    credential: Arc<dyn CredentialProvider>,
    client: Client,
}

impl LoadBalancedHandler {
    pub fn new(pool: EndpointPool, credential: Arc<dyn CredentialProvider>, client: Client) -> Self {
        Self {
            pool,
            credential,
            client,
        }
    }

    pub fn pool(&self) -> &EndpointPool {
        &self.pool
    }

    /// 处理一个请求，失败时返回结构化的错误响应
    pub async fn handle_request(self: Arc<Self>, request: InboundRequest) -> Response {
        let start_time = Instant::now();
        let method = request.method.clone();
        let path = request.path.clone();

        match self.forward(request).await {
            Ok(response) => {
                tracing::debug!(
                    "{} /{} relayed with status {} in {}ms",
                    method,
                    path,
                    response.status(),
                    start_time.elapsed().as_millis()
                );
                response
            }
            Err(e) => {
                if e.status_code().is_client_error() || e.is_timeout() {
                    tracing::warn!("{} /{} rejected: {}", method, path, e);
                } else {
                    tracing::error!("{} /{} failed: {:?}", method, path, e);
                }
                e.into_response()
            }
        }
    }

    /// 选择后端、改写请求并转发响应
    pub async fn forward(&self, request: InboundRequest) -> Result<Response, RelayError> {
        request.validate_path()?;
        let endpoint = self.pool.pick();
        let mode = RelayMode::for_request(&request);

        tracing::info!(
            "Selected endpoint for {} /{}: {} ({:?})",
            request.method,
            request.path,
            endpoint,
            mode
        );

        let token = self.credential.get_token().await?;
        let outbound = OutboundRequest::build(request, endpoint, &token.token)?;
        tracing::debug!("Forwarding to {}", outbound.url);

        let upstream = self
            .client
            .request(outbound.method, &outbound.url)
            .headers(outbound.headers)
            .query(&outbound.query)
            .body(outbound.body)
            .send()
            .await?;

        match mode {
            RelayMode::Streaming => Ok(Self::relay_streaming(upstream)),
            RelayMode::Buffered => Self::relay_buffered(upstream).await,
        }
    }

    /// 流式转发
    ///
    /// 响应体持有上游连接；客户端断开时响应体被丢弃，上游连接随之释放。
    fn relay_streaming(upstream: reqwest::Response) -> Response {
        let status = upstream.status();
        let headers = filter_response_headers(upstream.headers());

        let stream = upstream.bytes_stream().inspect_err(|e| {
            tracing::warn!("Upstream stream terminated with error: {}", e);
        });

        let mut response = Response::new(Body::from_stream(stream));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }

    async fn relay_buffered(upstream: reqwest::Response) -> Result<Response, RelayError> {
        let status = upstream.status();
        let headers = filter_response_headers(upstream.headers());
        let body = upstream.bytes().await?;

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}
