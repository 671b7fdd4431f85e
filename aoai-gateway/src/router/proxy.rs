use crate::app::AppState;
use aoai_relay::InboundRequest;
use axum::{
    extract::{Query, State},
    http::{HeaderMap, Method, Uri},
    response::Response,
};
use bytes::Bytes;

/// 转发处理器
///
/// 请求体在转发前完整读取；查询参数保留原始顺序和重复项。
pub async fn proxy(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<Vec<(String, String)>>,
    body: Bytes,
) -> Response {
    let request = InboundRequest::new(method, uri.path(), headers, query, body);
    state.handler.clone().handle_request(request).await
}
