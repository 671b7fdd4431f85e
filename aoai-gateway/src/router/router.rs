use crate::app::AppState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{on, MethodFilter},
    Router,
};
use tower_http::trace::TraceLayer;

use super::proxy::proxy;

/// 转发的HTTP方法，其他方法返回405
pub const RELAYED_METHODS: MethodFilter = MethodFilter::GET
    .or(MethodFilter::POST)
    .or(MethodFilter::PUT)
    .or(MethodFilter::DELETE)
    .or(MethodFilter::PATCH)
    .or(MethodFilter::OPTIONS);

/// 创建应用路由
///
/// 根路径和任意子路径都交给同一个转发处理器。
pub fn create_app_router(max_request_body_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/", on(RELAYED_METHODS, proxy))
        .route("/{*path}", on(RELAYED_METHODS, proxy))
        .layer(DefaultBodyLimit::max(max_request_body_bytes))
        .layer(TraceLayer::new_for_http())
}
