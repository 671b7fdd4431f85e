use aoai_core::config::loader::{get_config_path, load_config, ConfigSource};
use aoai_core::config::model::Config;
use aoai_core::credential::{build_credential, CredentialProvider};
use aoai_core::ClientFactory;
use aoai_loadbalance::HealthChecker;
use aoai_relay::LoadBalancedHandler;
use crate::router::router::create_app_router;

use anyhow::{Context, Result};
use axum::Router;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:5555";

/// 应用状态
///
/// 启动完成后只读，所有请求共享同一个服务池和上游客户端。
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<LoadBalancedHandler>,
    pub config: Arc<Config>,
}

impl AppState {
    /// 加载配置、创建凭证并执行启动健康检查
    pub async fn new() -> Result<Self> {
        let source = load_config();
        match &source {
            ConfigSource::Loaded { path, .. } => info!("Using endpoints from {}", path),
            ConfigSource::Fallback { reason, .. } => {
                warn!("Using built-in endpoint list: {}", reason)
            }
        }
        Self::from_config(source.into_config()).await
    }

    pub async fn from_config(config: Config) -> Result<Self> {
        let credential = build_credential(&config.credential)
            .context("Failed to create credential provider")?;
        let client = ClientFactory::from_settings(&config.settings)
            .context("Failed to create upstream HTTP client")?;
        Self::with_credential(config, credential, client).await
    }

    /// 使用给定的凭证和客户端过滤候选后端
    ///
    /// 没有任何健康后端时返回错误，服务不会启动。
    pub async fn with_credential(
        config: Config,
        credential: Arc<dyn CredentialProvider>,
        client: reqwest::Client,
    ) -> Result<Self> {
        info!(
            "Probing {} candidate endpoints before serving",
            config.endpoints.len()
        );

        let pool = HealthChecker::new(client.clone(), credential.clone())
            .filter(&config.endpoints)
            .await
            .context("Startup health check failed")?;

        let handler = Arc::new(LoadBalancedHandler::new(pool, credential, client));
        Ok(Self::from_parts(handler, config))
    }

    pub fn from_parts(handler: Arc<LoadBalancedHandler>, config: Config) -> Self {
        Self {
            handler,
            config: Arc::new(config),
        }
    }
}

/// 创建应用路由
pub fn create_app(state: AppState) -> Router {
    create_app_router(state.config.settings.max_request_body_bytes).with_state(state)
}

/// 初始化日志，RUST_LOG 未设置时默认 info
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// 启动应用服务器
pub async fn start_server() -> Result<()> {
    init_tracing();

    info!("Starting AOAI gateway...");
    info!(
        "Build Time: {}",
        option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or("unknown")
    );
    info!(
        "Git Commit: {}",
        option_env!("VERGEN_GIT_SHA").unwrap_or("unknown")
    );

    let config_path = get_config_path();
    info!("Configuration file: {}", config_path);
    if std::env::var("CONFIG_PATH").is_err() {
        info!("CONFIG_PATH environment variable: not set (using default path)");
    }

    let app_state = match AppState::new().await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize application: {:#}", e);
            return Err(e);
        }
    };

    let app = create_app(app_state);

    let bind_addr =
        std::env::var("BIND_ADDRESS").unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;
    let addr = listener.local_addr()?;

    info!("Server listening on http://{}", addr);
    info!("All paths are relayed to /openai/deployments/{{deployment}}/ on a healthy endpoint");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            error!("Failed to install CTRL+C signal handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
