use crate::config::model::Config;
use tracing::{info, warn};

const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// 配置来源：成功加载，或回退到内置默认配置
#[derive(Debug, Clone)]
pub enum ConfigSource {
    Loaded { path: String, config: Config },
    Fallback { reason: String, config: Config },
}

impl ConfigSource {
    pub fn into_config(self) -> Config {
        match self {
            ConfigSource::Loaded { config, .. } | ConfigSource::Fallback { config, .. } => config,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ConfigSource::Fallback { .. })
    }
}

/// 配置文件路径，优先使用 CONFIG_PATH 环境变量
pub fn get_config_path() -> String {
    std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}

pub fn load_config() -> ConfigSource {
    load_config_or_default(&get_config_path())
}

/// 加载配置，读取、解析或验证失败时回退到内置默认配置（不致命）
pub fn load_config_or_default(config_path: &str) -> ConfigSource {
    match load_config_from_path(config_path) {
        Ok(config) => {
            info!(
                "Configuration loaded from {} ({} endpoints)",
                config_path,
                config.endpoints.len()
            );
            ConfigSource::Loaded {
                path: config_path.to_string(),
                config,
            }
        }
        Err(e) => {
            let config = Config::default();
            warn!("Failed to load configuration from {}: {:#}", config_path, e);
            warn!(
                "Falling back to built-in default configuration with {} endpoints",
                config.endpoints.len()
            );
            ConfigSource::Fallback {
                reason: format!("{e:#}"),
                config,
            }
        }
    }
}

/// 严格加载：任何错误都返回给调用方
pub fn load_config_from_path(config_path: &str) -> Result<Config, anyhow::Error> {
    let config_str = std::fs::read_to_string(config_path)?;
    parse_config(&config_str)
}

pub fn parse_config(config_str: &str) -> Result<Config, anyhow::Error> {
    let config: Config = toml::from_str(config_str)?;
    config.validate()?;
    Ok(config)
}
