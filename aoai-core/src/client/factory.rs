use crate::config::model::GlobalSettings;
use reqwest::Client;
use std::time::Duration;

/// 上游HTTP客户端工厂
///
/// 只限制连接时间和两次读取之间的间隔，不限制总请求时间，
/// 这样长时间的流式生成不会被截断。
pub struct ClientFactory;

impl ClientFactory {
    pub fn from_settings(settings: &GlobalSettings) -> Result<Client, reqwest::Error> {
        Self::with_timeouts(
            Duration::from_secs(settings.connect_timeout_seconds),
            Duration::from_secs(settings.request_timeout_seconds),
        )
    }

    pub fn with_timeouts(
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Client, reqwest::Error> {
        Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()
    }
}
