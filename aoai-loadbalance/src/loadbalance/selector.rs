use aoai_core::config::model::Endpoint;
use rand::Rng;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("No valid endpoints found: all {candidates} candidate endpoints failed the health check")]
    Empty { candidates: usize },
}

/// 经过健康检查的后端集合
///
/// 启动时构造一次，之后只读；克隆只增加引用计数，并发读取无需加锁。
/// 构造函数保证集合非空。
#[derive(Debug, Clone)]
pub struct EndpointPool {
    endpoints: Arc<[Endpoint]>,
}

impl EndpointPool {
    pub fn new(endpoints: Vec<Endpoint>) -> Result<Self, PoolError> {
        if endpoints.is_empty() {
            return Err(PoolError::Empty { candidates: 0 });
        }
        Ok(Self {
            endpoints: endpoints.into(),
        })
    }

    /// 均匀随机选择一个后端，每次调用相互独立
    pub fn pick(&self) -> &Endpoint {
        self.pick_with(&mut rand::rng())
    }

    pub fn pick_with<R: Rng>(&self, rng: &mut R) -> &Endpoint {
        let index = rng.random_range(0..self.endpoints.len());
        &self.endpoints[index]
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// 构造保证非空，始终为 false
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
