//! 调度中心接收执行结果回调
//!
//! 执行器侧的回调保证是至少一次，同一个 `log_id` 可能被重复投递，
//! 处理器实现必须幂等。

use std::collections::HashMap;

use async_trait::async_trait;
use scheduler_core::{HandleCallbackResult, SchedulerResult};
use tokio::sync::RwLock;
use tracing::{debug, info};

#[async_trait]
pub trait CallbackHandler: Send + Sync {
    async fn handle(&self, results: Vec<HandleCallbackResult>) -> SchedulerResult<()>;
}

/// 按 `log_id` 去重保存回调结果的内存实现
#[derive(Default)]
pub struct InMemoryCallbackStore {
    results: RwLock<HashMap<i64, HandleCallbackResult>>,
}

impl InMemoryCallbackStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, log_id: i64) -> Option<HandleCallbackResult> {
        self.results.read().await.get(&log_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.results.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.results.read().await.is_empty()
    }
}

#[async_trait]
impl CallbackHandler for InMemoryCallbackStore {
    async fn handle(&self, results: Vec<HandleCallbackResult>) -> SchedulerResult<()> {
        let mut stored = self.results.write().await;
        for result in results {
            if stored.contains_key(&result.log_id) {
                debug!("重复的回调结果，忽略: log_id={}", result.log_id);
                continue;
            }
            info!(
                "收到执行结果: log_id={}, code={}",
                result.log_id, result.handle_code
            );
            metrics::counter!("callback_results_total", "success" => result.is_success().to_string())
                .increment(1);
            stored.insert(result.log_id, result);
        }
        Ok(())
    }
}
