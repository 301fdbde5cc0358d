use std::time::Duration;

use chrono::Local;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::job_log::JobLogStore;

/// 保留天数小于该值时不清理
pub const MIN_RETENTION_DAYS: u32 = 3;
const CLEAN_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// 每天清理一次过期的任务日志目录
pub struct LogCleaner {
    log_store: JobLogStore,
    retention_days: u32,
}

impl LogCleaner {
    pub fn new(log_store: JobLogStore, retention_days: u32) -> Self {
        Self {
            log_store,
            retention_days,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.retention_days >= MIN_RETENTION_DAYS
    }

    pub async fn clean_once(&self) -> usize {
        match self
            .log_store
            .cleanup_expired(self.retention_days, Local::now().date_naive())
            .await
        {
            Ok(removed) => removed,
            Err(e) => {
                warn!("清理任务日志失败: {}", e);
                0
            }
        }
    }

    pub fn start(self, mut shutdown_rx: broadcast::Receiver<()>) -> Option<JoinHandle<()>> {
        if !self.is_enabled() {
            info!("任务日志保留天数为 {}，不启动日志清理", self.retention_days);
            return None;
        }

        Some(tokio::spawn(async move {
            info!("启动任务日志清理任务，保留天数: {}", self.retention_days);
            let mut ticker = tokio::time::interval(CLEAN_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = self.clean_once().await;
                        if removed > 0 {
                            info!("清理过期任务日志目录 {} 个", removed);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("任务日志清理任务收到关闭信号");
                        break;
                    }
                }
            }
        }))
    }
}
