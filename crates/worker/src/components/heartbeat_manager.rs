use std::sync::Arc;
use std::time::Duration;

use scheduler_core::RegistryEntry;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use super::CoordinatorClient;

/// 注册心跳
///
/// 每个周期向调度中心上报一次注册信息；收到关闭信号后做一次注销再退出。
pub struct HeartbeatManager {
    coordinator: Arc<CoordinatorClient>,
    entry: RegistryEntry,
    heartbeat_interval: Duration,
}

impl HeartbeatManager {
    pub fn new(coordinator: Arc<CoordinatorClient>, entry: RegistryEntry, heartbeat_interval: Duration) -> Self {
        Self {
            coordinator,
            entry,
            heartbeat_interval,
        }
    }

    pub fn entry(&self) -> &RegistryEntry {
        &self.entry
    }

    pub fn start_heartbeat_task(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "启动注册心跳任务: app={}, address={}, interval={:?}",
                self.entry.group_key, self.entry.address, self.heartbeat_interval
            );
            let mut heartbeat_interval = interval(self.heartbeat_interval);
            loop {
                tokio::select! {
                    _ = heartbeat_interval.tick() => self.send_heartbeat().await,
                    _ = shutdown_rx.recv() => {
                        info!("注册心跳任务收到关闭信号");
                        break;
                    }
                }
            }
            self.deregister().await;
        })
    }

    pub async fn send_heartbeat(&self) {
        let response = self.coordinator.registry(&self.entry).await;
        if response.is_success() {
            debug!("注册心跳成功: address={}", self.entry.address);
        } else {
            warn!("注册心跳失败: {}", response.message_or_empty());
        }
    }

    pub async fn deregister(&self) {
        let response = self.coordinator.registry_remove(&self.entry).await;
        if response.is_success() {
            info!("已从调度中心注销: address={}", self.entry.address);
        } else {
            warn!("注销失败: {}", response.message_or_empty());
        }
    }
}
