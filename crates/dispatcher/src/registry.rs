//! 调度中心的执行器注册表
//!
//! 执行器周期性上报 `(分组类型, 应用名, 地址)`，超过失效时间未刷新的记录
//! 不再参与路由，并由后台监控任务清理。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use scheduler_core::{RegistryEntry, RegistryType, SchedulerError, SchedulerResult};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

type GroupKey = (RegistryType, String);

pub struct RegistryStore {
    groups: RwLock<HashMap<GroupKey, HashMap<String, Instant>>>,
    dead_timeout: Duration,
}

impl RegistryStore {
    pub fn new(dead_timeout: Duration) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            dead_timeout,
        }
    }

    pub fn dead_timeout(&self) -> Duration {
        self.dead_timeout
    }

    /// 注册或刷新一条记录
    pub async fn register(&self, entry: &RegistryEntry) -> SchedulerResult<()> {
        entry.validate().map_err(SchedulerError::InvalidRequest)?;

        let mut groups = self.groups.write().await;
        let is_new = groups
            .entry((entry.group_type, entry.group_key.clone()))
            .or_default()
            .insert(entry.address.clone(), Instant::now())
            .is_none();
        if is_new {
            info!("执行器注册: app={}, address={}", entry.group_key, entry.address);
        } else {
            debug!("执行器心跳刷新: app={}, address={}", entry.group_key, entry.address);
        }
        Ok(())
    }

    pub async fn remove(&self, entry: &RegistryEntry) -> SchedulerResult<()> {
        entry.validate().map_err(SchedulerError::InvalidRequest)?;

        let mut groups = self.groups.write().await;
        let key = (entry.group_type, entry.group_key.clone());
        if let Some(addresses) = groups.get_mut(&key) {
            if addresses.remove(&entry.address).is_some() {
                info!("执行器注销: app={}, address={}", entry.group_key, entry.address);
            }
            if addresses.is_empty() {
                groups.remove(&key);
            }
        }
        Ok(())
    }

    /// 应用下仍然有效的执行器地址，按字典序排列
    pub async fn alive_addresses(&self, app_name: &str) -> Vec<String> {
        let now = Instant::now();
        let groups = self.groups.read().await;
        let mut addresses: Vec<String> = groups
            .get(&(RegistryType::Executor, app_name.to_string()))
            .map(|addresses| {
                addresses
                    .iter()
                    .filter(|(_, updated_at)| now.duration_since(**updated_at) < self.dead_timeout)
                    .map(|(address, _)| address.clone())
                    .collect()
            })
            .unwrap_or_default();
        addresses.sort();
        addresses
    }

    /// 全部仍然有效的执行器地址
    pub async fn all_alive_addresses(&self) -> Vec<String> {
        let now = Instant::now();
        let groups = self.groups.read().await;
        let mut addresses: Vec<String> = groups
            .iter()
            .filter(|((group_type, _), _)| *group_type == RegistryType::Executor)
            .flat_map(|(_, addresses)| addresses.iter())
            .filter(|(_, updated_at)| now.duration_since(**updated_at) < self.dead_timeout)
            .map(|(address, _)| address.clone())
            .collect();
        addresses.sort();
        addresses.dedup();
        addresses
    }

    /// 清理失效记录，返回清理数量
    pub async fn prune_dead(&self) -> usize {
        let now = Instant::now();
        let mut groups = self.groups.write().await;
        let mut pruned = 0;
        for ((_, app_name), addresses) in groups.iter_mut() {
            addresses.retain(|address, updated_at| {
                let alive = now.duration_since(*updated_at) < self.dead_timeout;
                if !alive {
                    info!("执行器注册失效: app={}, address={}", app_name, address);
                    pruned += 1;
                }
                alive
            });
        }
        groups.retain(|_, addresses| !addresses.is_empty());
        pruned
    }

    pub fn spawn_monitor(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("启动注册表监控任务，间隔: {:?}", interval);
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let pruned = self.prune_dead().await;
                        if pruned > 0 {
                            metrics::counter!("registry_pruned_total").increment(pruned as u64);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("注册表监控任务收到关闭信号");
                        break;
                    }
                }
            }
        })
    }
}
