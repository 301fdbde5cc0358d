//! 候选节点健康缓存
//!
//! Failover/Busyover 路由只读取这里的探测结果。探测本身在路由之前通过
//! [`CandidateHealth::ensure_fresh`] 完成，或者由后台刷新任务周期性完成，
//! 每次探测都有独立的超时。

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::future::join_all;
use scheduler_core::{IdleBeatRequest, RpcResponse};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::executor_client::ExecutorApi;
use crate::registry::RegistryStore;

/// 空闲探测结果变化很快，只短暂复用
pub const IDLE_RECORD_TTL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    None,
    /// 节点是否存活（beat）
    Liveness,
    /// 节点上该任务是否空闲（idleBeat）
    Idle,
}

#[derive(Debug, Clone)]
pub struct ProbeRecord {
    pub ok: bool,
    pub message: String,
    pub checked_at: Instant,
}

pub struct CandidateHealth {
    api: Option<Arc<dyn ExecutorApi>>,
    probe_timeout: Duration,
    liveness_ttl: Duration,
    liveness: RwLock<HashMap<String, ProbeRecord>>,
    idle: RwLock<HashMap<(i64, String), ProbeRecord>>,
}

impl CandidateHealth {
    pub fn new(api: Arc<dyn ExecutorApi>, probe_timeout: Duration, liveness_ttl: Duration) -> Self {
        Self {
            api: Some(api),
            probe_timeout,
            liveness_ttl,
            liveness: RwLock::new(HashMap::new()),
            idle: RwLock::new(HashMap::new()),
        }
    }

    /// 不具备探测能力的缓存，只能手动写入记录
    pub fn detached() -> Self {
        Self {
            api: None,
            probe_timeout: Duration::from_secs(1),
            liveness_ttl: Duration::from_secs(30),
            liveness: RwLock::new(HashMap::new()),
            idle: RwLock::new(HashMap::new()),
        }
    }

    pub fn liveness(&self, address: &str) -> Option<ProbeRecord> {
        self.liveness
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .cloned()
    }

    pub fn idle(&self, job_id: i64, address: &str) -> Option<ProbeRecord> {
        self.idle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(job_id, address.to_string()))
            .cloned()
    }

    pub fn record_liveness(&self, address: &str, ok: bool, message: impl Into<String>) {
        let record = ProbeRecord {
            ok,
            message: message.into(),
            checked_at: Instant::now(),
        };
        self.liveness
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address.to_string(), record);
    }

    pub fn record_idle(&self, job_id: i64, address: &str, ok: bool, message: impl Into<String>) {
        let record = ProbeRecord {
            ok,
            message: message.into(),
            checked_at: Instant::now(),
        };
        self.idle
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((job_id, address.to_string()), record);
    }

    /// 丢弃已不在注册表中的节点记录
    pub fn retain_addresses(&self, alive: &[String]) {
        self.liveness
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|address, _| alive.contains(address));
        self.idle
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(_, address), _| alive.contains(address));
    }

    /// 丢弃超过有效期的空闲探测记录，返回清理数量
    pub fn prune_expired_idle(&self) -> usize {
        let now = Instant::now();
        let mut idle = self.idle.write().unwrap_or_else(PoisonError::into_inner);
        let before = idle.len();
        idle.retain(|_, record| now.duration_since(record.checked_at) < IDLE_RECORD_TTL);
        before - idle.len()
    }

    pub fn record_counts(&self) -> (usize, usize) {
        (
            self.liveness.read().unwrap_or_else(PoisonError::into_inner).len(),
            self.idle.read().unwrap_or_else(PoisonError::into_inner).len(),
        )
    }

    fn stale_candidates(&self, kind: ProbeKind, job_id: i64, candidates: &[String]) -> Vec<String> {
        let now = Instant::now();
        candidates
            .iter()
            .filter(|address| {
                let record = match kind {
                    ProbeKind::None => return false,
                    ProbeKind::Liveness => self
                        .liveness(address)
                        .filter(|r| now.duration_since(r.checked_at) < self.liveness_ttl),
                    ProbeKind::Idle => self
                        .idle(job_id, address)
                        .filter(|r| now.duration_since(r.checked_at) < IDLE_RECORD_TTL),
                };
                record.is_none()
            })
            .cloned()
            .collect()
    }

    /// 对缺失或过期的候选节点并发探测，每个探测受 `probe_timeout` 限制
    pub async fn ensure_fresh(&self, kind: ProbeKind, job_id: i64, candidates: &[String]) {
        let Some(api) = self.api.as_ref() else {
            return;
        };
        let stale = self.stale_candidates(kind, job_id, candidates);
        if stale.is_empty() {
            return;
        }

        debug!("探测 {} 个候选节点: kind={:?}, job_id={}", stale.len(), kind, job_id);
        let probes = stale.iter().map(|address| self.probe(api.as_ref(), kind, job_id, address));
        join_all(probes).await;
    }

    async fn probe(&self, api: &dyn ExecutorApi, kind: ProbeKind, job_id: i64, address: &str) {
        match kind {
            ProbeKind::None => {}
            ProbeKind::Liveness => {
                let (ok, message) = self.timed("beat", address, api.beat(address)).await;
                self.record_liveness(address, ok, message);
            }
            ProbeKind::Idle => {
                let request = IdleBeatRequest { job_id };
                let (ok, message) = self
                    .timed("idleBeat", address, api.idle_beat(address, &request))
                    .await;
                self.record_idle(job_id, address, ok, message);
            }
        }
    }

    async fn timed<F>(&self, operation: &str, address: &str, call: F) -> (bool, String)
    where
        F: std::future::Future<Output = RpcResponse<String>>,
    {
        match tokio::time::timeout(self.probe_timeout, call).await {
            Ok(response) => (
                response.is_success(),
                format!(
                    "{operation}: address:{address} code:{} msg:{}",
                    response.code,
                    response.message_or_empty()
                ),
            ),
            Err(_) => (
                false,
                format!(
                    "{operation}: address:{address} timeout after {}ms",
                    self.probe_timeout.as_millis()
                ),
            ),
        }
    }

    /// 按注册表收敛缓存，再重新探测仍然有效的节点
    pub async fn refresh_once(&self, registry: &RegistryStore) {
        let alive = registry.all_alive_addresses().await;
        self.retain_addresses(&alive);
        let expired = self.prune_expired_idle();
        if expired > 0 {
            debug!("清理过期空闲探测记录: {}", expired);
        }

        let Some(api) = self.api.as_ref() else {
            return;
        };
        let known: Vec<String> = self
            .liveness
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        let probes = known
            .iter()
            .map(|address| self.probe(api.as_ref(), ProbeKind::Liveness, 0, address));
        join_all(probes).await;
    }

    /// 周期性刷新已知节点的存活状态
    pub fn spawn_refresher(
        self: Arc<Self>,
        registry: Arc<RegistryStore>,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("启动节点健康刷新任务，间隔: {:?}", interval);
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.refresh_once(&registry).await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("节点健康刷新任务收到关闭信号");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use scheduler_core::RegistryEntry;

    use super::*;
    use crate::executor_client::MockExecutorApi;

    #[tokio::test]
    async fn test_ensure_fresh_probes_only_missing_entries() {
        let mut api = MockExecutorApi::new();
        api.expect_beat()
            .withf(|address| address == "http://b:9999/")
            .times(1)
            .returning(|_| RpcResponse::success());

        let health = CandidateHealth::new(Arc::new(api), Duration::from_millis(200), Duration::from_secs(30));
        health.record_liveness("http://a:9999/", true, "cached");

        let candidates = vec!["http://a:9999/".to_string(), "http://b:9999/".to_string()];
        health.ensure_fresh(ProbeKind::Liveness, 1, &candidates).await;

        assert_eq!(health.liveness("http://a:9999/").unwrap().message, "cached");
        assert!(health.liveness("http://b:9999/").unwrap().ok);
    }

    #[tokio::test]
    async fn test_failed_beat_is_recorded_with_diagnostic() {
        let mut api = MockExecutorApi::new();
        api.expect_beat()
            .returning(|_| RpcResponse::fail("connection refused"));

        let health = CandidateHealth::new(Arc::new(api), Duration::from_millis(200), Duration::from_secs(30));
        let candidates = vec!["http://dead:9999/".to_string()];
        health.ensure_fresh(ProbeKind::Liveness, 1, &candidates).await;

        let record = health.liveness("http://dead:9999/").unwrap();
        assert!(!record.ok);
        assert!(record.message.contains("http://dead:9999/"));
        assert!(record.message.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_idle_probe_is_keyed_by_job() {
        let mut api = MockExecutorApi::new();
        api.expect_idle_beat()
            .withf(|_, request| request.job_id == 7)
            .times(1)
            .returning(|_, _| RpcResponse::fail("job thread is running or has trigger queue."));

        let health = CandidateHealth::new(Arc::new(api), Duration::from_millis(200), Duration::from_secs(30));
        let candidates = vec!["http://a:9999/".to_string()];
        health.ensure_fresh(ProbeKind::Idle, 7, &candidates).await;

        assert!(!health.idle(7, "http://a:9999/").unwrap().ok);
        assert!(health.idle(8, "http://a:9999/").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_liveness_is_reprobed() {
        let mut api = MockExecutorApi::new();
        api.expect_beat().times(2).returning(|_| RpcResponse::success());

        let health = CandidateHealth::new(Arc::new(api), Duration::from_millis(200), Duration::from_secs(10));
        let candidates = vec!["http://a:9999/".to_string()];

        health.ensure_fresh(ProbeKind::Liveness, 1, &candidates).await;
        health.ensure_fresh(ProbeKind::Liveness, 1, &candidates).await;
        tokio::time::advance(Duration::from_secs(11)).await;
        health.ensure_fresh(ProbeKind::Liveness, 1, &candidates).await;
    }

    #[test]
    fn test_retain_addresses_drops_unknown_nodes() {
        let health = CandidateHealth::detached();
        health.record_liveness("a", true, "ok");
        health.record_liveness("b", true, "ok");
        health.record_idle(1, "b", true, "ok");

        health.retain_addresses(&["a".to_string()]);
        assert!(health.liveness("a").is_some());
        assert!(health.liveness("b").is_none());
        assert!(health.idle(1, "b").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_drops_deregistered_nodes_and_expired_idle_records() {
        let mut api = MockExecutorApi::new();
        api.expect_beat()
            .withf(|address| address == "http://a:9999/")
            .returning(|_| RpcResponse::success());
        api.expect_idle_beat().returning(|_, _| RpcResponse::success());

        let registry = RegistryStore::new(Duration::from_secs(90));
        registry
            .register(&RegistryEntry::executor("app", "http://a:9999/"))
            .await
            .unwrap();
        registry
            .register(&RegistryEntry::executor("app", "http://b:9999/"))
            .await
            .unwrap();

        let health = CandidateHealth::new(Arc::new(api), Duration::from_millis(200), Duration::from_secs(30));
        health.record_liveness("http://a:9999/", true, "ok");
        health.record_liveness("http://b:9999/", true, "ok");
        let candidates = vec!["http://a:9999/".to_string(), "http://b:9999/".to_string()];
        for job_id in 1..=3 {
            health.ensure_fresh(ProbeKind::Idle, job_id, &candidates).await;
        }
        assert_eq!(health.record_counts(), (2, 6));

        registry
            .remove(&RegistryEntry::executor("app", "http://b:9999/"))
            .await
            .unwrap();
        tokio::time::advance(IDLE_RECORD_TTL + Duration::from_millis(1)).await;
        health.refresh_once(&registry).await;

        assert_eq!(health.record_counts(), (1, 0));
        assert!(health.liveness("http://a:9999/").is_some());
        assert!(health.liveness("http://b:9999/").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresher_forgets_expired_registrations() {
        let mut api = MockExecutorApi::new();
        api.expect_beat().never();

        let registry = Arc::new(RegistryStore::new(Duration::from_secs(5)));
        registry
            .register(&RegistryEntry::executor("app", "http://gone:9999/"))
            .await
            .unwrap();

        let health = Arc::new(CandidateHealth::new(
            Arc::new(api),
            Duration::from_millis(200),
            Duration::from_secs(30),
        ));
        health.record_liveness("http://gone:9999/", false, "beat: address:http://gone:9999/ code:500 msg:refused");
        health.record_idle(1, "http://gone:9999/", false, "busy");

        tokio::time::advance(Duration::from_secs(6)).await;
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = Arc::clone(&health).spawn_refresher(registry, Duration::from_secs(1), shutdown_rx);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(health.record_counts(), (0, 0));
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
