//! 调度触发：取候选节点 → 路由 → 调用执行器 `run`
//!
//! 每次触发的结果都是一个 [`TriggerOutcome`]，失败时携带完整的过程记录，
//! 由上层决定如何标记本次调度。

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use scheduler_core::{BlockStrategy, KillRequest, RpcResponse, TriggerRequest};
use tracing::{info, warn};

use crate::executor_client::ExecutorApi;
use crate::health::{CandidateHealth, ProbeKind};
use crate::registry::RegistryStore;
use crate::strategies::{RouteStrategy, RouterContext};

/// 一次调度所需的任务信息
#[derive(Debug, Clone)]
pub struct JobDispatchInfo {
    pub job_id: i64,
    pub app_name: String,
    pub handler_name: String,
    pub params: Option<String>,
    pub route_strategy: RouteStrategy,
    pub block_strategy: BlockStrategy,
    pub timeout_seconds: u64,
}

impl JobDispatchInfo {
    pub fn new(job_id: i64, app_name: impl Into<String>, handler_name: impl Into<String>) -> Self {
        Self {
            job_id,
            app_name: app_name.into(),
            handler_name: handler_name.into(),
            params: None,
            route_strategy: RouteStrategy::Round,
            block_strategy: BlockStrategy::default(),
            timeout_seconds: 0,
        }
    }

    pub fn with_route_strategy(mut self, route_strategy: RouteStrategy) -> Self {
        self.route_strategy = route_strategy;
        self
    }

    pub fn with_block_strategy(mut self, block_strategy: BlockStrategy) -> Self {
        self.block_strategy = block_strategy;
        self
    }

    pub fn with_params(mut self, params: impl Into<String>) -> Self {
        self.params = Some(params.into());
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerOutcome {
    pub log_id: i64,
    /// 路由失败时为空
    pub address: Option<String>,
    pub code: i32,
    pub shard_index: u32,
    pub shard_total: u32,
    /// 路由与调用过程记录
    pub trace: String,
}

impl TriggerOutcome {
    pub fn is_success(&self) -> bool {
        self.code == RpcResponse::<String>::SUCCESS_CODE
    }
}

pub struct JobTrigger {
    registry: Arc<RegistryStore>,
    health: Arc<CandidateHealth>,
    routers: RouterContext,
    api: Arc<dyn ExecutorApi>,
    next_log_id: AtomicI64,
}

impl JobTrigger {
    pub fn new(
        registry: Arc<RegistryStore>,
        health: Arc<CandidateHealth>,
        api: Arc<dyn ExecutorApi>,
    ) -> Self {
        Self {
            registry,
            routers: RouterContext::new(Arc::clone(&health)),
            health,
            api,
            next_log_id: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }

    fn next_log_id(&self) -> i64 {
        self.next_log_id.fetch_add(1, Ordering::Relaxed)
    }

    /// 从注册表取应用的有效节点并触发
    pub async fn trigger(&self, info: &JobDispatchInfo) -> Vec<TriggerOutcome> {
        let candidates = self.registry.alive_addresses(&info.app_name).await;
        self.trigger_on(info, &candidates).await
    }

    /// 在给定候选节点上触发；分片广播返回每个分片的结果，其余策略只有一个结果
    pub async fn trigger_on(&self, info: &JobDispatchInfo, candidates: &[String]) -> Vec<TriggerOutcome> {
        let outcomes = if info.route_strategy == RouteStrategy::ShardingBroadcast && !candidates.is_empty() {
            let shard_total = candidates.len() as u32;
            let mut outcomes = Vec::with_capacity(candidates.len());
            for (index, address) in candidates.iter().enumerate() {
                let trace = format!("route strategy: {}", info.route_strategy);
                outcomes.push(self.run_on(info, address, index as u32, shard_total, trace).await);
            }
            outcomes
        } else {
            vec![self.route_and_run(info, candidates).await]
        };

        for outcome in &outcomes {
            metrics::counter!(
                "job_dispatch_total",
                "strategy" => info.route_strategy.as_str(),
                "success" => outcome.is_success().to_string()
            )
            .increment(1);
        }
        outcomes
    }

    async fn route_and_run(&self, info: &JobDispatchInfo, candidates: &[String]) -> TriggerOutcome {
        let log_id = self.next_log_id();
        let mut trace = format!("route strategy: {}", info.route_strategy);

        // 分片广播在没有候选节点时与普通路由一样失败
        let strategy = match info.route_strategy {
            RouteStrategy::ShardingBroadcast => RouteStrategy::First,
            other => other,
        };
        let Some(router) = self.routers.router(strategy) else {
            return Self::route_failed(log_id, trace, "unsupported route strategy");
        };

        let kind = router.probe_kind();
        if kind != ProbeKind::None && !candidates.is_empty() {
            self.health.ensure_fresh(kind, info.job_id, candidates).await;
        }

        match router.route_traced(info.job_id, candidates) {
            Ok(routed) => {
                if let Some(route_trace) = routed.trace {
                    trace.push('\n');
                    trace.push_str(&route_trace);
                }
                trace.push_str(&format!("\nroute address: {}", routed.address));
                self.run_with_log_id(info, log_id, &routed.address, 0, 1, trace)
                    .await
            }
            Err(e) => {
                warn!("任务路由失败: job_id={}, error={}", info.job_id, e);
                Self::route_failed(log_id, trace, &e.message)
            }
        }
    }

    fn route_failed(log_id: i64, mut trace: String, reason: &str) -> TriggerOutcome {
        trace.push_str(&format!("\nroute failed: {reason}"));
        TriggerOutcome {
            log_id,
            address: None,
            code: RpcResponse::<String>::FAIL_CODE,
            shard_index: 0,
            shard_total: 1,
            trace,
        }
    }

    async fn run_on(
        &self,
        info: &JobDispatchInfo,
        address: &str,
        shard_index: u32,
        shard_total: u32,
        trace: String,
    ) -> TriggerOutcome {
        let log_id = self.next_log_id();
        self.run_with_log_id(info, log_id, address, shard_index, shard_total, trace)
            .await
    }

    async fn run_with_log_id(
        &self,
        info: &JobDispatchInfo,
        log_id: i64,
        address: &str,
        shard_index: u32,
        shard_total: u32,
        mut trace: String,
    ) -> TriggerOutcome {
        let mut request = TriggerRequest::new(info.job_id, log_id, info.handler_name.clone())
            .with_block_strategy(info.block_strategy)
            .with_timeout_seconds(info.timeout_seconds)
            .with_shard(shard_index, shard_total);
        if let Some(ref params) = info.params {
            request = request.with_params(params.clone());
        }

        let response = self.api.run(address, &request).await;
        trace.push_str(&format!(
            "\nrun result: address:{address} code:{} msg:{}",
            response.code,
            response.message_or_empty()
        ));
        info!(
            "任务触发完成: job_id={}, log_id={}, address={}, code={}",
            info.job_id, log_id, address, response.code
        );

        TriggerOutcome {
            log_id,
            address: Some(address.to_string()),
            code: response.code,
            shard_index,
            shard_total,
            trace,
        }
    }

    /// 终止指定节点上的任务线程
    pub async fn kill(&self, job_id: i64, address: &str) -> RpcResponse<String> {
        self.api.kill(address, &KillRequest { job_id }).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::executor_client::MockExecutorApi;

    fn trigger_with(api: MockExecutorApi) -> JobTrigger {
        let api: Arc<dyn ExecutorApi> = Arc::new(api);
        let health = Arc::new(CandidateHealth::new(
            Arc::clone(&api),
            Duration::from_millis(200),
            Duration::from_secs(30),
        ));
        JobTrigger::new(Arc::new(RegistryStore::new(Duration::from_secs(90))), health, api)
    }

    fn candidates() -> Vec<String> {
        vec!["10.0.0.1:9999".to_string(), "10.0.0.2:9999".to_string()]
    }

    #[tokio::test]
    async fn test_round_robin_trigger_cycles_with_length_two() {
        let mut api = MockExecutorApi::new();
        api.expect_run()
            .withf(|_, request| request.job_id == 42)
            .times(3)
            .returning(|_, _| RpcResponse::success());
        let trigger = trigger_with(api);
        let info = JobDispatchInfo::new(42, "app", "demoJobHandler");

        let mut picked = Vec::new();
        for _ in 0..3 {
            let outcomes = trigger.trigger_on(&info, &candidates()).await;
            assert_eq!(outcomes.len(), 1);
            assert!(outcomes[0].is_success());
            picked.push(outcomes[0].address.clone().unwrap());
        }
        assert_ne!(picked[0], picked[1]);
        assert_eq!(picked[0], picked[2]);
    }

    #[tokio::test]
    async fn test_failover_routes_to_live_candidate() {
        let mut api = MockExecutorApi::new();
        api.expect_beat().returning(|address| {
            if address == "live" {
                RpcResponse::success()
            } else {
                RpcResponse::fail("connection refused")
            }
        });
        api.expect_run()
            .withf(|address, _| address == "live")
            .times(1)
            .returning(|_, _| RpcResponse::success());
        let trigger = trigger_with(api);
        let info = JobDispatchInfo::new(1, "app", "demoJobHandler")
            .with_route_strategy(RouteStrategy::Failover);

        let candidates = vec!["dead-1".to_string(), "dead-2".to_string(), "live".to_string()];
        let outcomes = trigger.trigger_on(&info, &candidates).await;
        assert_eq!(outcomes[0].address.as_deref(), Some("live"));
        assert!(outcomes[0].is_success());

        let trace = &outcomes[0].trace;
        assert!(trace.contains("address:dead-1"), "{trace}");
        assert!(trace.contains("address:dead-2"), "{trace}");
        assert!(trace.contains("route address: live"), "{trace}");
    }

    #[tokio::test]
    async fn test_route_failure_is_reported_without_run() {
        let mut api = MockExecutorApi::new();
        api.expect_run().never();
        let trigger = trigger_with(api);
        let info = JobDispatchInfo::new(1, "app", "demoJobHandler");

        let outcomes = trigger.trigger_on(&info, &[]).await;
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].is_success());
        assert!(outcomes[0].address.is_none());
        assert!(outcomes[0].trace.contains("executor address list is empty"));
    }

    #[tokio::test]
    async fn test_sharding_broadcast_triggers_every_candidate() {
        let mut api = MockExecutorApi::new();
        api.expect_run()
            .withf(|address, request| {
                request.shard_total == 2
                    && ((address == "10.0.0.1:9999" && request.shard_index == 0)
                        || (address == "10.0.0.2:9999" && request.shard_index == 1))
            })
            .times(2)
            .returning(|_, _| RpcResponse::success());
        let trigger = trigger_with(api);
        let info = JobDispatchInfo::new(3, "app", "demoJobHandler")
            .with_route_strategy(RouteStrategy::ShardingBroadcast);

        let outcomes = trigger.trigger_on(&info, &candidates()).await;
        assert_eq!(outcomes.len(), 2);
        assert_ne!(outcomes[0].log_id, outcomes[1].log_id);
    }

    #[tokio::test]
    async fn test_run_failure_is_propagated_in_outcome() {
        let mut api = MockExecutorApi::new();
        api.expect_run()
            .returning(|_, _| RpcResponse::fail("job handler [missing] not found."));
        let trigger = trigger_with(api);
        let info = JobDispatchInfo::new(4, "app", "missing")
            .with_route_strategy(RouteStrategy::First);

        let outcomes = trigger.trigger_on(&info, &candidates()).await;
        assert_eq!(outcomes[0].code, 500);
        assert!(outcomes[0].trace.contains("not found"));
    }
}
