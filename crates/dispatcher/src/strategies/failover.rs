use std::sync::Arc;

use super::{ensure_candidates, ExecutorRouter, RouteError, RouteResult, Routed};
use crate::health::{CandidateHealth, ProbeKind, ProbeRecord};

/// 按顺序检查候选节点的探测结果，返回第一个通过的节点
///
/// 选中节点时携带它之前被跳过节点的诊断；所有节点都未通过时，
/// 错误信息包含每一个节点的诊断。
fn first_passing<F>(
    strategy: &str,
    candidates: &[String],
    lookup: F,
) -> Result<Routed, RouteError>
where
    F: Fn(&str) -> Option<ProbeRecord>,
{
    ensure_candidates(candidates)?;

    let mut trace = Vec::with_capacity(candidates.len());
    for address in candidates {
        match lookup(address) {
            Some(record) if record.ok => {
                trace.push(record.message);
                return Ok(Routed {
                    address: address.clone(),
                    trace: Some(trace.join("\n")),
                });
            }
            Some(record) => trace.push(record.message),
            None => trace.push(format!("address:{address} no probe result")),
        }
    }

    Err(RouteError::new(format!(
        "{strategy}: no available executor\n{}",
        trace.join("\n")
    )))
}

/// 故障转移：选择第一个心跳正常的节点
pub struct FailoverStrategy {
    health: Arc<CandidateHealth>,
}

impl FailoverStrategy {
    pub fn new(health: Arc<CandidateHealth>) -> Self {
        Self { health }
    }
}

impl ExecutorRouter for FailoverStrategy {
    fn route(&self, job_id: i64, candidates: &[String]) -> RouteResult {
        self.route_traced(job_id, candidates).map(|routed| routed.address)
    }

    fn route_traced(&self, _job_id: i64, candidates: &[String]) -> Result<Routed, RouteError> {
        first_passing("failover", candidates, |address| self.health.liveness(address))
    }

    fn name(&self) -> &'static str {
        "Failover"
    }

    fn probe_kind(&self) -> ProbeKind {
        ProbeKind::Liveness
    }
}

/// 忙碌转移：选择第一个该任务空闲的节点
pub struct BusyoverStrategy {
    health: Arc<CandidateHealth>,
}

impl BusyoverStrategy {
    pub fn new(health: Arc<CandidateHealth>) -> Self {
        Self { health }
    }
}

impl ExecutorRouter for BusyoverStrategy {
    fn route(&self, job_id: i64, candidates: &[String]) -> RouteResult {
        self.route_traced(job_id, candidates).map(|routed| routed.address)
    }

    fn route_traced(&self, job_id: i64, candidates: &[String]) -> Result<Routed, RouteError> {
        first_passing("busyover", candidates, |address| self.health.idle(job_id, address))
    }

    fn name(&self) -> &'static str {
        "Busyover"
    }

    fn probe_kind(&self) -> ProbeKind {
        ProbeKind::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failover_skips_dead_candidates() {
        let health = Arc::new(CandidateHealth::detached());
        health.record_liveness("dead-1", false, "beat: address:dead-1 code:500 msg:connection refused");
        health.record_liveness("dead-2", false, "beat: address:dead-2 timeout after 1000ms");
        health.record_liveness("live", true, "beat: address:live code:200 msg:");

        let strategy = FailoverStrategy::new(health);
        let candidates = vec!["dead-1".to_string(), "dead-2".to_string(), "live".to_string()];
        assert_eq!(strategy.route(1, &candidates).unwrap(), "live");

        let routed = strategy.route_traced(1, &candidates).unwrap();
        let trace = routed.trace.unwrap();
        assert!(trace.contains("address:dead-1 code:500"));
        assert!(trace.contains("address:dead-2 timeout"));
        assert!(trace.ends_with("beat: address:live code:200 msg:"));
    }

    #[test]
    fn test_failover_reports_every_dead_candidate() {
        let health = Arc::new(CandidateHealth::detached());
        health.record_liveness("dead-1", false, "beat: address:dead-1 code:500 msg:refused");

        let strategy = FailoverStrategy::new(health);
        let candidates = vec!["dead-1".to_string(), "unknown".to_string()];
        let err = strategy.route(1, &candidates).unwrap_err();
        assert!(err.message.contains("dead-1"));
        assert!(err.message.contains("address:unknown no probe result"));
    }

    #[test]
    fn test_busyover_uses_job_scoped_idle_state() {
        let health = Arc::new(CandidateHealth::detached());
        health.record_idle(5, "a", false, "idleBeat: address:a code:500 msg:busy");
        health.record_idle(5, "b", true, "idleBeat: address:b code:200 msg:");
        health.record_idle(6, "a", true, "idleBeat: address:a code:200 msg:");

        let strategy = BusyoverStrategy::new(health);
        let candidates = vec!["a".to_string(), "b".to_string()];
        assert_eq!(strategy.route(5, &candidates).unwrap(), "b");
        assert_eq!(strategy.route(6, &candidates).unwrap(), "a");
        assert_eq!(strategy.probe_kind(), ProbeKind::Idle);
    }
}
