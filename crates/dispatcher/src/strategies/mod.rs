//! 执行器路由策略
//!
//! 每个策略都是 `(job_id, 候选地址) -> 地址` 的同步选择函数，失败时返回带有
//! 完整尝试记录的 [`RouteError`]，从不 panic。需要探测节点状态的
//! Failover/Busyover 只读取 [`CandidateHealth`] 缓存，网络探测由缓存负责。

mod basic;
mod consistent_hash;
mod failover;
mod lfu;
mod lru;
mod round_robin;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::health::{CandidateHealth, ProbeKind};

pub use basic::{FirstStrategy, LastStrategy, RandomStrategy};
pub use consistent_hash::ConsistentHashStrategy;
pub use failover::{BusyoverStrategy, FailoverStrategy};
pub use lfu::LfuStrategy;
pub use lru::LruStrategy;
pub use round_robin::RoundRobinStrategy;

/// 按任务统计的路由状态（轮询计数、LRU/LFU 使用记录）的有效期
pub const ROUTE_STATS_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// 计数超过该值后重新随机初始化，避免无限增长
pub(crate) const COUNTER_RESET_THRESHOLD: u64 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RouteError {
    pub message: String,
}

impl RouteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn empty_candidates() -> Self {
        Self::new("executor address list is empty")
    }
}

pub type RouteResult = Result<String, RouteError>;

/// 路由结果及选择过程中跳过节点的诊断
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routed {
    pub address: String,
    pub trace: Option<String>,
}

pub trait ExecutorRouter: Send + Sync {
    fn route(&self, job_id: i64, candidates: &[String]) -> RouteResult;

    fn route_traced(&self, job_id: i64, candidates: &[String]) -> Result<Routed, RouteError> {
        self.route(job_id, candidates)
            .map(|address| Routed { address, trace: None })
    }

    fn name(&self) -> &'static str;

    /// 路由前需要刷新的节点健康信息
    fn probe_kind(&self) -> ProbeKind {
        ProbeKind::None
    }
}

pub(crate) fn ensure_candidates(candidates: &[String]) -> Result<(), RouteError> {
    if candidates.is_empty() {
        return Err(RouteError::empty_candidates());
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteStrategy {
    First,
    Last,
    Round,
    Random,
    ConsistentHash,
    LeastFrequentlyUsed,
    LeastRecentlyUsed,
    Failover,
    Busyover,
    /// 广播到所有节点，每个节点携带自己的分片序号
    ShardingBroadcast,
}

impl RouteStrategy {
    pub const ALL: [RouteStrategy; 10] = [
        RouteStrategy::First,
        RouteStrategy::Last,
        RouteStrategy::Round,
        RouteStrategy::Random,
        RouteStrategy::ConsistentHash,
        RouteStrategy::LeastFrequentlyUsed,
        RouteStrategy::LeastRecentlyUsed,
        RouteStrategy::Failover,
        RouteStrategy::Busyover,
        RouteStrategy::ShardingBroadcast,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteStrategy::First => "FIRST",
            RouteStrategy::Last => "LAST",
            RouteStrategy::Round => "ROUND",
            RouteStrategy::Random => "RANDOM",
            RouteStrategy::ConsistentHash => "CONSISTENT_HASH",
            RouteStrategy::LeastFrequentlyUsed => "LEAST_FREQUENTLY_USED",
            RouteStrategy::LeastRecentlyUsed => "LEAST_RECENTLY_USED",
            RouteStrategy::Failover => "FAILOVER",
            RouteStrategy::Busyover => "BUSYOVER",
            RouteStrategy::ShardingBroadcast => "SHARDING_BROADCAST",
        }
    }
}

impl fmt::Display for RouteStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RouteStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        RouteStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == normalized)
            .ok_or_else(|| format!("无效的路由策略: {s}"))
    }
}

/// 路由上下文：持有各策略实例及其内部状态
///
/// 每个上下文相互独立，同一进程内可以存在多个（例如测试中）。
pub struct RouterContext {
    first: Arc<FirstStrategy>,
    last: Arc<LastStrategy>,
    random: Arc<RandomStrategy>,
    round: Arc<RoundRobinStrategy>,
    consistent_hash: Arc<ConsistentHashStrategy>,
    lfu: Arc<LfuStrategy>,
    lru: Arc<LruStrategy>,
    failover: Arc<FailoverStrategy>,
    busyover: Arc<BusyoverStrategy>,
}

impl RouterContext {
    pub fn new(health: Arc<CandidateHealth>) -> Self {
        Self {
            first: Arc::new(FirstStrategy),
            last: Arc::new(LastStrategy),
            random: Arc::new(RandomStrategy),
            round: Arc::new(RoundRobinStrategy::new()),
            consistent_hash: Arc::new(ConsistentHashStrategy::new()),
            lfu: Arc::new(LfuStrategy::new()),
            lru: Arc::new(LruStrategy::new()),
            failover: Arc::new(FailoverStrategy::new(Arc::clone(&health))),
            busyover: Arc::new(BusyoverStrategy::new(health)),
        }
    }

    /// 分片广播不是单点路由，返回 `None`
    pub fn router(&self, strategy: RouteStrategy) -> Option<Arc<dyn ExecutorRouter>> {
        let router: Arc<dyn ExecutorRouter> = match strategy {
            RouteStrategy::First => self.first.clone(),
            RouteStrategy::Last => self.last.clone(),
            RouteStrategy::Round => self.round.clone(),
            RouteStrategy::Random => self.random.clone(),
            RouteStrategy::ConsistentHash => self.consistent_hash.clone(),
            RouteStrategy::LeastFrequentlyUsed => self.lfu.clone(),
            RouteStrategy::LeastRecentlyUsed => self.lru.clone(),
            RouteStrategy::Failover => self.failover.clone(),
            RouteStrategy::Busyover => self.busyover.clone(),
            RouteStrategy::ShardingBroadcast => return None,
        };
        Some(router)
    }
}
