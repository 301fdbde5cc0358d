use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use rand::Rng;

use super::{ensure_candidates, ExecutorRouter, RouteResult, ROUTE_STATS_TTL};

struct LruState {
    /// 每个任务的使用顺序，队首为最久未使用
    orders: HashMap<i64, Vec<String>>,
    expires_at: Instant,
}

/// 最近最久未使用策略
pub struct LruStrategy {
    state: Mutex<LruState>,
}

impl LruStrategy {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LruState {
                orders: HashMap::new(),
                expires_at: Instant::now() + ROUTE_STATS_TTL,
            }),
        }
    }
}

impl Default for LruStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorRouter for LruStrategy {
    fn route(&self, job_id: i64, candidates: &[String]) -> RouteResult {
        ensure_candidates(candidates)?;

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        if now > state.expires_at {
            state.orders.clear();
            state.expires_at = now + ROUTE_STATS_TTL;
        }

        let order = state.orders.entry(job_id).or_default();
        order.retain(|address| candidates.contains(address));

        // 新节点随机插入，避免所有任务同时压向最新上线的节点
        let mut rng = rand::rng();
        for address in candidates {
            if !order.contains(address) {
                let position = rng.random_range(0..=order.len());
                order.insert(position, address.clone());
            }
        }

        let selected = order.remove(0);
        order.push(selected.clone());
        Ok(selected)
    }

    fn name(&self) -> &'static str {
        "LeastRecentlyUsed"
    }
}
