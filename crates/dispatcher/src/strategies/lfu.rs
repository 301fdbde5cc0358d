use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use rand::Rng;

use super::{ensure_candidates, ExecutorRouter, RouteResult, COUNTER_RESET_THRESHOLD, ROUTE_STATS_TTL};

struct LfuState {
    counts: HashMap<i64, HashMap<String, u64>>,
    expires_at: Instant,
}

/// 最不经常使用策略
///
/// 新节点的初始计数在 `[0, 候选数)` 内随机，首轮分配因此不会总是偏向列表头部。
pub struct LfuStrategy {
    state: Mutex<LfuState>,
}

impl LfuStrategy {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LfuState {
                counts: HashMap::new(),
                expires_at: Instant::now() + ROUTE_STATS_TTL,
            }),
        }
    }
}

impl Default for LfuStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorRouter for LfuStrategy {
    fn route(&self, job_id: i64, candidates: &[String]) -> RouteResult {
        ensure_candidates(candidates)?;

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        if now > state.expires_at {
            state.counts.clear();
            state.expires_at = now + ROUTE_STATS_TTL;
        }

        let counts = state.counts.entry(job_id).or_default();
        counts.retain(|address, _| candidates.contains(address));

        let mut rng = rand::rng();
        for address in candidates {
            let count = counts.entry(address.clone()).or_insert_with(|| rng.random_range(0..candidates.len() as u64));
            if *count > COUNTER_RESET_THRESHOLD {
                *count = 0;
            }
        }

        // 计数相同时按候选列表顺序取第一个
        let mut selected = &candidates[0];
        let mut min_count = u64::MAX;
        for address in candidates {
            let count = counts.get(address).copied().unwrap_or(0);
            if count < min_count {
                min_count = count;
                selected = address;
            }
        }

        let selected = selected.clone();
        if let Some(count) = counts.get_mut(&selected) {
            *count += 1;
        }
        Ok(selected)
    }

    fn name(&self) -> &'static str {
        "LeastFrequentlyUsed"
    }
}
