use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use rand::Rng;

use super::{ensure_candidates, ExecutorRouter, RouteResult, COUNTER_RESET_THRESHOLD, ROUTE_STATS_TTL};

struct RoundState {
    counters: HashMap<i64, u64>,
    expires_at: Instant,
}

/// 轮询策略
///
/// 每个任务维护独立计数器，首次使用时随机初始化在 `[0, 100)`，避免所有任务
/// 都从第一个节点开始。计数器整体每 24 小时清空一次。
pub struct RoundRobinStrategy {
    state: Mutex<RoundState>,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RoundState {
                counters: HashMap::new(),
                expires_at: Instant::now() + ROUTE_STATS_TTL,
            }),
        }
    }

    fn next_count(&self, job_id: i64) -> u64 {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        if now > state.expires_at {
            state.counters.clear();
            state.expires_at = now + ROUTE_STATS_TTL;
        }

        let count = match state.counters.get(&job_id) {
            Some(&count) if count <= COUNTER_RESET_THRESHOLD => count,
            _ => rand::rng().random_range(0..100),
        };
        state.counters.insert(job_id, count + 1);
        count
    }
}

impl Default for RoundRobinStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorRouter for RoundRobinStrategy {
    fn route(&self, job_id: i64, candidates: &[String]) -> RouteResult {
        ensure_candidates(candidates)?;
        let index = (self.next_count(job_id) % candidates.len() as u64) as usize;
        Ok(candidates[index].clone())
    }

    fn name(&self) -> &'static str {
        "RoundRobin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin_alternates_between_two_candidates() {
        let strategy = RoundRobinStrategy::new();
        let candidates = vec!["a".to_string(), "b".to_string()];

        let picks: Vec<String> = (0..6)
            .map(|_| strategy.route(42, &candidates).unwrap())
            .collect();
        for pair in picks.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
    }

    #[test]
    fn test_round_robin_visits_every_candidate_once_per_cycle() {
        let strategy = RoundRobinStrategy::new();
        let candidates: Vec<String> = (0..5).map(|i| format!("node-{i}")).collect();

        let mut picks: Vec<String> = (0..5)
            .map(|_| strategy.route(7, &candidates).unwrap())
            .collect();
        picks.sort();
        assert_eq!(picks, candidates);
    }

    #[test]
    fn test_counter_reset_after_threshold() {
        let strategy = RoundRobinStrategy::new();
        strategy
            .state
            .lock()
            .unwrap()
            .counters
            .insert(9, COUNTER_RESET_THRESHOLD + 1);

        let count = strategy.next_count(9);
        assert!(count < 100);
    }

    #[test]
    fn test_counters_are_cleared_after_ttl() {
        let strategy = RoundRobinStrategy::new();
        {
            let mut state = strategy.state.lock().unwrap();
            state.counters.insert(3, 500);
            state.expires_at = Instant::now() - std::time::Duration::from_secs(1);
        }

        let count = strategy.next_count(3);
        assert!(count < 100);
        assert!(strategy.state.lock().unwrap().expires_at > Instant::now());
    }
}
