use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use super::{ensure_candidates, ExecutorRouter, RouteResult};

/// 每个地址在哈希环上的虚拟节点数
pub const VIRTUAL_NODE_COUNT: usize = 100;

/// 一致性哈希策略
///
/// 同一任务在节点集合不变时总是落在同一节点上；增删一个节点时只有约
/// `1/N` 的任务会迁移。环在每次调用时根据当前候选列表重建。
pub struct ConsistentHashStrategy;

impl ConsistentHashStrategy {
    pub fn new() -> Self {
        Self
    }

    fn build_ring(candidates: &[String]) -> BTreeMap<u32, &String> {
        let mut ring = BTreeMap::new();
        for address in candidates {
            for i in 0..VIRTUAL_NODE_COUNT {
                ring.insert(hash_key(&format!("SHARD-{address}-NODE-{i}")), address);
            }
        }
        ring
    }
}

impl Default for ConsistentHashStrategy {
    fn default() -> Self {
        Self::new()
    }
}

/// SHA-256 摘要前 4 字节按小端序解释为 32 位无符号数
pub fn hash_key(key: &str) -> u32 {
    let digest = Sha256::digest(key.as_bytes());
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

impl ExecutorRouter for ConsistentHashStrategy {
    fn route(&self, job_id: i64, candidates: &[String]) -> RouteResult {
        ensure_candidates(candidates)?;
        let ring = Self::build_ring(candidates);
        let job_hash = hash_key(&job_id.to_string());

        let address = ring
            .range(job_hash..)
            .next()
            .or_else(|| ring.iter().next())
            .map(|(_, address)| (*address).clone())
            .unwrap_or_else(|| candidates[0].clone());
        Ok(address)
    }

    fn name(&self) -> &'static str {
        "ConsistentHash"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("http://10.0.0.{i}:9999/")).collect()
    }

    #[test]
    fn test_hash_key_is_stable() {
        assert_eq!(hash_key("42"), hash_key("42"));
        assert_ne!(hash_key("42"), hash_key("43"));
    }

    #[test]
    fn test_same_job_routes_to_same_node() {
        let strategy = ConsistentHashStrategy::new();
        let candidates = nodes(5);
        let first = strategy.route(1001, &candidates).unwrap();
        for _ in 0..10 {
            assert_eq!(strategy.route(1001, &candidates).unwrap(), first);
        }
    }

    #[test]
    fn test_candidate_order_does_not_matter() {
        let strategy = ConsistentHashStrategy::new();
        let candidates = nodes(4);
        let mut reversed = candidates.clone();
        reversed.reverse();
        for job_id in 0..100 {
            assert_eq!(
                strategy.route(job_id, &candidates).unwrap(),
                strategy.route(job_id, &reversed).unwrap()
            );
        }
    }

    #[test]
    fn test_removing_a_node_moves_about_one_nth_of_jobs() {
        let strategy = ConsistentHashStrategy::new();
        let before = nodes(5);
        let after = nodes(4);
        let samples = 10_000;

        let moved = (0..samples)
            .filter(|job_id| {
                strategy.route(*job_id, &before).unwrap() != strategy.route(*job_id, &after).unwrap()
            })
            .count();

        // 理论值 1/5，虚拟节点带来的偏差保留较宽的容忍区间
        let ratio = moved as f64 / samples as f64;
        assert!(ratio > 0.10 && ratio < 0.32, "moved ratio {ratio}");
    }
}
