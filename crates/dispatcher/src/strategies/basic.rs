use rand::Rng;

use super::{ensure_candidates, ExecutorRouter, RouteResult};

pub struct FirstStrategy;

impl ExecutorRouter for FirstStrategy {
    fn route(&self, _job_id: i64, candidates: &[String]) -> RouteResult {
        ensure_candidates(candidates)?;
        Ok(candidates[0].clone())
    }

    fn name(&self) -> &'static str {
        "First"
    }
}

pub struct LastStrategy;

impl ExecutorRouter for LastStrategy {
    fn route(&self, _job_id: i64, candidates: &[String]) -> RouteResult {
        ensure_candidates(candidates)?;
        Ok(candidates[candidates.len() - 1].clone())
    }

    fn name(&self) -> &'static str {
        "Last"
    }
}

pub struct RandomStrategy;

impl ExecutorRouter for RandomStrategy {
    fn route(&self, _job_id: i64, candidates: &[String]) -> RouteResult {
        ensure_candidates(candidates)?;
        let index = rand::rng().random_range(0..candidates.len());
        Ok(candidates[index].clone())
    }

    fn name(&self) -> &'static str {
        "Random"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<String> {
        vec!["a".to_string(), "b".to_string(), "c".to_string()]
    }

    #[test]
    fn test_first_and_last() {
        assert_eq!(FirstStrategy.route(1, &candidates()).unwrap(), "a");
        assert_eq!(LastStrategy.route(1, &candidates()).unwrap(), "c");
    }

    #[test]
    fn test_random_stays_within_candidates() {
        let candidates = candidates();
        for job_id in 0..200 {
            let address = RandomStrategy.route(job_id, &candidates).unwrap();
            assert!(candidates.contains(&address));
        }
    }
}
