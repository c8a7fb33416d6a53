//! Bounded-retry policies for unreliable remote calls.
//!
//! Two shapes: [`RetryPolicy`] wraps a single fallible call with
//! exponential backoff, and [`BatchRetry`] drives a bulk call through a
//! fixed number of rounds, re-attempting only the shrinking unsucceeded
//! subset. Callers compose these explicitly rather than through wrappers.

use crate::config::{BatchConfig, RetryConfig};
use crate::error::PipelineError;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

/// Exponential-backoff executor: up to `max_attempts` tries, sleeping
/// `base_delay * 2^attempt` between failures. The terminal error carries
/// the last underlying cause.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    pub async fn execute<T, F, Fut>(&self, mut op: F) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let mut last_error = String::new();
        for attempt in 0..self.max_attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    log::warn!(
                        "attempt {}/{} failed: {}",
                        attempt + 1,
                        self.max_attempts,
                        e
                    );
                    last_error = e.to_string();
                    if attempt + 1 < self.max_attempts {
                        tokio::time::sleep(self.base_delay * 2u32.pow(attempt)).await;
                    }
                }
            }
        }
        Err(PipelineError::RetriesExhausted {
            attempts: self.max_attempts,
            last_error,
        })
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(c: &RetryConfig) -> Self {
        Self::new(c.max_attempts, Duration::from_millis(c.base_delay_ms))
    }
}

/// Outcome of a batch-degrade run. Items that exhausted every round are
/// returned with their last error so the caller can persist them as
/// failure sentinels; nothing is ever left silently unaccounted for.
#[derive(Debug)]
pub struct BatchOutcome<K> {
    pub succeeded: Vec<K>,
    pub exhausted: Vec<(K, String)>,
    pub rounds: u32,
}

/// Batch executor: attempts the whole remaining set each round, for up to
/// `max_rounds` rounds, suspending for `round_delay` between rounds. Works
/// for arbitrarily small remaining sets, not just full batches.
#[derive(Debug, Clone)]
pub struct BatchRetry {
    pub max_rounds: u32,
    pub round_delay: Duration,
}

impl BatchRetry {
    pub fn new(max_rounds: u32, round_delay: Duration) -> Self {
        Self {
            max_rounds,
            round_delay,
        }
    }

    /// Run `attempt_round` over the unsucceeded subset until everything
    /// succeeds or `max_rounds` is reached. The closure reports a result
    /// per item; items it fails to report stay in the remaining set.
    pub async fn run<K, F, Fut>(&self, items: Vec<K>, mut attempt_round: F) -> BatchOutcome<K>
    where
        K: Clone + Eq + Hash,
        F: FnMut(Vec<K>) -> Fut,
        Fut: Future<Output = Vec<(K, Result<(), String>)>>,
    {
        let mut remaining = items;
        let mut succeeded = Vec::new();
        let mut last_errors: HashMap<K, String> = HashMap::new();
        let mut rounds = 0u32;

        while rounds < self.max_rounds && !remaining.is_empty() {
            if rounds > 0 {
                tokio::time::sleep(self.round_delay).await;
            }
            rounds += 1;

            let results = attempt_round(remaining.clone()).await;
            let mut reported: HashSet<K> = HashSet::new();
            let mut next = Vec::new();
            for (key, result) in results {
                reported.insert(key.clone());
                match result {
                    Ok(()) => succeeded.push(key),
                    Err(msg) => {
                        last_errors.insert(key.clone(), msg);
                        next.push(key);
                    }
                }
            }
            // Anything the round never reported on is still outstanding.
            for key in remaining {
                if !reported.contains(&key) {
                    last_errors
                        .entry(key.clone())
                        .or_insert_with(|| "no result returned for item".to_string());
                    next.push(key);
                }
            }
            remaining = next;

            if !remaining.is_empty() {
                log::warn!(
                    "batch round {}/{}: {} items still unsucceeded",
                    rounds,
                    self.max_rounds,
                    remaining.len()
                );
            }
        }

        let exhausted = remaining
            .into_iter()
            .map(|key| {
                let msg = last_errors
                    .remove(&key)
                    .unwrap_or_else(|| format!("unsucceeded after {} rounds", rounds));
                (key, msg)
            })
            .collect();

        BatchOutcome {
            succeeded,
            exhausted,
            rounds,
        }
    }
}

impl From<&BatchConfig> for BatchRetry {
    fn from(c: &BatchConfig) -> Self {
        Self::new(c.max_rounds, Duration::from_millis(c.round_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn execute_succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result = policy
            .execute(|| {
                let calls = calls2.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(PipelineError::TransientNetwork("timeout".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn execute_exhaustion_cites_last_cause() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let result: Result<(), _> = policy
            .execute(|| async { Err(PipelineError::TransientNetwork("refused".into())) })
            .await;

        match result {
            Err(PipelineError::RetriesExhausted {
                attempts,
                last_error,
            }) => {
                assert_eq!(attempts, 2);
                assert!(last_error.contains("refused"));
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn batch_retries_only_unsucceeded_subset() {
        let batch = BatchRetry::new(5, Duration::from_millis(1));
        let rounds_seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let rounds_seen2 = rounds_seen.clone();

        let outcome = batch
            .run(vec![1i64, 2, 3], move |remaining| {
                let rounds_seen = rounds_seen2.clone();
                async move {
                    rounds_seen.lock().unwrap().push(remaining.clone());
                    // Item 1 succeeds on the first round, 2 on the second,
                    // 3 never.
                    remaining
                        .into_iter()
                        .map(|k| {
                            let round = rounds_seen.lock().unwrap().len() as i64;
                            if k == 3 {
                                (k, Err("model refused".to_string()))
                            } else if k <= round {
                                (k, Ok(()))
                            } else {
                                (k, Err("not yet".to_string()))
                            }
                        })
                        .collect()
                }
            })
            .await;

        assert_eq!(outcome.succeeded, vec![1, 2]);
        assert_eq!(outcome.exhausted.len(), 1);
        assert_eq!(outcome.exhausted[0].0, 3);
        assert_eq!(outcome.exhausted[0].1, "model refused");
        assert_eq!(outcome.rounds, 5);

        let seen = rounds_seen.lock().unwrap();
        assert_eq!(seen[0], vec![1, 2, 3]);
        assert_eq!(seen[1], vec![2, 3]);
        assert_eq!(seen[2], vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_always_failing_runs_exactly_max_rounds() {
        let batch = BatchRetry::new(5, Duration::from_millis(1));
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let outcome = batch
            .run(vec!["leaf"], move |remaining| {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    remaining
                        .into_iter()
                        .map(|k| (k, Err("boom".to_string())))
                        .collect()
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(outcome.rounds, 5);
        assert!(outcome.succeeded.is_empty());
        assert_eq!(outcome.exhausted, vec![("leaf", "boom".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_handles_sets_smaller_than_nominal_batch() {
        // A single-item set must still get the full round treatment.
        let batch = BatchRetry::new(3, Duration::from_millis(1));
        let outcome = batch
            .run(vec![7i64], |remaining| async move {
                remaining.into_iter().map(|k| (k, Ok(()))).collect()
            })
            .await;
        assert_eq!(outcome.succeeded, vec![7]);
        assert_eq!(outcome.rounds, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_unreported_items_stay_outstanding() {
        let batch = BatchRetry::new(2, Duration::from_millis(1));
        let outcome = batch
            .run(vec![1i64, 2], |_remaining| async move {
                // Only ever reports on item 1.
                vec![(1i64, Ok(()))]
            })
            .await;
        // Item 1 succeeds twice reported once per round it appears in;
        // item 2 is never reported and ends exhausted.
        assert!(outcome.succeeded.contains(&1));
        assert_eq!(outcome.exhausted.len(), 1);
        assert_eq!(outcome.exhausted[0].0, 2);
    }
}
