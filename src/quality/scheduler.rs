//! Bounded fan-out of proxy evaluations
//!
//! The store is reset to an empty snapshot when a batch starts. Each unit
//! evaluates one proxy and, if it ever succeeded, hands the record to the
//! score store, which re-sorts and persists before the next unit can.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::error::{RankError, Result};
use crate::models::{ProxyEndpoint, ProxyRecord};
use crate::quality::estimator::QualityEstimator;
use crate::repository::ScoreStore;

/// Outcome of one evaluation batch
#[derive(Debug, Default)]
pub struct EvaluationSummary {
    /// Completed evaluations in completion order
    pub results: Vec<ProxyRecord>,
    /// Records written to the score store
    pub stored: usize,
    /// Units that failed unexpectedly (panics, aborted tasks)
    pub failed: usize,
    /// Whether the batch stopped early on shutdown
    pub cancelled: bool,
}

impl EvaluationSummary {
    pub fn evaluated(&self) -> usize {
        self.results.len()
    }
}

enum UnitResult {
    Done { record: ProxyRecord, stored: bool },
    Skipped,
}

/// Evaluates many proxies on a bounded worker pool
pub struct EvaluationScheduler {
    estimator: Arc<QualityEstimator>,
    store: Arc<ScoreStore>,
    workers: usize,
}

impl EvaluationScheduler {
    pub fn new(estimator: Arc<QualityEstimator>, store: Arc<ScoreStore>, workers: usize) -> Self {
        Self {
            estimator,
            store,
            workers: workers.max(1),
        }
    }

    pub fn store(&self) -> &Arc<ScoreStore> {
        &self.store
    }

    /// Evaluate every endpoint, at most `workers` at a time.
    ///
    /// The store is emptied first, so it ends up holding exactly this batch's
    /// working proxies. Unit failures are logged and counted. A persistence
    /// failure stops the batch and is returned. Shutdown stops new units from starting; the
    /// store keeps whatever was last persisted.
    #[instrument(skip_all, fields(proxies = endpoints.len(), workers = self.workers))]
    pub async fn run(
        &self,
        endpoints: Vec<ProxyEndpoint>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<EvaluationSummary> {
        info!(
            "Evaluating {} proxies with {} workers",
            endpoints.len(),
            self.workers
        );

        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.reset())
            .await
            .map_err(|e| RankError::Internal(format!("store reset task failed: {}", e)))??;

        let estimator = self.estimator.clone();
        let store = self.store.clone();
        let unit_shutdown = shutdown.clone();

        let mut units = futures::stream::iter(endpoints)
            .map(move |endpoint| {
                let estimator = estimator.clone();
                let store = store.clone();
                let shutdown = unit_shutdown.clone();
                let address = endpoint.address();

                let handle = tokio::spawn(async move {
                    if *shutdown.borrow() {
                        return Ok(UnitResult::Skipped);
                    }
                    let record = estimator.evaluate(&endpoint).await;
                    // File writes and fsync stay off the async workers.
                    let to_store = record.clone();
                    let stored = tokio::task::spawn_blocking(move || store.insert(to_store))
                        .await
                        .map_err(|e| RankError::Internal(format!("store task failed: {}", e)))??;
                    Ok::<_, RankError>(UnitResult::Done { record, stored })
                });

                async move { (address, handle.await) }
            })
            .buffer_unordered(self.workers);

        let mut summary = EvaluationSummary::default();
        let mut watching = true;

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed(), if watching => match changed {
                    Ok(()) if *shutdown.borrow() => {
                        warn!("Shutdown requested, stopping evaluation");
                        summary.cancelled = true;
                        break;
                    }
                    Ok(()) => {}
                    Err(_) => watching = false,
                },

                next = units.next() => {
                    let Some((address, joined)) = next else { break };
                    match joined {
                        Ok(Ok(UnitResult::Done { record, stored })) => {
                            if stored {
                                summary.stored += 1;
                            }
                            summary.results.push(record);
                        }
                        Ok(Ok(UnitResult::Skipped)) => {}
                        Ok(Err(e)) => {
                            error!("Failed to persist result for {}: {}", address, e);
                            return Err(e);
                        }
                        Err(e) => {
                            error!("Proxy {} generated an exception: {}", address, e);
                            summary.failed += 1;
                        }
                    }
                }
            }
        }

        info!(
            "Done. {} working proxies saved to {} ({} evaluated, {} failed)",
            self.store.len(),
            self.store.path().display(),
            summary.evaluated(),
            summary.failed
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::probe::{Probe, ProbeFailure, ProbeOutcome};
    use crate::repository::score_store;
    use async_trait::async_trait;
    use rand::seq::SliceRandom;
    use std::collections::HashSet;
    use std::time::Duration;

    /// Succeeds for ports in `good`, with latency derived from the port
    struct PortProbe {
        good: HashSet<u16>,
        panic_on: Option<u16>,
        delay: Duration,
    }

    #[async_trait]
    impl Probe for PortProbe {
        async fn probe(&self, endpoint: &ProxyEndpoint) -> ProbeOutcome {
            tokio::time::sleep(self.delay).await;
            if Some(endpoint.port) == self.panic_on {
                panic!("probe exploded");
            }
            if self.good.contains(&endpoint.port) {
                ProbeOutcome::Success {
                    status_code: 200,
                    latency: Duration::from_millis(endpoint.port as u64),
                    egress_ips: Vec::new(),
                }
            } else {
                ProbeOutcome::Failure(ProbeFailure::BadStatus(502))
            }
        }
    }

    fn endpoints(ports: &[u16]) -> Vec<ProxyEndpoint> {
        ports.iter().map(|p| ProxyEndpoint::new("127.0.0.1", *p)).collect()
    }

    fn scheduler(
        good: &[u16],
        panic_on: Option<u16>,
        delay: Duration,
        path: &std::path::Path,
        workers: usize,
    ) -> EvaluationScheduler {
        let probe = Arc::new(PortProbe {
            good: good.iter().copied().collect(),
            panic_on,
            delay,
        });
        EvaluationScheduler::new(
            Arc::new(QualityEstimator::new(probe, 3)),
            Arc::new(ScoreStore::new(path)),
            workers,
        )
    }

    #[tokio::test]
    async fn test_store_holds_exactly_successful_proxies() {
        let ports: Vec<u16> = (1000..1020).collect();
        let good: Vec<u16> = ports.iter().copied().filter(|p| p % 3 == 0).collect();

        for round in 0..5 {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("proxies_quality.json");

            let mut shuffled = ports.clone();
            shuffled.shuffle(&mut rand::thread_rng());

            let (_tx, rx) = watch::channel(false);
            let summary = scheduler(&good, None, Duration::from_millis(1), &path, 4)
                .run(endpoints(&shuffled), rx)
                .await
                .unwrap();

            assert_eq!(summary.evaluated(), ports.len(), "round {}", round);
            assert_eq!(summary.stored, good.len());
            assert!(!summary.cancelled);

            let persisted = score_store::read(&path).unwrap();
            assert_eq!(persisted.len(), good.len());
            // Lower port means lower latency means higher score.
            let persisted_ports: Vec<u16> = persisted.iter().map(|r| r.port).collect();
            let mut expected = good.clone();
            expected.sort();
            assert_eq!(persisted_ports, expected);
        }
    }

    #[tokio::test]
    async fn test_panicking_unit_does_not_abort_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxies_quality.json");

        let (_tx, rx) = watch::channel(false);
        let summary = scheduler(&[1, 2, 3], Some(2), Duration::ZERO, &path, 2)
            .run(endpoints(&[1, 2, 3, 4]), rx)
            .await
            .unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.evaluated(), 3);
        assert_eq!(summary.stored, 2);
        assert_eq!(score_store::read(&path).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_new_units_and_keeps_store_consistent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxies_quality.json");
        let ports: Vec<u16> = (2000..2040).collect();

        let (tx, rx) = watch::channel(false);
        let scheduler = scheduler(&ports, None, Duration::from_millis(20), &path, 2);

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            tx.send(true).unwrap();
            tx
        });

        let summary = scheduler.run(endpoints(&ports), rx).await.unwrap();
        let _tx = stopper.await.unwrap();

        assert!(summary.cancelled);
        assert!(summary.evaluated() < ports.len());

        // Whatever is on disk is a complete, sorted snapshot.
        match score_store::read(&path) {
            Ok(persisted) => assert!(persisted
                .windows(2)
                .all(|w| w[0].quality_score >= w[1].quality_score)),
            Err(e) => assert!(matches!(e, score_store::StoreReadError::Empty(_)), "{}", e),
        }
    }

    #[tokio::test]
    async fn test_batch_without_successes_clears_previous_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxies_quality.json");
        let stale = ProxyRecord::from_attempts(&ProxyEndpoint::new("9.9.9.9", 80), 3, 3, 0.3, None);
        score_store::write_atomic(&path, &[stale]).unwrap();

        let (_tx, rx) = watch::channel(false);
        let scheduler = scheduler(&[], None, Duration::ZERO, &path, 2);
        let summary = scheduler.run(endpoints(&[1, 2]), rx).await.unwrap();

        assert_eq!(summary.evaluated(), 2);
        assert_eq!(summary.stored, 0);
        assert!(scheduler.store().is_empty());
        assert!(matches!(
            score_store::read(&path),
            Err(score_store::StoreReadError::Empty(_))
        ));
    }

    #[tokio::test]
    async fn test_persistence_failure_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        // Writing into a directory that does not exist cannot succeed.
        let path = dir.path().join("missing").join("proxies_quality.json");

        let (_tx, rx) = watch::channel(false);
        let err = scheduler(&[7], None, Duration::ZERO, &path, 1)
            .run(endpoints(&[7]), rx)
            .await
            .unwrap_err();
        assert!(matches!(err, RankError::Persistence { .. }));
    }
}
