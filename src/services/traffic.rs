//! Traffic batch: N units of work through the live pool on a bounded worker pool

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::consumer::retry::{ExhaustReason, ProxyConsumer, UnitOutcome};

/// Upper bound on concurrent traffic units
pub const MAX_TRAFFIC_WORKERS: usize = 512;

/// Outcome of one traffic batch
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TrafficSummary {
    pub succeeded: usize,
    pub exhausted: usize,
    /// Units that ran out of proxies rather than attempts
    pub starved: usize,
    /// Proxies removed from the pool during the batch
    pub evicted: usize,
    /// Units that panicked
    pub failed: usize,
    pub cancelled: bool,
}

impl TrafficSummary {
    pub fn completed(&self) -> usize {
        self.succeeded + self.exhausted
    }
}

pub struct TrafficRunner {
    consumer: Arc<ProxyConsumer>,
    requests: usize,
    workers: usize,
}

impl TrafficRunner {
    pub fn new(consumer: Arc<ProxyConsumer>, requests: usize, workers: usize) -> Self {
        Self {
            consumer,
            requests,
            workers: workers.clamp(1, MAX_TRAFFIC_WORKERS),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run every unit to a terminal state, at most `workers` at a time
    #[instrument(skip_all, fields(requests = self.requests, workers = self.workers))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> TrafficSummary {
        let mut summary = TrafficSummary::default();
        let pool = self.consumer.pool().clone();
        let initial = pool.len();

        if initial == 0 {
            warn!("No proxies available, skipping {} requests", self.requests);
            summary.exhausted = self.requests;
            summary.starved = self.requests;
            return summary;
        }

        info!(
            "Sending {} requests through {} proxies with {} workers",
            self.requests, initial, self.workers
        );

        let consumer = self.consumer.clone();
        let unit_shutdown = shutdown.clone();

        let mut units = futures::stream::iter(0..self.requests)
            .map(move |_| {
                let consumer = consumer.clone();
                let shutdown = unit_shutdown.clone();
                tokio::spawn(async move {
                    if *shutdown.borrow() {
                        return None;
                    }
                    Some(consumer.run_unit().await)
                })
            })
            .buffer_unordered(self.workers);

        let mut watching = true;

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed(), if watching => match changed {
                    Ok(()) if *shutdown.borrow() => {
                        warn!("Shutdown requested, stopping traffic");
                        summary.cancelled = true;
                        break;
                    }
                    Ok(()) => {}
                    Err(_) => watching = false,
                },

                next = units.next() => {
                    let Some(joined) = next else { break };
                    match joined {
                        Ok(Some(UnitOutcome::Success { .. })) => summary.succeeded += 1,
                        Ok(Some(UnitOutcome::Exhausted { reason, .. })) => {
                            summary.exhausted += 1;
                            if reason == ExhaustReason::NoProxyAvailable {
                                summary.starved += 1;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            error!("Request unit generated an exception: {}", e);
                            summary.failed += 1;
                        }
                    }
                }
            }
        }

        summary.evicted = initial.saturating_sub(pool.len());
        info!(
            "Traffic done: {} succeeded, {} exhausted, {} proxies evicted, {} left",
            summary.succeeded,
            summary.exhausted,
            summary.evicted,
            pool.len()
        );
        summary
    }
}
