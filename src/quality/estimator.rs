//! Reduces repeated probes of one proxy to a [`ProxyRecord`]

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::models::{ProxyEndpoint, ProxyRecord};
use crate::quality::probe::{Probe, ProbeOutcome};

/// Default number of probes per proxy
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Runs a fixed number of sequential probes per proxy.
///
/// Probes for one proxy never overlap and are never retried.
pub struct QualityEstimator {
    probe: Arc<dyn Probe>,
    attempts: u32,
    local_ip: Option<IpAddr>,
}

impl QualityEstimator {
    pub fn new(probe: Arc<dyn Probe>, attempts: u32) -> Self {
        Self {
            probe,
            attempts: attempts.max(1),
            local_ip: None,
        }
    }

    /// Enable anonymity classification against this host's public IP
    pub fn with_local_ip(mut self, local_ip: IpAddr) -> Self {
        self.local_ip = Some(local_ip);
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[instrument(skip(self, endpoint), fields(proxy = %endpoint))]
    pub async fn evaluate(&self, endpoint: &ProxyEndpoint) -> ProxyRecord {
        debug!("Starting evaluation");

        let mut successes = 0u32;
        let mut total_latency = 0.0f64;
        let mut observed: HashSet<IpAddr> = HashSet::new();

        for attempt in 1..=self.attempts {
            match self.probe.probe(endpoint).await {
                ProbeOutcome::Success {
                    latency,
                    egress_ips,
                    ..
                } => {
                    successes += 1;
                    total_latency += latency.as_secs_f64();
                    observed.extend(egress_ips);
                    debug!(
                        "Success on attempt {}/{}: latency {:.2}s",
                        attempt,
                        self.attempts,
                        latency.as_secs_f64()
                    );
                }
                ProbeOutcome::Failure(reason) => {
                    debug!("Failed on attempt {}/{}: {}", attempt, self.attempts, reason);
                }
            }
        }

        let anonymity = self
            .local_ip
            .map(|local| !observed.is_empty() && !observed.contains(&local));

        let record =
            ProxyRecord::from_attempts(endpoint, self.attempts, successes, total_latency, anonymity);
        info!(
            success_rate = record.success_rate,
            quality_score = record.quality_score,
            "Evaluated {}/{} successful",
            successes,
            self.attempts
        );
        record
    }
}
