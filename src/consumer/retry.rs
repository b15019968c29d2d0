//! Per-unit proxy selection with validation, eviction and bounded retries
//!
//! `Select -> Validate -> Use -> {Success | Retry | Exhausted}`. A unit never
//! fails the batch; it ends in [`UnitOutcome::Success`] or
//! [`UnitOutcome::Exhausted`].

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::consumer::workload::{FetchOutcome, Workload};
use crate::models::ProxyEndpoint;
use crate::proxy::pool::LivePool;
use crate::proxy::validator::ProxyValidator;

/// Status codes that mark the proxy itself as bad
pub const DEFAULT_BAD_STATUSES: &[u16] = &[400, 403, 404, 407, 429, 502, 503];

/// States a unit of work moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Select,
    Validate,
    Use,
    Retry,
    Success,
    Exhausted,
}

impl UnitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitState::Select => "select",
            UnitState::Validate => "validate",
            UnitState::Use => "use",
            UnitState::Retry => "retry",
            UnitState::Success => "success",
            UnitState::Exhausted => "exhausted",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Proxies tried per unit before giving up
    pub max_proxy_attempts: u32,
    /// Remove proxies that fail during use; failed validation always removes
    pub evict: bool,
    /// Statuses treated like a transport failure of the proxy
    pub bad_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_proxy_attempts: 5,
            evict: true,
            bad_statuses: DEFAULT_BAD_STATUSES.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustReason {
    NoProxyAvailable,
    AttemptsExceeded,
}

/// Terminal state of one unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Success {
        proxy: ProxyEndpoint,
        status: u16,
        attempts: u32,
    },
    Exhausted {
        attempts: u32,
        reason: ExhaustReason,
    },
}

impl UnitOutcome {
    pub fn state(&self) -> UnitState {
        match self {
            UnitOutcome::Success { .. } => UnitState::Success,
            UnitOutcome::Exhausted { .. } => UnitState::Exhausted,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UnitOutcome::Success { .. })
    }
}

/// Drives units of work against the live pool
pub struct ProxyConsumer {
    pool: Arc<LivePool>,
    validator: Option<Arc<dyn ProxyValidator>>,
    workload: Arc<dyn Workload>,
    policy: RetryPolicy,
}

impl ProxyConsumer {
    /// `validator: None` skips the validate step and uses drawn proxies directly
    pub fn new(
        pool: Arc<LivePool>,
        validator: Option<Arc<dyn ProxyValidator>>,
        workload: Arc<dyn Workload>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            pool,
            validator,
            workload,
            policy,
        }
    }

    pub fn pool(&self) -> &Arc<LivePool> {
        &self.pool
    }

    /// Run one unit of work to a terminal state
    #[instrument(skip(self))]
    pub async fn run_unit(&self) -> UnitOutcome {
        let max_attempts = self.policy.max_proxy_attempts.max(1);
        let mut attempts = 0u32;

        loop {
            if attempts >= max_attempts {
                warn!("Gave up after {} proxies", attempts);
                return UnitOutcome::Exhausted {
                    attempts,
                    reason: ExhaustReason::AttemptsExceeded,
                };
            }

            self.trace(UnitState::Select, None);
            let Some(proxy) = self.pool.draw() else {
                warn!("No proxies available");
                return UnitOutcome::Exhausted {
                    attempts,
                    reason: ExhaustReason::NoProxyAvailable,
                };
            };
            attempts += 1;

            if let Some(validator) = &self.validator {
                self.trace(UnitState::Validate, Some(&proxy));
                if !validator.validate(&proxy).await {
                    // Unreachable right now; removed whatever the eviction policy.
                    self.remove(&proxy, "failed validation");
                    self.trace(UnitState::Retry, Some(&proxy));
                    continue;
                }
            }

            self.trace(UnitState::Use, Some(&proxy));
            match self.workload.fetch(&proxy).await {
                FetchOutcome::Success { status } => {
                    info!("Request successful - Proxy: {}", proxy);
                    return UnitOutcome::Success {
                        proxy,
                        status,
                        attempts,
                    };
                }
                FetchOutcome::TransportFailure { kind, message } => {
                    self.evict(&proxy, &format!("{}: {}", kind, message));
                }
                FetchOutcome::HttpFailure { status } if self.is_bad_status(status) => {
                    self.evict(&proxy, &format!("status code {}", status));
                }
                FetchOutcome::HttpFailure { status } => {
                    warn!("Request failed - Status Code: {} - Proxy: {}", status, proxy);
                }
            }
            self.trace(UnitState::Retry, Some(&proxy));
        }
    }

    fn is_bad_status(&self, status: u16) -> bool {
        self.policy.bad_statuses.contains(&status)
    }

    fn evict(&self, proxy: &ProxyEndpoint, reason: &str) {
        if !self.policy.evict {
            debug!("Proxy {} failed ({}), eviction disabled", proxy, reason);
            return;
        }
        self.remove(proxy, reason);
    }

    fn remove(&self, proxy: &ProxyEndpoint, reason: &str) {
        if self.pool.remove(&proxy.address()) {
            warn!(
                "Evicted proxy {} ({}), {} left",
                proxy,
                reason,
                self.pool.len()
            );
        }
    }

    fn trace(&self, state: UnitState, proxy: Option<&ProxyEndpoint>) {
        match proxy {
            Some(proxy) => debug!(state = state.as_str(), proxy = %proxy, "Unit transition"),
            None => debug!(state = state.as_str(), "Unit transition"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportKind;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};

    /// Passes only the listed addresses
    struct AllowListValidator {
        allowed: HashSet<String>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ProxyValidator for AllowListValidator {
        async fn validate(&self, endpoint: &ProxyEndpoint) -> bool {
            self.seen.lock().push(endpoint.address());
            self.allowed.contains(&endpoint.address())
        }
    }

    /// Fixed outcome per address
    struct ScriptedWorkload {
        outcomes: HashMap<String, FetchOutcome>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Workload for ScriptedWorkload {
        async fn fetch(&self, endpoint: &ProxyEndpoint) -> FetchOutcome {
            self.calls.lock().push(endpoint.address());
            self.outcomes
                .get(&endpoint.address())
                .cloned()
                .unwrap_or(FetchOutcome::Success { status: 200 })
        }
    }

    fn pool(entries: &[(&str, f64)]) -> Arc<LivePool> {
        Arc::new(LivePool::new(
            entries
                .iter()
                .map(|(a, w)| (ProxyEndpoint::parse(a).unwrap(), *w))
                .collect(),
        ))
    }

    fn validator(allowed: &[&str]) -> Arc<AllowListValidator> {
        Arc::new(AllowListValidator {
            allowed: allowed.iter().map(|s| s.to_string()).collect(),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn workload(outcomes: &[(&str, FetchOutcome)]) -> Arc<ScriptedWorkload> {
        Arc::new(ScriptedWorkload {
            outcomes: outcomes
                .iter()
                .map(|(a, o)| (a.to_string(), o.clone()))
                .collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_failed_validation_evicts_then_succeeds() {
        // The first proxy is weighted so heavily it is always drawn first.
        let pool = pool(&[("1.1.1.1:80", 1.0e12), ("2.2.2.2:80", 1.0e-12)]);
        let validator = validator(&["2.2.2.2:80"]);
        let workload = workload(&[]);
        let consumer = ProxyConsumer::new(
            pool.clone(),
            Some(validator.clone()),
            workload.clone(),
            RetryPolicy::default(),
        );

        let outcome = consumer.run_unit().await;
        assert_eq!(outcome.state(), UnitState::Success);
        assert_eq!(
            outcome,
            UnitOutcome::Success {
                proxy: ProxyEndpoint::new("2.2.2.2", 80),
                status: 200,
                attempts: 2,
            }
        );

        let (proxies, weights) = pool.snapshot();
        assert_eq!(proxies, vec!["2.2.2.2:80"]);
        assert_eq!(weights, vec![1.0e-12]);
        assert_eq!(*validator.seen.lock(), vec!["1.1.1.1:80", "2.2.2.2:80"]);
        assert_eq!(*workload.calls.lock(), vec!["2.2.2.2:80"]);
    }

    #[tokio::test]
    async fn test_empty_pool_is_exhausted() {
        let consumer = ProxyConsumer::new(
            Arc::new(LivePool::default()),
            Some(validator(&[])),
            workload(&[]),
            RetryPolicy::default(),
        );
        assert_eq!(
            consumer.run_unit().await,
            UnitOutcome::Exhausted {
                attempts: 0,
                reason: ExhaustReason::NoProxyAvailable,
            }
        );
    }

    #[tokio::test]
    async fn test_pool_drained_by_evictions() {
        let pool = pool(&[("1.1.1.1:80", 1.0), ("2.2.2.2:80", 1.0)]);
        let consumer = ProxyConsumer::new(
            pool.clone(),
            Some(validator(&[])),
            workload(&[]),
            RetryPolicy::default(),
        );

        let outcome = consumer.run_unit().await;
        assert_eq!(
            outcome,
            UnitOutcome::Exhausted {
                attempts: 2,
                reason: ExhaustReason::NoProxyAvailable,
            }
        );
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_attempt_bound() {
        // Without eviction the same failing proxy keeps coming back.
        let pool = pool(&[("1.1.1.1:80", 1.0)]);
        let workload = workload(&[(
            "1.1.1.1:80",
            FetchOutcome::TransportFailure {
                kind: TransportKind::Timeout,
                message: "connect timed out".to_string(),
            },
        )]);
        let consumer = ProxyConsumer::new(
            pool.clone(),
            None,
            workload.clone(),
            RetryPolicy {
                max_proxy_attempts: 3,
                evict: false,
                ..RetryPolicy::default()
            },
        );

        assert_eq!(
            consumer.run_unit().await,
            UnitOutcome::Exhausted {
                attempts: 3,
                reason: ExhaustReason::AttemptsExceeded,
            }
        );
        assert_eq!(workload.calls.lock().len(), 3);
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_bad_status_evicts_other_status_does_not() {
        let pool = pool(&[("1.1.1.1:80", 1.0e12), ("2.2.2.2:80", 1.0e-12)]);
        let workload = workload(&[
            ("1.1.1.1:80", FetchOutcome::HttpFailure { status: 407 }),
            ("2.2.2.2:80", FetchOutcome::HttpFailure { status: 500 }),
        ]);
        let consumer = ProxyConsumer::new(
            pool.clone(),
            None,
            workload.clone(),
            RetryPolicy {
                max_proxy_attempts: 4,
                ..RetryPolicy::default()
            },
        );

        let outcome = consumer.run_unit().await;
        assert_eq!(
            outcome,
            UnitOutcome::Exhausted {
                attempts: 4,
                reason: ExhaustReason::AttemptsExceeded,
            }
        );
        // 407 evicted the first proxy; 500 kept the second one around.
        assert_eq!(pool.snapshot().0, vec!["2.2.2.2:80"]);
        assert_eq!(
            *workload.calls.lock(),
            vec!["1.1.1.1:80", "2.2.2.2:80", "2.2.2.2:80", "2.2.2.2:80"]
        );
    }

    #[tokio::test]
    async fn test_failed_validation_removes_even_without_eviction() {
        let pool = pool(&[("1.1.1.1:80", 1.0e12), ("2.2.2.2:80", 1.0e-12)]);
        let workload = workload(&[(
            "2.2.2.2:80",
            FetchOutcome::HttpFailure { status: 502 },
        )]);
        let consumer = ProxyConsumer::new(
            pool.clone(),
            Some(validator(&["2.2.2.2:80"])),
            workload.clone(),
            RetryPolicy {
                max_proxy_attempts: 3,
                evict: false,
                ..RetryPolicy::default()
            },
        );

        let outcome = consumer.run_unit().await;
        assert_eq!(
            outcome,
            UnitOutcome::Exhausted {
                attempts: 3,
                reason: ExhaustReason::AttemptsExceeded,
            }
        );
        // The unreachable proxy is gone; the 502 one stays with eviction off.
        assert_eq!(pool.snapshot().0, vec!["2.2.2.2:80"]);
        assert_eq!(workload.calls.lock().len(), 2);
    }
}
