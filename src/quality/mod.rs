//! Proxy quality estimation
//!
//! Probing, per-proxy aggregation into a [`ProxyRecord`](crate::models::ProxyRecord),
//! and the bounded batch scheduler that feeds the score store.

pub mod estimator;
pub mod probe;
pub mod resolver;
pub mod scheduler;

pub use estimator::QualityEstimator;
pub use probe::{HttpProbe, Probe, ProbeFailure, ProbeOutcome};
pub use resolver::resolve_local_ip;
pub use scheduler::{EvaluationScheduler, EvaluationSummary};
