use serde::{Deserialize, Serialize};

use super::ProxyEndpoint;

/// Result of one evaluation round for a single proxy
///
/// Serialized as `{ip, port, success_rate, avg_latency, anonymity, quality_score}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyRecord {
    #[serde(rename = "ip")]
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub success_rate: f64,
    /// Mean seconds over successful attempts; `+inf` when nothing succeeded
    #[serde(with = "latency", default = "latency::unknown")]
    pub avg_latency: f64,
    #[serde(default)]
    pub anonymity: Option<bool>,
    pub quality_score: f64,
}

impl ProxyRecord {
    /// Build a record from raw attempt counts, deriving the score
    pub fn from_attempts(
        endpoint: &ProxyEndpoint,
        attempts: u32,
        successes: u32,
        total_latency: f64,
        anonymity: Option<bool>,
    ) -> Self {
        let success_rate = if attempts > 0 {
            successes as f64 / attempts as f64
        } else {
            0.0
        };
        let avg_latency = if successes > 0 {
            total_latency / successes as f64
        } else {
            f64::INFINITY
        };

        Self {
            host: endpoint.host.clone(),
            port: endpoint.port,
            success_rate,
            avg_latency,
            anonymity,
            quality_score: quality_score(success_rate, avg_latency),
        }
    }

    /// `host:port` identity shared with the live pool
    pub fn address(&self) -> String {
        ProxyEndpoint::new(self.host.clone(), self.port).address()
    }

    /// Recompute the score from the stored rate and latency
    pub fn recomputed_score(&self) -> f64 {
        quality_score(self.success_rate, self.avg_latency)
    }
}

/// Composite ranking value: `success_rate / (avg_latency + 1)`, or 0 with no successes.
pub fn quality_score(success_rate: f64, avg_latency: f64) -> f64 {
    if success_rate <= 0.0 || !avg_latency.is_finite() {
        return 0.0;
    }
    success_rate * (1.0 / (avg_latency.max(0.0) + 1.0))
}

/// Sort records by descending quality score.
///
/// Stable, so records with equal scores keep their relative order.
pub fn sort_by_quality(records: &mut [ProxyRecord]) {
    records.sort_by(|a, b| b.quality_score.total_cmp(&a.quality_score));
}

/// JSON has no infinity literal; `+inf` travels as `null`.
mod latency {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn unknown() -> f64 {
        f64::INFINITY
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}
