//! Batch services

pub mod traffic;

pub use traffic::{TrafficRunner, TrafficSummary, MAX_TRAFFIC_WORKERS};
