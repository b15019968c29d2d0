//! proxyrank - proxy quality estimation and weighted selection
//!
//! ## Features
//!
//! - Concurrent quality evaluation of a proxy list (success rate, latency, anonymity)
//! - Atomically persisted, score-sorted quality store
//! - Quality-weighted live pool with eviction of failing proxies
//! - CONNECT-tunnel validation before use
//! - Bounded retry of each unit of work across proxies

pub mod config;
pub mod consumer;
pub mod error;
pub mod headers;
pub mod models;
pub mod proxy;
pub mod quality;
pub mod repository;
pub mod services;

pub use config::Config;
pub use error::{RankError, Result};
