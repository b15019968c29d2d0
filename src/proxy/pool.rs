//! Live, in-memory proxy pool with quality-weighted selection
//!
//! Loaded once per process from the score store (or the flat proxy list) and
//! shrunk by eviction while the process runs. Evictions are never persisted.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::RwLock;
use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::error::RankError;
use crate::models::{ProxyEndpoint, ProxyRecord};
use crate::repository::{proxy_list, score_store};

/// Selection weight floor for proxies loaded from the score store
pub const MIN_WEIGHT: f64 = 0.01;

/// Weight of every proxy loaded from the flat list
pub const FLAT_WEIGHT: f64 = 1.0;

/// Where the pool contents came from
#[derive(Debug)]
pub enum PoolSource {
    /// Records from the score store, with the flat-list endpoints that carry
    /// their credentials
    Loaded {
        records: Vec<ProxyRecord>,
        known: Vec<ProxyEndpoint>,
    },
    /// Endpoints from the flat proxy list
    Fallback(Vec<ProxyEndpoint>),
    Empty,
}

impl PoolSource {
    /// Prefer the score store, fall back to the flat list, else empty
    pub fn load(quality_path: &Path, list_path: &Path) -> Self {
        match score_store::read(quality_path) {
            Ok(records) => {
                info!(
                    "Loaded {} quality-tested proxies from {}",
                    records.len(),
                    quality_path.display()
                );
                // The store never holds credentials; the flat list does.
                let known = match proxy_list::load(list_path) {
                    Ok(list) => list.endpoints,
                    Err(e) => {
                        debug!("No credentials from {}: {}", list_path.display(), e);
                        Vec::new()
                    }
                };
                return PoolSource::Loaded { records, known };
            }
            Err(e) => warn!("{}, falling back to {}", e, list_path.display()),
        }

        match proxy_list::load(list_path) {
            Ok(list) if !list.is_empty() => {
                info!("Loaded {} proxies from {}", list.len(), list_path.display());
                PoolSource::Fallback(list.endpoints)
            }
            Ok(_) => {
                warn!("{} contains no usable proxies", list_path.display());
                PoolSource::Empty
            }
            Err(RankError::InputFileMissing(_)) => {
                warn!(
                    "Neither {} nor {} found",
                    quality_path.display(),
                    list_path.display()
                );
                PoolSource::Empty
            }
            Err(e) => {
                warn!("Failed to read {}: {}", list_path.display(), e);
                PoolSource::Empty
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PoolSource::Loaded { .. } => "score_store",
            PoolSource::Fallback(_) => "proxy_list",
            PoolSource::Empty => "empty",
        }
    }
}

/// Index-aligned proxies and weights; only ever mutated together
#[derive(Debug, Default)]
struct PoolInner {
    proxies: Vec<ProxyEndpoint>,
    weights: Vec<f64>,
}

/// Quality-weighted proxy pool supporting concurrent draw and removal
#[derive(Debug, Default)]
pub struct LivePool {
    inner: RwLock<PoolInner>,
}

impl LivePool {
    pub fn new(entries: Vec<(ProxyEndpoint, f64)>) -> Self {
        let (proxies, weights) = entries.into_iter().unzip();
        Self {
            inner: RwLock::new(PoolInner { proxies, weights }),
        }
    }

    pub fn from_source(source: PoolSource) -> Self {
        match source {
            PoolSource::Loaded { records, known } => {
                let mut known: HashMap<String, ProxyEndpoint> =
                    known.into_iter().map(|e| (e.address(), e)).collect();
                Self::new(
                    records
                        .into_iter()
                        .map(|r| {
                            let weight = r.quality_score.max(MIN_WEIGHT);
                            let endpoint = known
                                .remove(&r.address())
                                .unwrap_or_else(|| ProxyEndpoint::new(r.host, r.port));
                            (endpoint, weight)
                        })
                        .collect(),
                )
            }
            PoolSource::Fallback(endpoints) => {
                Self::new(endpoints.into_iter().map(|e| (e, FLAT_WEIGHT)).collect())
            }
            PoolSource::Empty => Self::default(),
        }
    }

    /// Load from the score store or the flat list
    pub fn load(quality_path: &Path, list_path: &Path) -> Self {
        Self::from_source(PoolSource::load(quality_path, list_path))
    }

    /// Weighted random draw; `None` when the pool is empty
    pub fn draw(&self) -> Option<ProxyEndpoint> {
        self.draw_with(&mut rand::thread_rng())
    }

    pub fn draw_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<ProxyEndpoint> {
        let inner = self.inner.read();

        match inner.proxies.len() {
            0 => None,
            1 => Some(inner.proxies[0].clone()),
            _ => match WeightedIndex::new(&inner.weights) {
                Ok(dist) => Some(inner.proxies[dist.sample(rng)].clone()),
                Err(e) => {
                    // Unusable weights degrade to a uniform draw.
                    debug!("Falling back to uniform draw: {}", e);
                    inner.proxies.choose(rng).cloned()
                }
            },
        }
    }

    /// Evict the proxy with this `host:port` address.
    ///
    /// Returns whether anything was removed; removing an absent proxy is a no-op.
    pub fn remove(&self, address: &str) -> bool {
        let mut inner = self.inner.write();

        match inner.proxies.iter().position(|p| p.address() == address) {
            Some(idx) => {
                inner.proxies.remove(idx);
                inner.weights.remove(idx);
                debug!("Evicted {} ({} proxies left)", address, inner.proxies.len());
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().proxies.is_empty()
    }

    /// Copy of the aligned `host:port` addresses and weights
    pub fn snapshot(&self) -> (Vec<String>, Vec<f64>) {
        let inner = self.inner.read();
        (
            inner.proxies.iter().map(|p| p.address()).collect(),
            inner.weights.clone(),
        )
    }
}
