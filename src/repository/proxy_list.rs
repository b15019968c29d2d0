//! Newline-delimited `host:port` proxy list

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use tracing::warn;

use crate::error::{RankError, Result};
use crate::models::ProxyEndpoint;

/// Parsed proxy list with the lines that could not be used
#[derive(Debug, Default)]
pub struct ProxyList {
    pub endpoints: Vec<ProxyEndpoint>,
    /// 1-based line number and the parse error for that line
    pub rejected: Vec<(usize, RankError)>,
}

impl ProxyList {
    /// Parse list content.
    ///
    /// Blank lines and `#` comments are skipped, duplicates keep their first
    /// occurrence, and malformed lines are collected without stopping.
    pub fn parse(content: &str) -> Self {
        let mut list = ProxyList::default();
        let mut seen = HashSet::new();

        for (idx, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match ProxyEndpoint::parse(line) {
                Ok(endpoint) => {
                    if seen.insert(endpoint.address()) {
                        list.endpoints.push(endpoint);
                    }
                }
                Err(e) => list.rejected.push((idx + 1, e)),
            }
        }

        list
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }
}

/// Load and parse a proxy list file, logging every rejected line
pub fn load(path: &Path) -> Result<ProxyList> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(RankError::InputFileMissing(path.to_path_buf()))
        }
        Err(e) => return Err(RankError::Io(e)),
    };

    let list = ProxyList::parse(&content);
    for (line, err) in &list.rejected {
        warn!("Skipping {}:{}: {}", path.display(), line, err);
    }
    Ok(list)
}
