use std::str::FromStr;

use crate::error::{RankError, Result};

/// A forward proxy reachable at `host:port`, with optional basic credentials
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyEndpoint {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
        }
    }

    /// Parse `host:port` or `user:pass@host:port`
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() || !raw.contains(':') {
            return Err(RankError::InvalidProxyAddress(format!(
                "'{}' is not host:port",
                raw
            )));
        }

        // Use URL parsing to properly handle bracketed IPv6 like "[::1]:8080".
        let url = url::Url::parse(&format!("http://{}", raw)).map_err(|e| {
            RankError::InvalidProxyAddress(format!("Invalid address '{}': {}", raw, e))
        })?;

        if !(url.path().is_empty() || url.path() == "/")
            || url.query().is_some()
            || url.fragment().is_some()
        {
            return Err(RankError::InvalidProxyAddress(format!(
                "Invalid address '{}': unexpected path",
                raw
            )));
        }

        let host = url.host_str().ok_or_else(|| {
            RankError::InvalidProxyAddress(format!("Invalid address '{}': missing host", raw))
        })?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        // Url drops the default port, so read it off the authority text.
        let authority = raw.rsplit_once('@').map_or(raw, |(_, a)| a);
        let port = authority
            .rsplit_once(':')
            .and_then(|(_, p)| p.parse::<u16>().ok())
            .ok_or_else(|| {
                RankError::InvalidProxyAddress(format!("Invalid address '{}': missing port", raw))
            })?;

        let username = if url.username().is_empty() {
            None
        } else {
            Some(url.username().to_string())
        };
        let password = username
            .as_ref()
            .map(|_| url.password().unwrap_or("").to_string());

        Ok(Self {
            host: host.to_string(),
            port,
            username,
            password,
        })
    }

    /// `host:port` form used as the identity of the proxy in pools and logs
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Proxy URL suitable for an HTTP client, without credentials
    pub fn url(&self) -> String {
        format!("http://{}", self.address())
    }

    pub fn has_credentials(&self) -> bool {
        self.username.is_some()
    }
}

impl FromStr for ProxyEndpoint {
    type Err = RankError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.address())
    }
}
