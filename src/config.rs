use crate::consumer::retry::DEFAULT_BAD_STATUSES;
use crate::error::{RankError, Result};
use crate::proxy::transport::ProxyTransport;
use crate::services::MAX_TRAFFIC_WORKERS;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

const DEFAULT_PROBE_URL: &str = "https://www.ebay.com/itm/365712943558";
const DEFAULT_IP_ECHO_URL: &str = "http://ipinfo.io/ip";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Proxy evaluation configuration
    pub evaluation: EvaluationConfig,
    /// Traffic run configuration
    pub traffic: TrafficConfig,
    /// Logging configuration
    pub log: LogConfig,
}

/// What the probe measures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
    /// Fetch a fixed, stable page; anonymity is not determined
    Target,
    /// Fetch an IP-echo service and compare against the local IP
    Anonymity,
}

impl ProbeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeMode::Target => "target",
            ProbeMode::Anonymity => "anonymity",
        }
    }
}

impl FromStr for ProbeMode {
    type Err = RankError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "target" => Ok(ProbeMode::Target),
            "anonymity" => Ok(ProbeMode::Anonymity),
            other => Err(RankError::InvalidConfig(format!(
                "PROXYRANK_PROBE_MODE must be target or anonymity, got {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EvaluationConfig {
    /// Flat proxy list, one `host:port` per line
    pub proxies_file: PathBuf,
    /// Score store location
    pub quality_file: PathBuf,
    /// Stable page probed in target mode
    pub probe_url: Url,
    pub probe_mode: ProbeMode,
    /// IP-echo service probed (and queried directly) in anonymity mode
    pub ip_echo_url: Url,
    /// Probes per proxy
    pub attempts: u32,
    /// Per-probe timeout in seconds
    pub probe_timeout: u64,
    /// Concurrent evaluations
    pub workers: usize,
}

impl EvaluationConfig {
    /// URL the probe actually fetches for the configured mode
    pub fn probe_target(&self) -> &Url {
        match self.probe_mode {
            ProbeMode::Target => &self.probe_url,
            ProbeMode::Anonymity => &self.ip_echo_url,
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout)
    }
}

#[derive(Debug, Clone)]
pub struct TrafficConfig {
    /// Caller-supplied workload URL; required for the traffic run
    pub target_url: Option<Url>,
    /// Units of work per run
    pub requests: usize,
    /// Concurrent units (capped)
    pub workers: usize,
    /// Proxies tried per unit
    pub max_proxy_attempts: u32,
    /// Tunnel-check each proxy before use
    pub validate: bool,
    /// Remove failing proxies from the pool
    pub evict: bool,
    /// Validation timeout in seconds
    pub validate_timeout: u64,
    /// Workload request timeout in seconds
    pub request_timeout: u64,
    /// Host the validator tunnels to
    pub validate_host: String,
    pub validate_port: u16,
    /// Statuses that mark the proxy as bad
    pub bad_statuses: Vec<u16>,
}

impl TrafficConfig {
    pub fn target_url(&self) -> Result<&Url> {
        self.target_url.as_ref().ok_or_else(|| {
            RankError::InvalidConfig("PROXYRANK_TARGET_URL is required for run".into())
        })
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let (validate_host, validate_port) = ProxyTransport::parse_authority(&get_env_or(
            "PROXYRANK_VALIDATE_HOST",
            "www.google.com:443",
        ))
        .map_err(|_| {
            RankError::InvalidConfig("PROXYRANK_VALIDATE_HOST must be host[:port]".into())
        })?;

        let target_url = match env::var("PROXYRANK_TARGET_URL") {
            Ok(raw) if !raw.trim().is_empty() => Some(parse_url("PROXYRANK_TARGET_URL", &raw)?),
            _ => None,
        };

        let config = Config {
            evaluation: EvaluationConfig {
                proxies_file: get_env_or("PROXYRANK_PROXIES_FILE", "proxies.txt").into(),
                quality_file: get_env_or("PROXYRANK_QUALITY_FILE", "proxies_quality.json").into(),
                probe_url: parse_url(
                    "PROXYRANK_PROBE_URL",
                    &get_env_or("PROXYRANK_PROBE_URL", DEFAULT_PROBE_URL),
                )?,
                probe_mode: get_env_or("PROXYRANK_PROBE_MODE", "target").parse()?,
                ip_echo_url: parse_url(
                    "PROXYRANK_IP_ECHO_URL",
                    &get_env_or("PROXYRANK_IP_ECHO_URL", DEFAULT_IP_ECHO_URL),
                )?,
                attempts: parse_num("PROXYRANK_ATTEMPTS", "3")?,
                probe_timeout: parse_num("PROXYRANK_PROBE_TIMEOUT", "10")?,
                workers: parse_num("PROXYRANK_WORKERS", "6")?,
            },
            traffic: TrafficConfig {
                target_url,
                requests: parse_num("PROXYRANK_REQUESTS", "500")?,
                workers: parse_num::<usize>("PROXYRANK_TRAFFIC_WORKERS", "50")?
                    .min(MAX_TRAFFIC_WORKERS),
                max_proxy_attempts: parse_num("PROXYRANK_MAX_PROXY_ATTEMPTS", "5")?,
                validate: parse_bool("PROXYRANK_VALIDATE", "true")?,
                evict: parse_bool("PROXYRANK_EVICT", "true")?,
                validate_timeout: parse_num("PROXYRANK_VALIDATE_TIMEOUT", "5")?,
                request_timeout: parse_num("PROXYRANK_REQUEST_TIMEOUT", "10")?,
                validate_host,
                validate_port,
                bad_statuses: parse_statuses(&get_env_or(
                    "PROXYRANK_BAD_STATUSES",
                    &default_bad_statuses(),
                ))?,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "json"),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.evaluation.attempts == 0 {
            return Err(RankError::InvalidConfig(
                "PROXYRANK_ATTEMPTS must be at least 1".into(),
            ));
        }
        if self.evaluation.workers == 0 {
            return Err(RankError::InvalidConfig(
                "PROXYRANK_WORKERS must be at least 1".into(),
            ));
        }
        if self.traffic.workers == 0 {
            return Err(RankError::InvalidConfig(
                "PROXYRANK_TRAFFIC_WORKERS must be at least 1".into(),
            ));
        }
        if self.traffic.max_proxy_attempts == 0 {
            return Err(RankError::InvalidConfig(
                "PROXYRANK_MAX_PROXY_ATTEMPTS must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn parse_url(key: &str, raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| RankError::InvalidConfig(format!("{} must be a valid URL: {}", key, e)))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(RankError::InvalidConfig(format!(
            "{} has unsupported scheme: {}",
            key, other
        ))),
    }
}

fn parse_num<T: FromStr>(key: &str, default: &str) -> Result<T> {
    get_env_or(key, default)
        .trim()
        .parse()
        .map_err(|_| RankError::InvalidConfig(format!("{} must be a valid number", key)))
}

fn parse_bool(key: &str, default: &str) -> Result<bool> {
    match get_env_or(key, default).trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(RankError::InvalidConfig(format!(
            "{} must be true or false, got {}",
            key, other
        ))),
    }
}

fn parse_statuses(raw: &str) -> Result<Vec<u16>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match s.parse::<u16>() {
            Ok(code) if (100..=599).contains(&code) => Ok(code),
            _ => Err(RankError::InvalidConfig(format!(
                "PROXYRANK_BAD_STATUSES has invalid status code: {}",
                s
            ))),
        })
        .collect()
}

fn default_bad_statuses() -> String {
    DEFAULT_BAD_STATUSES
        .iter()
        .map(|code| code.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
