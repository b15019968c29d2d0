//! Browser-like request headers and user-agent strings

use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER, USER_AGENT};

/// Produces a complete, valid header set for one request
pub trait HeaderProvider: Send + Sync {
    fn headers(&self) -> HeaderMap;
}

/// Produces one user-agent string per call
pub trait UserAgentProvider: Send + Sync {
    fn user_agent(&self) -> String;
}

const DESKTOP_CHROME: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Fixed desktop-Chrome header set used for probing
#[derive(Debug, Clone, Default)]
pub struct BrowserHeaders {
    referer: Option<HeaderValue>,
}

impl BrowserHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a `Referer` header; invalid values are ignored
    pub fn with_referer(mut self, referer: &str) -> Self {
        self.referer = HeaderValue::from_str(referer).ok();
        self
    }
}

impl HeaderProvider for BrowserHeaders {
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(DESKTOP_CHROME));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        if let Some(referer) = &self.referer {
            headers.insert(REFERER, referer.clone());
        }
        headers
    }
}

const USER_AGENTS: &[&str] = &[
    DESKTOP_CHROME,
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.2; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.6099.144 Mobile Safari/537.36",
];

/// Random draw from a pool of realistic user-agent strings
#[derive(Debug, Clone)]
pub struct UserAgentPool {
    agents: Vec<String>,
}

impl UserAgentPool {
    pub fn new(agents: Vec<String>) -> Self {
        Self { agents }
    }
}

impl Default for UserAgentPool {
    fn default() -> Self {
        Self::new(USER_AGENTS.iter().map(|s| s.to_string()).collect())
    }
}

impl UserAgentProvider for UserAgentPool {
    fn user_agent(&self) -> String {
        let mut rng = rand::thread_rng();
        self.agents
            .choose(&mut rng)
            .cloned()
            .unwrap_or_else(|| DESKTOP_CHROME.to_string())
    }
}
