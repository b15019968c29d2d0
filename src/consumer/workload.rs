//! The request a consumer issues through a chosen proxy

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use tracing::{debug, instrument};
use url::Url;

use crate::error::TransportKind;
use crate::headers::UserAgentProvider;
use crate::models::ProxyEndpoint;
use crate::proxy::transport::{classify_request_error, ProxyTransport};

/// Classified result of one workload request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Any 2xx
    Success { status: u16 },
    TransportFailure { kind: TransportKind, message: String },
    HttpFailure { status: u16 },
}

impl FetchOutcome {
    pub fn from_status(status: u16) -> Self {
        if (200..300).contains(&status) {
            FetchOutcome::Success { status }
        } else {
            FetchOutcome::HttpFailure { status }
        }
    }
}

/// Issues the caller's request through a proxy
#[async_trait]
pub trait Workload: Send + Sync {
    async fn fetch(&self, endpoint: &ProxyEndpoint) -> FetchOutcome;
}

/// GET of a fixed URL with a random user agent per request
pub struct HttpWorkload {
    url: Url,
    timeout: Duration,
    user_agents: Arc<dyn UserAgentProvider>,
}

impl HttpWorkload {
    pub fn new(url: Url, timeout: Duration, user_agents: Arc<dyn UserAgentProvider>) -> Self {
        Self {
            url,
            timeout,
            user_agents,
        }
    }
}

#[async_trait]
impl Workload for HttpWorkload {
    #[instrument(skip(self, endpoint), fields(proxy = %endpoint))]
    async fn fetch(&self, endpoint: &ProxyEndpoint) -> FetchOutcome {
        let client = match ProxyTransport::http_client(endpoint, self.timeout) {
            Ok(client) => client,
            Err(e) => {
                return FetchOutcome::TransportFailure {
                    kind: TransportKind::Other,
                    message: e.to_string(),
                }
            }
        };

        let result = client
            .get(self.url.clone())
            .header(USER_AGENT, self.user_agents.user_agent())
            .send()
            .await;

        match result {
            Ok(response) => {
                let outcome = FetchOutcome::from_status(response.status().as_u16());
                debug!("Workload answered: {:?}", outcome);
                outcome
            }
            Err(e) => {
                let kind = classify_request_error(&e);
                debug!("Workload failed ({}): {}", kind, e);
                FetchOutcome::TransportFailure {
                    kind,
                    message: e.to_string(),
                }
            }
        }
    }
}
