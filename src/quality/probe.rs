//! Single timed request through a proxy

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, instrument};
use url::Url;

use crate::error::TransportKind;
use crate::headers::HeaderProvider;
use crate::models::ProxyEndpoint;
use crate::proxy::transport::{classify_request_error, ProxyTransport};

/// Why a probe did not count as a success
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    Transport { kind: TransportKind, message: String },
    /// The proxy answered, but not with 200
    BadStatus(u16),
}

impl std::fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeFailure::Transport { kind, message } => write!(f, "{}: {}", kind, message),
            ProbeFailure::BadStatus(code) => write!(f, "status code {}", code),
        }
    }
}

/// Classified outcome of one probe
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Success {
        status_code: u16,
        latency: Duration,
        /// Egress addresses reported by the target, when it echoes them
        egress_ips: Vec<IpAddr>,
    },
    Failure(ProbeFailure),
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Success { .. })
    }
}

/// Issues one request through a proxy and classifies the result.
///
/// Implementations must not touch shared state.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, endpoint: &ProxyEndpoint) -> ProbeOutcome;
}

/// Probe that GETs a fixed URL through the proxy
pub struct HttpProbe {
    url: Url,
    timeout: Duration,
    headers: Arc<dyn HeaderProvider>,
    capture_egress: bool,
}

impl HttpProbe {
    pub fn new(url: Url, timeout: Duration, headers: Arc<dyn HeaderProvider>) -> Self {
        Self {
            url,
            timeout,
            headers,
            capture_egress: false,
        }
    }

    /// Parse the response body as an IP echo and report egress addresses
    pub fn capturing_egress(mut self) -> Self {
        self.capture_egress = true;
        self
    }
}

#[async_trait]
impl Probe for HttpProbe {
    #[instrument(skip(self, endpoint), fields(proxy = %endpoint))]
    async fn probe(&self, endpoint: &ProxyEndpoint) -> ProbeOutcome {
        let client = match ProxyTransport::http_client(endpoint, self.timeout) {
            Ok(client) => client,
            Err(e) => {
                return ProbeOutcome::Failure(ProbeFailure::Transport {
                    kind: TransportKind::Other,
                    message: e.to_string(),
                })
            }
        };

        let start = Instant::now();
        let response = match client
            .get(self.url.clone())
            .headers(self.headers.headers())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return transport_failure(&e),
        };

        let status = response.status();
        if status != StatusCode::OK {
            debug!("Probe answered with {}", status);
            return ProbeOutcome::Failure(ProbeFailure::BadStatus(status.as_u16()));
        }

        // Latency covers the full body, like a client that reads the page.
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return transport_failure(&e),
        };
        let latency = start.elapsed();

        let egress_ips = if self.capture_egress {
            parse_egress_ips(&body)
        } else {
            Vec::new()
        };

        debug!(latency_ms = latency.as_millis() as u64, "Probe succeeded");
        ProbeOutcome::Success {
            status_code: status.as_u16(),
            latency,
            egress_ips,
        }
    }
}

fn transport_failure(err: &reqwest::Error) -> ProbeOutcome {
    let kind = classify_request_error(err);
    debug!("Probe failed ({}): {}", kind, err);
    ProbeOutcome::Failure(ProbeFailure::Transport {
        kind,
        message: err.to_string(),
    })
}

/// Extract IP addresses from an IP-echo response.
///
/// Accepts plain text (`1.2.3.4`), comma-separated lists, and JSON bodies
/// carrying an `ip` or `origin` field.
pub fn parse_egress_ips(body: &str) -> Vec<IpAddr> {
    let body = body.trim();

    let text = match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(map)) => ["ip", "origin"]
            .iter()
            .find_map(|key| map.get(*key).and_then(|v| v.as_str()).map(str::to_string))
            .unwrap_or_default(),
        _ => body.to_string(),
    };

    let ips: BTreeSet<IpAddr> = text
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter_map(|part| part.trim().parse().ok())
        .collect();
    ips.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::BrowserHeaders;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Plain-HTTP forward proxy stub that answers every request itself
    async fn stub_proxy(response: &'static str) -> (ProxyEndpoint, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let task = tokio::spawn(async move {
            let (mut client, _) = listener.accept().await.unwrap();
            let mut request: Vec<u8> = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = client.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            client.write_all(response.as_bytes()).await.unwrap();
            client.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (ProxyEndpoint::new("127.0.0.1", port), task)
    }

    fn probe(capture: bool) -> HttpProbe {
        let probe = HttpProbe::new(
            Url::parse("http://echo.invalid/ip").unwrap(),
            Duration::from_secs(5),
            Arc::new(BrowserHeaders::new()),
        );
        if capture {
            probe.capturing_egress()
        } else {
            probe
        }
    }

    #[test]
    fn test_parse_egress_ips() {
        let ip: IpAddr = "203.0.113.7".parse().unwrap();
        assert_eq!(parse_egress_ips("203.0.113.7\n"), vec![ip]);
        assert_eq!(parse_egress_ips(r#"{"ip": "203.0.113.7"}"#), vec![ip]);
        assert_eq!(
            parse_egress_ips(r#"{"origin": "198.51.100.1, 203.0.113.7"}"#).len(),
            2
        );
        assert!(parse_egress_ips("<html>blocked</html>").is_empty());
        assert!(parse_egress_ips(r#"{"status": "ok"}"#).is_empty());
    }

    #[tokio::test]
    async fn test_probe_success_through_proxy() {
        let (endpoint, proxy_task) = stub_proxy(
            "HTTP/1.1 200 OK\r\nContent-Length: 11\r\nConnection: close\r\n\r\n203.0.113.7",
        )
        .await;

        let outcome = probe(true).probe(&endpoint).await;
        match outcome {
            ProbeOutcome::Success {
                status_code,
                egress_ips,
                ..
            } => {
                assert_eq!(status_code, 200);
                assert_eq!(egress_ips, vec!["203.0.113.7".parse::<IpAddr>().unwrap()]);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        // Forward proxies receive the absolute URI and the browser headers.
        let request = proxy_task.await.unwrap();
        assert!(request.starts_with("GET http://echo.invalid/ip HTTP/1.1"));
        assert!(request.to_lowercase().contains("accept-language: en-us,en;q=0.9"));
    }

    #[tokio::test]
    async fn test_probe_non_200_is_failure() {
        let (endpoint, _proxy_task) = stub_proxy(
            "HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;

        let outcome = probe(false).probe(&endpoint).await;
        assert_eq!(outcome, ProbeOutcome::Failure(ProbeFailure::BadStatus(403)));
    }

    #[tokio::test]
    async fn test_silent_proxy_is_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let proxy_task = tokio::spawn(async move {
            let (client, _) = listener.accept().await.unwrap();
            // Hold the connection open without answering.
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(client);
        });

        let probe = HttpProbe::new(
            Url::parse("http://echo.invalid/ip").unwrap(),
            Duration::from_millis(300),
            Arc::new(BrowserHeaders::new()),
        );
        let outcome = probe.probe(&ProxyEndpoint::new("127.0.0.1", port)).await;
        assert!(
            matches!(
                outcome,
                ProbeOutcome::Failure(ProbeFailure::Transport {
                    kind: TransportKind::Timeout,
                    ..
                })
            ),
            "unexpected outcome: {:?}",
            outcome
        );

        proxy_task.abort();
    }

    #[tokio::test]
    async fn test_rejected_tunnel_is_proxy_error() {
        // HTTPS targets go through CONNECT; the proxy refuses the tunnel.
        let (endpoint, proxy_task) =
            stub_proxy("HTTP/1.1 407 Proxy Authentication Required\r\nContent-Length: 0\r\n\r\n")
                .await;

        let probe = HttpProbe::new(
            Url::parse("https://echo.invalid/ip").unwrap(),
            Duration::from_secs(5),
            Arc::new(BrowserHeaders::new()),
        );
        let outcome = probe.probe(&endpoint).await;
        assert!(
            matches!(
                outcome,
                ProbeOutcome::Failure(ProbeFailure::Transport {
                    kind: TransportKind::Proxy,
                    ..
                })
            ),
            "unexpected outcome: {:?}",
            outcome
        );

        let request = proxy_task.await.unwrap();
        assert!(request.starts_with("CONNECT echo.invalid:443 HTTP/1.1"));
    }

    #[tokio::test]
    async fn test_probe_refused_proxy_is_transport_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let outcome = probe(false).probe(&ProxyEndpoint::new("127.0.0.1", port)).await;
        assert!(matches!(
            outcome,
            ProbeOutcome::Failure(ProbeFailure::Transport { .. })
        ));
        assert!(!outcome.is_success());
    }
}
