//! Pre-use liveness gate for proxies
//!
//! Cheaper than a full quality evaluation: one CONNECT to a well-known HTTPS
//! host, bounded by a timeout.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{debug, instrument};

use crate::models::ProxyEndpoint;
use crate::proxy::transport::ProxyTransport;

/// Checks that a proxy is reachable right now
#[async_trait]
pub trait ProxyValidator: Send + Sync {
    /// Never fails; anything other than a confirmed tunnel is `false`
    async fn validate(&self, endpoint: &ProxyEndpoint) -> bool;
}

/// Validator that opens a CONNECT tunnel to a fixed host
#[derive(Debug, Clone)]
pub struct ConnectValidator {
    target_host: String,
    target_port: u16,
    timeout: Duration,
}

impl ConnectValidator {
    pub fn new(target_host: impl Into<String>, target_port: u16, timeout: Duration) -> Self {
        Self {
            target_host: target_host.into(),
            target_port,
            timeout,
        }
    }
}

impl Default for ConnectValidator {
    fn default() -> Self {
        Self::new("www.google.com", 443, Duration::from_secs(5))
    }
}

#[async_trait]
impl ProxyValidator for ConnectValidator {
    #[instrument(skip(self, endpoint), fields(proxy = %endpoint))]
    async fn validate(&self, endpoint: &ProxyEndpoint) -> bool {
        let connect_result = timeout(
            self.timeout,
            ProxyTransport::connect_tunnel(endpoint, &self.target_host, self.target_port),
        )
        .await;

        match connect_result {
            Ok(Ok(_stream)) => {
                debug!(
                    "Proxy is live (CONNECT to {}:{} successful)",
                    self.target_host, self.target_port
                );
                true
            }
            Ok(Err(e)) => {
                debug!("Proxy failed validation: {}", e);
                false
            }
            Err(_) => {
                debug!("Proxy validation timed out after {:?}", self.timeout);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_validate_unreachable_returns_false() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let validator = ConnectValidator::new("www.google.com", 443, Duration::from_secs(2));
        assert!(!validator.validate(&ProxyEndpoint::new("127.0.0.1", port)).await);
    }

    #[tokio::test]
    async fn test_validate_silent_proxy_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let proxy_task = tokio::spawn(async move {
            let (client, _) = listener.accept().await.unwrap();
            // Hold the connection open without answering.
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(client);
        });

        let validator = ConnectValidator::new("www.google.com", 443, Duration::from_millis(200));
        let start = Instant::now();
        assert!(!validator.validate(&ProxyEndpoint::new("127.0.0.1", port)).await);
        assert!(start.elapsed() < Duration::from_secs(1));

        proxy_task.abort();
    }

    #[tokio::test]
    async fn test_validate_accepting_proxy_returns_true() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let proxy_task = tokio::spawn(async move {
            let (mut client, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = client.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).into_owned();
            client
                .write_all(b"HTTP/1.0 200 Connection established\r\n\r\n")
                .await
                .unwrap();
            request
        });

        let validator = ConnectValidator::new("example.org", 443, Duration::from_secs(2));
        assert!(validator.validate(&ProxyEndpoint::new("127.0.0.1", port)).await);

        let request = proxy_task.await.unwrap();
        assert!(request.starts_with("CONNECT example.org:443 HTTP/1.1"));
    }

    #[tokio::test]
    async fn test_validate_rejecting_proxy_returns_false() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut client, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let _ = client.read(&mut buf).await;
            let _ = client.write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n").await;
        });

        let validator = ConnectValidator::new("example.org", 443, Duration::from_secs(2));
        assert!(!validator.validate(&ProxyEndpoint::new("127.0.0.1", port)).await);
    }
}
