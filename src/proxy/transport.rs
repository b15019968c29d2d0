//! Proxy transport layer
//!
//! Builds HTTP clients that route through a single upstream proxy, opens raw
//! CONNECT tunnels, and maps transport failures onto [`TransportKind`].

use std::error::Error as StdError;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, instrument};

use crate::error::{RankError, Result, TransportKind};
use crate::models::ProxyEndpoint;

const MAX_CONNECT_RESPONSE: usize = 8192;

/// Proxy transport handler
pub struct ProxyTransport;

impl ProxyTransport {
    /// HTTP client whose every request (http and https) goes through `endpoint`
    pub fn http_client(endpoint: &ProxyEndpoint, timeout: Duration) -> Result<reqwest::Client> {
        let mut proxy = reqwest::Proxy::all(endpoint.url()).map_err(|e| {
            RankError::InvalidProxyAddress(format!("{}: {}", endpoint, e))
        })?;
        if let Some(username) = &endpoint.username {
            proxy = proxy.basic_auth(username, endpoint.password.as_deref().unwrap_or(""));
        }

        reqwest::Client::builder()
            .proxy(proxy)
            .timeout(timeout)
            .connect_timeout(timeout)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| RankError::Internal(format!("failed to build HTTP client: {}", e)))
    }

    /// Open a tunnel to `target_host:target_port` with an HTTP CONNECT request.
    ///
    /// Any 2xx answer from the proxy counts as established.
    #[instrument(skip(endpoint), fields(proxy = %endpoint))]
    pub async fn connect_tunnel(
        endpoint: &ProxyEndpoint,
        target_host: &str,
        target_port: u16,
    ) -> Result<TcpStream> {
        debug!("Connecting to HTTP proxy at {}", endpoint);

        let mut stream = TcpStream::connect(endpoint.address())
            .await
            .map_err(|e| RankError::transport(classify_io_error(&e), format!("TCP connect failed: {}", e)))?;

        let connect_request = Self::build_connect_request(endpoint, target_host, target_port);
        stream.write_all(connect_request.as_bytes()).await.map_err(|e| {
            RankError::transport(classify_io_error(&e), format!("Failed to send CONNECT: {}", e))
        })?;

        let head = Self::read_response_head(&mut stream).await?;
        let status_line = head.lines().next().unwrap_or("").to_string();
        match parse_status_code(&status_line) {
            Some(code) if (200..300).contains(&code) => {
                debug!("HTTP CONNECT tunnel established");
                Ok(stream)
            }
            _ => Err(RankError::transport(
                TransportKind::Proxy,
                format!(
                    "CONNECT failed: {}",
                    if status_line.is_empty() { "empty response" } else { status_line.as_str() }
                ),
            )),
        }
    }

    /// Build HTTP CONNECT request
    fn build_connect_request(endpoint: &ProxyEndpoint, target_host: &str, target_port: u16) -> String {
        let authority = format_authority(target_host, target_port);
        let mut request = format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n", authority, authority);

        if let Some(username) = &endpoint.username {
            let password = endpoint.password.as_deref().unwrap_or("");
            let credentials = format!("{}:{}", username, password);
            request.push_str(&format!(
                "Proxy-Authorization: Basic {}\r\n",
                BASE64.encode(credentials.as_bytes())
            ));
        }

        request.push_str("\r\n");
        request
    }

    /// Read until the end of the response head (or the size cap)
    async fn read_response_head(stream: &mut TcpStream) -> Result<String> {
        let mut response = Vec::with_capacity(1024);
        let mut chunk = [0u8; 1024];

        loop {
            let n = stream.read(&mut chunk).await.map_err(|e| {
                RankError::transport(
                    classify_io_error(&e),
                    format!("Failed to read CONNECT response: {}", e),
                )
            })?;
            if n == 0 {
                break;
            }
            response.extend_from_slice(&chunk[..n]);
            if response.windows(4).any(|w| w == b"\r\n\r\n") || response.len() >= MAX_CONNECT_RESPONSE {
                break;
            }
        }

        Ok(String::from_utf8_lossy(&response).into_owned())
    }

    /// Parse host and port from an authority such as `www.google.com:443`
    pub fn parse_authority(authority: &str) -> Result<(String, u16)> {
        if let Some((host, port_str)) = authority.rsplit_once(':') {
            let port = port_str
                .parse::<u16>()
                .map_err(|_| RankError::InvalidConfig(format!("Invalid port in '{}'", authority)))?;
            let host = host.trim_start_matches('[').trim_end_matches(']');
            if host.is_empty() {
                return Err(RankError::InvalidConfig(format!("Missing host in '{}'", authority)));
            }
            Ok((host.to_string(), port))
        } else {
            // Default to port 443 for CONNECT (typically HTTPS)
            Ok((authority.to_string(), 443))
        }
    }
}

/// Map a client error onto a transport failure class
pub fn classify_request_error(err: &reqwest::Error) -> TransportKind {
    if err.is_timeout() {
        return TransportKind::Timeout;
    }

    let mut source: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            match classify_io_error(io) {
                TransportKind::Other => {}
                kind => return kind,
            }
        }

        let text = e.to_string().to_lowercase();
        if text.contains("certificate") || text.contains("tls") || text.contains("ssl") {
            return TransportKind::Tls;
        }
        if text.contains("proxy") || text.contains("tunnel") {
            return TransportKind::Proxy;
        }
        source = e.source();
    }

    // Every connection made by these clients is a connection to the proxy.
    if err.is_connect() {
        TransportKind::Proxy
    } else {
        TransportKind::Other
    }
}

pub fn classify_io_error(err: &std::io::Error) -> TransportKind {
    match err.kind() {
        std::io::ErrorKind::ConnectionRefused => TransportKind::ConnectionRefused,
        std::io::ErrorKind::TimedOut => TransportKind::Timeout,
        std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted => {
            TransportKind::Proxy
        }
        _ => TransportKind::Other,
    }
}

fn parse_status_code(status_line: &str) -> Option<u16> {
    let mut parts = status_line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

fn format_authority(host: &str, port: u16) -> String {
    if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
