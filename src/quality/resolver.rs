//! One-shot lookup of this host's public IP

use std::net::IpAddr;
use std::time::Duration;

use tracing::{info, instrument};
use url::Url;

use crate::error::{RankError, Result};
use crate::quality::probe::parse_egress_ips;

/// Ask an IP-echo service, without any proxy, for our public address.
///
/// Callers that need anonymity classification treat failure as fatal.
#[instrument(skip(url), fields(url = %url))]
pub async fn resolve_local_ip(url: &Url, timeout: Duration) -> Result<IpAddr> {
    info!("Retrieving local IP");

    let client = reqwest::Client::builder()
        .no_proxy()
        .timeout(timeout)
        .build()
        .map_err(|e| RankError::IpResolution(e.to_string()))?;

    let response = client
        .get(url.clone())
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| RankError::IpResolution(e.to_string()))?;

    let body = response
        .text()
        .await
        .map_err(|e| RankError::IpResolution(e.to_string()))?;

    let ip = parse_egress_ips(&body).into_iter().next().ok_or_else(|| {
        RankError::IpResolution(format!("no IP address in response: {:?}", body.trim()))
    })?;

    info!("Local IP retrieved: {}", ip);
    Ok(ip)
}
