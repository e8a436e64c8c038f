/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Upstream DNS resolver client.
//!
//! Standard DNS over UDP. Accepted address forms: `udp://1.1.1.1:53`,
//! `1.1.1.1:53`, or a bare IP (port 53).

use crate::core::error::{DnsError, Result};
use async_trait::async_trait;
use hickory_client::client::{Client, ClientHandle};
use hickory_proto::op::Message;
use hickory_proto::runtime::TokioRuntimeProvider;
use hickory_proto::udp::UdpClientStream;
use parking_lot::Mutex;
use serde::Deserialize;
use std::fmt::Debug;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;
use url::Url;

const DEFAULT_DNS_PORT: u16 = 53;
const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 5;

/// Configuration for a single upstream DNS server.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Upstream address (`udp://ip:port`, `ip:port`, or bare IP).
    pub addr: String,

    /// Per-query timeout in seconds.
    #[serde(default = "default_query_timeout")]
    pub timeout: u64,
}

fn default_query_timeout() -> u64 {
    DEFAULT_QUERY_TIMEOUT_SECS
}

/// An upstream DNS resolver connection.
#[async_trait]
pub trait Upstream: Debug + Send + Sync + 'static {
    /// Establish the connection. Called once from plugin init.
    async fn connect(&self) -> Result<()>;

    /// Forward the first question of `request` and return the upstream's
    /// answer with the original message id restored.
    async fn query(&self, request: &Message) -> Result<Message>;

    fn addr(&self) -> SocketAddr;
}

/// Build an upstream from its configuration.
pub fn build_upstream(config: &UpstreamConfig) -> Result<Box<dyn Upstream>> {
    let addr = parse_upstream_addr(&config.addr)?;
    Ok(Box::new(UdpUpstream {
        addr,
        timeout: Duration::from_secs(config.timeout),
        client: Mutex::new(None),
    }))
}

/// Parse the supported upstream address forms into a socket address.
pub fn parse_upstream_addr(raw: &str) -> Result<SocketAddr> {
    let raw = raw.trim();

    if raw.contains("://") {
        let url = Url::parse(raw)
            .map_err(|e| DnsError::config(format!("invalid upstream url '{raw}': {e}")))?;
        match url.scheme() {
            "udp" => {}
            other => {
                return Err(DnsError::config(format!(
                    "unsupported upstream scheme '{other}' in '{raw}'"
                )));
            }
        }
        let host = url
            .host_str()
            .ok_or_else(|| DnsError::config(format!("upstream url '{raw}' has no host")))?;
        let ip = IpAddr::from_str(host)
            .map_err(|_| DnsError::config(format!("upstream host must be an IP address: {host}")))?;
        return Ok(SocketAddr::new(ip, url.port().unwrap_or(DEFAULT_DNS_PORT)));
    }

    if let Ok(addr) = SocketAddr::from_str(raw) {
        return Ok(addr);
    }

    let ip = IpAddr::from_str(raw)
        .map_err(|_| DnsError::config(format!("invalid upstream address: {raw}")))?;
    Ok(SocketAddr::new(ip, DEFAULT_DNS_PORT))
}

/// DNS-over-UDP upstream backed by a hickory client.
pub struct UdpUpstream {
    addr: SocketAddr,
    timeout: Duration,
    client: Mutex<Option<Client>>,
}

impl Debug for UdpUpstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpUpstream")
            .field("addr", &self.addr)
            .field("timeout", &self.timeout)
            .field("connected", &self.client.lock().is_some())
            .finish()
    }
}

#[async_trait]
impl Upstream for UdpUpstream {
    async fn connect(&self) -> Result<()> {
        let conn = UdpClientStream::builder(self.addr, TokioRuntimeProvider::default()).build();
        let (client, bg) = Client::connect(conn).await?;
        tokio::spawn(bg);
        *self.client.lock() = Some(client);
        debug!("connected to upstream {}", self.addr);
        Ok(())
    }

    async fn query(&self, request: &Message) -> Result<Message> {
        let client = self
            .client
            .lock()
            .clone()
            .ok_or_else(|| DnsError::runtime(format!("upstream {} is not connected", self.addr)))?;

        let query = request
            .queries()
            .first()
            .ok_or_else(|| DnsError::protocol("query has no question section"))?;

        let future = {
            let mut client = client;
            client.query(query.name().clone(), query.query_class(), query.query_type())
        };

        let response = tokio::time::timeout(self.timeout, future)
            .await
            .map_err(|_| DnsError::protocol(format!("upstream {} timed out", self.addr)))??;

        let mut message = response.into_message();
        message.set_id(request.id());
        Ok(message)
    }

    fn addr(&self) -> SocketAddr {
        self.addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_url_form() {
        let addr = parse_upstream_addr("udp://1.1.1.1:5353").unwrap();
        assert_eq!(addr.to_string(), "1.1.1.1:5353");
    }

    #[test]
    fn parse_url_form_defaults_port() {
        let addr = parse_upstream_addr("udp://9.9.9.9").unwrap();
        assert_eq!(addr.port(), 53);
    }

    #[test]
    fn parse_socket_addr_form() {
        let addr = parse_upstream_addr("8.8.8.8:53").unwrap();
        assert_eq!(addr.to_string(), "8.8.8.8:53");
    }

    #[test]
    fn parse_bare_ip_defaults_port() {
        let addr = parse_upstream_addr("2606:4700:4700::1111").unwrap();
        assert_eq!(addr.port(), 53);
        assert!(addr.is_ipv6());
    }

    #[test]
    fn reject_unsupported_scheme_and_hostnames() {
        assert!(parse_upstream_addr("tls://1.1.1.1").is_err());
        assert!(parse_upstream_addr("udp://dns.example.com").is_err());
        assert!(parse_upstream_addr("not an address").is_err());
    }
}
