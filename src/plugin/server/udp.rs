/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! UDP DNS server plugin
//!
//! Listens for DNS queries over UDP and processes them through a configured
//! entry plugin executor. Handles concurrent requests efficiently and manages
//! task spawning with automatic cleanup.

use crate::config::PluginConfig;
use crate::core::error::{DnsError, Result};
use crate::plugin::server::{RequestHandle, Server};
use crate::plugin::{Plugin, PluginFactory, PluginRegistry, UninitializedPlugin};
use async_trait::async_trait;
use futures::StreamExt;
use hickory_proto::runtime::TokioRuntimeProvider;
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use hickory_proto::udp::UdpStream;
use hickory_proto::xfer::SerialMessage;
use hickory_proto::{BufDnsStreamHandle, DnsStreamHandle};
use hickory_proto::op::Message;
use serde::Deserialize;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::Error;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// UDP server configuration
#[derive(Deserialize)]
pub struct UdpServerConfig {
    /// Entry executor plugin tag to process incoming requests
    pub entry: String,

    /// UDP listen address (e.g., "0.0.0.0:5983")
    pub listen: String,
}

/// UDP DNS server plugin
#[derive(Debug)]
pub struct UdpServer {
    tag: String,
    listen: String,
    handle: Arc<RequestHandle>,
}

#[async_trait]
impl Plugin for UdpServer {
    fn tag(&self) -> &str {
        self.tag.as_str()
    }

    async fn init(&mut self) {
        self.run();
        info!("UDP server {} listening on {}", self.tag, self.listen);
    }

    async fn destroy(&self) {}
}

impl Server for UdpServer {
    fn run(&self) {
        tokio::spawn(run_server(self.listen.clone(), self.handle.clone()));
    }
}

/// Main UDP server loop
///
/// Creates a UDP stream, listens for incoming DNS queries, and spawns
/// handler tasks for each request. Performs periodic cleanup of finished tasks.
async fn run_server(addr: String, handle: Arc<RequestHandle>) {
    let socket = match build_udp_socket(&addr) {
        Ok(socket) => socket,
        Err(err) => {
            error!("Failed to bind UDP socket to {}: {}", addr, err);
            return;
        }
    };

    let (mut stream, stream_handle) =
        UdpStream::<TokioRuntimeProvider>::with_bound(socket, ([127, 255, 255, 254], 0).into());

    let mut inner_join_set = JoinSet::new();
    let stream_handle = Arc::new(stream_handle);

    debug!("UDP server event loop started on {}", addr);

    loop {
        let message = match stream.next().await {
            None => break,
            Some(Err(error)) => {
                warn!(%error, "Error receiving message on UDP socket");
                continue;
            }
            Some(Ok(message)) => message,
        };

        // Spawn handler task for this request (non-blocking)
        inner_join_set.spawn(handle_message(handle.clone(), stream_handle.clone(), message));

        // Clean up completed tasks (non-blocking)
        reap_tasks(&mut inner_join_set);
    }
}

/// Handle a single DNS query message
async fn handle_message(
    handle: Arc<RequestHandle>,
    stream_handle: Arc<BufDnsStreamHandle>,
    message: SerialMessage,
) {
    let (raw, src_addr) = message.into_parts();

    let Ok(request) = Message::from_bytes(raw.as_slice()) else {
        debug!("Dropping undecodable datagram from {}", src_addr);
        return;
    };

    let response = handle.handle_request(request, src_addr).await;

    match response.to_bytes() {
        Ok(bytes) => {
            let mut sender = stream_handle.with_remote_addr(src_addr);
            if let Err(err) = sender.send(SerialMessage::new(bytes, src_addr)) {
                warn!("Failed to send response to {}: {}", src_addr, err);
            }
        }
        Err(err) => warn!("Failed to serialize response for {}: {}", src_addr, err),
    }
}

/// Reap completed tasks from the join set
///
/// Non-blocking cleanup of finished handler tasks
fn reap_tasks(join_set: &mut JoinSet<()>) {
    while join_set.try_join_next().is_some() {}
}

/// Build a UDP socket with reuse_address and reuse_port options
///
/// Creates a socket optimized for DNS server workloads with port reuse enabled.
fn build_udp_socket(addr: &str) -> std::result::Result<UdpSocket, Error> {
    let addr = SocketAddr::from_str(addr)
        .map_err(|e| Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let sock = if addr.is_ipv4() {
        Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?
    } else {
        Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?
    };

    let _ = sock.set_nonblocking(true);
    let _ = sock.set_reuse_address(true);
    #[cfg(not(target_os = "windows"))]
    let _ = sock.set_reuse_port(true);

    sock.bind(&addr.into())?;

    UdpSocket::from_std(sock.into())
}

/// Factory for creating UDP server plugin instances
pub struct UdpServerFactory;

impl PluginFactory for UdpServerFactory {
    fn create(
        &self,
        plugin_config: &PluginConfig,
        registry: Arc<PluginRegistry>,
    ) -> Result<UninitializedPlugin> {
        let udp_config = parse_config(plugin_config)?;

        // Look up the entry plugin using the registry
        let entry = registry.get_plugin(&udp_config.entry).ok_or_else(|| {
            DnsError::plugin(format!(
                "UDP Server [{}] entry plugin [{}] not found",
                plugin_config.tag, udp_config.entry
            ))
        })?;
        let entry_executor = entry.as_executor().ok_or_else(|| {
            DnsError::plugin(format!(
                "UDP Server [{}] entry plugin [{}] is not an executor",
                plugin_config.tag, udp_config.entry
            ))
        })?;

        Ok(UninitializedPlugin::Server(Box::new(UdpServer {
            tag: plugin_config.tag.clone(),
            listen: udp_config.listen,
            handle: Arc::new(RequestHandle { entry_executor }),
        })))
    }

    /// Validate UDP server configuration
    fn validate_config(&self, plugin_config: &PluginConfig) -> Result<()> {
        let udp_config = parse_config(plugin_config)?;

        if SocketAddr::from_str(&udp_config.listen).is_err() {
            return Err(DnsError::plugin(format!(
                "Invalid listen address: {}",
                udp_config.listen
            )));
        }

        if udp_config.entry.is_empty() {
            return Err(DnsError::plugin("UDP Server 'entry' field cannot be empty"));
        }

        Ok(())
    }

    /// Get dependencies (the entry executor plugin)
    fn get_dependencies(&self, plugin_config: &PluginConfig) -> Vec<String> {
        parse_config(plugin_config)
            .map(|config| vec![config.entry])
            .unwrap_or_default()
    }
}

fn parse_config(plugin_config: &PluginConfig) -> Result<UdpServerConfig> {
    match plugin_config.args.clone() {
        Some(args) => serde_yml::from_value::<UdpServerConfig>(args)
            .map_err(|e| DnsError::plugin(format!("UDP Server config parsing failed: {e}"))),
        None => Err(DnsError::plugin(
            "UDP Server must configure 'listen' and 'entry' in config file",
        )),
    }
}
