/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! DNS forwarding plugin
//!
//! Forwards DNS queries to configured upstream resolvers. With a single
//! upstream queries go straight through; with several, all are raced and
//! the first successful answer wins.

use crate::config::PluginConfig;
use crate::continue_next;
use crate::core::context::DnsContext;
use crate::core::error::{DnsError, Result};
use crate::network::upstream::{Upstream, UpstreamConfig, build_upstream};
use crate::plugin::executor::sequence::chain::ChainNode;
use crate::plugin::executor::{ExecResult, Executor};
use crate::plugin::{Plugin, PluginFactory, PluginRegistry, UninitializedPlugin};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Single-upstream DNS forwarder
#[derive(Debug)]
pub struct SingleDnsForwarder {
    tag: String,
    upstream: Box<dyn Upstream>,
}

#[async_trait]
impl Plugin for SingleDnsForwarder {
    fn tag(&self) -> &str {
        self.tag.as_str()
    }

    async fn init(&mut self) {
        match self.upstream.connect().await {
            Ok(()) => info!(
                "DNS forwarder {} connected to upstream {}",
                self.tag,
                self.upstream.addr()
            ),
            Err(err) => warn!(
                "DNS forwarder {} failed to connect to {}: {}",
                self.tag,
                self.upstream.addr(),
                err
            ),
        }
    }

    async fn destroy(&self) {}
}

#[async_trait]
impl Executor for SingleDnsForwarder {
    async fn execute(
        &self,
        context: &mut DnsContext,
        next: Option<&Arc<dyn ChainNode>>,
    ) -> ExecResult {
        match self.upstream.query(&context.request).await {
            Ok(response) => {
                context.response = Some(response);
            }
            Err(err) => {
                warn!(
                    "DNS query failed - source: {}, queries: {:?}, id: {}, reason: {}",
                    context.src_addr,
                    context.request.queries(),
                    context.request.id(),
                    err
                );
            }
        }
        continue_next!(next, context)
    }
}

/// Multi-upstream forwarder: first successful answer wins.
#[derive(Debug)]
pub struct ConcurrentForwarder {
    tag: String,
    upstreams: Vec<Arc<dyn Upstream>>,
}

#[async_trait]
impl Plugin for ConcurrentForwarder {
    fn tag(&self) -> &str {
        self.tag.as_str()
    }

    async fn init(&mut self) {
        for upstream in &self.upstreams {
            if let Err(err) = upstream.connect().await {
                warn!(
                    "DNS forwarder {} failed to connect to {}: {}",
                    self.tag,
                    upstream.addr(),
                    err
                );
            }
        }
        info!(
            "DNS forwarder {} racing {} upstreams",
            self.tag,
            self.upstreams.len()
        );
    }

    async fn destroy(&self) {}
}

#[async_trait]
impl Executor for ConcurrentForwarder {
    async fn execute(
        &self,
        context: &mut DnsContext,
        next: Option<&Arc<dyn ChainNode>>,
    ) -> ExecResult {
        let mut join_set = JoinSet::new();

        for upstream in &self.upstreams {
            let upstream = upstream.clone();
            let message = context.request.clone();
            join_set.spawn(async move { upstream.query(&message).await });
        }

        while let Some(Ok(result)) = join_set.join_next().await {
            match result {
                Ok(response) => {
                    join_set.abort_all();
                    context.response = Some(response);
                    break;
                }
                Err(err) => {
                    warn!("DNS query failed: {}", err);
                }
            }
        }

        continue_next!(next, context)
    }
}

/// Forward plugin configuration
#[derive(Deserialize)]
pub struct ForwardConfig {
    /// List of upstream DNS servers
    pub upstreams: Vec<UpstreamConfig>,
}

/// Factory for creating DNS forwarder plugins
#[derive(Debug)]
pub struct ForwardFactory;

impl PluginFactory for ForwardFactory {
    fn validate_config(&self, plugin_config: &PluginConfig) -> Result<()> {
        let config = parse_config(plugin_config)?;
        if config.upstreams.is_empty() {
            return Err(DnsError::plugin(
                "Forward plugin requires at least one upstream",
            ));
        }
        for upstream in &config.upstreams {
            crate::network::upstream::parse_upstream_addr(&upstream.addr)?;
        }
        Ok(())
    }

    fn create(
        &self,
        plugin_config: &PluginConfig,
        _registry: Arc<PluginRegistry>,
    ) -> Result<UninitializedPlugin> {
        let config = parse_config(plugin_config)?;

        if config.upstreams.len() == 1 {
            let upstream = build_upstream(&config.upstreams[0])?;
            info!(
                "Creating single DNS forwarder (tag: {}) with upstream: {}",
                plugin_config.tag, config.upstreams[0].addr
            );
            Ok(UninitializedPlugin::Executor(Box::new(
                SingleDnsForwarder {
                    tag: plugin_config.tag.clone(),
                    upstream,
                },
            )))
        } else {
            let mut upstreams: Vec<Arc<dyn Upstream>> = Vec::with_capacity(config.upstreams.len());
            for upstream_config in &config.upstreams {
                upstreams.push(Arc::from(build_upstream(upstream_config)?));
            }
            Ok(UninitializedPlugin::Executor(Box::new(
                ConcurrentForwarder {
                    tag: plugin_config.tag.clone(),
                    upstreams,
                },
            )))
        }
    }
}

fn parse_config(plugin_config: &PluginConfig) -> Result<ForwardConfig> {
    let args = plugin_config
        .args
        .clone()
        .ok_or_else(|| DnsError::plugin("Forward plugin requires 'upstreams' configuration"))?;
    serde_yml::from_value::<ForwardConfig>(args)
        .map_err(|e| DnsError::plugin(format!("Failed to parse Forward plugin config: {e}")))
}
