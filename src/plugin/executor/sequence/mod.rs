/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! `sequence` executor plugin.
//!
//! Composes other executors into an ordered chain. Each rule references an
//! executor plugin by `$tag`; the chain node handed to each executor is its
//! "next stage".

pub mod chain;

use crate::config::PluginConfig;
use crate::continue_next;
use crate::core::context::DnsContext;
use crate::core::error::{DnsError, Result};
use crate::plugin::executor::sequence::chain::{ChainBuilder, ChainNode};
use crate::plugin::executor::{ExecResult, Executor};
use crate::plugin::{Plugin, PluginFactory, PluginRegistry, UninitializedPlugin};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

/// Strip the `$` reference marker from a plugin reference.
pub(super) fn parse_plugin_ref(raw: &str) -> Result<String> {
    let raw = raw.trim();
    let tag = raw.strip_prefix('$').unwrap_or(raw).trim();
    if tag.is_empty() {
        return Err(DnsError::plugin(format!(
            "invalid plugin reference: '{raw}'"
        )));
    }
    Ok(tag.to_string())
}

#[derive(Debug, Deserialize, Clone)]
pub struct Rule {
    exec: String,
}

#[derive(Debug)]
pub struct Sequence {
    tag: String,
    head: Arc<dyn ChainNode>,
}

#[async_trait]
impl Plugin for Sequence {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn init(&mut self) {}

    async fn destroy(&self) {}
}

#[async_trait]
impl Executor for Sequence {
    async fn execute(
        &self,
        context: &mut DnsContext,
        next: Option<&Arc<dyn ChainNode>>,
    ) -> ExecResult {
        self.head.next(context).await?;
        continue_next!(next, context)
    }
}

#[derive(Debug, Clone)]
pub struct SequenceFactory;

impl PluginFactory for SequenceFactory {
    fn validate_config(&self, plugin_config: &PluginConfig) -> Result<()> {
        let rules = parse_rules(plugin_config)?;
        if rules.is_empty() {
            return Err(DnsError::plugin("sequence requires at least one rule"));
        }
        for rule in &rules {
            parse_plugin_ref(&rule.exec)?;
        }
        Ok(())
    }

    fn get_dependencies(&self, plugin_config: &PluginConfig) -> Vec<String> {
        parse_rules(plugin_config)
            .map(|rules| {
                rules
                    .iter()
                    .filter_map(|rule| parse_plugin_ref(&rule.exec).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn create(
        &self,
        plugin_config: &PluginConfig,
        registry: Arc<PluginRegistry>,
    ) -> Result<UninitializedPlugin> {
        let rules = parse_rules(plugin_config)?;
        let mut builder = ChainBuilder::new();

        for rule in &rules {
            let tag = parse_plugin_ref(&rule.exec)?;
            let plugin = registry
                .get_plugin(&tag)
                .ok_or_else(|| DnsError::plugin(format!("plugin does not exist for {tag}")))?;
            let executor = plugin
                .as_executor()
                .ok_or_else(|| DnsError::plugin(format!("plugin {tag} is not an executor")))?;
            builder.append(executor);
        }

        let head = builder
            .build()
            .ok_or_else(|| DnsError::plugin("sequence requires at least one rule"))?;

        Ok(UninitializedPlugin::Executor(Box::new(Sequence {
            tag: plugin_config.tag.clone(),
            head,
        })))
    }
}

fn parse_rules(plugin_config: &PluginConfig) -> Result<Vec<Rule>> {
    let args = plugin_config
        .args
        .clone()
        .ok_or_else(|| DnsError::plugin("sequence requires configuration arguments"))?;
    serde_yml::from_value::<Vec<Rule>>(args)
        .map_err(|e| DnsError::plugin(format!("sequence config parsing failed: {e}")))
}
