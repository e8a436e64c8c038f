/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Plugin registry for managing plugin factories and instances
//!
//! Owns the factory table for the builtin plugin types and the live plugin
//! instances, and drives initialization in dependency order.

use crate::config::PluginConfig;
use crate::core::error::{DnsError, Result};
use crate::plugin::{PluginFactory, PluginInfo};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

pub struct PluginRegistry {
    /// Map of plugin type names to their factory implementations
    factories: HashMap<&'static str, Box<dyn PluginFactory>>,

    /// Map of plugin tags to their runtime instances
    ///
    /// Uses DashMap for interior mutability, allowing plugins to be
    /// registered even when the registry is behind an Arc.
    plugins: DashMap<String, Arc<PluginInfo>>,

    /// Tags in initialization order; destroyed in reverse.
    init_order: Mutex<Vec<String>>,
}

impl PluginRegistry {
    /// Create a registry with every builtin plugin factory registered.
    pub fn new() -> Self {
        let mut factories: HashMap<&'static str, Box<dyn PluginFactory>> = HashMap::new();
        factories.insert(
            "sequence",
            Box::new(crate::plugin::executor::sequence::SequenceFactory),
        );
        factories.insert(
            "forward",
            Box::new(crate::plugin::executor::forward::ForwardFactory),
        );
        factories.insert(
            "arbiter",
            Box::new(crate::plugin::executor::arbiter::ArbiterFactory),
        );
        factories.insert(
            "udp_server",
            Box::new(crate::plugin::server::udp::UdpServerFactory),
        );
        factories.insert(
            "game_api",
            Box::new(crate::plugin::server::game_api::GameApiFactory),
        );

        Self {
            factories,
            plugins: DashMap::new(),
            init_order: Mutex::new(Vec::new()),
        }
    }

    /// Initialize all plugins from configuration
    ///
    /// Validates every entry first, resolves dependencies, then creates and
    /// initializes plugins in dependency order.
    pub async fn init_plugins(self: Arc<Self>, configs: Vec<PluginConfig>) -> Result<()> {
        use crate::plugin::dependency;

        info!("Validating plugin configurations...");
        for config in &configs {
            let factory = self.factory_for(config)?;
            factory.validate_config(config)?;
        }

        info!("Resolving plugin dependencies...");
        let get_deps = |config: &PluginConfig| {
            self.factories
                .get(config.plugin_type.as_str())
                .map(|f| f.get_dependencies(config))
                .unwrap_or_default()
        };
        let sorted_plugins = dependency::resolve_dependencies(configs, &get_deps)?;

        info!(
            "Initializing {} plugins in dependency order",
            sorted_plugins.len()
        );

        for (idx, plugin_config) in sorted_plugins.iter().enumerate() {
            info!(
                "  [{}/{}] Initializing plugin: {} (type: {})",
                idx + 1,
                sorted_plugins.len(),
                plugin_config.tag,
                plugin_config.plugin_type
            );

            let factory = self.factory_for(plugin_config)?;
            let uninitialized = factory.create(plugin_config, self.clone())?;
            let plugin = uninitialized.init_and_wrap().await;

            self.plugins.insert(
                plugin_config.tag.clone(),
                Arc::new(PluginInfo {
                    tag: plugin_config.tag.clone(),
                    plugin,
                }),
            );
            self.init_order.lock().push(plugin_config.tag.clone());
        }

        info!("All plugins initialized successfully");
        Ok(())
    }

    /// Destroy all plugins in reverse initialization order.
    pub async fn destroy_all(&self) {
        let order: Vec<String> = {
            let mut order = self.init_order.lock();
            order.drain(..).rev().collect()
        };

        for tag in order {
            if let Some(info) = self.get_plugin(&tag) {
                info!("Destroying plugin: {} ({})", info.tag, info.plugin.kind());
                info.destroy().await;
            }
        }
    }

    /// Get a plugin instance by tag
    pub fn get_plugin(&self, tag: &str) -> Option<Arc<PluginInfo>> {
        self.plugins.get(tag).map(|entry| entry.clone())
    }

    /// Get the number of registered plugins
    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    fn factory_for(&self, config: &PluginConfig) -> Result<&Box<dyn PluginFactory>> {
        self.factories
            .get(config.plugin_type.as_str())
            .ok_or_else(|| DnsError::plugin(format!("Unknown plugin type: {}", config.plugin_type)))
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
