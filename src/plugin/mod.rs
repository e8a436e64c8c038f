/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Plugin system: traits, instance wrapping, and the factory contract.
//!
//! Every unit of behavior is a plugin created by a factory from its YAML
//! configuration entry. Servers listen for traffic; executors process a
//! `DnsContext` as part of a sequence chain.

pub mod dependency;
pub mod executor;
pub mod registry;
pub mod server;

use crate::config::PluginConfig;
use crate::core::error::Result;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

pub use executor::Executor;
pub use registry::PluginRegistry;
pub use server::Server;

/// Common plugin lifecycle.
#[async_trait]
pub trait Plugin: Debug + Send + Sync + 'static {
    fn tag(&self) -> &str;

    /// Called once after creation, in dependency order. Servers start their
    /// listeners here.
    async fn init(&mut self);

    /// Called once on shutdown, in reverse init order.
    async fn destroy(&self);
}

/// A plugin that has been created but not yet initialized.
pub enum UninitializedPlugin {
    Executor(Box<dyn Executor>),
    Server(Box<dyn Server>),
}

impl UninitializedPlugin {
    /// Run init and wrap the instance for shared use.
    pub async fn init_and_wrap(self) -> PluginType {
        match self {
            UninitializedPlugin::Executor(mut executor) => {
                executor.init().await;
                PluginType::Executor(Arc::from(executor))
            }
            UninitializedPlugin::Server(mut server) => {
                server.init().await;
                PluginType::Server(Arc::from(server))
            }
        }
    }
}

/// A live, shared plugin instance.
#[derive(Debug, Clone)]
pub enum PluginType {
    Executor(Arc<dyn Executor>),
    Server(Arc<dyn Server>),
}

impl PluginType {
    pub fn kind(&self) -> &'static str {
        match self {
            PluginType::Executor(_) => "Executor",
            PluginType::Server(_) => "Server",
        }
    }
}

/// Registered plugin instance plus its identity.
#[derive(Debug)]
pub struct PluginInfo {
    pub tag: String,
    pub plugin: PluginType,
}

impl PluginInfo {
    /// The executor behind this plugin, if it is one.
    pub fn as_executor(&self) -> Option<Arc<dyn Executor>> {
        match &self.plugin {
            PluginType::Executor(executor) => Some(executor.clone()),
            PluginType::Server(_) => None,
        }
    }

    pub async fn destroy(&self) {
        match &self.plugin {
            PluginType::Executor(executor) => executor.destroy().await,
            PluginType::Server(server) => server.destroy().await,
        }
    }
}

/// Constructs plugin instances from configuration.
pub trait PluginFactory: Send + Sync + 'static {
    /// Validate the plugin's configuration before any plugin is created.
    fn validate_config(&self, plugin_config: &PluginConfig) -> Result<()>;

    /// Create an uninitialized plugin instance. The registry is available
    /// for resolving references to already-initialized plugins.
    fn create(
        &self,
        plugin_config: &PluginConfig,
        registry: Arc<PluginRegistry>,
    ) -> Result<UninitializedPlugin>;

    /// Tags of plugins that must be initialized before this one.
    fn get_dependencies(&self, _plugin_config: &PluginConfig) -> Vec<String> {
        Vec::new()
    }
}
