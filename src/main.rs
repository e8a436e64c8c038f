/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */
use crate::config::Config;
use crate::core::error::{DnsError, Result};
use crate::plugin::PluginRegistry;
use std::sync::Arc;
use tokio::runtime;
use tracing::info;

mod config;
mod core;
mod game;
mod network;
mod plugin;

fn main() -> Result<()> {
    let config = app_init()?;
    tokio_run(config)
}

fn app_init() -> Result<Config> {
    let options = core::init();
    let config = config::load(&options.config)?;

    let mut log_config = config.log.clone();
    if let Some(level) = options.log_level {
        log_config.level = level;
    }
    core::log_init(&log_config)?;

    Ok(config)
}

fn tokio_run(config: Config) -> Result<()> {
    let runtime = runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("chaosdns-worker")
        .build()
        .map_err(|err| DnsError::runtime(format!("failed to initialize Tokio runtime: {err}")))?;
    runtime.block_on(async_run(config))
}

async fn async_run(config: Config) -> Result<()> {
    info!("chaosdns {} starting...", env!("CARGO_PKG_VERSION"));

    let registry = Arc::new(PluginRegistry::new());
    registry.clone().init_plugins(config.plugins).await?;

    tokio::signal::ctrl_c()
        .await
        .map_err(|err| DnsError::runtime(format!("failed to listen for shutdown signal: {err}")))?;

    info!("shutdown signal received");
    registry.destroy_all().await;
    Ok(())
}
