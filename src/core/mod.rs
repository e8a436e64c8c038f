/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

pub mod context;
pub mod dns_utils;
pub mod error;
pub mod log;
pub mod runtime;

use crate::config::LogConfig;
use crate::core::error::{DnsError, Result};
use clap::Parser;
use std::sync::OnceLock;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;

/// Keeps the file appender worker alive for the lifetime of the process.
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Parse command line options.
pub fn init() -> runtime::Options {
    runtime::Options::parse()
}

/// Install the global tracing subscriber.
pub fn log_init(config: &LogConfig) -> Result<()> {
    let level = parse_level(&config.level)?;

    match &config.file {
        Some(file) => {
            let path = std::path::Path::new(file);
            let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| DnsError::config(format!("invalid log file path: {file}")))?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = LOG_GUARD.set(guard);

            tracing_subscriber::fmt()
                .with_max_level(level)
                .event_format(log::ChaosDnsLogFormatter)
                .with_writer(writer)
                .try_init()
                .map_err(|e| DnsError::runtime(format!("failed to install logger: {e}")))?;
        }
        None => {
            tracing_subscriber::fmt()
                .with_max_level(level)
                .event_format(log::ChaosDnsLogFormatter)
                .try_init()
                .map_err(|e| DnsError::runtime(format!("failed to install logger: {e}")))?;
        }
    }

    Ok(())
}

fn parse_level(raw: &str) -> Result<LevelFilter> {
    match raw.to_lowercase().as_str() {
        "off" => Ok(LevelFilter::OFF),
        "trace" => Ok(LevelFilter::TRACE),
        "debug" => Ok(LevelFilter::DEBUG),
        "info" => Ok(LevelFilter::INFO),
        "warn" => Ok(LevelFilter::WARN),
        "error" => Ok(LevelFilter::ERROR),
        _ => Err(DnsError::config(format!("invalid log level: {raw}"))),
    }
}
