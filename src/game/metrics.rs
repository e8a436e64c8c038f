/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Metrics instrumentation for the game coordinator.
//!
//! All metrics carry the `game_` prefix. The Prometheus recorder is
//! installed once per process; its handle renders the exposition text for
//! `GET /metrics`.

use crate::game::Action;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::warn;

static PROMETHEUS: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the process-wide Prometheus recorder and return its handle.
///
/// Safe to call more than once; later calls return the existing handle.
pub fn install_exporter() -> Option<PrometheusHandle> {
    if let Some(handle) = PROMETHEUS.get() {
        return Some(handle.clone());
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = PROMETHEUS.set(handle.clone());
            Some(handle)
        }
        Err(err) => {
            warn!(%err, "failed to install prometheus recorder, /metrics will be empty");
            None
        }
    }
}

/// Count an admitted DNS request.
pub fn record_admission() {
    counter!("game_dns_requests_total").increment(1);
}

/// Record how long an admission waited and which action resolved it.
pub fn record_admission_resolved(action: Action, elapsed: Duration) {
    histogram!("game_dns_request_duration_seconds", "action" => action.as_str())
        .record(elapsed.as_secs_f64());
}

/// Count a successfully submitted player action.
pub fn record_player_action(action: Action) {
    counter!("game_player_actions_total", "action" => action.as_str()).increment(1);
}

/// Track the number of registered players.
pub fn set_player_count(count: usize) {
    gauge!("game_player_count").set(count as f64);
}

/// Track the number of DNS requests waiting for a player.
pub fn set_pending_depth(depth: usize) {
    gauge!("game_pending_dns_requests").set(depth as f64);
}
