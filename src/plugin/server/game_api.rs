/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! `game_api` server plugin.
//!
//! Owns the game coordinator and exposes its HTTP boundary: admission for
//! the DNS interception plugin, assignment/submission for the web tier,
//! registration, the leaderboard, and Prometheus metrics. Also drives the
//! coordinator's background loops (expiry sweeper, score flush) and drains
//! everything on shutdown.

use crate::config::PluginConfig;
use crate::core::error::DnsError;
use crate::game::coordinator::Coordinator;
use crate::game::store::ScoreStore;
use crate::game::{DnsDecision, DnsQuestion, GameError, metrics};
use crate::plugin::server::Server;
use crate::plugin::{Plugin, PluginFactory, PluginRegistry, UninitializedPlugin};
use async_trait::async_trait;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

const DEFAULT_DB_PATH: &str = "data/chaosdns.db";

#[derive(Debug, Clone, Deserialize)]
struct GameApiConfig {
    /// HTTP listen address (e.g., "0.0.0.0:8080").
    listen: String,

    /// Score database path; falls back to the DB_PATH environment variable,
    /// then to the conventional local path.
    db_path: Option<String>,
}

/// Shared state handed to every request handler.
pub struct ApiState {
    pub coordinator: Arc<Coordinator>,
    pub prometheus: Option<PrometheusHandle>,
}

pub struct GameApiServer {
    tag: String,
    listen: String,
    db_path: PathBuf,
    coordinator: Option<Arc<Coordinator>>,
    prometheus: Option<PrometheusHandle>,
}

impl std::fmt::Debug for GameApiServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameApiServer")
            .field("tag", &self.tag)
            .field("listen", &self.listen)
            .field("db_path", &self.db_path)
            .field("has_coordinator", &self.coordinator.is_some())
            .finish()
    }
}

#[async_trait]
impl Plugin for GameApiServer {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn init(&mut self) {
        let db_path = self.db_path.clone();
        let store = match tokio::task::spawn_blocking(move || ScoreStore::open(&db_path)).await {
            Ok(Ok(store)) => Some(Arc::new(store)),
            Ok(Err(err)) => {
                warn!(
                    path = %self.db_path.display(),
                    %err,
                    "score store unavailable, playing without persistence"
                );
                None
            }
            Err(err) => {
                warn!(%err, "score store open task failed");
                None
            }
        };

        let coordinator = Arc::new(Coordinator::new(store));
        coordinator.load_players().await;

        self.prometheus = metrics::install_exporter();
        self.coordinator = Some(coordinator);
        self.run();
    }

    async fn destroy(&self) {
        if let Some(coordinator) = &self.coordinator {
            coordinator.shutdown().await;
        }
    }
}

impl Server for GameApiServer {
    fn run(&self) {
        let Some(coordinator) = self.coordinator.clone() else {
            return;
        };

        tokio::spawn(coordinator.clone().run_sweeper());
        tokio::spawn(coordinator.clone().run_flush_loop());

        let state = Arc::new(ApiState {
            coordinator: coordinator.clone(),
            prometheus: self.prometheus.clone(),
        });
        tokio::spawn(run_server(
            self.listen.clone(),
            state,
            coordinator.subscribe_shutdown(),
        ));
        info!("game api {} listening on {}", self.tag, self.listen);
    }
}

async fn run_server(listen: String, state: Arc<ApiState>, mut shutdown: watch::Receiver<bool>) {
    let listener = match tokio::net::TcpListener::bind(&listen).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("Failed to bind game api socket to {}: {}", listen, err);
            return;
        }
    };

    let shutdown_signal = async move {
        let _ = shutdown.wait_for(|stop| *stop).await;
    };

    if let Err(err) = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal)
        .await
    {
        error!("game api server error: {}", err);
    }
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/dnsrequest", post(dns_request))
        .route("/assign", get(assign))
        .route("/submitaction", post(submit_action))
        .route("/register", get(register))
        .route("/leaderboard", get(leaderboard))
        .route("/metrics", get(metrics_text))
        .with_state(state)
}

/// Canonical error → status mapping. The submit handler remaps
/// `ExpiredRequest` to 400; everywhere else it is 410.
fn error_response(err: &GameError) -> Response {
    match err {
        GameError::QueueFull => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response(),
        GameError::NoneAvailable => StatusCode::NO_CONTENT.into_response(),
        GameError::ExpiredRequest => (StatusCode::GONE, err.to_string()).into_response(),
        GameError::UnknownPlayer
        | GameError::MissingField(_)
        | GameError::StaleAssignment
        | GameError::InvalidAction => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    }
}

fn malformed_json() -> Response {
    (StatusCode::BAD_REQUEST, "malformed json body".to_string()).into_response()
}

/// `POST /dnsrequest` — the DNS plugin's admission call. Blocks until a
/// player decides or the coordinator's deadline passes.
async fn dns_request(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<DnsQuestion>, JsonRejection>,
) -> Response {
    let Ok(Json(question)) = body else {
        return malformed_json();
    };

    match state.coordinator.admit(question).await {
        Ok(action) => Json(DnsDecision { action }).into_response(),
        Err(err) => error_response(&err),
    }
}

/// `GET /assign?player_id=` — short poll for the player's next request.
async fn assign(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(player_id) = params.get("player_id").filter(|id| !id.is_empty()) else {
        return error_response(&GameError::MissingField("player_id"));
    };

    match state.coordinator.fetch_assignment(player_id) {
        Ok(assignment) => Json(assignment).into_response(),
        Err(err) => error_response(&err),
    }
}

#[derive(Debug, Deserialize)]
struct SubmitBody {
    player_id: String,
    request_id: String,
    action: String,
}

/// `POST /submitaction` — a player's decision for their assigned request.
async fn submit_action(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<SubmitBody>, JsonRejection>,
) -> Response {
    let Ok(Json(submit)) = body else {
        return malformed_json();
    };

    match state
        .coordinator
        .submit_decision(&submit.player_id, &submit.request_id, &submit.action)
    {
        Ok(()) => StatusCode::OK.into_response(),
        // historical divergence consolidated: expired submits are 400
        Err(err @ GameError::ExpiredRequest) => {
            (StatusCode::BAD_REQUEST, err.to_string()).into_response()
        }
        Err(err) => error_response(&err),
    }
}

/// `GET /register?nickname=` — mint a new player id.
async fn register(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(nickname) = params.get("nickname").filter(|n| !n.is_empty()) else {
        return error_response(&GameError::MissingField("nickname"));
    };

    state.coordinator.register(nickname).into_response()
}

/// `GET /leaderboard?page=N` — a page of 50 rows, most active first.
/// An unparsable page falls back to the first one.
async fn leaderboard(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let page = params
        .get("page")
        .and_then(|raw| raw.parse::<usize>().ok())
        .filter(|page| *page >= 1)
        .unwrap_or(1);

    Json(state.coordinator.leaderboard(page)).into_response()
}

/// `GET /metrics` — Prometheus exposition.
async fn metrics_text(State(state): State<Arc<ApiState>>) -> Response {
    let body = state
        .prometheus
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    )
        .into_response()
}

#[derive(Debug)]
pub struct GameApiFactory;

impl PluginFactory for GameApiFactory {
    fn validate_config(&self, plugin_config: &PluginConfig) -> Result<(), DnsError> {
        let config = parse_config(plugin_config)?;
        if std::net::SocketAddr::from_str(&config.listen).is_err() {
            return Err(DnsError::plugin(format!(
                "Invalid listen address: {}",
                config.listen
            )));
        }
        Ok(())
    }

    fn create(
        &self,
        plugin_config: &PluginConfig,
        _registry: Arc<PluginRegistry>,
    ) -> Result<UninitializedPlugin, DnsError> {
        let config = parse_config(plugin_config)?;

        let db_path = config
            .db_path
            .or_else(|| std::env::var("DB_PATH").ok())
            .unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

        Ok(UninitializedPlugin::Server(Box::new(GameApiServer {
            tag: plugin_config.tag.clone(),
            listen: config.listen,
            db_path: PathBuf::from(db_path),
            coordinator: None,
            prometheus: None,
        })))
    }
}

fn parse_config(plugin_config: &PluginConfig) -> Result<GameApiConfig, DnsError> {
    let args = plugin_config
        .args
        .clone()
        .ok_or_else(|| DnsError::plugin("game_api requires configuration arguments"))?;
    serde_yml::from_value::<GameApiConfig>(args)
        .map_err(|e| DnsError::plugin(format!("failed to parse game_api config: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::time::Duration;

    async fn spawn_api(coordinator: Arc<Coordinator>) -> String {
        let state = Arc::new(ApiState {
            coordinator,
            prometheus: None,
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn full_game_round_over_http() {
        let coordinator = Arc::new(Coordinator::new(None));
        let base = spawn_api(coordinator).await;
        let client = reqwest::Client::new();

        // an empty queue answers 204
        let player_id = client
            .get(format!("{base}/register?nickname=alice"))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(player_id.starts_with("player-"));
        let resp = client
            .get(format!("{base}/assign?player_id={player_id}"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NO_CONTENT);

        // the plugin admits a query and blocks on the decision
        let admit = tokio::spawn({
            let client = client.clone();
            let base = base.clone();
            async move {
                client
                    .post(format!("{base}/dnsrequest"))
                    .json(&json!({"name": "example.com.", "type": "A", "class": "IN"}))
                    .send()
                    .await
                    .unwrap()
                    .json::<Value>()
                    .await
                    .unwrap()
            }
        });

        // the player polls until the request shows up
        let assignment = loop {
            let resp = client
                .get(format!("{base}/assign?player_id={player_id}"))
                .send()
                .await
                .unwrap();
            if resp.status() == reqwest::StatusCode::OK {
                break resp.json::<Value>().await.unwrap();
            }
            assert_eq!(resp.status(), reqwest::StatusCode::NO_CONTENT);
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        assert_eq!(assignment["name"], "example.com.");
        assert_eq!(assignment["type"], "A");
        let request_id = assignment["request_id"].as_str().unwrap().to_string();

        let resp = client
            .post(format!("{base}/submitaction"))
            .json(&json!({
                "player_id": player_id,
                "request_id": request_id,
                "action": "corrupt",
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);

        // the blocked admission wakes with the player's decision
        let decision = admit.await.unwrap();
        assert_eq!(decision["action"], "corrupt");

        // and the deed is on the leaderboard
        let rows = client
            .get(format!("{base}/leaderboard?page=1"))
            .send()
            .await
            .unwrap()
            .json::<Value>()
            .await
            .unwrap();
        let rows = rows.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["nickname"], "alice");
        assert_eq!(rows[0]["evil_points"], 1.0);
        assert_eq!(rows[0]["net_alignment"], -1.0);
    }

    #[tokio::test]
    async fn error_statuses_match_the_taxonomy() {
        let coordinator = Arc::new(Coordinator::new(None));
        let base = spawn_api(coordinator).await;
        let client = reqwest::Client::new();

        // unknown player
        let resp = client
            .get(format!("{base}/assign?player_id=player-nope"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

        // missing query parameter
        let resp = client.get(format!("{base}/assign")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
        let resp = client.get(format!("{base}/register")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

        // malformed submit body
        let resp = client
            .post(format!("{base}/submitaction"))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

        // a submit for a request nobody holds
        let player_id = client
            .get(format!("{base}/register?nickname=bob"))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        let resp = client
            .post(format!("{base}/submitaction"))
            .json(&json!({
                "player_id": player_id,
                "request_id": "req-404",
                "action": "nxdomain",
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

        // past-the-end leaderboard pages are empty, not errors
        let rows = client
            .get(format!("{base}/leaderboard?page=99"))
            .send()
            .await
            .unwrap()
            .json::<Value>()
            .await
            .unwrap();
        assert!(rows.as_array().unwrap().is_empty());
    }
}
