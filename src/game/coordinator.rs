/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! The game coordinator: request lifecycle and player pairing.
//!
//! Every intercepted DNS query is admitted here, queued FIFO, handed to at
//! most one player, and resolved by that player's decision or by the 30 s
//! deadline. The handoff between the submitting player and the blocked
//! admission is a one-shot rendezvous slot keyed by request id.
//!
//! Lock discipline: `pending` may be locked while holding `requests` or
//! `players`, never the other way around; `requests` and `players` are
//! never held together; no lock is held across an await point.

use crate::game::store::ScoreStore;
use crate::game::{
    Action, AssignedQuery, DnsQuestion, FLUSH_INTERVAL, GameError, LeaderboardRow,
    LEADERBOARD_PAGE_SIZE, MAX_QUEUE_SIZE, MIN_REMAINING, REQUEST_DEADLINE, REQUEST_EXPIRY,
    SWEEP_INTERVAL, metrics,
};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A DNS transaction admitted to the coordinator.
#[derive(Debug, Clone)]
struct QueryRecord {
    id: String,
    name: String,
    qtype: String,
    qclass: String,
    assigned: bool,
    timed_out: bool,
    admitted_at: Instant,
}

impl QueryRecord {
    fn remaining(&self) -> std::time::Duration {
        REQUEST_DEADLINE.saturating_sub(self.admitted_at.elapsed())
    }

    /// A request is handed to a player only while it is unassigned, alive,
    /// and far enough from its deadline to be worth deciding.
    fn assignable(&self) -> bool {
        !self.assigned && !self.timed_out && self.remaining() > MIN_REMAINING
    }

    fn to_assignment(&self) -> AssignedQuery {
        AssignedQuery {
            request_id: self.id.clone(),
            name: self.name.clone(),
            qtype: self.qtype.clone(),
            class: self.qclass.clone(),
        }
    }
}

/// In-memory player state. Assignments never persist; scores do, via the
/// delta fields that the flush loop drains into the store.
#[derive(Debug, Clone, Default)]
struct Player {
    nickname: String,
    pure_points: f64,
    evil_points: f64,
    pure_delta: f64,
    evil_delta: f64,
    assigned_request: Option<String>,
}

/// Single-process authoritative game state.
pub struct Coordinator {
    /// Request id → record (L_R)
    requests: RwLock<HashMap<String, QueryRecord>>,

    /// Player id → player (L_P)
    players: RwLock<HashMap<String, Player>>,

    /// Admission-ordered request ids awaiting a player (L_Q)
    pending: Mutex<VecDeque<String>>,

    /// One-shot handoff slot per live request; the admit side holds the
    /// receiver, a successful submit consumes the sender.
    rendezvous: DashMap<String, oneshot::Sender<Action>>,

    next_request_id: AtomicU64,
    next_player_seq: AtomicU64,
    capacity: usize,
    store: Option<Arc<ScoreStore>>,
    shutdown: watch::Sender<bool>,
}

impl Coordinator {
    pub fn new(store: Option<Arc<ScoreStore>>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Coordinator {
            requests: RwLock::new(HashMap::new()),
            players: RwLock::new(HashMap::new()),
            pending: Mutex::new(VecDeque::new()),
            rendezvous: DashMap::new(),
            next_request_id: AtomicU64::new(1),
            next_player_seq: AtomicU64::new(1),
            capacity: MAX_QUEUE_SIZE,
            store,
            shutdown,
        }
    }

    #[cfg(test)]
    fn with_capacity(capacity: usize) -> Self {
        let mut coordinator = Self::new(None);
        coordinator.capacity = capacity;
        coordinator
    }

    /// Admit an intercepted DNS query and block until a player decides or
    /// the deadline passes. Resolves within `REQUEST_DEADLINE` always.
    pub async fn admit(&self, question: DnsQuestion) -> Result<Action, GameError> {
        metrics::record_admission();

        if *self.shutdown.borrow() {
            return Err(GameError::QueueFull);
        }

        let id = format!("req-{}", self.next_request_id.fetch_add(1, Ordering::Relaxed));
        let admitted_at = Instant::now();
        let record = QueryRecord {
            id: id.clone(),
            name: question.name,
            qtype: question.qtype,
            qclass: question.class,
            assigned: false,
            timed_out: false,
            admitted_at,
        };

        let (tx, rx) = oneshot::channel();
        self.rendezvous.insert(id.clone(), tx);

        // Insert, then enforce capacity; back out completely on overflow so
        // the plugin can fall through to normal resolution.
        let admitted = {
            let mut requests = self.requests.write();
            requests.insert(id.clone(), record);
            if requests.len() > self.capacity {
                requests.remove(&id);
                false
            } else {
                let mut pending = self.pending.lock();
                pending.push_back(id.clone());
                metrics::set_pending_depth(pending.len());
                true
            }
        };
        if !admitted {
            self.rendezvous.remove(&id);
            warn!(request_id = %id, "admission rejected, queue is full");
            return Err(GameError::QueueFull);
        }

        debug!(request_id = %id, "dns request admitted");

        let action = match tokio::time::timeout(REQUEST_DEADLINE, rx).await {
            Ok(Ok(action)) => action,
            // Sender dropped without a decision (reclaimed); fall back.
            Ok(Err(_)) => Action::Correct,
            Err(_) => {
                if let Some(record) = self.requests.write().get_mut(&id) {
                    record.timed_out = true;
                }
                debug!(request_id = %id, "dns request timed out, defaulting to correct");
                Action::Correct
            }
        };

        self.cleanup(&id);
        metrics::record_admission_resolved(action, admitted_at.elapsed());
        Ok(action)
    }

    /// Hand the head of the queue to a player, or re-serve the assignment
    /// the player already holds. Non-blocking.
    pub fn fetch_assignment(&self, player_id: &str) -> Result<AssignedQuery, GameError> {
        let current = {
            let players = self.players.read();
            players
                .get(player_id)
                .ok_or(GameError::UnknownPlayer)?
                .assigned_request
                .clone()
        };

        // Polling must not reassign: serve the held request while it is
        // still worth deciding.
        if let Some(assigned_id) = current {
            let still_valid = {
                let requests = self.requests.read();
                requests
                    .get(&assigned_id)
                    .filter(|r| r.assigned && !r.timed_out && r.remaining() > MIN_REMAINING)
                    .map(|r| r.to_assignment())
            };
            match still_valid {
                Some(assignment) => return Ok(assignment),
                None => {
                    debug!(player_id, request_id = %assigned_id, "clearing stale assignment");
                    if let Some(player) = self.players.write().get_mut(player_id) {
                        player.assigned_request = None;
                    }
                }
            }
        }

        let picked = {
            let mut requests = self.requests.write();
            let mut pending = self.pending.lock();

            let position = pending
                .iter()
                .position(|id| requests.get(id).is_some_and(|r| r.assignable()));

            position.map(|idx| {
                let id = pending.remove(idx).expect("position is in bounds");
                metrics::set_pending_depth(pending.len());
                let record = requests.get_mut(&id).expect("pending id is present");
                record.assigned = true;
                record.to_assignment()
            })
        };

        let assignment = picked.ok_or(GameError::NoneAvailable)?;

        if let Some(player) = self.players.write().get_mut(player_id) {
            player.assigned_request = Some(assignment.request_id.clone());
        }

        info!(player_id, request_id = %assignment.request_id, "assigned dns request");
        Ok(assignment)
    }

    /// Accept a player's decision, score it, and wake the blocked admission
    /// through the rendezvous slot.
    pub fn submit_decision(
        &self,
        player_id: &str,
        request_id: &str,
        action_raw: &str,
    ) -> Result<(), GameError> {
        {
            let players = self.players.read();
            let player = players.get(player_id).ok_or(GameError::UnknownPlayer)?;
            if player.assigned_request.as_deref() != Some(request_id) {
                return Err(GameError::StaleAssignment);
            }
        }

        {
            let requests = self.requests.read();
            let record = requests.get(request_id).ok_or(GameError::ExpiredRequest)?;
            if !record.assigned || record.timed_out {
                return Err(GameError::ExpiredRequest);
            }
        }

        let action = Action::parse(action_raw).ok_or(GameError::InvalidAction)?;

        {
            let mut players = self.players.write();
            if let Some(player) = players.get_mut(player_id) {
                if action.is_manipulation() {
                    player.evil_points += 1.0;
                    player.evil_delta += 1.0;
                } else {
                    player.pure_points += 1.0;
                    player.pure_delta += 1.0;
                }
                player.assigned_request = None;
            }
        }
        metrics::record_player_action(action);

        // The synchronising event: the admit side wakes with this action.
        // If the admission already timed out the slot is gone and the late
        // decision is discarded silently.
        if let Some((_, tx)) = self.rendezvous.remove(request_id) {
            let _ = tx.send(action);
        }

        self.requests.write().remove(request_id);

        info!(player_id, request_id, action = %action, "player decision accepted");
        Ok(())
    }

    /// Register a new player and persist it in the background.
    ///
    /// Player ids must stay unique across restarts of a persisted table, so
    /// the wall clock is part of the id; the sequence number disambiguates
    /// registrations landing on the same clock tick.
    pub fn register(&self, nickname: &str) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let seq = self.next_player_seq.fetch_add(1, Ordering::Relaxed);
        let id = format!("player-{nanos}-{seq}");

        let count = {
            let mut players = self.players.write();
            players.insert(
                id.clone(),
                Player {
                    nickname: nickname.to_string(),
                    ..Player::default()
                },
            );
            players.len()
        };
        metrics::set_player_count(count);

        // Persistence is best-effort; an id collision is never retried.
        if let Some(store) = self.store.clone() {
            let player_id = id.clone();
            let nickname = nickname.to_string();
            tokio::spawn(async move {
                let log_id = player_id.clone();
                let result =
                    tokio::task::spawn_blocking(move || store.create_player(&player_id, &nickname))
                        .await;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => warn!(player_id = %log_id, %err, "failed to persist new player"),
                    Err(err) => warn!(player_id = %log_id, %err, "player persist task failed"),
                }
            });
        }

        info!(player_id = %id, nickname, "registered player");
        id
    }

    /// A page of the leaderboard, most active players first.
    pub fn leaderboard(&self, page: usize) -> Vec<LeaderboardRow> {
        let mut rows: Vec<LeaderboardRow> = {
            let players = self.players.read();
            players
                .iter()
                .map(|(id, p)| LeaderboardRow {
                    player_id: id.clone(),
                    nickname: p.nickname.clone(),
                    pure_points: p.pure_points,
                    evil_points: p.evil_points,
                    net_alignment: p.pure_points - p.evil_points,
                })
                .collect()
        };

        rows.sort_by(|a, b| {
            let total_a = a.pure_points + a.evil_points;
            let total_b = b.pure_points + b.evil_points;
            total_b.partial_cmp(&total_a).unwrap_or(std::cmp::Ordering::Equal)
        });

        let page = page.max(1);
        let start = (page - 1) * LEADERBOARD_PAGE_SIZE;
        if start >= rows.len() {
            return Vec::new();
        }
        let end = (start + LEADERBOARD_PAGE_SIZE).min(rows.len());
        rows[start..end].to_vec()
    }

    /// Warm-start player scores from the store. Assignments do not persist.
    pub async fn load_players(&self) {
        let Some(store) = self.store.clone() else {
            return;
        };

        let loaded = match tokio::task::spawn_blocking(move || store.load_all()).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(err)) => {
                warn!(%err, "failed to load players from the score store");
                return;
            }
            Err(err) => {
                warn!(%err, "player load task failed");
                return;
            }
        };

        let count = {
            let mut players = self.players.write();
            for row in &loaded {
                players.insert(
                    row.id.clone(),
                    Player {
                        nickname: row.nickname.clone(),
                        pure_points: row.pure_points,
                        evil_points: row.evil_points,
                        ..Player::default()
                    },
                );
            }
            players.len()
        };
        metrics::set_player_count(count);
        info!(count = loaded.len(), "loaded players from the score store");
    }

    /// Remove a resolved request from every index and release its player.
    fn cleanup(&self, request_id: &str) {
        self.requests.write().remove(request_id);

        {
            let mut pending = self.pending.lock();
            if let Some(idx) = pending.iter().position(|id| id == request_id) {
                pending.remove(idx);
            }
            metrics::set_pending_depth(pending.len());
        }

        self.rendezvous.remove(request_id);

        let mut players = self.players.write();
        for player in players.values_mut() {
            if player.assigned_request.as_deref() == Some(request_id) {
                player.assigned_request = None;
                break;
            }
        }
    }

    /// Reclaim requests older than the hard expiry. This is the safety net
    /// for state orphaned by abnormal exits; normally resolved requests are
    /// cleaned up as they resolve.
    pub fn sweep_expired(&self) -> usize {
        let expired: Vec<String> = {
            let requests = self.requests.read();
            requests
                .values()
                .filter(|r| r.admitted_at.elapsed() > REQUEST_EXPIRY)
                .map(|r| r.id.clone())
                .collect()
        };

        for id in &expired {
            debug!(request_id = %id, "sweeping expired dns request");
            self.cleanup(id);
        }
        expired.len()
    }

    /// Flush nonzero score deltas into the store. Deltas are reduced only
    /// after the write succeeds, so failed flushes retry on the next tick.
    pub async fn flush_deltas(&self) {
        let Some(store) = self.store.clone() else {
            return;
        };

        let snapshot: Vec<(String, f64, f64)> = {
            let players = self.players.read();
            players
                .iter()
                .filter(|(_, p)| p.pure_delta != 0.0 || p.evil_delta != 0.0)
                .map(|(id, p)| (id.clone(), p.pure_delta, p.evil_delta))
                .collect()
        };

        for (id, pure_delta, evil_delta) in snapshot {
            let store = store.clone();
            let player_id = id.clone();
            let result = tokio::task::spawn_blocking(move || {
                store.add_player_points(&player_id, pure_delta, evil_delta)
            })
            .await;

            match result {
                Ok(Ok(())) => {
                    let mut players = self.players.write();
                    if let Some(player) = players.get_mut(&id) {
                        player.pure_delta -= pure_delta;
                        player.evil_delta -= evil_delta;
                    }
                }
                Ok(Err(err)) => warn!(player_id = %id, %err, "failed to sync player points"),
                Err(err) => warn!(player_id = %id, %err, "score flush task failed"),
            }
        }
    }

    /// Background sweeper; exits on shutdown.
    pub async fn run_sweeper(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let swept = self.sweep_expired();
                    if swept > 0 {
                        info!(swept, "cleaned up expired dns requests");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    /// Background score flush loop; the final flush happens in `shutdown`.
    pub async fn run_flush_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.flush_deltas().await,
                _ = shutdown.changed() => break,
            }
        }
    }

    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Graceful shutdown: refuse new admissions, resolve every waiting
    /// admission with the default action, flush scores once.
    pub async fn shutdown(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }

        let waiting: Vec<String> = self.rendezvous.iter().map(|e| e.key().clone()).collect();
        for id in waiting {
            if let Some((_, tx)) = self.rendezvous.remove(&id) {
                let _ = tx.send(Action::Correct);
            }
        }

        self.flush_deltas().await;
        info!("coordinator drained and flushed");
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    #[cfg(test)]
    fn player_assignment(&self, player_id: &str) -> Option<String> {
        self.players
            .read()
            .get(player_id)
            .and_then(|p| p.assigned_request.clone())
    }

    #[cfg(test)]
    fn player_scores(&self, player_id: &str) -> (f64, f64) {
        let players = self.players.read();
        let player = players.get(player_id).unwrap();
        (player.pure_points, player.evil_points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn question(name: &str) -> DnsQuestion {
        DnsQuestion {
            name: name.to_string(),
            qtype: "A".to_string(),
            class: "IN".to_string(),
        }
    }

    fn spawn_admit(
        coordinator: &Arc<Coordinator>,
        name: &str,
    ) -> tokio::task::JoinHandle<Result<Action, GameError>> {
        let coordinator = coordinator.clone();
        let question = question(name);
        tokio::spawn(async move { coordinator.admit(question).await })
    }

    /// Poll `/assign` the way a player's browser would.
    async fn fetch_until_assigned(coordinator: &Coordinator, player_id: &str) -> AssignedQuery {
        loop {
            match coordinator.fetch_assignment(player_id) {
                Ok(assignment) => return assignment,
                Err(GameError::NoneAvailable) => {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                Err(other) => panic!("unexpected fetch error: {other}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn player_decision_reaches_admission() {
        let coordinator = Arc::new(Coordinator::new(None));
        let player = coordinator.register("alice");

        let admit = spawn_admit(&coordinator, "example.com.");
        let assignment = fetch_until_assigned(&coordinator, &player).await;
        assert_eq!(assignment.name, "example.com.");

        coordinator
            .submit_decision(&player, &assignment.request_id, "corrupt")
            .unwrap();

        let action = admit.await.unwrap().unwrap();
        assert_eq!(action, Action::Corrupt);

        // one unit of evil, assignment released, all indexes drained
        assert_eq!(coordinator.player_scores(&player), (0.0, 1.0));
        assert_eq!(coordinator.player_assignment(&player), None);
        assert_eq!(coordinator.pending_len(), 0);
        assert!(coordinator.requests.read().is_empty());
        assert!(coordinator.rendezvous.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unclaimed_admission_defaults_to_correct() {
        let coordinator = Arc::new(Coordinator::new(None));

        let admit = spawn_admit(&coordinator, "example.com.");
        tokio::task::yield_now().await;
        tokio::time::advance(REQUEST_DEADLINE + Duration::from_secs(1)).await;

        let action = admit.await.unwrap().unwrap();
        assert_eq!(action, Action::Correct);
        assert!(coordinator.requests.read().is_empty());
        assert_eq!(coordinator.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn admissions_beyond_capacity_are_refused() {
        let coordinator = Arc::new(Coordinator::with_capacity(2));

        let first = spawn_admit(&coordinator, "one.example.");
        let second = spawn_admit(&coordinator, "two.example.");
        while coordinator.pending_len() < 2 {
            tokio::task::yield_now().await;
        }

        let err = coordinator.admit(question("three.example.")).await.unwrap_err();
        assert_eq!(err, GameError::QueueFull);

        // the refused admission left nothing behind
        assert_eq!(coordinator.pending_len(), 2);
        assert_eq!(coordinator.rendezvous.len(), 2);

        tokio::time::advance(REQUEST_DEADLINE + Duration::from_secs(1)).await;
        assert_eq!(first.await.unwrap().unwrap(), Action::Correct);
        assert_eq!(second.await.unwrap().unwrap(), Action::Correct);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_is_fifo_and_idempotent() {
        let coordinator = Arc::new(Coordinator::new(None));
        let alice = coordinator.register("alice");
        let bob = coordinator.register("bob");

        let _first = spawn_admit(&coordinator, "one.example.");
        while coordinator.pending_len() < 1 {
            tokio::task::yield_now().await;
        }
        let _second = spawn_admit(&coordinator, "two.example.");
        while coordinator.pending_len() < 2 {
            tokio::task::yield_now().await;
        }

        let assignment = coordinator.fetch_assignment(&alice).unwrap();
        assert_eq!(assignment.name, "one.example.");

        // polling again re-serves the same request and leaves the queue alone
        let again = coordinator.fetch_assignment(&alice).unwrap();
        assert_eq!(again.request_id, assignment.request_id);
        assert_eq!(coordinator.pending_len(), 1);

        // the other player gets the next request in admission order
        let other = coordinator.fetch_assignment(&bob).unwrap();
        assert_eq!(other.name, "two.example.");
    }

    #[tokio::test(start_paused = true)]
    async fn requests_close_to_deadline_are_not_assigned() {
        let coordinator = Arc::new(Coordinator::new(None));
        let player = coordinator.register("alice");

        let admit = spawn_admit(&coordinator, "example.com.");
        while coordinator.pending_len() < 1 {
            tokio::task::yield_now().await;
        }

        // 14s remaining is inside the 15s margin
        tokio::time::advance(Duration::from_secs(16)).await;
        let err = coordinator.fetch_assignment(&player).unwrap_err();
        assert_eq!(err, GameError::NoneAvailable);

        tokio::time::advance(Duration::from_secs(15)).await;
        assert_eq!(admit.await.unwrap().unwrap(), Action::Correct);
    }

    #[tokio::test(start_paused = true)]
    async fn submit_validations_reject_bad_input() {
        let coordinator = Arc::new(Coordinator::new(None));
        let player = coordinator.register("alice");

        let _admit = spawn_admit(&coordinator, "example.com.");
        let assignment = fetch_until_assigned(&coordinator, &player).await;

        assert_eq!(
            coordinator.submit_decision("player-nope", &assignment.request_id, "corrupt"),
            Err(GameError::UnknownPlayer)
        );
        assert_eq!(
            coordinator.submit_decision(&player, "req-999", "corrupt"),
            Err(GameError::StaleAssignment)
        );
        assert_eq!(
            coordinator.submit_decision(&player, &assignment.request_id, "explode"),
            Err(GameError::InvalidAction)
        );

        // nothing was scored along the way
        assert_eq!(coordinator.player_scores(&player), (0.0, 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn submit_after_timeout_is_rejected() {
        let coordinator = Arc::new(Coordinator::new(None));
        let player = coordinator.register("alice");

        // a timed-out request still waiting for the sweeper
        let record = QueryRecord {
            id: "req-1".to_string(),
            name: "example.com.".to_string(),
            qtype: "A".to_string(),
            qclass: "IN".to_string(),
            assigned: true,
            timed_out: true,
            admitted_at: Instant::now(),
        };
        coordinator.requests.write().insert(record.id.clone(), record);
        coordinator.players.write().get_mut(&player).unwrap().assigned_request =
            Some("req-1".to_string());

        assert_eq!(
            coordinator.submit_decision(&player, "req-1", "nxdomain"),
            Err(GameError::ExpiredRequest)
        );
        assert_eq!(coordinator.player_scores(&player), (0.0, 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_reclaims_orphaned_requests() {
        let coordinator = Arc::new(Coordinator::new(None));
        let player = coordinator.register("alice");

        let admit = spawn_admit(&coordinator, "example.com.");
        let assignment = fetch_until_assigned(&coordinator, &player).await;

        // the admission task dies without resolving (abnormal exit)
        admit.abort();
        let _ = admit.await;
        assert!(coordinator.requests.read().contains_key(&assignment.request_id));

        tokio::time::advance(REQUEST_EXPIRY + Duration::from_secs(1)).await;
        assert_eq!(coordinator.sweep_expired(), 1);

        assert!(coordinator.requests.read().is_empty());
        assert!(coordinator.rendezvous.is_empty());
        assert_eq!(coordinator.player_assignment(&player), None);

        // the player can pick up new work afterwards
        assert_eq!(
            coordinator.fetch_assignment(&player).unwrap_err(),
            GameError::NoneAvailable
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drains_waiting_admissions() {
        let coordinator = Arc::new(Coordinator::new(None));

        let admit = spawn_admit(&coordinator, "example.com.");
        while coordinator.pending_len() < 1 {
            tokio::task::yield_now().await;
        }

        coordinator.shutdown().await;
        assert_eq!(admit.await.unwrap().unwrap(), Action::Correct);

        let err = coordinator.admit(question("late.example.")).await.unwrap_err();
        assert_eq!(err, GameError::QueueFull);
    }

    #[tokio::test(start_paused = true)]
    async fn leaderboard_sorts_by_total_activity() {
        let coordinator = Arc::new(Coordinator::new(None));
        let alice = coordinator.register("alice");
        let bob = coordinator.register("bob");

        {
            let mut players = coordinator.players.write();
            let a = players.get_mut(&alice).unwrap();
            a.pure_points = 1.0;
            a.evil_points = 1.0;
            let b = players.get_mut(&bob).unwrap();
            b.pure_points = 5.0;
        }

        let rows = coordinator.leaderboard(1);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].nickname, "bob");
        assert_eq!(rows[0].net_alignment, 5.0);
        assert_eq!(rows[1].net_alignment, 0.0);

        assert!(coordinator.leaderboard(2).is_empty());
    }

    #[tokio::test]
    async fn flush_persists_deltas_and_resets_them() {
        let store = Arc::new(ScoreStore::open_in_memory().unwrap());
        let coordinator = Arc::new(Coordinator::new(Some(store.clone())));
        let player = coordinator.register("bob");

        // wait for the background insert before touching the row
        for _ in 0..100 {
            if !store.load_all().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let admit = spawn_admit(&coordinator, "example.com.");
        let assignment = fetch_until_assigned(&coordinator, &player).await;
        coordinator
            .submit_decision(&player, &assignment.request_id, "correct")
            .unwrap();
        assert_eq!(admit.await.unwrap().unwrap(), Action::Correct);

        coordinator.flush_deltas().await;

        let rows = store.load_all().unwrap();
        assert_eq!(rows[0].pure_points, 1.0);
        {
            let players = coordinator.players.read();
            let p = players.get(&player).unwrap();
            assert_eq!(p.pure_delta, 0.0);
            assert_eq!(p.evil_delta, 0.0);
        }

        // a second flush must not double-count
        coordinator.flush_deltas().await;
        assert_eq!(store.load_all().unwrap()[0].pure_points, 1.0);
    }

    #[tokio::test]
    async fn warm_start_restores_scores_but_not_assignments() {
        let store = Arc::new(ScoreStore::open_in_memory().unwrap());
        store.create_player("player-1", "bob").unwrap();
        store.add_player_points("player-1", 3.0, 0.0).unwrap();

        let coordinator = Coordinator::new(Some(store));
        coordinator.load_players().await;

        let rows = coordinator.leaderboard(1);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].nickname, "bob");
        assert_eq!(rows[0].pure_points, 3.0);
        assert_eq!(coordinator.player_assignment("player-1"), None);
    }
}
