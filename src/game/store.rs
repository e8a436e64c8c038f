/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Durable score store backed by SQLite.
//!
//! The store is the only durable artifact of the game: per-player point
//! totals. In-flight DNS transactions are never persisted. WAL journaling
//! keeps leaderboard reads cheap while the flush loop writes.

use parking_lot::Mutex;
use rusqlite::{Connection, params};
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Player id collided on insert. The coordinator never retries these.
    #[error("player already exists")]
    AlreadyExists,

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A persisted player row.
#[derive(Debug, Clone)]
pub struct PlayerRow {
    pub id: String,
    pub nickname: String,
    pub pure_points: f64,
    pub evil_points: f64,
}

/// Single-process score store. All access is serialised through one
/// connection; callers in async context wrap calls in `spawn_blocking`.
#[derive(Debug)]
pub struct ScoreStore {
    conn: Mutex<Connection>,
}

impl ScoreStore {
    /// Open (or create) the database at `path` and prepare the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        if path.exists() {
            info!("found existing score database at {}", path.display());
        } else {
            info!("no score database at {}, creating a fresh one", path.display());
        }

        let conn = Connection::open(path)?;
        // WAL lets leaderboard reads proceed while the flush loop writes
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init_schema(&conn)?;

        Ok(ScoreStore {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store, used by tests.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(ScoreStore {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS players (
                id TEXT PRIMARY KEY,
                nickname TEXT NOT NULL,
                pure_points REAL DEFAULT 0,
                evil_points REAL DEFAULT 0,
                last_request_id TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;
        Ok(())
    }

    /// Insert a new player with zeroed scores.
    pub fn create_player(&self, id: &str, nickname: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO players (id, nickname) VALUES (?1, ?2)",
            params![id, nickname],
        )
        .map_err(|err| match err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::AlreadyExists
            }
            other => StoreError::Sqlite(other),
        })?;
        Ok(())
    }

    /// Atomically add score deltas to a player's totals.
    pub fn add_player_points(
        &self,
        id: &str,
        pure_delta: f64,
        evil_delta: f64,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE players
             SET pure_points = pure_points + ?1,
                 evil_points = evil_points + ?2,
                 updated_at = CURRENT_TIMESTAMP
             WHERE id = ?3",
            params![pure_delta, evil_delta, id],
        )?;
        Ok(())
    }

    /// Load every player row for warm-start, most active first.
    pub fn load_all(&self) -> Result<Vec<PlayerRow>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, nickname, pure_points, evil_points
             FROM players
             ORDER BY (pure_points + evil_points) DESC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(PlayerRow {
                id: row.get(0)?,
                nickname: row.get(1)?,
                pure_points: row.get(2)?,
                evil_points: row.get(3)?,
            })
        })?;

        let mut players = Vec::new();
        for row in rows {
            players.push(row?);
        }
        Ok(players)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_load_players() {
        let store = ScoreStore::open_in_memory().unwrap();
        store.create_player("player-1", "alice").unwrap();
        store.create_player("player-2", "bob").unwrap();

        let players = store.load_all().unwrap();
        assert_eq!(players.len(), 2);
        assert!(players.iter().any(|p| p.nickname == "alice"));
        assert!(players.iter().all(|p| p.pure_points == 0.0));
    }

    #[test]
    fn duplicate_player_id_is_rejected() {
        let store = ScoreStore::open_in_memory().unwrap();
        store.create_player("player-1", "alice").unwrap();

        let err = store.create_player("player-1", "impostor").unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists));
    }

    #[test]
    fn point_deltas_accumulate() {
        let store = ScoreStore::open_in_memory().unwrap();
        store.create_player("player-1", "alice").unwrap();

        store.add_player_points("player-1", 2.0, 0.0).unwrap();
        store.add_player_points("player-1", 1.0, 3.0).unwrap();

        let players = store.load_all().unwrap();
        assert_eq!(players[0].pure_points, 3.0);
        assert_eq!(players[0].evil_points, 3.0);
    }

    #[test]
    fn load_orders_by_total_activity() {
        let store = ScoreStore::open_in_memory().unwrap();
        store.create_player("player-1", "quiet").unwrap();
        store.create_player("player-2", "busy").unwrap();
        store.add_player_points("player-2", 1.0, 4.0).unwrap();

        let players = store.load_all().unwrap();
        assert_eq!(players[0].nickname, "busy");
    }

    #[test]
    fn reopen_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scores.db");

        {
            let store = ScoreStore::open(&path).unwrap();
            store.create_player("player-1", "alice").unwrap();
            store.add_player_points("player-1", 3.0, 0.0).unwrap();
        }

        let store = ScoreStore::open(&path).unwrap();
        let players = store.load_all().unwrap();
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].pure_points, 3.0);
    }
}
