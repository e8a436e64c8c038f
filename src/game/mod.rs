/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Game domain types shared by the coordinator and its HTTP boundary.

pub mod coordinator;
pub mod metrics;
pub mod store;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Maximum number of DNS requests allowed in the coordinator at once
/// (pending plus assigned).
pub const MAX_QUEUE_SIZE: usize = 10_000;

/// Hard deadline for a single admission: the DNS plugin gets an answer
/// within this window, player-chosen or defaulted.
pub const REQUEST_DEADLINE: Duration = Duration::from_secs(30);

/// Minimum time a request must have left before its deadline to be handed
/// to a player.
pub const MIN_REMAINING: Duration = Duration::from_secs(15);

/// Interval between score delta flushes to the store.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// Interval between expired-request sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Requests older than this are reclaimed regardless of state.
pub const REQUEST_EXPIRY: Duration = Duration::from_secs(5 * 60);

/// Fixed leaderboard page size.
pub const LEADERBOARD_PAGE_SIZE: usize = 50;

/// The decision a player makes for an intercepted DNS query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Resolve normally
    Correct,
    /// Answer with a bogus address
    Corrupt,
    /// Stall the response before resolving
    Delay,
    /// Deny the name exists
    Nxdomain,
}

impl Action {
    /// Parse the textual form used on the wire.
    pub fn parse(raw: &str) -> Option<Action> {
        match raw {
            "correct" => Some(Action::Correct),
            "corrupt" => Some(Action::Corrupt),
            "delay" => Some(Action::Delay),
            "nxdomain" => Some(Action::Nxdomain),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Correct => "correct",
            Action::Corrupt => "corrupt",
            Action::Delay => "delay",
            Action::Nxdomain => "nxdomain",
        }
    }

    /// Everything except an honest answer counts as manipulation.
    pub fn is_manipulation(&self) -> bool {
        !matches!(self, Action::Correct)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by coordinator operations. The HTTP boundary maps these
/// onto status codes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    #[error("dns request queue is full")]
    QueueFull,

    #[error("unknown player id")]
    UnknownPlayer,

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("no dns requests available")]
    NoneAvailable,

    #[error("dns request has expired or was already handled")]
    ExpiredRequest,

    #[error("request id does not match current assignment")]
    StaleAssignment,

    #[error("invalid action")]
    InvalidAction,
}

/// A DNS question as posted by the interception plugin.
///
/// Unknown input fields are tolerated; only these three matter.
#[derive(Debug, Clone, Deserialize)]
pub struct DnsQuestion {
    pub name: String,
    #[serde(rename = "type")]
    pub qtype: String,
    pub class: String,
}

/// The decision returned to the interception plugin.
#[derive(Debug, Clone, Serialize)]
pub struct DnsDecision {
    pub action: Action,
}

/// A request handed to a player by `/assign`.
#[derive(Debug, Clone, Serialize)]
pub struct AssignedQuery {
    pub request_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub qtype: String,
    pub class: String,
}

/// One row of the leaderboard, most active players first.
#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardRow {
    pub player_id: String,
    pub nickname: String,
    pub pure_points: f64,
    pub evil_points: f64,
    /// pure − evil; display only
    pub net_alignment: f64,
}
