//! Wire types for the Matchwire game protocol.
//!
//! Every message is a single JSON object with a `type` tag carrying the
//! event name and a `data` object carrying the payload, matching the named
//! events the game server emits and accepts:
//!
//! ```json
//! {"type":"login","data":{"username":"alice"}}
//! {"type":"startMatch","data":{"opponent":{"username":"bob"}}}
//! ```
//!
//! Outbound events live in [`ClientEvent`], inbound events in
//! [`ServerEvent`]. Both are closed enums dispatched by exhaustive pattern
//! matching; an unknown event name fails deserialization instead of
//! silently no-opping.

use serde::{Deserialize, Serialize};

// ── Identity ────────────────────────────────────────────────────────

/// A player identity. Usernames are unique per connection; the server
/// rejects duplicates with a `userExists` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Display name chosen at login.
    pub username: String,
}

impl User {
    /// Create a user from any string-like username.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

// ── Match payloads ──────────────────────────────────────────────────

/// A pending match invitation, created locally by
/// [`GameSession::request_match`](crate::GameSession::request_match) and
/// consumed when the server starts the match (or dropped if it never does).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRequest {
    /// The player the match was requested against.
    pub opponent: User,
}

/// An opaque turn payload.
///
/// The session layer relays turns without interpreting them; validation is
/// the server's concern. Wraps arbitrary JSON, like the game-data payloads
/// of other signaling protocols.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnPayload(pub serde_json::Value);

impl TurnPayload {
    /// Wrap a JSON value as a turn.
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }
}

impl From<serde_json::Value> for TurnPayload {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// Outcome of a finished match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOutcome {
    /// Username of the winner; `None` for a draw.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
}

impl MatchOutcome {
    /// Outcome with a winner.
    pub fn won_by(winner: impl Into<String>) -> Self {
        Self {
            winner: Some(winner.into()),
        }
    }

    /// Outcome with no winner.
    pub fn draw() -> Self {
        Self { winner: None }
    }
}

// ── Messages ────────────────────────────────────────────────────────

/// Events sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Request authentication under a username. The server replies with
    /// `userLoggedIn` on success or `userExists` if the name is taken.
    Login {
        /// Requested username.
        username: String,
    },
    /// End the current session. Echoed back as `userLoggedOut`.
    Logout {
        /// Username of the player logging out.
        username: String,
    },
    /// Invite another connected player to a match.
    RequestMatch {
        /// The invited player.
        opponent: User,
    },
    /// Play a turn in the active match.
    MakeTurn {
        /// Opaque turn data, relayed to the opponent.
        turn: TurnPayload,
    },
    /// Leave the result screen and return to the lobby.
    NewMatch,
}

/// Events sent from server to client.
///
/// The turn relay reuses the `makeTurn` event name: the server echoes the
/// opponent's turn under the same name it was sent with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Login confirmed; the session is now authenticated as `user`.
    UserLoggedIn {
        /// The authenticated identity.
        user: User,
    },
    /// Login rejected: the requested username is already connected.
    UserExists,
    /// Logout confirmed.
    UserLoggedOut {
        /// The identity that logged out.
        user: User,
    },
    /// Full roster broadcast. Replaces the local roster wholesale; the
    /// server excludes the receiving player from the list.
    Players {
        /// All other connected players.
        users: Vec<User>,
    },
    /// A match is starting against `opponent`. Only the server starts
    /// matches; a local `requestMatch` is pending until this arrives.
    StartMatch {
        /// The opponent for the new match.
        opponent: User,
    },
    /// The active match ended.
    MatchResult {
        /// Final outcome.
        result: MatchOutcome,
    },
    /// The opponent played a turn.
    #[serde(rename = "makeTurn")]
    TurnPlayed {
        /// Opaque turn data.
        turn: TurnPayload,
    },
}
