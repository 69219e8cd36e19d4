//! Typed events delivered to the session consumer.
//!
//! Every inbound [`ServerEvent`] is applied to the state first, then
//! forwarded on the event channel as a [`SessionEvent`] so a UI can react
//! without polling. `Connected` and `Disconnected` are synthetic: they are
//! produced by the transport loop, not by the server.

use crate::protocol::{MatchOutcome, ServerEvent, TurnPayload, User};

/// An event emitted on the channel returned by
/// [`GameSession::start`](crate::GameSession::start).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The transport loop started with a live connection.
    Connected,
    /// Login confirmed by the server.
    LoggedIn {
        /// The authenticated identity.
        user: User,
    },
    /// Login rejected: the username is already taken.
    LoginRejected,
    /// Logout confirmed by the server.
    LoggedOut {
        /// The identity that logged out.
        user: User,
    },
    /// The roster of other connected players was replaced.
    RosterUpdated {
        /// The new roster.
        users: Vec<User>,
    },
    /// A match started.
    MatchStarted {
        /// The opponent.
        opponent: User,
    },
    /// The opponent played a turn.
    TurnPlayed {
        /// Opaque turn data.
        turn: TurnPayload,
    },
    /// The match ended.
    MatchEnded {
        /// Final outcome.
        outcome: MatchOutcome,
    },
    /// The transport closed. Always the final event on the channel; the
    /// session state is left as it was.
    Disconnected {
        /// Close reason, if one is known.
        reason: Option<String>,
    },
}

impl From<ServerEvent> for SessionEvent {
    fn from(event: ServerEvent) -> Self {
        match event {
            ServerEvent::UserLoggedIn { user } => Self::LoggedIn { user },
            ServerEvent::UserExists => Self::LoginRejected,
            ServerEvent::UserLoggedOut { user } => Self::LoggedOut { user },
            ServerEvent::Players { users } => Self::RosterUpdated { users },
            ServerEvent::StartMatch { opponent } => Self::MatchStarted { opponent },
            ServerEvent::MatchResult { result } => Self::MatchEnded { outcome: result },
            ServerEvent::TurnPlayed { turn } => Self::TurnPlayed { turn },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_events_map_to_session_events() {
        let user = User::new("alice");
        assert_eq!(
            SessionEvent::from(ServerEvent::UserLoggedIn { user: user.clone() }),
            SessionEvent::LoggedIn { user: user.clone() }
        );
        assert_eq!(
            SessionEvent::from(ServerEvent::UserExists),
            SessionEvent::LoginRejected
        );
        assert_eq!(
            SessionEvent::from(ServerEvent::Players { users: vec![user] }),
            SessionEvent::RosterUpdated {
                users: vec![User::new("alice")]
            }
        );
    }
}
