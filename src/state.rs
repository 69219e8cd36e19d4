//! The session state machine.
//!
//! [`SessionState`] is the single authoritative client-side aggregate. Every
//! mutation goes through a named transition method; the fields themselves
//! are private, so readers can only observe committed snapshots through the
//! getters.
//!
//! The aggregate is an explicit state machine: each [`Screen`] phase carries
//! only the fields that are valid in it. A match screen without an opponent,
//! or a result screen without an outcome, is unrepresentable rather than
//! merely forbidden by convention.
//!
//! # Out-of-order inbound events
//!
//! Server events are applied in arrival order with a last-writer-wins
//! policy: a `startMatch` that arrives mid-match replaces the current match
//! (with a warning logged). Events that cannot be represented in the current
//! phase at all, such as a turn relay outside a match or any match event
//! while logged out, are dropped and logged instead.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::protocol::{MatchOutcome, MatchRequest, ServerEvent, TurnPayload, User};

/// Default cosmetic render mode.
const DEFAULT_MODE: &str = "standard";

/// Coarse UI phase, derived from the current [`SessionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Screen {
    /// Not authenticated; the login surface is shown.
    Login,
    /// Authenticated, in the lobby.
    Idle,
    /// A match is in progress.
    Match,
    /// The last match finished; its outcome is shown.
    Result,
}

/// Session phase. Each variant owns exactly the fields valid in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "screen", rename_all = "snake_case")]
enum Phase {
    Login {
        /// The last login attempt was rejected (username taken).
        invalid_user: bool,
    },
    Idle {
        user: User,
        /// Outgoing invitation awaiting a `startMatch`, if any.
        match_request: Option<MatchRequest>,
    },
    Match {
        user: User,
        opponent: User,
        /// Most recent turn applied, by either side. Last value wins.
        turn: Option<TurnPayload>,
    },
    Result {
        user: User,
        outcome: MatchOutcome,
    },
}

/// The client-side session aggregate.
///
/// Created once at session start (optionally hydrated from a persisted
/// snapshot) and mutated only through the named transitions below, all of
/// which are invoked from the session's single writer context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    phase: Phase,
    /// Roster of other connected players. Never includes the local user.
    users: Vec<User>,
    /// Cosmetic match-rendering mode. No correctness dependency.
    mode: String,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: Phase::Login {
                invalid_user: false,
            },
            users: Vec::new(),
            mode: DEFAULT_MODE.to_string(),
        }
    }
}

impl SessionState {
    /// A fresh, unauthenticated session.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Derived view ────────────────────────────────────────────────

    /// The current UI phase.
    pub fn screen(&self) -> Screen {
        match self.phase {
            Phase::Login { .. } => Screen::Login,
            Phase::Idle { .. } => Screen::Idle,
            Phase::Match { .. } => Screen::Match,
            Phase::Result { .. } => Screen::Result,
        }
    }

    /// `true` once the server has confirmed a login. This is the single
    /// derivation the navigation gate inspects.
    pub fn logged_in(&self) -> bool {
        self.user().is_some()
    }

    /// The authenticated identity, on every screen except login.
    pub fn user(&self) -> Option<&User> {
        match &self.phase {
            Phase::Login { .. } => None,
            Phase::Idle { user, .. } | Phase::Match { user, .. } | Phase::Result { user, .. } => {
                Some(user)
            }
        }
    }

    /// `true` if the last login attempt was rejected (username taken).
    /// Reset by the next login attempt.
    pub fn invalid_user(&self) -> bool {
        matches!(
            self.phase,
            Phase::Login {
                invalid_user: true,
            }
        )
    }

    /// Roster of other connected players.
    pub fn users(&self) -> &[User] {
        &self.users
    }

    /// The opponent in the active match. `Some` exactly when
    /// [`screen`](Self::screen) is [`Screen::Match`].
    pub fn in_match_with(&self) -> Option<&User> {
        match &self.phase {
            Phase::Match { opponent, .. } => Some(opponent),
            _ => None,
        }
    }

    /// The pending outgoing match invitation, if any.
    pub fn match_request(&self) -> Option<&MatchRequest> {
        match &self.phase {
            Phase::Idle {
                match_request: Some(req),
                ..
            } => Some(req),
            _ => None,
        }
    }

    /// The most recent turn applied in the active match.
    pub fn turn(&self) -> Option<&TurnPayload> {
        match &self.phase {
            Phase::Match {
                turn: Some(turn), ..
            } => Some(turn),
            _ => None,
        }
    }

    /// The outcome of the just-ended match. `Some` exactly when
    /// [`screen`](Self::screen) is [`Screen::Result`].
    pub fn result(&self) -> Option<&MatchOutcome> {
        match &self.phase {
            Phase::Result { outcome, .. } => Some(outcome),
            _ => None,
        }
    }

    /// The cosmetic render mode.
    pub fn mode(&self) -> &str {
        &self.mode
    }

    // ── Command transitions (locally initiated) ─────────────────────

    /// A login attempt is being made: clear the rejection flag so the UI
    /// stops showing a stale "name taken" error. No other state changes
    /// until the server confirms with `userLoggedIn`.
    pub fn begin_login_attempt(&mut self) {
        if let Phase::Login { invalid_user } = &mut self.phase {
            *invalid_user = false;
        }
    }

    /// Record an outgoing match invitation. The session layer has already
    /// verified the opponent is in the roster and the session is idle.
    pub fn record_match_request(&mut self, opponent: User) {
        match &mut self.phase {
            Phase::Idle { match_request, .. } => {
                *match_request = Some(MatchRequest { opponent });
            }
            _ => warn!("match request recorded outside idle screen; dropped"),
        }
    }

    /// Record a turn played by either side. Last value wins; a turn outside
    /// an active match is dropped.
    pub fn record_turn(&mut self, turn: TurnPayload) {
        match &mut self.phase {
            Phase::Match { turn: slot, .. } => *slot = Some(turn),
            _ => warn!(screen = ?self.screen(), "turn while no match active; dropped"),
        }
    }

    /// Return to the lobby, clearing the previous match's turn and outcome.
    /// Valid from any logged-in screen.
    pub fn reset_match(&mut self) {
        match &self.phase {
            Phase::Login { .. } => warn!("new match while logged out; dropped"),
            Phase::Idle { user, .. } | Phase::Match { user, .. } | Phase::Result { user, .. } => {
                self.phase = Phase::Idle {
                    user: user.clone(),
                    match_request: None,
                };
            }
        }
    }

    /// Set the cosmetic render mode.
    pub fn set_mode(&mut self, mode: impl Into<String>) {
        self.mode = mode.into();
    }

    // ── Event transitions (server originated) ───────────────────────

    /// The server confirmed a login. Unconditional: any previous match,
    /// invitation, turn, or rejection flag is discarded.
    pub fn confirm_login(&mut self, user: User) {
        debug!(username = %user.username, "login confirmed");
        self.phase = Phase::Idle {
            user,
            match_request: None,
        };
    }

    /// The server rejected a login because the username is taken. Only the
    /// rejection flag changes; user, screen, and roster are untouched.
    pub fn reject_login(&mut self) {
        match &mut self.phase {
            Phase::Login { invalid_user } => *invalid_user = true,
            _ => warn!("login rejection while already logged in; dropped"),
        }
    }

    /// The server confirmed a logout. Unconditional: the session returns to
    /// the login screen whatever it was doing.
    pub fn confirm_logout(&mut self) {
        if matches!(self.phase, Phase::Login { .. }) {
            warn!("logout confirmation while already logged out");
        }
        self.phase = Phase::Login {
            invalid_user: false,
        };
    }

    /// Replace the roster wholesale. Last writer wins; no merging.
    pub fn replace_roster(&mut self, users: Vec<User>) {
        self.users = users;
    }

    /// The server started a match. Unconditional for any logged-in screen:
    /// it consumes a pending invitation, and replaces an already-running
    /// match or a lingering result. The turn slot starts empty.
    pub fn start_match(&mut self, opponent: User) {
        match &self.phase {
            Phase::Login { .. } => {
                warn!("startMatch while logged out; dropped");
            }
            Phase::Match { user, .. } | Phase::Result { user, .. } => {
                warn!(screen = ?self.screen(), "startMatch while a match phase is live; replacing");
                self.phase = Phase::Match {
                    user: user.clone(),
                    opponent,
                    turn: None,
                };
            }
            Phase::Idle { user, .. } => {
                self.phase = Phase::Match {
                    user: user.clone(),
                    opponent,
                    turn: None,
                };
            }
        }
    }

    /// The server reported the match outcome. Unconditional for any
    /// logged-in screen.
    pub fn finish_match(&mut self, outcome: MatchOutcome) {
        match &self.phase {
            Phase::Login { .. } => {
                warn!("matchResult while logged out; dropped");
            }
            Phase::Idle { user, .. } | Phase::Result { user, .. } => {
                warn!(screen = ?self.screen(), "matchResult while no match active; applying");
                self.phase = Phase::Result {
                    user: user.clone(),
                    outcome,
                };
            }
            Phase::Match { user, .. } => {
                self.phase = Phase::Result {
                    user: user.clone(),
                    outcome,
                };
            }
        }
    }

    /// Apply an inbound server event, dispatching to the named transition.
    pub fn apply(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::UserLoggedIn { user } => self.confirm_login(user.clone()),
            ServerEvent::UserExists => self.reject_login(),
            ServerEvent::UserLoggedOut { user } => {
                debug!(username = %user.username, "logout confirmed");
                self.confirm_logout();
            }
            ServerEvent::Players { users } => self.replace_roster(users.clone()),
            ServerEvent::StartMatch { opponent } => self.start_match(opponent.clone()),
            ServerEvent::MatchResult { result } => self.finish_match(result.clone()),
            ServerEvent::TurnPlayed { turn } => self.record_turn(turn.clone()),
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn alice() -> User {
        User::new("alice")
    }

    fn bob() -> User {
        User::new("bob")
    }

    fn logged_in_state() -> SessionState {
        let mut state = SessionState::new();
        state.confirm_login(alice());
        state
    }

    fn in_match_state() -> SessionState {
        let mut state = logged_in_state();
        state.start_match(bob());
        state
    }

    /// The structural invariants of the aggregate, checked after every
    /// transition in the tests below.
    fn assert_invariants(state: &SessionState) {
        assert_eq!(
            state.screen() == Screen::Match,
            state.in_match_with().is_some(),
            "match screen iff opponent present"
        );
        assert_eq!(
            state.screen() == Screen::Result,
            state.result().is_some(),
            "result screen iff outcome present"
        );
        assert_eq!(
            state.screen() != Screen::Login,
            state.user().is_some(),
            "user present iff past the login screen"
        );
        if state.match_request().is_some() {
            assert_eq!(state.screen(), Screen::Idle);
        }
    }

    #[test]
    fn fresh_state_is_login_screen() {
        let state = SessionState::new();
        assert_eq!(state.screen(), Screen::Login);
        assert!(!state.logged_in());
        assert!(!state.invalid_user());
        assert!(state.users().is_empty());
        assert_invariants(&state);
    }

    #[test]
    fn confirm_login_resets_everything() {
        // Regardless of prior state, userLoggedIn yields a clean idle state.
        let mut state = in_match_state();
        state.record_turn(TurnPayload::new(serde_json::json!({"cell": 4})));
        state.confirm_login(alice());

        assert_eq!(state.screen(), Screen::Idle);
        assert_eq!(state.user(), Some(&alice()));
        assert!(!state.invalid_user());
        assert!(state.in_match_with().is_none());
        assert!(state.match_request().is_none());
        assert!(state.turn().is_none());
        assert_invariants(&state);
    }

    #[test]
    fn reject_login_only_sets_flag() {
        let mut state = SessionState::new();
        state.replace_roster(vec![bob()]);
        state.reject_login();

        assert!(state.invalid_user());
        assert_eq!(state.screen(), Screen::Login);
        assert!(state.user().is_none());
        assert_eq!(state.users(), &[bob()]);
        assert_invariants(&state);
    }

    #[test]
    fn begin_login_attempt_clears_rejection() {
        let mut state = SessionState::new();
        state.reject_login();
        assert!(state.invalid_user());

        state.begin_login_attempt();
        assert!(!state.invalid_user());
        assert_eq!(state.screen(), Screen::Login);
        assert_invariants(&state);
    }

    #[test]
    fn confirm_logout_returns_to_login() {
        let mut state = in_match_state();
        state.confirm_logout();

        assert_eq!(state.screen(), Screen::Login);
        assert!(!state.logged_in());
        assert!(!state.invalid_user());
        assert_invariants(&state);
    }

    #[test]
    fn roster_is_replaced_wholesale() {
        let mut state = logged_in_state();
        state.replace_roster(vec![bob(), User::new("carol")]);
        state.replace_roster(vec![User::new("carol")]);

        assert_eq!(state.users(), &[User::new("carol")]);
        assert_invariants(&state);
    }

    #[test]
    fn match_request_resolves_into_match() {
        let mut state = logged_in_state();
        state.replace_roster(vec![bob()]);
        state.record_match_request(bob());
        assert_eq!(
            state.match_request(),
            Some(&MatchRequest { opponent: bob() })
        );
        assert_invariants(&state);

        state.start_match(bob());
        assert_eq!(state.screen(), Screen::Match);
        assert_eq!(state.in_match_with(), Some(&bob()));
        assert!(state.match_request().is_none());
        assert!(state.turn().is_none());
        assert_invariants(&state);
    }

    #[test]
    fn start_match_clears_previous_turn() {
        let mut state = in_match_state();
        state.record_turn(TurnPayload::new(serde_json::json!({"cell": 0})));
        assert!(state.turn().is_some());

        state.start_match(bob());
        assert!(state.turn().is_none());
        assert_invariants(&state);
    }

    #[test]
    fn turn_last_value_wins() {
        let mut state = in_match_state();
        state.record_turn(TurnPayload::new(serde_json::json!({"cell": 0})));
        state.record_turn(TurnPayload::new(serde_json::json!({"cell": 8})));

        assert_eq!(
            state.turn(),
            Some(&TurnPayload::new(serde_json::json!({"cell": 8})))
        );
        assert_invariants(&state);
    }

    #[test]
    fn finish_then_new_match_clears_outcome_and_turn() {
        let mut state = in_match_state();
        state.record_turn(TurnPayload::new(serde_json::json!({"cell": 2})));
        state.finish_match(MatchOutcome::won_by("alice"));

        assert_eq!(state.screen(), Screen::Result);
        assert_eq!(state.result(), Some(&MatchOutcome::won_by("alice")));
        assert!(state.turn().is_none());
        assert_invariants(&state);

        state.reset_match();
        assert_eq!(state.screen(), Screen::Idle);
        assert!(state.result().is_none());
        assert!(state.turn().is_none());
        assert_invariants(&state);
    }

    #[test]
    fn reset_match_is_valid_from_any_logged_in_screen() {
        for mut state in [logged_in_state(), in_match_state(), {
            let mut s = in_match_state();
            s.finish_match(MatchOutcome::draw());
            s
        }] {
            state.reset_match();
            assert_eq!(state.screen(), Screen::Idle);
            assert_invariants(&state);
        }
    }

    // ── Out-of-precondition events ──────────────────────────────────

    #[test]
    fn start_match_mid_match_replaces_opponent() {
        let mut state = in_match_state();
        state.record_turn(TurnPayload::new(serde_json::json!({"cell": 1})));

        state.start_match(User::new("carol"));
        assert_eq!(state.in_match_with(), Some(&User::new("carol")));
        assert!(state.turn().is_none());
        assert_invariants(&state);
    }

    #[test]
    fn start_match_while_logged_out_is_dropped() {
        let mut state = SessionState::new();
        state.start_match(bob());
        assert_eq!(state.screen(), Screen::Login);
        assert_invariants(&state);
    }

    #[test]
    fn turn_outside_match_is_dropped() {
        let mut state = logged_in_state();
        state.record_turn(TurnPayload::new(serde_json::json!({"cell": 5})));
        assert_eq!(state.screen(), Screen::Idle);
        assert!(state.turn().is_none());
        assert_invariants(&state);
    }

    #[test]
    fn match_result_while_idle_still_applies() {
        let mut state = logged_in_state();
        state.finish_match(MatchOutcome::won_by("bob"));
        assert_eq!(state.screen(), Screen::Result);
        assert_eq!(state.result(), Some(&MatchOutcome::won_by("bob")));
        assert_invariants(&state);
    }

    #[test]
    fn reject_login_while_logged_in_is_dropped() {
        let mut state = logged_in_state();
        state.reject_login();
        assert_eq!(state.screen(), Screen::Idle);
        assert!(!state.invalid_user());
        assert_invariants(&state);
    }

    // ── Event dispatch ──────────────────────────────────────────────

    #[test]
    fn apply_dispatches_every_event() {
        let mut state = SessionState::new();

        state.apply(&ServerEvent::UserExists);
        assert!(state.invalid_user());

        state.apply(&ServerEvent::UserLoggedIn { user: alice() });
        assert_eq!(state.screen(), Screen::Idle);
        assert!(!state.invalid_user());

        state.apply(&ServerEvent::Players {
            users: vec![bob()],
        });
        assert_eq!(state.users(), &[bob()]);

        state.apply(&ServerEvent::StartMatch { opponent: bob() });
        assert_eq!(state.in_match_with(), Some(&bob()));

        state.apply(&ServerEvent::TurnPlayed {
            turn: TurnPayload::new(serde_json::json!([0, 1])),
        });
        assert!(state.turn().is_some());

        state.apply(&ServerEvent::MatchResult {
            result: MatchOutcome::won_by("bob"),
        });
        assert_eq!(state.screen(), Screen::Result);

        state.apply(&ServerEvent::UserLoggedOut { user: alice() });
        assert_eq!(state.screen(), Screen::Login);
        assert_invariants(&state);
    }

    #[test]
    fn mode_is_cosmetic() {
        let mut state = in_match_state();
        state.set_mode("retro");
        assert_eq!(state.mode(), "retro");
        assert_eq!(state.screen(), Screen::Match);
        assert_invariants(&state);
    }
}
