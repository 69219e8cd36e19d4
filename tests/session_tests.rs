#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Integration-style session tests for the Matchwire client.
//!
//! Uses the test-driven `ChannelTransport` from `tests/common` so server
//! events can be interleaved with session commands at exact points, and
//! verifies state transitions, outbound event generation, event delivery,
//! and persistence wiring end to end.

mod common;

use std::sync::Arc;

use matchwire_client::persist::{self, SnapshotStore};
use matchwire_client::protocol::{ClientEvent, MatchOutcome, TurnPayload, User};
use matchwire_client::{
    GameSession, GameSessionConfig, Screen, SessionError, SessionEvent, SessionState,
};

use common::{
    match_result_json, players_json, start_match_json, turn_json, user_exists_json,
    user_logged_in_json, user_logged_out_json, wait_for_sent, ChannelTransport, MockTransport,
    ServerHandle,
};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

/// Start a session over a test-driven transport and consume the synthetic
/// `Connected` event.
#[allow(clippy::type_complexity)]
async fn start_session() -> (
    GameSession,
    tokio::sync::mpsc::Receiver<SessionEvent>,
    ServerHandle,
    Arc<std::sync::Mutex<Vec<String>>>,
) {
    let (transport, server, sent, _closed) = ChannelTransport::new();
    let (session, mut events) = GameSession::start(transport, GameSessionConfig::new());
    let ev = events.recv().await.expect("expected Connected event");
    assert!(
        matches!(ev, SessionEvent::Connected),
        "first event should be Connected, got {ev:?}"
    );
    (session, events, server, sent)
}

/// Log in as `username` and consume the `LoggedIn` event.
async fn log_in(
    session: &GameSession,
    events: &mut tokio::sync::mpsc::Receiver<SessionEvent>,
    server: &ServerHandle,
    username: &str,
) {
    session.login(username).await.expect("login command");
    server.emit(user_logged_in_json(username));
    let ev = events.recv().await.expect("expected LoggedIn event");
    assert!(
        matches!(ev, SessionEvent::LoggedIn { .. }),
        "expected LoggedIn, got {ev:?}"
    );
}

/// Parse the last message the session sent.
fn last_sent(sent: &std::sync::Mutex<Vec<String>>) -> ClientEvent {
    let messages = sent.lock().unwrap();
    serde_json::from_str(messages.last().expect("no messages sent")).expect("parse client event")
}

// ════════════════════════════════════════════════════════════════════
// Login lifecycle
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn login_emits_event_and_commits_only_on_confirmation() {
    let (mut session, mut events, server, sent) = start_session().await;

    session.login("alice").await.unwrap();

    // The outbound event is on the wire, the state is untouched.
    wait_for_sent(&sent, 1).await;
    assert_eq!(
        last_sent(&sent),
        ClientEvent::Login {
            username: "alice".into()
        }
    );
    assert_eq!(session.screen(), Screen::Login);
    assert!(!session.logged_in());

    // Server confirmation commits the identity.
    server.emit(user_logged_in_json("alice"));
    let ev = events.recv().await.unwrap();
    assert_eq!(
        ev,
        SessionEvent::LoggedIn {
            user: User::new("alice")
        }
    );

    let state = session.snapshot();
    assert_eq!(state.screen(), Screen::Idle);
    assert_eq!(state.user(), Some(&User::new("alice")));
    assert!(!state.invalid_user());
    assert!(state.in_match_with().is_none());
    assert!(state.match_request().is_none());
    assert!(state.turn().is_none());

    session.shutdown().await;
}

#[tokio::test]
async fn duplicate_username_sets_rejection_flag_only() {
    let (mut session, mut events, server, _sent) = start_session().await;

    session.login("alice").await.unwrap();
    server.emit(user_exists_json());

    let ev = events.recv().await.unwrap();
    assert_eq!(ev, SessionEvent::LoginRejected);

    let state = session.snapshot();
    assert!(state.invalid_user());
    assert_eq!(state.screen(), Screen::Login);
    assert!(state.user().is_none());

    // The next attempt clears the flag before anything arrives.
    session.login("alice2").await.unwrap();
    assert!(!session.snapshot().invalid_user());

    session.shutdown().await;
}

#[tokio::test]
async fn logout_commits_on_echo() {
    let (mut session, mut events, server, sent) = start_session().await;
    log_in(&session, &mut events, &server, "alice").await;

    session.logout().await.unwrap();
    wait_for_sent(&sent, 2).await;
    assert_eq!(
        last_sent(&sent),
        ClientEvent::Logout {
            username: "alice".into()
        }
    );
    // Still logged in until the echo lands.
    assert!(session.logged_in());

    server.emit(user_logged_out_json("alice"));
    let ev = events.recv().await.unwrap();
    assert!(matches!(ev, SessionEvent::LoggedOut { .. }));
    assert!(!session.logged_in());
    assert_eq!(session.screen(), Screen::Login);

    session.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Roster
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn roster_broadcast_replaces_wholesale() {
    let (mut session, mut events, server, _sent) = start_session().await;
    log_in(&session, &mut events, &server, "alice").await;

    server.emit(players_json(&["bob", "carol"]));
    let ev = events.recv().await.unwrap();
    assert_eq!(
        ev,
        SessionEvent::RosterUpdated {
            users: vec![User::new("bob"), User::new("carol")]
        }
    );

    server.emit(players_json(&["carol"]));
    let _ = events.recv().await.unwrap();
    assert_eq!(session.snapshot().users(), &[User::new("carol")]);

    session.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Match lifecycle
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn request_match_then_server_start() {
    let (mut session, mut events, server, sent) = start_session().await;
    log_in(&session, &mut events, &server, "alice").await;

    server.emit(players_json(&["bob"]));
    let _ = events.recv().await; // RosterUpdated

    session.request_match(User::new("bob")).await.unwrap();
    {
        let state = session.snapshot();
        assert_eq!(state.screen(), Screen::Idle);
        assert_eq!(state.match_request().unwrap().opponent, User::new("bob"));
    }
    wait_for_sent(&sent, 2).await;
    assert_eq!(
        last_sent(&sent),
        ClientEvent::RequestMatch {
            opponent: User::new("bob")
        }
    );

    // Only the server starts the match; the invitation is consumed.
    server.emit(start_match_json("bob"));
    let ev = events.recv().await.unwrap();
    assert_eq!(
        ev,
        SessionEvent::MatchStarted {
            opponent: User::new("bob")
        }
    );

    let state = session.snapshot();
    assert_eq!(state.screen(), Screen::Match);
    assert_eq!(state.in_match_with(), Some(&User::new("bob")));
    assert!(state.match_request().is_none());
    assert!(state.turn().is_none());

    session.shutdown().await;
}

#[tokio::test]
async fn request_match_outside_idle_is_rejected() {
    let (mut session, mut events, server, _sent) = start_session().await;
    log_in(&session, &mut events, &server, "alice").await;

    server.emit(players_json(&["bob", "carol"]));
    let _ = events.recv().await; // RosterUpdated
    server.emit(start_match_json("bob"));
    let _ = events.recv().await; // MatchStarted

    let err = session.request_match(User::new("carol")).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Precondition(matchwire_client::PreconditionError::NotIdle)
    ));

    session.shutdown().await;
}

#[tokio::test]
async fn turns_flow_both_ways_into_the_same_slot() {
    let (mut session, mut events, server, sent) = start_session().await;
    log_in(&session, &mut events, &server, "alice").await;

    server.emit(start_match_json("bob"));
    let _ = events.recv().await; // MatchStarted

    // Local turn is recorded optimistically and emitted.
    session
        .make_turn(TurnPayload::new(serde_json::json!({"cell": 3})))
        .await
        .unwrap();
    assert_eq!(
        session.snapshot().turn(),
        Some(&TurnPayload::new(serde_json::json!({"cell": 3})))
    );
    wait_for_sent(&sent, 2).await;
    assert_eq!(
        last_sent(&sent),
        ClientEvent::MakeTurn {
            turn: TurnPayload::new(serde_json::json!({"cell": 3}))
        }
    );

    // The opponent's relayed turn overwrites the same slot.
    server.emit(turn_json(serde_json::json!({"cell": 7})));
    let ev = events.recv().await.unwrap();
    assert_eq!(
        ev,
        SessionEvent::TurnPlayed {
            turn: TurnPayload::new(serde_json::json!({"cell": 7}))
        }
    );
    assert_eq!(
        session.snapshot().turn(),
        Some(&TurnPayload::new(serde_json::json!({"cell": 7})))
    );

    session.shutdown().await;
}

#[tokio::test]
async fn match_result_then_new_match() {
    let (mut session, mut events, server, sent) = start_session().await;
    log_in(&session, &mut events, &server, "alice").await;

    server.emit(start_match_json("bob"));
    let _ = events.recv().await; // MatchStarted

    server.emit(match_result_json("alice"));
    let ev = events.recv().await.unwrap();
    assert_eq!(
        ev,
        SessionEvent::MatchEnded {
            outcome: MatchOutcome::won_by("alice")
        }
    );
    {
        let state = session.snapshot();
        assert_eq!(state.screen(), Screen::Result);
        assert_eq!(state.result(), Some(&MatchOutcome::won_by("alice")));
        assert!(state.in_match_with().is_none());
    }

    session.new_match().await.unwrap();
    let state = session.snapshot();
    assert_eq!(state.screen(), Screen::Idle);
    assert!(state.result().is_none());
    assert!(state.turn().is_none());

    wait_for_sent(&sent, 2).await;
    assert_eq!(last_sent(&sent), ClientEvent::NewMatch);

    session.shutdown().await;
}

#[tokio::test]
async fn out_of_sequence_start_match_wins() {
    // A second startMatch arriving mid-match replaces the running match
    // (last writer wins) instead of corrupting it.
    let (mut session, mut events, server, _sent) = start_session().await;
    log_in(&session, &mut events, &server, "alice").await;

    server.emit(start_match_json("bob"));
    let _ = events.recv().await; // MatchStarted(bob)
    session
        .make_turn(TurnPayload::new(serde_json::json!({"cell": 1})))
        .await
        .unwrap();

    server.emit(start_match_json("carol"));
    let _ = events.recv().await; // MatchStarted(carol)

    let state = session.snapshot();
    assert_eq!(state.screen(), Screen::Match);
    assert_eq!(state.in_match_with(), Some(&User::new("carol")));
    assert!(state.turn().is_none());

    session.shutdown().await;
}

#[tokio::test]
async fn turn_relay_outside_match_is_dropped() {
    let (mut session, mut events, server, _sent) = start_session().await;
    log_in(&session, &mut events, &server, "alice").await;

    server.emit(turn_json(serde_json::json!({"cell": 0})));
    // The notification still flows; the state refuses the write.
    let ev = events.recv().await.unwrap();
    assert!(matches!(ev, SessionEvent::TurnPlayed { .. }));

    let state = session.snapshot();
    assert_eq!(state.screen(), Screen::Idle);
    assert!(state.turn().is_none());

    session.shutdown().await;
}

#[tokio::test]
async fn server_disconnect_freezes_state() {
    let (mut session, mut events, server, _sent) = start_session().await;
    log_in(&session, &mut events, &server, "alice").await;

    server.emit(start_match_json("bob"));
    let _ = events.recv().await; // MatchStarted

    server.close();
    let ev = events.recv().await.unwrap();
    assert!(matches!(ev, SessionEvent::Disconnected { reason: None }));

    // Last valid state survives; no reset on disconnect.
    assert!(!session.is_connected());
    assert_eq!(session.screen(), Screen::Match);
    assert!(session.logged_in());

    let err = session.new_match().await.unwrap_err();
    assert!(matches!(err, SessionError::NotConnected));

    session.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Persistence wiring
// ════════════════════════════════════════════════════════════════════

/// In-memory store for exercising the persistence subscription.
#[derive(Default)]
struct MemoryStore {
    blob: std::sync::Mutex<Option<String>>,
}

#[async_trait::async_trait]
impl SnapshotStore for MemoryStore {
    async fn save(&self, blob: String) -> Result<(), SessionError> {
        *self.blob.lock().unwrap() = Some(blob);
        Ok(())
    }

    async fn load(&self) -> Result<Option<String>, SessionError> {
        Ok(self.blob.lock().unwrap().clone())
    }
}

#[tokio::test]
async fn every_transition_reaches_the_store() {
    let store = Arc::new(MemoryStore::default());

    let (mut session, mut events, server, _sent) = start_session().await;
    let persist_task = persist::spawn_persistence(Arc::clone(&store), session.state_changes());

    log_in(&session, &mut events, &server, "alice").await;
    server.emit(players_json(&["bob"]));
    let _ = events.recv().await; // RosterUpdated
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let blob = store.load().await.unwrap().expect("snapshot persisted");
    let restored = persist::decode_snapshot(&blob).unwrap();
    assert!(restored.logged_in());
    assert_eq!(restored.users(), &[User::new("bob")]);

    session.shutdown().await;
    drop(session);
    persist_task.await.unwrap();
}

#[tokio::test]
async fn reload_restores_session_and_reauthenticates() {
    // First life: log in, persist, shut down.
    let store = Arc::new(MemoryStore::default());
    {
        let (mut session, mut events, server, _sent) = start_session().await;
        let task = persist::spawn_persistence(Arc::clone(&store), session.state_changes());

        log_in(&session, &mut events, &server, "alice").await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        session.shutdown().await;
        drop(session);
        task.await.unwrap();
    }

    // Second life: hydrate from the store; the session re-sends login.
    let restored = persist::load_session(&store)
        .await
        .unwrap()
        .expect("snapshot exists");
    assert!(restored.logged_in());

    let (transport, _server, sent, _closed) = ChannelTransport::new();
    let (mut session, mut events) =
        GameSession::start_with_state(transport, GameSessionConfig::new(), restored);

    let _ = events.recv().await; // Connected
    wait_for_sent(&sent, 1).await;

    assert!(session.logged_in());
    {
        let messages = sent.lock().unwrap();
        let first: ClientEvent = serde_json::from_str(&messages[0]).unwrap();
        assert_eq!(
            first,
            ClientEvent::Login {
                username: "alice".into()
            }
        );
    }

    session.shutdown().await;
}

#[tokio::test]
async fn fresh_start_without_store_works() {
    // The core must function without the persistence collaborator.
    let (transport, _sent, _closed) = MockTransport::new(vec![]);
    let (mut session, mut events) = GameSession::start(transport, GameSessionConfig::new());

    let _ = events.recv().await; // Connected
    assert_eq!(session.snapshot(), SessionState::new());

    session.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Navigation gate against a live session
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn navigation_follows_login_state() {
    use matchwire_client::nav::{resolve, Surface};

    let (mut session, mut events, server, _sent) = start_session().await;
    assert_eq!(resolve(Surface::Game, session.logged_in()), Surface::Login);

    log_in(&session, &mut events, &server, "alice").await;
    assert_eq!(resolve(Surface::Login, session.logged_in()), Surface::Game);
    assert_eq!(resolve(Surface::Game, session.logged_in()), Surface::Game);

    session.logout().await.unwrap();
    server.emit(user_logged_out_json("alice"));
    let _ = events.recv().await; // LoggedOut
    assert_eq!(resolve(Surface::Game, session.logged_in()), Surface::Login);

    session.shutdown().await;
}
