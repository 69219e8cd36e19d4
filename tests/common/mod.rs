#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Shared test utilities for Matchwire client integration tests.
//!
//! Provides two mock transports and helper functions for constructing
//! server event JSON strings:
//!
//! - [`MockTransport`] replays a fixed script as fast as the loop reads it.
//! - [`ChannelTransport`] is driven by a [`ServerHandle`], letting a test
//!   interleave server events with session commands deterministically.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use matchwire_client::protocol::{MatchOutcome, ServerEvent, TurnPayload, User};
use matchwire_client::{SessionError, Transport};
use tokio::sync::mpsc;

// ── MockTransport (fixed script) ────────────────────────────────────

/// A mock transport that replays scripted server responses in order.
///
/// All messages sent by the session are recorded in `sent`.
pub struct MockTransport {
    /// Scripted server responses (consumed in order by `recv`).
    incoming: VecDeque<Option<Result<String, SessionError>>>,
    /// Recorded outgoing messages from the session.
    pub sent: Arc<StdMutex<Vec<String>>>,
    /// Whether `close()` has been called.
    pub closed: Arc<AtomicBool>,
}

impl MockTransport {
    /// Create a new mock transport with the given scripted incoming messages.
    ///
    /// Returns the transport plus shared handles for inspecting sent
    /// messages and whether close was called.
    pub fn new(
        incoming: Vec<Option<Result<String, SessionError>>>,
    ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            incoming: VecDeque::from(incoming),
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        (transport, sent, closed)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), SessionError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, SessionError>> {
        if let Some(item) = self.incoming.pop_front() {
            item
        } else {
            // No more scripted messages — hang forever so the transport loop
            // stays alive until shutdown is called.
            std::future::pending().await
        }
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── ChannelTransport (test-driven) ──────────────────────────────────

/// A transport whose inbound side is fed by the test through a
/// [`ServerHandle`], so server events can be emitted at exact points
/// between session commands.
pub struct ChannelTransport {
    incoming: mpsc::UnboundedReceiver<Option<Result<String, SessionError>>>,
    pub sent: Arc<StdMutex<Vec<String>>>,
    pub closed: Arc<AtomicBool>,
}

/// The test's end of a [`ChannelTransport`]: plays the role of the server.
#[derive(Clone)]
pub struct ServerHandle {
    tx: mpsc::UnboundedSender<Option<Result<String, SessionError>>>,
}

impl ServerHandle {
    /// Deliver one inbound JSON message to the session.
    pub fn emit(&self, json: String) {
        self.tx.send(Some(Ok(json))).expect("transport loop gone");
    }

    /// Deliver an inbound transport error.
    pub fn fail(&self, error: SessionError) {
        self.tx.send(Some(Err(error))).expect("transport loop gone");
    }

    /// Close the connection cleanly from the server side.
    pub fn close(&self) {
        self.tx.send(None).expect("transport loop gone");
    }
}

impl ChannelTransport {
    #[allow(clippy::type_complexity)]
    pub fn new() -> (
        Self,
        ServerHandle,
        Arc<StdMutex<Vec<String>>>,
        Arc<AtomicBool>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            incoming: rx,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        (transport, ServerHandle { tx }, sent, closed)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&mut self, message: String) -> Result<(), SessionError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, SessionError>> {
        match self.incoming.recv().await {
            Some(item) => item,
            // The test dropped its ServerHandle — stay quiet until shutdown.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── Waiting helpers ─────────────────────────────────────────────────

/// Wait until the session has sent at least `count` messages.
pub async fn wait_for_sent(sent: &StdMutex<Vec<String>>, count: usize) {
    for _ in 0..200 {
        if sent.lock().unwrap().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {count} sent messages");
}

// ── JSON helper functions ───────────────────────────────────────────

/// Returns the JSON string for a `userLoggedIn` server event.
pub fn user_logged_in_json(username: &str) -> String {
    serde_json::to_string(&ServerEvent::UserLoggedIn {
        user: User::new(username),
    })
    .expect("user_logged_in_json serialization")
}

/// Returns the JSON string for a `userExists` server event.
pub fn user_exists_json() -> String {
    serde_json::to_string(&ServerEvent::UserExists).expect("user_exists_json serialization")
}

/// Returns the JSON string for a `userLoggedOut` server event.
pub fn user_logged_out_json(username: &str) -> String {
    serde_json::to_string(&ServerEvent::UserLoggedOut {
        user: User::new(username),
    })
    .expect("user_logged_out_json serialization")
}

/// Returns the JSON string for a `players` roster broadcast.
pub fn players_json(usernames: &[&str]) -> String {
    serde_json::to_string(&ServerEvent::Players {
        users: usernames.iter().map(|name| User::new(*name)).collect(),
    })
    .expect("players_json serialization")
}

/// Returns the JSON string for a `startMatch` server event.
pub fn start_match_json(opponent: &str) -> String {
    serde_json::to_string(&ServerEvent::StartMatch {
        opponent: User::new(opponent),
    })
    .expect("start_match_json serialization")
}

/// Returns the JSON string for a `matchResult` server event.
pub fn match_result_json(winner: &str) -> String {
    serde_json::to_string(&ServerEvent::MatchResult {
        result: MatchOutcome::won_by(winner),
    })
    .expect("match_result_json serialization")
}

/// Returns the JSON string for an opponent turn relay (`makeTurn`).
pub fn turn_json(turn: serde_json::Value) -> String {
    serde_json::to_string(&ServerEvent::TurnPlayed {
        turn: TurnPayload::new(turn),
    })
    .expect("turn_json serialization")
}
