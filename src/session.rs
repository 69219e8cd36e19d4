//! Async session handle for the Matchwire game protocol.
//!
//! [`GameSession`] is a thin handle that communicates with a background
//! transport loop task via an unbounded MPSC channel. Inbound server events
//! are applied to the [`SessionState`] aggregate and then surfaced as
//! [`SessionEvent`]s on a bounded channel returned from
//! [`GameSession::start`].
//!
//! All transitions are serialized: commands and inbound events alike take
//! the session's state lock, apply exactly one named transition, and publish
//! the committed snapshot on a `watch` channel before releasing the lock.
//! Readers (navigation, persistence, rendering) only ever observe committed
//! snapshots.
//!
//! # Example
//!
//! ```rust,ignore
//! let transport = connect_somehow().await;
//! let (session, mut events) = GameSession::start(transport, GameSessionConfig::new());
//!
//! session.login("alice").await?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SessionEvent::LoggedIn { user } => { /* … */ }
//!         SessionEvent::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, warn};

use crate::error::{PreconditionError, Result, SessionError};
use crate::event::SessionEvent;
use crate::protocol::{ClientEvent, ServerEvent, TurnPayload, User};
use crate::state::{Screen, SessionState};
use crate::transport::Transport;

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`GameSession`].
///
/// All fields have sensible defaults.
///
/// # Example
///
/// ```
/// use matchwire_client::session::GameSessionConfig;
/// use std::time::Duration;
///
/// let config = GameSessionConfig::new()
///     .with_event_channel_capacity(512)
///     .with_shutdown_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct GameSessionConfig {
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer cannot keep up with incoming server events, events
    /// are dropped (with a warning logged) to avoid blocking the transport
    /// loop. State transitions still apply; only the notification is lost.
    /// The `Disconnected` event is always delivered regardless of capacity.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Timeout for the graceful shutdown.
    ///
    /// When [`GameSession::shutdown`] is called, the background transport
    /// loop is given this much time to close the transport and emit a final
    /// `Disconnected` event. If the timeout expires the task is aborted.
    ///
    /// Defaults to **1 second**. A zero timeout aborts the transport loop
    /// immediately without waiting for graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl GameSessionConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self {
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Set the capacity of the bounded event channel.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the timeout for the graceful shutdown.
    ///
    /// Defaults to **1 second**. A zero timeout aborts the transport loop
    /// immediately without waiting for graceful shutdown.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

impl Default for GameSessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ── Shared state ────────────────────────────────────────────────────

/// State shared between the session handle and the transport loop.
///
/// `state` is the single source of truth; `state_tx` mirrors every
/// committed snapshot for subscribers and cheap reads.
struct SessionShared {
    connected: AtomicBool,
    state: Mutex<SessionState>,
    state_tx: watch::Sender<SessionState>,
}

impl SessionShared {
    fn new(initial: SessionState) -> Self {
        let (state_tx, _) = watch::channel(initial.clone());
        Self {
            connected: AtomicBool::new(true),
            state: Mutex::new(initial),
            state_tx,
        }
    }
}

// ── Session handle ──────────────────────────────────────────────────

/// Async handle for a Matchwire game session.
///
/// Created via [`GameSession::start`], which spawns a background transport
/// loop and returns this handle together with an event receiver.
///
/// Command methods validate their preconditions against the current state,
/// apply any optimistic local transition, and queue the outbound event to
/// the transport loop. They return once the event is queued (no round-trip
/// await). Identity and match-lifecycle transitions (`login`, `logout`)
/// commit only when the server's confirmation event arrives.
pub struct GameSession {
    /// Sender half of the command channel to the transport loop.
    cmd_tx: mpsc::UnboundedSender<ClientEvent>,
    /// State shared with the transport loop.
    shared: Arc<SessionShared>,
    /// Handle to the background transport loop task.
    task: Option<tokio::task::JoinHandle<()>>,
    /// Oneshot sender to signal the transport loop to shut down gracefully.
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    /// Timeout for the graceful shutdown.
    shutdown_timeout: Duration,
}

impl GameSession {
    /// Start a fresh session on the given transport.
    ///
    /// # Returns
    ///
    /// A tuple of `(session_handle, event_receiver)`. The event receiver
    /// yields [`SessionEvent`]s until the transport closes or the session
    /// shuts down.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(
        transport: impl Transport,
        config: GameSessionConfig,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        Self::start_with_state(transport, config, SessionState::new())
    }

    /// Start a session hydrated from a previously persisted [`SessionState`].
    ///
    /// If the restored state carries an authenticated user, a `login` event
    /// for that username is queued as the very first outgoing message, so
    /// the server re-confirms the identity after a reload. The restored
    /// state is served to readers as-is in the meantime.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start_with_state(
        transport: impl Transport,
        config: GameSessionConfig,
        initial: SessionState,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<ClientEvent>();
        // Clamp capacity to at least 1 (tokio panics on 0).
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        // Re-authenticate a restored identity before anything else goes out.
        if let Some(user) = initial.user() {
            debug!(username = %user.username, "restored session, queueing re-login");
            // This cannot fail because we just created the channel.
            let _ = cmd_tx.send(ClientEvent::Login {
                username: user.username.clone(),
            });
        }

        let shared = Arc::new(SessionShared::new(initial));
        let loop_shared = Arc::clone(&shared);

        let task = tokio::spawn(transport_loop(
            transport,
            cmd_rx,
            event_tx,
            loop_shared,
            shutdown_rx,
        ));

        let session = Self {
            cmd_tx,
            shared,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };

        (session, event_rx)
    }

    // ── Commands ────────────────────────────────────────────────────

    /// Attempt to log in under `username`.
    ///
    /// Clears a previous `invalid_user` rejection flag; everything else is
    /// unchanged until the server answers with `userLoggedIn` (success) or
    /// `userExists` (name taken).
    ///
    /// # Errors
    ///
    /// [`PreconditionError::EmptyUsername`] for a blank username, or
    /// [`SessionError::NotConnected`] if the transport has closed.
    pub async fn login(&self, username: impl Into<String>) -> Result<()> {
        let username = username.into();
        if username.trim().is_empty() {
            return Err(PreconditionError::EmptyUsername.into());
        }
        self.ensure_connected()?;

        {
            let mut state = self.shared.state.lock().await;
            state.begin_login_attempt();
            self.shared.state_tx.send_replace(state.clone());
        }
        self.send(ClientEvent::Login { username })
    }

    /// Log out the current user. Commits when the server echoes
    /// `userLoggedOut`.
    ///
    /// # Errors
    ///
    /// [`PreconditionError::NotLoggedIn`] if no user is logged in, or
    /// [`SessionError::NotConnected`] if the transport has closed.
    pub async fn logout(&self) -> Result<()> {
        self.ensure_connected()?;
        let username = {
            let state = self.shared.state.lock().await;
            state
                .user()
                .ok_or(PreconditionError::NotLoggedIn)?
                .username
                .clone()
        };
        self.send(ClientEvent::Logout { username })
    }

    /// Invite `opponent` to a match. Optimistic: the pending invitation is
    /// recorded locally before the server's `startMatch` arrives.
    ///
    /// # Errors
    ///
    /// [`PreconditionError::NotIdle`] unless the session is on the idle
    /// screen, [`PreconditionError::NotInRoster`] if the opponent is not a
    /// connected player, or [`SessionError::NotConnected`] if the transport
    /// has closed.
    pub async fn request_match(&self, opponent: User) -> Result<()> {
        self.ensure_connected()?;
        {
            let mut state = self.shared.state.lock().await;
            if state.screen() != Screen::Idle {
                return Err(PreconditionError::NotIdle.into());
            }
            if !state.users().contains(&opponent) {
                return Err(PreconditionError::NotInRoster {
                    username: opponent.username,
                }
                .into());
            }
            state.record_match_request(opponent.clone());
            self.shared.state_tx.send_replace(state.clone());
        }
        self.send(ClientEvent::RequestMatch { opponent })
    }

    /// Play a turn in the active match. Optimistic: the turn is recorded
    /// locally as it goes out.
    ///
    /// # Errors
    ///
    /// [`PreconditionError::NotInMatch`] unless a match is in progress, or
    /// [`SessionError::NotConnected`] if the transport has closed.
    pub async fn make_turn(&self, turn: TurnPayload) -> Result<()> {
        self.ensure_connected()?;
        {
            let mut state = self.shared.state.lock().await;
            if state.screen() != Screen::Match {
                return Err(PreconditionError::NotInMatch.into());
            }
            state.record_turn(turn.clone());
            self.shared.state_tx.send_replace(state.clone());
        }
        self.send(ClientEvent::MakeTurn { turn })
    }

    /// Leave the result screen and return to the lobby, clearing the
    /// previous match's turn and outcome. Commits locally: the protocol has
    /// no server echo for this transition.
    ///
    /// # Errors
    ///
    /// [`PreconditionError::NotLoggedIn`] if no user is logged in, or
    /// [`SessionError::NotConnected`] if the transport has closed.
    pub async fn new_match(&self) -> Result<()> {
        self.ensure_connected()?;
        {
            let mut state = self.shared.state.lock().await;
            if !state.logged_in() {
                return Err(PreconditionError::NotLoggedIn.into());
            }
            state.reset_match();
            self.shared.state_tx.send_replace(state.clone());
        }
        self.send(ClientEvent::NewMatch)
    }

    /// Set the cosmetic render mode. Local only; nothing is sent to the
    /// server, and the command works even after a disconnect.
    pub async fn set_mode(&self, mode: impl Into<String>) {
        let mut state = self.shared.state.lock().await;
        state.set_mode(mode);
        self.shared.state_tx.send_replace(state.clone());
    }

    /// Shut down the session, closing the transport and stopping the
    /// background task.
    ///
    /// After calling this method, the event receiver will yield `None` once
    /// the transport loop exits. The session state is left untouched.
    pub async fn shutdown(&mut self) {
        debug!("GameSession: shutdown requested");

        // Signal the transport loop to shut down gracefully.
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        // Await the transport loop with a timeout. If it doesn't exit in
        // time, abort it so the task cannot detach and run indefinitely.
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("transport loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("transport loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("transport loop aborted: {join_err}");
                    }
                }
            }
        }

        self.shared.connected.store(false, Ordering::Release);
    }

    // ── Derived view ────────────────────────────────────────────────

    /// Returns `true` if the transport is believed to be connected.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Returns `true` if the server has confirmed a login. Navigation
    /// guards key off this single derivation.
    pub fn logged_in(&self) -> bool {
        self.shared.state_tx.borrow().logged_in()
    }

    /// The current UI phase.
    pub fn screen(&self) -> Screen {
        self.shared.state_tx.borrow().screen()
    }

    /// A clone of the latest committed [`SessionState`] snapshot.
    pub fn snapshot(&self) -> SessionState {
        self.shared.state_tx.borrow().clone()
    }

    /// Subscribe to committed state changes.
    ///
    /// Every transition publishes the full aggregate; subscribers such as
    /// the persistence task or a rendering layer react without polling and
    /// without holding any reference across a transition.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn ensure_connected(&self) -> Result<()> {
        if self.shared.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(SessionError::NotConnected)
        }
    }

    /// Queue a `ClientEvent` to the transport loop.
    fn send(&self, event: ClientEvent) -> Result<()> {
        self.cmd_tx
            .send(event)
            .map_err(|_| SessionError::NotConnected)
    }
}

impl std::fmt::Debug for GameSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameSession")
            .field("connected", &self.is_connected())
            .field("screen", &self.screen())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for GameSession {
    fn drop(&mut self) {
        // `Drop` is synchronous so we cannot await a graceful shutdown.
        // The only safe action is to abort the spawned task, which causes
        // the transport loop future to be dropped immediately. The
        // `shutdown_tx` oneshot is intentionally *not* sent here: sending
        // it would trigger a graceful path that calls async `transport.close()`,
        // but there is no executor context to drive it inside `Drop`.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Transport loop ──────────────────────────────────────────────────

/// Background transport loop that multiplexes send/receive via
/// `tokio::select!`.
///
/// Exits when:
/// - The command channel closes (session handle dropped or shutdown called)
/// - The transport returns `None` (server closed connection)
/// - A transport error occurs
async fn transport_loop(
    mut transport: impl Transport,
    mut cmd_rx: mpsc::UnboundedReceiver<ClientEvent>,
    event_tx: mpsc::Sender<SessionEvent>,
    shared: Arc<SessionShared>,
    mut shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) {
    debug!("transport loop started");

    // Emit the synthetic Connected event before entering the select loop.
    emit_event(&event_tx, SessionEvent::Connected).await;

    loop {
        tokio::select! {
            // Branch 1: outgoing command from the session handle
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(event) => {
                        debug!("sending client event: {:?}", std::mem::discriminant(&event));
                        match serde_json::to_string(&event) {
                            Ok(json) => {
                                if let Err(e) = transport.send(json).await {
                                    error!("transport send error: {e}");
                                    emit_disconnected(
                                        &event_tx,
                                        &shared,
                                        Some(format!("transport send error: {e}")),
                                    ).await;
                                    break;
                                }
                            }
                            Err(e) => {
                                error!("failed to serialize ClientEvent: {e}");
                                // Serialization errors are programming bugs; don't kill the loop.
                            }
                        }
                    }
                    // Command channel closed — session handle dropped.
                    None => {
                        debug!("command channel closed, shutting down transport loop");
                        let _ = transport.close().await;
                        emit_disconnected(&event_tx, &shared, Some("session shut down".into())).await;
                        break;
                    }
                }
            }

            // Branch 2: shutdown signal
            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                let _ = transport.close().await;
                emit_disconnected(&event_tx, &shared, Some("session shut down".into())).await;
                break;
            }

            // Branch 3: incoming event from the server
            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => {
                        match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(server_event) => {
                                // Apply the transition and commit the snapshot
                                // before anyone is notified.
                                {
                                    let mut state = shared.state.lock().await;
                                    state.apply(&server_event);
                                    shared.state_tx.send_replace(state.clone());
                                }

                                emit_event(&event_tx, SessionEvent::from(server_event)).await;
                            }
                            Err(e) => {
                                warn!("failed to deserialize server event: {e} (raw: {text})");
                            }
                        }
                    }
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        emit_disconnected(
                            &event_tx,
                            &shared,
                            Some(format!("transport receive error: {e}")),
                        ).await;
                        break;
                    }
                    // Transport closed cleanly.
                    None => {
                        debug!("transport closed by server");
                        emit_disconnected(&event_tx, &shared, None).await;
                        break;
                    }
                }
            }
        }
    }

    debug!("transport loop exited");
}

/// Emit an event to the event channel. If the channel is full, log a warning
/// and drop the event to avoid blocking the transport loop.
async fn emit_event(event_tx: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!(
                "event channel full, dropping event: {:?}",
                std::mem::discriminant(&dropped)
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

/// Emit a [`Disconnected`](SessionEvent::Disconnected) event and drop the
/// connected flag. The session state itself is left in its last valid shape;
/// a disconnect is not a logout.
///
/// Uses `send().await` (blocking) instead of `try_send` because
/// `Disconnected` is always the last event on the channel and must never be
/// silently dropped.
async fn emit_disconnected(
    event_tx: &mpsc::Sender<SessionEvent>,
    shared: &SessionShared,
    reason: Option<String>,
) {
    shared.connected.store(false, Ordering::Release);
    let event = SessionEvent::Disconnected { reason };
    if event_tx.send(event).await.is_err() {
        debug!("event channel closed, receiver dropped");
    }
}

// ── Tests ───────────────────────────────────────────────────────────

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
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    // ── Mock transport ──────────────────────────────────────────────

    /// A mock transport that records sent messages and replays scripted
    /// responses.
    struct MockTransport {
        /// Messages that `recv()` will yield in order.
        incoming: VecDeque<Option<std::result::Result<String, SessionError>>>,
        /// Recorded outgoing messages.
        sent: Arc<StdMutex<Vec<String>>>,
        /// Whether `close()` was called.
        closed: Arc<AtomicBool>,
    }

    impl MockTransport {
        fn new(
            incoming: Vec<Option<std::result::Result<String, SessionError>>>,
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
        async fn send(&mut self, message: String) -> std::result::Result<(), SessionError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, SessionError>> {
            if let Some(item) = self.incoming.pop_front() {
                // An explicit `None` entry signals a clean transport close;
                // `Some(result)` delivers the scripted message or error.
                item
            } else {
                // All scripted messages have been delivered — hang forever
                // so the transport loop stays alive until shutdown.
                std::future::pending().await
            }
        }

        async fn close(&mut self) -> std::result::Result<(), SessionError> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn logged_in_json(username: &str) -> String {
        serde_json::to_string(&ServerEvent::UserLoggedIn {
            user: User::new(username),
        })
        .unwrap()
    }

    fn start_match_json(opponent: &str) -> String {
        serde_json::to_string(&ServerEvent::StartMatch {
            opponent: User::new(opponent),
        })
        .unwrap()
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn connected_is_first_event() {
        let (transport, _sent, _closed) = MockTransport::new(vec![]);
        let (mut session, mut events) = GameSession::start(transport, GameSessionConfig::new());

        let first = events.recv().await.unwrap();
        assert!(
            matches!(first, SessionEvent::Connected),
            "expected Connected as first event, got {first:?}"
        );

        session.shutdown().await;
    }

    #[tokio::test]
    async fn login_queues_event_without_state_change() {
        let (transport, sent, _closed) = MockTransport::new(vec![]);
        let (mut session, mut events) = GameSession::start(transport, GameSessionConfig::new());
        let _ = events.recv().await; // Connected

        session.login("alice").await.unwrap();
        assert_eq!(session.screen(), Screen::Login);
        assert!(!session.logged_in());

        tokio::time::sleep(Duration::from_millis(50)).await;
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
    async fn login_rejects_empty_username() {
        let (transport, sent, _closed) = MockTransport::new(vec![]);
        let (mut session, mut events) = GameSession::start(transport, GameSessionConfig::new());
        let _ = events.recv().await; // Connected

        let err = session.login("   ").await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Precondition(PreconditionError::EmptyUsername)
        ));

        // Nothing reached the wire.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sent.lock().unwrap().is_empty());

        session.shutdown().await;
    }

    #[tokio::test]
    async fn logout_without_user_is_a_precondition_error() {
        let (transport, _sent, _closed) = MockTransport::new(vec![]);
        let (mut session, mut events) = GameSession::start(transport, GameSessionConfig::new());
        let _ = events.recv().await; // Connected

        let err = session.logout().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Precondition(PreconditionError::NotLoggedIn)
        ));

        session.shutdown().await;
    }

    #[tokio::test]
    async fn server_confirmation_commits_login() {
        let (transport, _sent, _closed) =
            MockTransport::new(vec![Some(Ok(logged_in_json("alice")))]);
        let (mut session, mut events) = GameSession::start(transport, GameSessionConfig::new());

        let _ = events.recv().await; // Connected
        let ev = events.recv().await.unwrap();
        assert_eq!(
            ev,
            SessionEvent::LoggedIn {
                user: User::new("alice")
            }
        );

        assert!(session.logged_in());
        assert_eq!(session.screen(), Screen::Idle);

        session.shutdown().await;
    }

    #[tokio::test]
    async fn make_turn_outside_match_is_rejected() {
        let (transport, _sent, _closed) =
            MockTransport::new(vec![Some(Ok(logged_in_json("alice")))]);
        let (mut session, mut events) = GameSession::start(transport, GameSessionConfig::new());
        let _ = events.recv().await; // Connected
        let _ = events.recv().await; // LoggedIn

        let err = session
            .make_turn(TurnPayload::new(serde_json::json!({"cell": 0})))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Precondition(PreconditionError::NotInMatch)
        ));

        session.shutdown().await;
    }

    #[tokio::test]
    async fn request_match_requires_roster_membership() {
        let (transport, _sent, _closed) =
            MockTransport::new(vec![Some(Ok(logged_in_json("alice")))]);
        let (mut session, mut events) = GameSession::start(transport, GameSessionConfig::new());
        let _ = events.recv().await; // Connected
        let _ = events.recv().await; // LoggedIn

        let err = session.request_match(User::new("ghost")).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Precondition(PreconditionError::NotInRoster { .. })
        ));

        session.shutdown().await;
    }

    #[tokio::test]
    async fn disconnect_keeps_last_valid_state() {
        let (transport, _sent, _closed) = MockTransport::new(vec![
            Some(Ok(logged_in_json("alice"))),
            Some(Ok(start_match_json("bob"))),
            // Clean transport close mid-match.
            None,
        ]);
        let (mut session, mut events) = GameSession::start(transport, GameSessionConfig::new());

        let _ = events.recv().await; // Connected
        let _ = events.recv().await; // LoggedIn
        let _ = events.recv().await; // MatchStarted
        let ev = events.recv().await.unwrap(); // Disconnected
        assert!(matches!(ev, SessionEvent::Disconnected { .. }));

        assert!(!session.is_connected());
        // The aggregate is frozen, not reset.
        assert_eq!(session.screen(), Screen::Match);
        assert!(session.logged_in());

        // Network commands now fail...
        let err = session.login("alice").await.unwrap_err();
        assert!(matches!(err, SessionError::NotConnected));
        // ...but the local-only mode command still works.
        session.set_mode("retro").await;
        assert_eq!(session.snapshot().mode(), "retro");

        session.shutdown().await;
    }

    #[tokio::test]
    async fn hydrated_session_queues_relogin_first() {
        let mut restored = SessionState::new();
        restored.confirm_login(User::new("alice"));

        let (transport, sent, _closed) = MockTransport::new(vec![]);
        let (mut session, mut events) =
            GameSession::start_with_state(transport, GameSessionConfig::new(), restored);

        let _ = events.recv().await; // Connected
        tokio::time::sleep(Duration::from_millis(50)).await;

        {
            let messages = sent.lock().unwrap();
            assert!(!messages.is_empty());
            let first: ClientEvent = serde_json::from_str(&messages[0]).unwrap();
            assert_eq!(
                first,
                ClientEvent::Login {
                    username: "alice".into()
                }
            );
        }
        // The restored snapshot is already visible.
        assert!(session.logged_in());

        session.shutdown().await;
    }

    #[tokio::test]
    async fn watch_subscribers_see_committed_snapshots() {
        let (transport, _sent, _closed) =
            MockTransport::new(vec![Some(Ok(logged_in_json("alice")))]);
        let (mut session, mut events) = GameSession::start(transport, GameSessionConfig::new());
        let mut changes = session.state_changes();

        let _ = events.recv().await; // Connected
        let _ = events.recv().await; // LoggedIn

        changes.changed().await.unwrap();
        assert!(changes.borrow().logged_in());

        session.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_emits_disconnected_and_closes_transport() {
        let (transport, _sent, closed) = MockTransport::new(vec![]);
        let (mut session, mut events) = GameSession::start(transport, GameSessionConfig::new());
        let _ = events.recv().await; // Connected

        session.shutdown().await;

        let event = events.recv().await.unwrap();
        assert!(matches!(event, SessionEvent::Disconnected { .. }));
        if let SessionEvent::Disconnected { reason } = event {
            assert_eq!(reason.as_deref(), Some("session shut down"));
        }
        assert!(closed.load(Ordering::Relaxed));
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn double_shutdown_does_not_panic() {
        let (transport, _sent, _closed) = MockTransport::new(vec![]);
        let (mut session, mut events) = GameSession::start(transport, GameSessionConfig::new());
        let _ = events.recv().await; // Connected

        session.shutdown().await;
        session.shutdown().await; // should not panic
    }

    #[tokio::test]
    async fn drop_without_explicit_shutdown() {
        let (transport, _sent, _closed) = MockTransport::new(vec![]);
        let (session, mut events) = GameSession::start(transport, GameSessionConfig::new());
        let _ = events.recv().await; // Connected

        drop(session);

        // The transport loop should eventually exit and close the channel.
        // We just verify we don't hang or panic.
        while let Some(_event) = events.recv().await {}
    }

    #[tokio::test]
    async fn config_defaults_and_builders() {
        let config = GameSessionConfig::new();
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));

        let config = GameSessionConfig::new()
            .with_event_channel_capacity(512)
            .with_shutdown_timeout(Duration::from_secs(5));
        assert_eq!(config.event_channel_capacity, 512);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));

        // Capacity is clamped, never zero.
        let config = GameSessionConfig::new().with_event_channel_capacity(0);
        assert_eq!(config.event_channel_capacity, 1);
    }

    #[tokio::test]
    async fn event_channel_backpressure_does_not_block_transitions() {
        // More inbound events than the channel can hold. Notifications may
        // drop, but every transition must still apply.
        let mut incoming: Vec<Option<std::result::Result<String, SessionError>>> = Vec::new();
        incoming.push(Some(Ok(logged_in_json("alice"))));
        for i in 0..20 {
            incoming.push(Some(Ok(serde_json::to_string(&ServerEvent::Players {
                users: vec![User::new(format!("p{i}"))],
            })
            .unwrap())));
        }
        incoming.push(Some(Ok(start_match_json("p19"))));
        incoming.push(None);

        let (transport, _sent, _closed) = MockTransport::new(incoming);
        let config = GameSessionConfig::new().with_event_channel_capacity(1);
        let (mut session, mut events) = GameSession::start(transport, config);

        // Let the loop run while nobody drains the channel.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut count = 0;
        while let Some(_event) = events.recv().await {
            count += 1;
        }
        // Connected arrives, Disconnected always arrives; the middle may drop.
        assert!(count >= 2, "expected at least 2 events, got {count}");
        assert!(count < 23, "expected backpressure to drop some events");

        // The state saw everything regardless.
        let state = session.snapshot();
        assert_eq!(state.users(), &[User::new("p19")]);
        assert_eq!(state.screen(), Screen::Match);

        session.shutdown().await;
    }

    #[tokio::test]
    async fn malformed_server_event_is_skipped() {
        let (transport, _sent, _closed) = MockTransport::new(vec![
            Some(Ok("{not json".into())),
            Some(Ok(r#"{"type":"unknownEvent","data":{}}"#.into())),
            Some(Ok(logged_in_json("alice"))),
        ]);
        let (mut session, mut events) = GameSession::start(transport, GameSessionConfig::new());

        let _ = events.recv().await; // Connected
        let ev = events.recv().await.unwrap();
        assert!(matches!(ev, SessionEvent::LoggedIn { .. }));

        session.shutdown().await;
    }

    #[tokio::test]
    async fn transport_recv_error_emits_disconnected() {
        let (transport, _sent, _closed) = MockTransport::new(vec![Some(Err(
            SessionError::TransportReceive("boom".into()),
        ))]);
        let (mut session, mut events) = GameSession::start(transport, GameSessionConfig::new());

        let _ = events.recv().await; // Connected
        let event = events.recv().await.unwrap();
        if let SessionEvent::Disconnected { reason } = event {
            assert!(reason.unwrap().contains("boom"));
        } else {
            panic!("expected Disconnected, got {event:?}");
        }

        session.shutdown().await;
    }

    #[tokio::test]
    async fn debug_impl_for_session() {
        let (transport, _sent, _closed) = MockTransport::new(vec![]);
        let (mut session, mut events) = GameSession::start(transport, GameSessionConfig::new());
        let _ = events.recv().await; // Connected

        let debug_str = format!("{session:?}");
        assert!(debug_str.contains("GameSession"));
        assert!(debug_str.contains("connected"));

        session.shutdown().await;
    }

    /// Transport that hangs forever in `close()` so shutdown timeout/abort
    /// can be tested.
    struct HangingCloseTransport {
        close_called: Arc<AtomicBool>,
        dropped: Arc<AtomicBool>,
    }

    impl HangingCloseTransport {
        fn new() -> (Self, Arc<AtomicBool>, Arc<AtomicBool>) {
            let close_called = Arc::new(AtomicBool::new(false));
            let dropped = Arc::new(AtomicBool::new(false));
            (
                Self {
                    close_called: Arc::clone(&close_called),
                    dropped: Arc::clone(&dropped),
                },
                close_called,
                dropped,
            )
        }
    }

    impl Drop for HangingCloseTransport {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::Release);
        }
    }

    #[async_trait]
    impl Transport for HangingCloseTransport {
        async fn send(&mut self, _message: String) -> std::result::Result<(), SessionError> {
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, SessionError>> {
            std::future::pending().await
        }

        async fn close(&mut self) -> std::result::Result<(), SessionError> {
            self.close_called.store(true, Ordering::Release);
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn shutdown_timeout_aborts_stuck_transport_task() {
        let (transport, close_called, dropped) = HangingCloseTransport::new();
        let config = GameSessionConfig::new().with_shutdown_timeout(Duration::from_millis(20));
        let (mut session, mut events) = GameSession::start(transport, config);

        // Drain Connected so the channel remains uncongested.
        let event = events.recv().await.unwrap();
        assert!(matches!(event, SessionEvent::Connected));

        session.shutdown().await;

        assert!(
            close_called.load(Ordering::Acquire),
            "transport.close() should have been attempted during graceful shutdown"
        );
        assert!(
            dropped.load(Ordering::Acquire),
            "timed-out shutdown should abort and drop the transport loop task"
        );
        assert!(!session.is_connected());
    }
}
