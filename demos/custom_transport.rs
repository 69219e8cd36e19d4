//! # Custom Transport Example
//!
//! Shows how to implement the [`Transport`] trait with a simple in-process
//! loopback channel. This is useful for:
//!
//! - **Testing**: unit-test your game flow without a real server
//! - **Custom backends**: adapt any I/O layer (TCP, QUIC, WebRTC data channels)
//!
//! ## Running
//!
//! ```sh
//! cargo run --example custom_transport
//! ```

use async_trait::async_trait;
use matchwire_client::{GameSession, GameSessionConfig, SessionError, SessionEvent, Transport};
use tokio::sync::mpsc;

// ─────────────────────────────────────────────────────────────────────
// Step 1: Define a channel-based "loopback" transport
// ─────────────────────────────────────────────────────────────────────

/// A loopback transport that shuttles messages through in-process channels.
///
/// This transport consists of two halves:
/// - The **client half** (`LoopbackTransport`) implements [`Transport`] and is
///   handed to `GameSession::start`.
/// - The **server half** (`LoopbackServer`) lets you inject responses and read
///   what the session sent, which is exactly what a test needs.
pub struct LoopbackTransport {
    /// Messages the session sends go here (server reads from the other end).
    tx: mpsc::UnboundedSender<String>,
    /// Messages the server sends arrive here (session reads them).
    rx: mpsc::UnboundedReceiver<String>,
}

/// The "server side" of the loopback. Use this to drive the conversation.
pub struct LoopbackServer {
    /// Read what the session sent.
    pub rx: mpsc::UnboundedReceiver<String>,
    /// Send messages to the session (as if they came from a server).
    pub tx: mpsc::UnboundedSender<String>,
}

/// Create a connected `(transport, server)` pair.
fn loopback_pair() -> (LoopbackTransport, LoopbackServer) {
    // Client → Server channel
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    // Server → Client channel
    let (server_tx, client_rx) = mpsc::unbounded_channel();

    let transport = LoopbackTransport {
        tx: client_tx,
        rx: client_rx,
    };
    let server = LoopbackServer {
        rx: server_rx,
        tx: server_tx,
    };

    (transport, server)
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: Implement the Transport trait
// ─────────────────────────────────────────────────────────────────────

#[async_trait]
impl Transport for LoopbackTransport {
    /// Send a JSON message to the "server" side of the loopback.
    async fn send(&mut self, message: String) -> Result<(), SessionError> {
        self.tx
            .send(message)
            .map_err(|e| SessionError::TransportSend(e.to_string()))
    }

    /// Receive the next message from the "server" side.
    ///
    /// Returns `None` when the server channel is closed. This is how the
    /// session discovers that the connection has ended.
    ///
    /// This method is **cancel-safe** because `mpsc::UnboundedReceiver::recv`
    /// is cancel-safe.
    async fn recv(&mut self) -> Option<Result<String, SessionError>> {
        self.rx.recv().await.map(Ok)
    }

    /// Close is a no-op for channels. Dropping is sufficient.
    async fn close(&mut self) -> Result<(), SessionError> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: Wire together the session and the fake server
// ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for readable output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Create the loopback pair.
    let (transport, mut server) = loopback_pair();

    // Start the session and log in through the loopback.
    let (mut session, mut event_rx) = GameSession::start(transport, GameSessionConfig::new());
    session.login("alice").await?;

    // ── Fake server: read the login event and confirm it ────────────
    let Some(login_msg) = server.rx.recv().await else {
        return Err("server channel closed before login was received".into());
    };
    tracing::info!("Server received: {login_msg}");

    // Respond with a userLoggedIn event (the JSON must match the server's
    // wire format: {"type": "eventName", "data": {…}}).
    let login_response = serde_json::json!({
        "type": "userLoggedIn",
        "data": {
            "user": { "username": "alice" }
        }
    });
    server.tx.send(login_response.to_string())?;

    // ── Read events from the session ────────────────────────────────
    // We expect Connected (synthetic) and then LoggedIn.
    let mut events_seen = 0;
    while let Some(event) = event_rx.recv().await {
        match &event {
            SessionEvent::Connected => {
                tracing::info!("Event: Connected (synthetic)");
            }
            SessionEvent::LoggedIn { user } => {
                tracing::info!("Event: LoggedIn as {}", user.username);
            }
            SessionEvent::Disconnected { reason } => {
                tracing::info!(
                    "Event: Disconnected, {}",
                    reason.as_deref().unwrap_or("clean")
                );
                break;
            }
            other => {
                tracing::info!("Event: {other:?}");
            }
        }

        events_seen += 1;
        // After seeing both events, shut down.
        if events_seen >= 2 {
            break;
        }
    }

    // ── Clean shutdown ──────────────────────────────────────────────
    session.shutdown().await;
    tracing::info!("Done, saw {events_seen} event(s). Custom transport works!");
    Ok(())
}
