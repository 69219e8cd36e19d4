//! # Basic Session Example
//!
//! Demonstrates a complete Matchwire client lifecycle:
//!
//! 1. Connect to a game server via WebSocket
//! 2. Log in under a username
//! 3. Watch the roster and challenge the first player on it
//! 4. React to match events (turns, results)
//! 5. Shut down gracefully on Ctrl+C or disconnect
//!
//! ## Running
//!
//! ```sh
//! # Start a Matchwire server on localhost:8081, then:
//! cargo run --example basic_session
//!
//! # Override the server URL:
//! MATCHWIRE_URL=ws://my-server:8081 cargo run --example basic_session
//! ```

use matchwire_client::{
    GameSession, GameSessionConfig, SessionEvent, TurnPayload, WebSocketTransport,
};

/// Default server URL when `MATCHWIRE_URL` is not set.
const DEFAULT_URL: &str = "ws://localhost:8081";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Initialize tracing. Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let url = std::env::var("MATCHWIRE_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    tracing::info!("Connecting to {url}");

    // ── Connect ─────────────────────────────────────────────────────
    // Establish a WebSocket connection to the game server.
    let transport = WebSocketTransport::connect(&url).await?;

    // Start the session. This spawns a background task that drives the
    // transport and emits events on `event_rx`.
    let (mut session, mut event_rx) = GameSession::start(transport, GameSessionConfig::new());

    // ── Event loop ──────────────────────────────────────────────────
    // Use `tokio::select!` to listen for both server events and Ctrl+C.
    loop {
        tokio::select! {
            // Branch 1: Incoming event from the server (or transport layer).
            event = event_rx.recv() => {
                let Some(event) = event else {
                    // Channel closed, transport loop exited.
                    tracing::info!("Event channel closed, exiting");
                    break;
                };

                match event {
                    // ── Synthetic: transport connected ───────────────
                    SessionEvent::Connected => {
                        tracing::info!("Transport connected, logging in...");
                        session.login("RustPlayer").await?;
                    }

                    // ── Login lifecycle ──────────────────────────────
                    SessionEvent::LoggedIn { user } => {
                        tracing::info!("Logged in as {}", user.username);
                    }

                    SessionEvent::LoginRejected => {
                        tracing::error!("Username taken, pick another");
                        break;
                    }

                    SessionEvent::LoggedOut { user } => {
                        tracing::info!("Logged out: {}", user.username);
                        break;
                    }

                    // ── Lobby ────────────────────────────────────────
                    SessionEvent::RosterUpdated { users } => {
                        tracing::info!("{} other player(s) connected", users.len());

                        // Challenge the first player we see, once.
                        if let Some(opponent) = users.first() {
                            if session.snapshot().match_request().is_none() {
                                tracing::info!("Challenging {}", opponent.username);
                                session.request_match(opponent.clone()).await?;
                            }
                        }
                    }

                    // ── Match lifecycle ──────────────────────────────
                    SessionEvent::MatchStarted { opponent } => {
                        tracing::info!("Match started against {}", opponent.username);

                        // Open with a hard-coded first move.
                        session
                            .make_turn(TurnPayload::new(serde_json::json!({ "cell": 4 })))
                            .await?;
                    }

                    SessionEvent::TurnPlayed { turn } => {
                        tracing::info!("Opponent played: {}", turn.0);
                    }

                    SessionEvent::MatchEnded { outcome } => {
                        match outcome.winner {
                            Some(winner) => tracing::info!("Match over, {winner} won"),
                            None => tracing::info!("Match over, draw"),
                        }
                        // Back to the lobby for another round.
                        session.new_match().await?;
                    }

                    // ── Disconnect ───────────────────────────────────
                    SessionEvent::Disconnected { reason } => {
                        tracing::warn!("Disconnected: {}", reason.as_deref().unwrap_or("unknown"));
                        break;
                    }
                }
            }

            // Branch 2: Ctrl+C, shut down gracefully.
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down...");
                break;
            }
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────────
    session.shutdown().await;
    tracing::info!("Session shut down. Goodbye!");
    Ok(())
}
