//! # Matchwire Client
//!
//! Transport-agnostic Rust session layer for the Matchwire two-player
//! turn-based game protocol.
//!
//! The crate owns the client side of a game session: it authenticates a
//! player, tracks the roster of other connected players, negotiates match
//! invitations, relays turns, and surfaces the final result. A single
//! state aggregate ([`SessionState`]) reconciles locally-initiated commands
//! with asynchronously-arriving server events, so readers never observe an
//! inconsistent combination of fields.
//!
//! ## Features
//!
//! - **Transport-agnostic** — implement the [`Transport`] trait for any backend
//! - **Typed protocol** — inbound and outbound events are closed enums, not string keys
//! - **Structural invariants** — each screen carries only the fields valid for it
//! - **Event-driven** — receive typed [`SessionEvent`]s via a channel
//! - **Session continuity** — versioned snapshots survive a reload via [`persist`]
//! - **WebSocket built-in** — default `transport-websocket` feature provides `WebSocketTransport`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use matchwire_client::{GameSession, GameSessionConfig, SessionEvent, WebSocketTransport};
//!
//! let transport = WebSocketTransport::connect("ws://localhost:8081").await?;
//! let (session, mut events) = GameSession::start(transport, GameSessionConfig::new());
//!
//! session.login("alice").await?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SessionEvent::LoggedIn { user } => println!("hello, {}", user.username),
//!         SessionEvent::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

pub mod error;
pub mod event;
pub mod nav;
pub mod persist;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use error::{PreconditionError, SessionError};
pub use event::SessionEvent;
pub use persist::{FileSnapshotStore, SnapshotStore};
pub use protocol::{ClientEvent, MatchOutcome, MatchRequest, ServerEvent, TurnPayload, User};
pub use session::{GameSession, GameSessionConfig};
pub use state::{Screen, SessionState};
pub use transport::Transport;

#[cfg(feature = "transport-websocket")]
pub use transports::WebSocketTransport;
