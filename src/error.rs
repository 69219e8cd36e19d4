//! Error types for the Matchwire session client.

use thiserror::Error;

/// Errors that can occur when using the Matchwire session client.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol message or snapshot.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted an operation that requires an active connection, but the
    /// session's transport loop has exited.
    #[error("not connected to server")]
    NotConnected,

    /// A command was invoked while the local state it requires is absent.
    ///
    /// Precondition failures are rejected synchronously, before any network
    /// effect (no outbound event is emitted).
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    /// A persisted snapshot was written by an incompatible schema version.
    #[error("snapshot schema version {found} (expected {expected})")]
    SnapshotVersion {
        /// Version found in the stored blob.
        found: u32,
        /// Version this build can read.
        expected: u32,
    },

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A command's local precondition was not met.
///
/// These never reach the wire: the command returns before emitting anything.
/// Server-side rejections (a taken username) are NOT errors; they arrive as
/// inbound events and surface through state flags instead.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreconditionError {
    /// `login` was called with an empty or whitespace-only username.
    #[error("username must not be empty")]
    EmptyUsername,

    /// The command requires an authenticated user and there is none.
    #[error("no user is logged in")]
    NotLoggedIn,

    /// `request_match` named an opponent that is not in the current roster.
    #[error("opponent {username:?} is not in the roster")]
    NotInRoster {
        /// The username that was requested.
        username: String,
    },

    /// `request_match` was called outside the idle screen.
    #[error("a match request is only valid from the idle screen")]
    NotIdle,

    /// `make_turn` was called while no match is active.
    #[error("no match is in progress")]
    NotInMatch,
}

/// A specialized [`Result`] type for Matchwire session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
