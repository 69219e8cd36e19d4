//! Session persistence across process restarts.
//!
//! The session core stays ignorant of storage: it only publishes committed
//! [`SessionState`] snapshots on its `watch` channel. Persistence is one
//! subscriber among possibly several — [`spawn_persistence`] serializes the
//! full aggregate on every change and hands the opaque blob to a
//! [`SnapshotStore`]. On the next start, [`load_session`] restores the last
//! snapshot, giving session continuity across a reload. The session works
//! fine without any store attached, just without continuity.
//!
//! Snapshots carry a schema version so a build can refuse blobs written by
//! an incompatible layout instead of misreading them.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{Result, SessionError};
use crate::state::SessionState;

/// Schema version written into every snapshot. Bump on any breaking change
/// to [`SessionState`]'s serialized layout.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Versioned wrapper around the serialized aggregate.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    state: SessionState,
}

/// Serialize a [`SessionState`] into a versioned snapshot blob.
///
/// # Errors
///
/// Returns [`SessionError::Serialization`] if encoding fails.
pub fn encode_snapshot(state: &SessionState) -> Result<String> {
    let snapshot = Snapshot {
        version: SNAPSHOT_VERSION,
        state: state.clone(),
    };
    Ok(serde_json::to_string(&snapshot)?)
}

/// Deserialize a snapshot blob back into a [`SessionState`].
///
/// # Errors
///
/// Returns [`SessionError::SnapshotVersion`] if the blob was written by a
/// different schema version, or [`SessionError::Serialization`] if it does
/// not parse.
pub fn decode_snapshot(blob: &str) -> Result<SessionState> {
    let snapshot: Snapshot = serde_json::from_str(blob)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(SessionError::SnapshotVersion {
            found: snapshot.version,
            expected: SNAPSHOT_VERSION,
        });
    }
    Ok(snapshot.state)
}

// ── Store trait ─────────────────────────────────────────────────────

/// A durable home for the opaque snapshot blob.
///
/// Object-safe so stores can be swapped behind `Arc<dyn SnapshotStore>`.
/// The store never interprets the blob.
#[async_trait]
pub trait SnapshotStore: Send + Sync + 'static {
    /// Persist the blob, replacing any previous one.
    async fn save(&self, blob: String) -> Result<()>;

    /// Load the last persisted blob, or `None` if nothing was saved yet.
    async fn load(&self) -> Result<Option<String>>;
}

#[async_trait]
impl<T: SnapshotStore + ?Sized> SnapshotStore for std::sync::Arc<T> {
    async fn save(&self, blob: String) -> Result<()> {
        (**self).save(blob).await
    }

    async fn load(&self) -> Result<Option<String>> {
        (**self).load().await
    }
}

/// A [`SnapshotStore`] backed by a single file.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    /// Create a store writing to `path`. Parent directories must exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, blob: String) -> Result<()> {
        tokio::fs::write(&self.path, blob).await?;
        Ok(())
    }

    async fn load(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

// ── Wiring ──────────────────────────────────────────────────────────

/// Restore the initial [`SessionState`] from `store`, if a usable snapshot
/// exists.
///
/// An unreadable or version-incompatible snapshot is reported as an error;
/// callers typically log it and fall back to [`SessionState::new`].
///
/// # Errors
///
/// Propagates store I/O errors and snapshot decoding errors.
pub async fn load_session(store: &dyn SnapshotStore) -> Result<Option<SessionState>> {
    match store.load().await? {
        Some(blob) => Ok(Some(decode_snapshot(&blob)?)),
        None => Ok(None),
    }
}

/// Spawn a task that persists every committed state change to `store`.
///
/// Runs until the session's watch channel closes (session dropped). Save
/// failures are logged and skipped; persistence never feeds back into the
/// session core.
pub fn spawn_persistence(
    store: impl SnapshotStore,
    mut changes: watch::Receiver<SessionState>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        debug!("persistence task started");
        while changes.changed().await.is_ok() {
            let state = changes.borrow_and_update().clone();
            match encode_snapshot(&state) {
                Ok(blob) => {
                    if let Err(e) = store.save(blob).await {
                        warn!("failed to persist session snapshot: {e}");
                    }
                }
                Err(e) => warn!("failed to encode session snapshot: {e}"),
            }
        }
        debug!("persistence task exited");
    })
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
    use crate::protocol::{MatchOutcome, TurnPayload, User};

    fn reachable_states() -> Vec<SessionState> {
        let fresh = SessionState::new();

        let mut rejected = SessionState::new();
        rejected.reject_login();

        let mut idle = SessionState::new();
        idle.confirm_login(User::new("alice"));
        idle.replace_roster(vec![User::new("bob"), User::new("carol")]);
        idle.set_mode("retro");

        let mut pending = idle.clone();
        pending.record_match_request(User::new("bob"));

        let mut in_match = pending.clone();
        in_match.start_match(User::new("bob"));
        in_match.record_turn(TurnPayload::new(serde_json::json!({"cell": 4})));

        let mut finished = in_match.clone();
        finished.finish_match(MatchOutcome::won_by("alice"));

        vec![fresh, rejected, idle, pending, in_match, finished]
    }

    #[test]
    fn snapshot_round_trips_every_reachable_state() {
        for state in reachable_states() {
            let blob = encode_snapshot(&state).unwrap();
            let restored = decode_snapshot(&blob).unwrap();
            assert_eq!(restored, state);
        }
    }

    #[test]
    fn snapshot_version_mismatch_is_rejected() {
        let blob = encode_snapshot(&SessionState::new()).unwrap();
        let tampered = blob.replacen("\"version\":1", "\"version\":999", 1);

        let err = decode_snapshot(&tampered).unwrap_err();
        assert!(matches!(
            err,
            SessionError::SnapshotVersion {
                found: 999,
                expected: SNAPSHOT_VERSION
            }
        ));
    }

    #[test]
    fn garbage_blob_is_a_serialization_error() {
        let err = decode_snapshot("not a snapshot").unwrap_err();
        assert!(matches!(err, SessionError::Serialization(_)));
    }

    #[tokio::test]
    async fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("session.json"));

        assert!(store.load().await.unwrap().is_none());
        assert!(load_session(&store).await.unwrap().is_none());

        let mut state = SessionState::new();
        state.confirm_login(User::new("alice"));
        store.save(encode_snapshot(&state).unwrap()).await.unwrap();

        let restored = load_session(&store).await.unwrap().unwrap();
        assert_eq!(restored, state);
    }

    #[tokio::test]
    async fn persistence_task_saves_on_every_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let store = FileSnapshotStore::new(&path);

        let (tx, rx) = watch::channel(SessionState::new());
        let task = spawn_persistence(store.clone(), rx);

        let mut state = SessionState::new();
        state.confirm_login(User::new("alice"));
        tx.send_replace(state.clone());

        // Give the task a moment to write.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let restored = load_session(&store).await.unwrap().unwrap();
        assert_eq!(restored, state);

        drop(tx);
        task.await.unwrap();
    }
}
