use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::models::ride::RideSnapshot;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("ride store io failed: {0}")]
    Io(#[from] io::Error),

    #[error("ride store contents are not valid: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Where the lifecycle keeps its last known state between sessions.
/// Last write wins; callers log failures and carry on.
pub trait RideStore: Send + Sync {
    fn save(&self, snapshot: &RideSnapshot) -> Result<(), PersistenceError>;
    fn load(&self) -> Result<Option<RideSnapshot>, PersistenceError>;
}

#[derive(Default)]
pub struct MemoryRideStore {
    snapshot: Mutex<Option<RideSnapshot>>,
}

impl MemoryRideStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: RideSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
        }
    }
}

impl RideStore for MemoryRideStore {
    fn save(&self, snapshot: &RideSnapshot) -> Result<(), PersistenceError> {
        let mut slot = self
            .snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(snapshot.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<RideSnapshot>, PersistenceError> {
        let slot = self
            .snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(slot.clone())
    }
}

/// Keeps the snapshot as a single JSON document on disk.
pub struct JsonFileRideStore {
    path: PathBuf,
}

impl JsonFileRideStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RideStore for JsonFileRideStore {
    fn save(&self, snapshot: &RideSnapshot) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let body = serde_json::to_vec_pretty(snapshot)?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, body)?;
        fs::rename(&staging, &self.path)?;

        debug!(path = %self.path.display(), "ride snapshot written");
        Ok(())
    }

    fn load(&self) -> Result<Option<RideSnapshot>, PersistenceError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

enum WriteRequest {
    Save(RideSnapshot),
    Flush(oneshot::Sender<()>),
}

/// Hands snapshots to a background task that writes them one at a time, in
/// the order they were taken, on the blocking pool. Callers never wait on the
/// store.
pub struct SnapshotWriter {
    tx: mpsc::UnboundedSender<WriteRequest>,
}

impl SnapshotWriter {
    /// Must be called from inside a tokio runtime.
    pub fn spawn(store: Arc<dyn RideStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                match request {
                    WriteRequest::Save(snapshot) => {
                        let store = store.clone();
                        match tokio::task::spawn_blocking(move || store.save(&snapshot)).await {
                            Ok(Ok(())) => {}
                            Ok(Err(err)) => {
                                warn!(error = %err, "ride snapshot write failed; keeping in-memory state")
                            }
                            Err(err) => warn!(error = %err, "ride snapshot write panicked"),
                        }
                    }
                    WriteRequest::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("ride snapshot writer stopped");
        });

        Self { tx }
    }

    pub fn save(&self, snapshot: RideSnapshot) {
        if self.tx.send(WriteRequest::Save(snapshot)).is_err() {
            warn!("ride snapshot writer is gone; snapshot dropped");
        }
    }

    /// Resolves once every snapshot queued before the call has been written
    /// (or has failed).
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(WriteRequest::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::{JsonFileRideStore, MemoryRideStore, PersistenceError, RideStore, SnapshotWriter};
    use crate::models::ride::RideSnapshot;

    #[derive(Default)]
    struct CountingStore {
        saves: AtomicUsize,
        fail: bool,
    }

    impl RideStore for CountingStore {
        fn save(&self, _snapshot: &RideSnapshot) -> Result<(), PersistenceError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(PersistenceError::Io(std::io::Error::other("read-only")));
            }
            Ok(())
        }

        fn load(&self) -> Result<Option<RideSnapshot>, PersistenceError> {
            Ok(None)
        }
    }

    #[test]
    fn memory_store_starts_empty_and_keeps_last_write() {
        let store = MemoryRideStore::new();
        assert!(store.load().unwrap().is_none());

        store.save(&RideSnapshot::default()).unwrap();
        assert_eq!(store.load().unwrap(), Some(RideSnapshot::default()));
    }

    #[test]
    fn file_store_missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileRideStore::new(dir.path().join("rides.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn file_store_writes_into_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileRideStore::new(dir.path().join("state").join("rides.json"));

        store.save(&RideSnapshot::default()).unwrap();
        assert_eq!(store.load().unwrap(), Some(RideSnapshot::default()));
    }

    #[test]
    fn corrupt_file_is_a_serde_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rides.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let err = JsonFileRideStore::new(path).load().unwrap_err();
        assert!(matches!(err, PersistenceError::Serde(_)));
    }

    #[tokio::test]
    async fn writer_flush_waits_for_queued_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rides.json");
        let writer = SnapshotWriter::spawn(Arc::new(JsonFileRideStore::new(path.clone())));

        writer.save(RideSnapshot::default());
        writer.flush().await;

        let stored = JsonFileRideStore::new(path).load().unwrap();
        assert_eq!(stored, Some(RideSnapshot::default()));
    }

    #[tokio::test]
    async fn writer_keeps_going_after_a_failed_write() {
        let store = Arc::new(CountingStore {
            fail: true,
            ..CountingStore::default()
        });
        let writer = SnapshotWriter::spawn(store.clone());

        for _ in 0..3 {
            writer.save(RideSnapshot::default());
        }
        writer.flush().await;

        assert_eq!(store.saves.load(Ordering::SeqCst), 3);
    }
}
