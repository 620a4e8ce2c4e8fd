//! Snapshot persistence for out-of-process polling.
//!
//! Stores hand back snapshots with their time fields recomputed for the
//! moment of loading, so a poller needs no live estimator. Entries whose last
//! update is older than the retention window are treated as absent.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::snapshot::ProgressSnapshot;
use crate::context::{Clock, SystemClock};
use crate::error::{CoordinationError, CoordinationResult};

/// Default retention window: 24 hours.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Persistence for progress snapshots, keyed by run id.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Insert or replace the snapshot for its run id.
    async fn save(&self, snapshot: &ProgressSnapshot) -> CoordinationResult<()>;

    /// Snapshot for `run_id`, recomputed for now. `None` when absent or expired.
    async fn load(&self, run_id: &str) -> CoordinationResult<Option<ProgressSnapshot>>;

    /// Remove a run. Returns whether it existed.
    async fn delete(&self, run_id: &str) -> CoordinationResult<bool>;

    /// Remove every expired entry. Returns how many were removed.
    async fn purge_expired(&self) -> CoordinationResult<usize>;
}

fn is_expired(snapshot: &ProgressSnapshot, now: DateTime<Utc>, retention: Duration) -> bool {
    match now.signed_duration_since(snapshot.updated_at).to_std() {
        Ok(age) => age > retention,
        // Updated in the future relative to this clock.
        Err(_) => false,
    }
}

/// In-process store.
#[derive(Debug)]
pub struct MemoryProgressStore {
    entries: RwLock<HashMap<String, ProgressSnapshot>>,
    retention: Duration,
    clock: Arc<dyn Clock>,
}

impl MemoryProgressStore {
    pub fn new(retention: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            retention,
            clock,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for MemoryProgressStore {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION, Arc::new(SystemClock))
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn save(&self, snapshot: &ProgressSnapshot) -> CoordinationResult<()> {
        self.entries
            .write()
            .await
            .insert(snapshot.run_id.clone(), snapshot.clone());
        debug!(run_id = %snapshot.run_id, percent = snapshot.percent, "Snapshot saved");
        Ok(())
    }

    async fn load(&self, run_id: &str) -> CoordinationResult<Option<ProgressSnapshot>> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(run_id)
            .filter(|s| !is_expired(s, now, self.retention))
            .map(|s| s.recomputed(now)))
    }

    async fn delete(&self, run_id: &str) -> CoordinationResult<bool> {
        Ok(self.entries.write().await.remove(run_id).is_some())
    }

    async fn purge_expired(&self) -> CoordinationResult<usize> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, s| !is_expired(s, now, self.retention));
        let purged = before - entries.len();
        if purged > 0 {
            debug!(purged, "Expired snapshots purged");
        }
        Ok(purged)
    }
}

/// One JSON document per run under a directory.
#[derive(Debug)]
pub struct FileProgressStore {
    dir: PathBuf,
    retention: Duration,
    clock: Arc<dyn Clock>,
}

impl FileProgressStore {
    pub fn new(dir: impl Into<PathBuf>, retention: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            dir: dir.into(),
            retention,
            clock,
        }
    }

    /// Store under `dir` with the default retention and the system clock.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir, DEFAULT_RETENTION, Arc::new(SystemClock))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, run_id: &str) -> CoordinationResult<PathBuf> {
        if run_id.is_empty()
            || run_id.contains(['/', '\\'])
            || run_id.contains("..")
        {
            return Err(CoordinationError::store(format!(
                "invalid run id '{}'",
                run_id
            )));
        }
        Ok(self.dir.join(format!("{}.json", run_id)))
    }

    async fn read(&self, path: &Path) -> CoordinationResult<Option<ProgressSnapshot>> {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => Ok(Some(ProgressSnapshot::from_json(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ProgressStore for FileProgressStore {
    async fn save(&self, snapshot: &ProgressSnapshot) -> CoordinationResult<()> {
        let path = self.path_for(&snapshot.run_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        // Write then rename so pollers never read a half-written file.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, snapshot.to_json()?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(run_id = %snapshot.run_id, path = %path.display(), "Snapshot saved");
        Ok(())
    }

    async fn load(&self, run_id: &str) -> CoordinationResult<Option<ProgressSnapshot>> {
        let path = self.path_for(run_id)?;
        let now = self.clock.now();
        let snapshot = self.read(&path).await?;
        Ok(snapshot
            .filter(|s| {
                let expired = is_expired(s, now, self.retention);
                if expired {
                    debug!(run_id, "Snapshot expired");
                }
                !expired
            })
            .map(|s| s.recomputed(now)))
    }

    async fn delete(&self, run_id: &str) -> CoordinationResult<bool> {
        let path = self.path_for(run_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn purge_expired(&self) -> CoordinationResult<usize> {
        let now = self.clock.now();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut purged = 0;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read(&path).await {
                Ok(Some(snapshot)) if is_expired(&snapshot, now, self.retention) => {
                    tokio::fs::remove_file(&path).await?;
                    purged += 1;
                }
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable snapshot"),
            }
        }
        if purged > 0 {
            debug!(purged, dir = %self.dir.display(), "Expired snapshots purged");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ManualClock;
    use crate::progress::snapshot::RunStatus;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).unwrap()
    }

    fn snapshot(run_id: &str) -> ProgressSnapshot {
        let mut s = ProgressSnapshot::new(run_id, Vec::new(), 600.0, t0());
        s.percent = 25.0;
        s
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip_recomputes() {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = MemoryProgressStore::new(DEFAULT_RETENTION, clock.clone());
        store.save(&snapshot("run-1")).await.unwrap();

        clock.advance(chrono::Duration::seconds(120));
        let loaded = store.load("run-1").await.unwrap().unwrap();
        assert_eq!(loaded.elapsed_secs, 120.0);
        assert_eq!(loaded.remaining_secs, 480.0);
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_retention() {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = MemoryProgressStore::new(Duration::from_secs(3600), clock.clone());
        store.save(&snapshot("old")).await.unwrap();

        clock.advance(chrono::Duration::minutes(30));
        let mut fresh = snapshot("fresh");
        fresh.updated_at = clock.now();
        store.save(&fresh).await.unwrap();

        clock.advance(chrono::Duration::minutes(45));
        assert!(store.load("old").await.unwrap().is_none());
        assert!(store.load("fresh").await.unwrap().is_some());
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.len().await, 1);
        assert!(store.delete("fresh").await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(t0()));
        let store = FileProgressStore::new(dir.path().join("progress"), DEFAULT_RETENTION, clock.clone());

        let mut s = snapshot("run-2");
        s.status = RunStatus::Completed;
        s.percent = 100.0;
        s.updated_at = t0() + chrono::Duration::seconds(300);
        store.save(&s).await.unwrap();
        assert!(dir.path().join("progress/run-2.json").exists());
        assert!(!dir.path().join("progress/run-2.json.tmp").exists());

        clock.advance(chrono::Duration::hours(2));
        let loaded = store.load("run-2").await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Completed);
        assert_eq!(loaded.elapsed_secs, 300.0);
        assert_eq!(loaded.estimated_total_secs, 300.0);

        assert!(store.delete("run-2").await.unwrap());
        assert!(!store.delete("run-2").await.unwrap());
        assert!(store.load("run-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_purges_expired() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(t0()));
        let store = FileProgressStore::new(dir.path(), Duration::from_secs(60), clock.clone());
        store.save(&snapshot("a")).await.unwrap();
        store.save(&snapshot("b")).await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        clock.advance(chrono::Duration::seconds(61));
        assert!(store.load("a").await.unwrap().is_none());
        assert_eq!(store.purge_expired().await.unwrap(), 2);
        assert!(dir.path().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_like_ids() {
        let dir = TempDir::new().unwrap();
        let store = FileProgressStore::open(dir.path());
        for id in ["", "../escape", "a/b", "a\\b"] {
            let err = store.load(id).await.unwrap_err();
            assert!(matches!(err, CoordinationError::Store { .. }), "{}", id);
        }
    }

    #[tokio::test]
    async fn test_purge_missing_dir_is_noop() {
        let dir = TempDir::new().unwrap();
        let store = FileProgressStore::open(dir.path().join("never-created"));
        assert_eq!(store.purge_expired().await.unwrap(), 0);
    }
}
