//! Local file-based record store.
//!
//! `<dir>/pod.json` holds the record and `<dir>/pod.lock` the advisory lock.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{KeeperError, Result, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
use super::store::RecordStore;
use super::types::PodRecord;

/// Record file name.
const RECORD_FILE: &str = "pod.json";

/// Lock file name.
const LOCK_FILE: &str = "pod.lock";

/// Local file-based record store.
#[derive(Debug)]
pub struct LocalRecordStore {
    /// Directory holding record and lock.
    base_dir: PathBuf,
    /// Path to the record file.
    record_path: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
}

impl LocalRecordStore {
    /// Creates a store rooted at `base_dir`.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let record_path = base_dir.join(RECORD_FILE);
        let lock_path = base_dir.join(LOCK_FILE);

        Self {
            base_dir,
            record_path,
            lock_path,
        }
    }

    /// Path to the record file.
    #[must_use]
    pub fn record_path(&self) -> &Path {
        &self.record_path
    }

    async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.base_dir).await.map_err(|e| {
            KeeperError::State(StateError::write(format!(
                "Failed to create state directory {}: {e}",
                self.base_dir.display()
            )))
        })
    }

    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        let content = match fs::read_to_string(&self.lock_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(KeeperError::State(StateError::corrupted(format!(
                    "Failed to read lock file: {e}"
                ))));
            }
        };

        let lock_info: LockInfo = serde_json::from_str(&content).map_err(|e| {
            KeeperError::State(StateError::corrupted(format!("Failed to parse lock file: {e}")))
        })?;

        Ok(Some(lock_info))
    }

    /// Creates the lock file, failing if it already exists.
    async fn create_lock_file(&self, lock_info: &LockInfo) -> Result<bool> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(lock_info).map_err(|e| {
            KeeperError::State(StateError::serialization(format!("Failed to serialize lock: {e}")))
        })?;

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => {
                return Err(KeeperError::State(StateError::LockFailed {
                    message: format!("Failed to create lock file: {e}"),
                }));
            }
        };

        file.write_all(content.as_bytes()).await.map_err(|e| {
            KeeperError::State(StateError::LockFailed {
                message: format!("Failed to write lock file: {e}"),
            })
        })?;

        file.sync_all().await.map_err(|e| {
            KeeperError::State(StateError::LockFailed {
                message: format!("Failed to sync lock file: {e}"),
            })
        })?;

        Ok(true)
    }

    async fn delete_lock_file(&self) -> Result<()> {
        match fs::remove_file(&self.lock_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KeeperError::State(StateError::LockFailed {
                message: format!("Failed to delete lock file: {e}"),
            })),
        }
    }
}

#[async_trait]
impl RecordStore for LocalRecordStore {
    async fn load(&self) -> Result<PodRecord> {
        let content = match fs::read_to_string(&self.record_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Record file does not exist: {}", self.record_path.display());
                return Ok(PodRecord::new());
            }
            Err(e) => {
                return Err(KeeperError::State(StateError::corrupted(format!(
                    "Failed to read record file: {e}"
                ))));
            }
        };

        debug!("Loaded record from: {}", self.record_path.display());

        serde_json::from_str(&content).map_err(|e| {
            KeeperError::State(StateError::corrupted(format!(
                "Failed to parse record file {}: {e}",
                self.record_path.display()
            )))
        })
    }

    async fn save(&self, record: &PodRecord) -> Result<()> {
        self.ensure_dir().await?;

        let content = serde_json::to_vec_pretty(record).map_err(|e| {
            KeeperError::State(StateError::serialization(format!("Failed to serialize record: {e}")))
        })?;

        write_atomic(&self.record_path, &content).await?;
        debug!("Record saved to: {}", self.record_path.display());
        Ok(())
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };

        let lock_info = LockInfo::new(&holder_id);
        if self.create_lock_file(&lock_info).await? {
            debug!(
                "Acquired record lock: {} (expires in {}s)",
                lock_info.lock_id, LOCK_EXPIRY_SECS
            );
            return Ok(lock_info);
        }

        // An unreadable lock was left by a holder that died mid-write.
        let existing = match self.read_lock_file().await {
            Ok(existing) => existing,
            Err(e) => {
                warn!("Discarding unreadable lock file: {e}");
                None
            }
        };

        match existing {
            Some(existing) if !existing.is_expired() => {
                Err(KeeperError::State(StateError::LockedByOther {
                    holder: existing.holder,
                    since: existing.acquired_at.to_rfc3339(),
                }))
            }
            existing => {
                if let Some(stale) = existing {
                    warn!("Taking over expired lock held by {}", stale.holder);
                }
                self.delete_lock_file().await?;
                if self.create_lock_file(&lock_info).await? {
                    Ok(lock_info)
                } else {
                    Err(KeeperError::State(StateError::LockFailed {
                        message: String::from("Another process took the lock concurrently"),
                    }))
                }
            }
        }
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file().await? {
            if existing.lock_id == lock_id {
                self.delete_lock_file().await?;
                debug!("Released record lock: {lock_id}");
            } else {
                debug!("Lock ID mismatch: expected {lock_id}, found {}", existing.lock_id);
            }
        }
        Ok(())
    }

    async fn lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    async fn force_unlock(&self) -> Result<()> {
        info!("Removing record lock: {}", self.lock_path.display());
        self.delete_lock_file().await
    }

    fn location(&self) -> String {
        self.record_path.display().to_string()
    }
}

/// Writes `content` to a sibling temp file, syncs it, then renames it over `path`.
///
/// # Errors
///
/// Returns `WriteFailed` if any step fails; `path` is then left untouched.
pub async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let mut temp_name = path.file_name().map(std::ffi::OsStr::to_os_string).unwrap_or_default();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);

    let mut file = fs::File::create(&temp_path).await.map_err(|e| {
        KeeperError::State(StateError::write(format!(
            "Failed to create {}: {e}",
            temp_path.display()
        )))
    })?;

    file.write_all(content)
        .await
        .map_err(|e| KeeperError::State(StateError::write(format!("Failed to write: {e}"))))?;

    file.sync_all()
        .await
        .map_err(|e| KeeperError::State(StateError::write(format!("Failed to sync: {e}"))))?;

    fs::rename(&temp_path, path).await.map_err(|e| {
        KeeperError::State(StateError::write(format!(
            "Failed to rename into {}: {e}",
            path.display()
        )))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::types::{PodPhase, SshEndpoint};
    use tempfile::TempDir;

    fn create_test_store() -> (LocalRecordStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalRecordStore::with_base_dir(temp_dir.path().join("state"));
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, _temp) = create_test_store();

        let mut record = PodRecord::new();
        record.adopt_pod("pod-abc", "gensyn-node", "NVIDIA GeForce RTX 4090");
        record.set_verified_ssh(SshEndpoint::new("1.2.3.4", 40022, "root"));
        record.set_phase(PodPhase::Running);
        store.save(&record).await.expect("Failed to save record");

        let loaded = store.load().await.expect("Failed to load record");
        assert_eq!(loaded, record);
        assert!(!store.record_path().with_file_name("pod.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let (store, _temp) = create_test_store();
        let record = store.load().await.expect("Load should not fail");
        assert!(!record.is_managed());
    }

    #[tokio::test]
    async fn test_load_corrupted() {
        let (store, _temp) = create_test_store();
        std::fs::create_dir_all(store.record_path().parent().unwrap()).unwrap();
        std::fs::write(store.record_path(), "{ not json").unwrap();

        let err = store.load().await.unwrap_err();
        assert_eq!(err.kind(), "StateFailure");
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (store, _temp) = create_test_store();

        let lock = store.acquire_lock("test-holder").await.expect("Failed to acquire lock");
        assert!(store.lock_info().await.unwrap().is_some());

        store.release_lock(&lock.lock_id).await.expect("Failed to release lock");
        assert!(store.lock_info().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lock_conflict() {
        let (store, _temp) = create_test_store();

        let _lock1 = store.acquire_lock("holder-1").await.expect("Failed to acquire first lock");

        let result = store.acquire_lock("holder-2").await;
        assert!(matches!(
            result,
            Err(KeeperError::State(StateError::LockedByOther { ref holder, .. })) if holder == "holder-1"
        ));
    }

    #[tokio::test]
    async fn test_expired_lock_taken_over() {
        let (store, _temp) = create_test_store();
        std::fs::create_dir_all(&store.base_dir).unwrap();
        let stale = LockInfo::with_expiry("crashed", -60);
        std::fs::write(&store.lock_path, serde_json::to_string(&stale).unwrap()).unwrap();

        let lock = store.acquire_lock("fresh").await.expect("expired lock should be taken over");
        assert_eq!(lock.holder, "fresh");
    }

    #[tokio::test]
    async fn test_empty_lock_file_taken_over() {
        let (store, _temp) = create_test_store();
        std::fs::create_dir_all(&store.base_dir).unwrap();
        std::fs::write(&store.lock_path, "").unwrap();

        let lock = store.acquire_lock("fresh").await.expect("unreadable lock should be replaced");
        assert_eq!(store.lock_info().await.unwrap(), Some(lock.clone()));

        store.release_lock(&lock.lock_id).await.unwrap();
        assert!(store.lock_info().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_release_with_wrong_id_keeps_lock() {
        let (store, _temp) = create_test_store();
        let _lock = store.acquire_lock("holder").await.unwrap();
        store.release_lock("someone-else").await.unwrap();
        assert!(store.lock_info().await.unwrap().is_some());

        store.force_unlock().await.unwrap();
        assert!(store.lock_info().await.unwrap().is_none());
    }
}
