//! Record store trait definition.

use async_trait::async_trait;

use super::lock::LockInfo;
use super::types::PodRecord;
use crate::error::Result;

/// Storage for the pod record and its lock.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Loads the record, or an empty one if none was saved yet.
    async fn load(&self) -> Result<PodRecord>;

    /// Saves the record atomically.
    async fn save(&self, record: &PodRecord) -> Result<()>;

    /// Acquires the record lock.
    ///
    /// Fails with `LockedByOther` while an unexpired lock exists.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Releases the lock if `lock_id` still owns it.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Gets current lock information, expired or not.
    async fn lock_info(&self) -> Result<Option<LockInfo>>;

    /// Removes the lock regardless of its holder.
    async fn force_unlock(&self) -> Result<()>;

    /// Human-readable location of the record.
    fn location(&self) -> String;
}
