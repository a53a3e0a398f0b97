//! Persistence for the pod record.
//!
//! The record identifies the single managed pod and its last verified SSH
//! coordinates. It is guarded by an advisory lock file while an operation
//! changes it. The backup manifest lives here too since it shares the
//! atomic write path.

mod local;
mod lock;
mod manifest;
mod store;
mod types;

pub use local::{LocalRecordStore, write_atomic};
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use manifest::{ArtifactDigest, BackupManifest, MANIFEST_FILE};
pub use store::RecordStore;
pub use types::{
    HistoryEntry, MAX_HISTORY, OperationKind, PodPhase, PodRecord, RECORD_VERSION, SshEndpoint,
};
