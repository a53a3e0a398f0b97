//! Moving identity artifacts between pod and backup directory.
//!
//! The [`FileTransfer`] trait is the seam the orchestrator talks to;
//! [`ScpGateway`] implements it with the OpenSSH client.

mod artifacts;
mod gateway;
mod keys;
mod scp;

pub use artifacts::IdentityArtifact;
#[cfg(test)]
pub use gateway::MockFileTransfer;
pub use gateway::FileTransfer;
pub use keys::{KeyType, ensure_key_pair, public_key_path};
pub use scp::{ScpGateway, sh_quote};
