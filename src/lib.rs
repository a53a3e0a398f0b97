// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Halldyll Pod Keeper
//!
//! Keeps one `RunPod` GPU node alive across stop, start and replacement of
//! the pod it runs on.
//!
//! ## Overview
//!
//! The node's identity (its swarm key and login files) lives on the pod's
//! disk. Podkeeper pulls those files into a local backup directory before
//! the pod goes away and pushes them back once a pod is reachable again, so
//! the node restarts as the same peer.
//!
//! - Create a pod, falling back through a GPU preference list
//! - Start, stop and terminate the managed pod idempotently
//! - Wait for the pod's SSH port and verify it before any transfer
//! - Back up and restore identity artifacts with checksummed manifests
//! - Keep a small local record of the managed pod and its history
//!
//! ## Modules
//!
//! - [`config`]: Settings file, `.env` and environment overrides
//! - [`state`]: Pod record, lock file and backup manifest
//! - [`runpod`]: `RunPod` GraphQL client and provisioning
//! - [`probe`]: TCP reachability probing
//! - [`transfer`]: `scp`/`ssh` gateway and key management
//! - [`orchestrator`]: Lifecycle operations composed from the above
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! pod:
//!   name: gensyn-node
//!   gpu_preference:
//!     - "NVIDIA GeForce RTX 4090"
//!     - "NVIDIA L4"
//!   disk_size_gb: 50
//!   volume_size_gb: 50
//!
//! backup:
//!   dir: ~/.podkeeper/backup
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod probe;
pub mod runpod;
pub mod state;
pub mod transfer;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, KeeperSettings};
pub use error::{KeeperError, Result};
pub use orchestrator::{CreateOptions, OperationReport, Orchestrator, StatusReport};
pub use probe::ReachabilityProber;
pub use runpod::{PodApi, PodProvisioner, RunPodClient};
pub use state::{LocalRecordStore, PodRecord, RecordStore};
pub use transfer::{FileTransfer, ScpGateway};
