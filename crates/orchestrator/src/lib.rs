//! `bbr-orchestrator` -- drives backup and restore of a deployment:
//! discovery and pre-flight validation, locking, the guarded operation on
//! every instance, artifact collection, cleanup and cancellation.

pub mod archive;
pub mod artifact_dir;
pub mod cancellation;
pub mod collector;
pub mod config;
pub mod deployment;
pub mod error;
pub mod executor;
pub mod locator;
pub mod lock;
pub mod orchestrator;
pub mod runner;

pub use cancellation::{CancellationController, Checkpoint, LogSink};
pub use config::OrchestratorConfig;
pub use error::OrchestratorError;
pub use orchestrator::{BackupOptions, BackupOutcome, Orchestrator, RestoreOptions};
