//! `bbr-remote` -- collaborators the orchestrator talks through: the
//! Director (instance inventory, manifests) and per-instance remote
//! sessions.

pub mod director;
pub mod session;
pub mod ssh;
pub mod subprocess;
