//! `bbr-core` -- pure domain model for deployment backup and restore.
//!
//! Nothing in this crate talks to the network or a remote host; every type
//! here can be built and checked in isolation.

pub mod error;
pub mod exit_code;
pub mod hashing;
pub mod instance;
pub mod job;
pub mod metadata;
pub mod naming;
pub mod run_result;
pub mod script;
