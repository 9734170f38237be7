//! Bastion - filter subscription and update orchestrator.
//!
//! This crate wires the orchestrator to its concrete collaborators and
//! provides the flows used by the `bastion` binary:
//!
//! - [`App`]: opening the store, restoring state, first-run bootstrap,
//!   cleanup and the autoupdate daemon
//! - [`sink`]: persisting downloaded rule bodies published by the orchestrator
//! - [`paths`]: on-disk layout

pub mod app;
pub mod paths;
pub mod sink;

pub use app::{App, CleanupSummary};
pub use paths::AppPaths;
pub use sink::{SinkNotifier, SinkStats};
