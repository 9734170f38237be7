//! Bastion Storage - SQLite persistence layer.
//!
//! This crate provides the durable collaborators of the filter orchestrator:
//!
//! - Key-value filter/group state ([`Database`] implements `StateStore`)
//! - User settings in the `config` table ([`StoredSettings`])
//! - Custom filter records with `removed` tombstones
//! - Downloaded rule bodies, stored verbatim
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bastion_core::FilterStateStore;
//! use bastion_storage::{Database, StoredSettings};
//!
//! let db = Database::in_memory().unwrap();
//! let state = FilterStateStore::new(Arc::new(db.clone()));
//! let settings = StoredSettings::new(db);
//! settings.set_update_period_hours(12).unwrap();
//! # let _ = state;
//! ```

mod database;
pub mod error;
pub mod models;
mod pool;
pub mod repository;
mod schema;
pub mod settings;

pub use database::Database;
pub use error::{Result, StorageError};
pub use models::{Config, FilterRules, NewCustomFilter, StateEntry, StoredCustomFilter};
pub use pool::ConnectionPool;
pub use repository::checksum;
pub use settings::StoredSettings;
