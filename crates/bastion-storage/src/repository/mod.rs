//! Database repositories for each table.

pub mod config;
pub mod custom_filters;
pub mod rules;
pub mod state;

pub use config::ConfigRepo;
pub use custom_filters::CustomFiltersRepo;
pub use rules::{checksum, RulesRepo};
pub use state::StateRepo;
