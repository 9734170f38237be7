//! Bastion Remote - access to the filter metadata service.
//!
//! - [`HttpMetadataClient`]: metadata documents, per-filter rule bodies and
//!   the local metadata snapshot
//! - [`CustomFilterService`]: downloads of user-subscribed lists, header
//!   parsing and change detection, backed by `bastion-storage`

pub mod client;
pub mod custom;
pub mod error;

#[cfg(test)]
mod test_server;

pub use client::{split_rules, HttpMetadataClient, RemoteConfig};
pub use custom::{parse_expires, CustomFilterService, ListHeader};
pub use error::{RemoteError, Result};
