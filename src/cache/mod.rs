//! Durable cache for offline support.
//!
//! Four logical tables live in one SQLite file:
//! - list pages keyed by full request URL
//! - items keyed by item URL
//! - the mutation queue, replayed in key order
//! - the application version that last wrote the store, used to purge stale
//!   entries after an upgrade

mod storage;
mod tables;
mod version;

pub use storage::{DurableStore, StoreError};
pub use tables::{merge_shallow, value_id, Item, ListPage, QueuedMutation, Table};
pub use version::{StoreVersion, VersionError};
