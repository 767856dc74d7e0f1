//! Offline resilience for a document-management HTTP API.
//!
//! Requests for the document API go through [`api::ApiPlugin`], which serves
//! reads from a durable SQLite cache when the network is unreachable, applies
//! writes optimistically to that cache, and queues them for replay once the
//! network comes back.

pub mod api;
pub mod cache;
pub mod config;
pub mod sync;

#[cfg(test)]
mod testing;

pub use api::{ApiPlugin, ApiRequest, ApiResponse, OfflineClient, RequestData};
pub use cache::DurableStore;
pub use config::Config;
pub use sync::SyncManager;
