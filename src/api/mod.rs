//! Interception of the document API: request values, the serializer used to
//! queue them, the transport, routing and the caching policy itself.

mod client;
mod document;
mod plugin;
mod request;
pub mod routes;
pub mod serializer;
pub mod transport;

pub use client::{OfflineClient, OfflineStatus, PendingMutation};
pub use document::{default_document, synthesize_document};
pub use plugin::{ApiPlugin, Exchange};
pub use request::{
  ApiRequest, ApiResponse, CacheMode, Credentials, RedirectMode, RequestMode, RequestOptions,
  NETWORK_UNAVAILABLE,
};
pub use routes::{Route, RouteKind, Router};
pub use serializer::RequestData;
pub use transport::{FetchError, HttpTransport, Transport};
