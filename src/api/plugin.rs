//! Request interception policy for the document API.
//!
//! Every routed request goes through the same lifecycle:
//!
//! 1. [`ApiPlugin::request_will_fetch`]: snapshot mutating requests and let
//!    queued mutations replay first, so a client's writes reach the server in
//!    the order they were made.
//! 2. The request is sent.
//! 3. On a response, [`ApiPlugin::fetch_did_succeed`] refreshes the cache and
//!    passes the response through unchanged.
//! 4. On a failure, [`ApiPlugin::fetch_did_fail`] records whether the network
//!    itself was unreachable and [`ApiPlugin::handler_did_error`] answers from
//!    the cache, applying writes locally and queueing them for replay.
//!
//! The caller always gets an [`ApiResponse`], real or synthetic.

use std::sync::Arc;

use chrono::Utc;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;
use uuid::Uuid;

use super::document::synthesize_document;
use super::request::{ApiRequest, ApiResponse};
use super::routes::{collection_path_of, item_id, member_url, RouteKind, Router};
use super::serializer::RequestData;
use super::transport::{FetchError, Transport};
use crate::cache::{merge_shallow, value_id, DurableStore, Item, ListPage, Table};
use crate::sync::SyncManager;

/// Per-request state carried between the lifecycle hooks.
#[derive(Debug, Default)]
pub struct Exchange {
  /// Snapshot of a mutating request, taken before it was sent
  pub initial_request: Option<RequestData>,
  /// Set only when the network could not be reached at all
  pub network_failed: bool,
}

pub struct ApiPlugin {
  router: Router,
  store: Arc<DurableStore>,
  transport: Arc<dyn Transport>,
  sync_manager: Arc<SyncManager>,
}

impl ApiPlugin {
  pub fn new(
    router: Router,
    store: Arc<DurableStore>,
    transport: Arc<dyn Transport>,
    sync_manager: Arc<SyncManager>,
  ) -> Self {
    Self {
      router,
      store,
      transport,
      sync_manager,
    }
  }

  pub fn router(&self) -> &Router {
    &self.router
  }

  /// Send `request`, falling back to the cache when the network is unreachable.
  pub async fn fetch(&self, request: ApiRequest) -> ApiResponse {
    let Some(kind) = self
      .router
      .route(&request.method, &request.url)
      .map(|route| route.kind)
    else {
      return self.passthrough(request).await;
    };

    let url = request.url.clone();
    let mut exchange = self.request_will_fetch(kind, &request).await;

    match self.transport.send(request).await {
      Ok(response) => self.fetch_did_succeed(kind, &url, &exchange, response),
      Err(e) => {
        self.fetch_did_fail(&mut exchange, &e);
        self.handler_did_error(kind, &url, exchange)
      }
    }
  }

  async fn passthrough(&self, request: ApiRequest) -> ApiResponse {
    let url = request.url.clone();
    match self.transport.send(request).await {
      Ok(response) => response,
      Err(e) => {
        tracing::debug!(%url, error = %e, "unrouted request failed");
        ApiResponse::network_unavailable()
      }
    }
  }

  /// Snapshot mutating requests, then replay anything already queued.
  pub async fn request_will_fetch(&self, kind: RouteKind, request: &ApiRequest) -> Exchange {
    let initial_request = kind
      .is_mutation()
      .then(|| RequestData::from_request(request));

    self.sync_manager.sync().await;

    Exchange {
      initial_request,
      network_failed: false,
    }
  }

  /// Update the cache from a server response and pass the response through.
  ///
  /// Reads are cached only on `200`; anything else is an application error
  /// and is left alone.
  pub fn fetch_did_succeed(
    &self,
    kind: RouteKind,
    url: &Url,
    exchange: &Exchange,
    response: ApiResponse,
  ) -> ApiResponse {
    let status = response.status;
    match kind {
      RouteKind::List | RouteKind::Item if status == StatusCode::OK => {
        self.cache_read(kind, url, &response)
      }
      RouteKind::Update if status == StatusCode::OK => {
        let patch = match response.json_body() {
          Ok(Some(Value::Object(accepted))) => Some(accepted),
          _ => exchange.initial_request.as_ref().and_then(request_object),
        };
        if let Some(patch) = patch {
          if let Some(mut cached) = self.read::<Item>(Table::Item, url.as_str()) {
            merge_shallow(&mut cached, &patch);
            self.store.cache_response(url.as_str(), &cached, Table::Item);
          }
          self.merge_into_pages(url, &patch);
        }
      }
      RouteKind::Create if status == StatusCode::OK || status == StatusCode::CREATED => {
        if let Ok(Some(Value::Object(created))) = response.json_body() {
          self.cache_created(url, created);
        }
      }
      RouteKind::Delete if status == StatusCode::OK || status == StatusCode::NO_CONTENT => {
        self.forget_item(url);
      }
      _ => tracing::debug!(%url, %status, "response not cached"),
    }
    response
  }

  /// Record whether the failure means the network is unreachable.
  pub fn fetch_did_fail(&self, exchange: &mut Exchange, error: &FetchError) {
    if error.is_network_failure() {
      exchange.network_failed = true;
    }
  }

  /// Answer a request whose fetch failed.
  pub fn handler_did_error(&self, kind: RouteKind, url: &Url, exchange: Exchange) -> ApiResponse {
    if !exchange.network_failed {
      return ApiResponse::network_unavailable();
    }

    match kind {
      RouteKind::List | RouteKind::Item => self.serve_cached(kind, url),
      RouteKind::Update => self.offline_update(url, exchange.initial_request),
      RouteKind::Create => self.offline_create(url, exchange.initial_request),
      RouteKind::Delete => self.offline_delete(url, exchange.initial_request),
    }
  }

  fn cache_read(&self, kind: RouteKind, url: &Url, response: &ApiResponse) {
    let Some(table) = kind.table() else {
      return;
    };
    match response.json_body() {
      Ok(Some(body)) => self.store.cache_response(url.as_str(), &body, table),
      Ok(None) => {}
      Err(e) => tracing::debug!(%url, error = %e, "not caching non-JSON response"),
    }
  }

  fn serve_cached(&self, kind: RouteKind, url: &Url) -> ApiResponse {
    let Some(table) = kind.table() else {
      return ApiResponse::network_unavailable();
    };
    match self.read::<Value>(table, url.as_str()) {
      Some(cached) => {
        tracing::debug!(%url, "serving cached response");
        ApiResponse::json(StatusCode::OK, &cached)
      }
      None => {
        tracing::debug!(%url, "offline cache miss");
        ApiResponse::network_unavailable()
      }
    }
  }

  fn offline_update(&self, url: &Url, initial_request: Option<RequestData>) -> ApiResponse {
    let (Some(mut cached), Some(initial_request)) =
      (self.read::<Item>(Table::Item, url.as_str()), initial_request)
    else {
      return ApiResponse::not_found("Document is not available offline.");
    };

    self.enqueue(&initial_request);

    let patch = request_object(&initial_request).unwrap_or_default();
    merge_shallow(&mut cached, &patch);
    self.store.cache_response(url.as_str(), &cached, Table::Item);
    self.merge_into_pages(url, &patch);

    ApiResponse::json(StatusCode::OK, &Value::Object(cached))
  }

  fn offline_create(&self, url: &Url, initial_request: Option<RequestData>) -> ApiResponse {
    let Some(mut initial_request) = initial_request else {
      return ApiResponse::not_found("Document cannot be created offline.");
    };

    // Only an object body can carry the generated id without losing fields.
    let has_body = initial_request
      .body
      .as_ref()
      .is_some_and(|bytes| !bytes.is_empty());
    let mut body = match request_object(&initial_request) {
      Some(body) => body,
      None if !has_body => Item::new(),
      None => {
        return ApiResponse::not_found("Document body must be a JSON object to be created offline.")
      }
    };

    // Replay must create the same id the caller is about to see.
    let id = Uuid::new_v4().to_string();
    body.insert("id".to_string(), Value::String(id.clone()));
    initial_request.set_body_json(&Value::Object(body.clone()));
    self.enqueue(&initial_request);

    let document = synthesize_document(&id, &body, Utc::now());
    self.cache_created(url, document.clone());

    ApiResponse::json(StatusCode::CREATED, &Value::Object(document))
  }

  fn offline_delete(&self, url: &Url, initial_request: Option<RequestData>) -> ApiResponse {
    let Some(initial_request) = initial_request else {
      return ApiResponse::not_found("Document cannot be deleted offline.");
    };

    self.enqueue(&initial_request);
    self.forget_item(url);

    ApiResponse::no_content()
  }

  fn enqueue(&self, request: &RequestData) {
    if let Err(e) = self.store.enqueue_mutation(request) {
      tracing::error!(method = %request.method, url = %request.url, error = %e, "failed to queue mutation");
    }
  }

  /// Store a newly created item and put it on top of the collection's first
  /// cached page.
  fn cache_created(&self, collection_url: &Url, item: Item) {
    let Some(id) = value_id(&item) else {
      tracing::debug!(url = %collection_url, "created item has no id, not cached");
      return;
    };
    let item_url = match member_url(collection_url, &id) {
      Ok(item_url) => item_url,
      Err(e) => {
        tracing::warn!(url = %collection_url, id = %id, error = %e, "cannot build item url");
        return;
      }
    };

    self.store.cache_response(item_url.as_str(), &item, Table::Item);

    let Some((key, mut page)) = self.pages_of(&item_url).into_iter().next() else {
      return;
    };
    if !page.merge_item(&id, &item) {
      page.unshift(item);
    }
    self.store.cache_response(&key, &page, Table::List);
  }

  /// Drop an item from the item cache and from every page of its collection.
  fn forget_item(&self, item_url: &Url) {
    if let Err(e) = self.store.delete(Table::Item, item_url.as_str()) {
      tracing::warn!(url = %item_url, error = %e, "failed to delete cached item");
    }

    let Some(id) = item_id(item_url) else {
      return;
    };
    for (key, mut page) in self.pages_of(item_url) {
      if page.remove_item(&id) {
        self.store.cache_response(&key, &page, Table::List);
      }
    }
  }

  /// Merge `patch` into every appearance of the item in its collection's pages.
  fn merge_into_pages(&self, item_url: &Url, patch: &Item) {
    let Some(id) = item_id(item_url) else {
      return;
    };
    for (key, mut page) in self.pages_of(item_url) {
      if page.merge_item(&id, patch) {
        self.store.cache_response(&key, &page, Table::List);
      }
    }
  }

  /// Cached list pages of the collection `item_url` belongs to, in key order.
  fn pages_of(&self, item_url: &Url) -> Vec<(String, ListPage)> {
    let collection = collection_path_of(item_url);
    let pages = match self.store.get_all::<ListPage>(Table::List) {
      Ok(pages) => pages,
      Err(e) => {
        tracing::warn!(error = %e, "failed to read cached list pages");
        return Vec::new();
      }
    };

    pages
      .into_iter()
      .filter(|(key, _)| {
        Url::parse(key)
          .map(|page_url| page_url.origin() == item_url.origin() && page_url.path() == collection)
          .unwrap_or(false)
      })
      .collect()
  }

  fn read<T: DeserializeOwned>(&self, table: Table, key: &str) -> Option<T> {
    match self.store.get(table, key) {
      Ok(value) => value,
      Err(e) => {
        tracing::warn!(table = table.name(), key = %key, error = %e, "failed to read cache entry");
        None
      }
    }
  }
}

/// The captured body as a JSON object, if it is one.
fn request_object(request: &RequestData) -> Option<Item> {
  match request.body_json() {
    Ok(Some(Value::Object(body))) => Some(body),
    Ok(_) => None,
    Err(e) => {
      tracing::debug!(url = %request.url, error = %e, "request body is not JSON");
      None
    }
  }
}
