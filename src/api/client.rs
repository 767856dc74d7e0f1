//! Offline-capable document client.
//!
//! Builds requests for the document API and sends every one of them through
//! [`ApiPlugin`], so reads fall back to the durable cache and writes are
//! queued for replay whenever the server cannot be reached.

use std::path::PathBuf;
use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use super::plugin::ApiPlugin;
use super::request::{ApiRequest, ApiResponse};
use super::routes::{member_url, Router};
use super::transport::{HttpTransport, Transport};
use crate::cache::{DurableStore, StoreVersion, Table};
use crate::config::Config;
use crate::sync::SyncManager;

/// Snapshot of the local store.
#[derive(Debug, Clone, Serialize)]
pub struct OfflineStatus {
  pub app_version: String,
  pub store_path: PathBuf,
  pub cached_lists: u64,
  pub cached_items: u64,
  pub pending: Vec<PendingMutation>,
}

/// A queued write, in replay order.
#[derive(Debug, Clone, Serialize)]
pub struct PendingMutation {
  pub key: String,
  pub method: String,
  pub url: String,
}

pub struct OfflineClient {
  collection: Url,
  token: Option<HeaderValue>,
  plugin: ApiPlugin,
  store: Arc<DurableStore>,
  sync_manager: Arc<SyncManager>,
}

impl OfflineClient {
  /// Create a client talking HTTP to the configured server.
  ///
  /// Must be called from inside a tokio runtime so the initial replay pass
  /// can start.
  pub fn new(config: &Config) -> Result<Self> {
    let transport = HttpTransport::new(config.request_timeout())
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;
    Self::with_transport(config, Arc::new(transport))
  }

  pub fn with_transport(config: &Config, transport: Arc<dyn Transport>) -> Result<Self> {
    let version = StoreVersion::parse(config.app_version())?;
    let store = Arc::new(DurableStore::new(config.store_path()?, version));
    store.cleanup_outdated_version()?;

    let api_url = config.api_url()?;

    let token = match Config::get_api_token() {
      Some(token) => {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
          .map_err(|e| eyre!("Invalid API token: {}", e))?;
        value.set_sensitive(true);
        Some(value)
      }
      None => None,
    };

    let sync_manager = replay_manager(&store, &transport, config);
    let plugin = ApiPlugin::new(
      Router::documents(&config.api.prefix, &config.api.resource),
      Arc::clone(&store),
      transport,
      Arc::clone(&sync_manager),
    );

    let collection_path = plugin.router().collection_path();
    let collection = api_url
      .join(collection_path)
      .map_err(|e| eyre!("Invalid collection path {}: {}", collection_path, e))?;

    tracing::debug!(%collection, store = %store.path().display(), "offline client ready");

    Ok(Self {
      collection,
      token,
      plugin,
      store,
      sync_manager,
    })
  }

  /// One page of the collection. `query` is appended after the page number.
  pub async fn list_documents(&self, page: u32, query: &[(&str, &str)]) -> ApiResponse {
    let mut url = self.collection.clone();
    {
      let mut pairs = url.query_pairs_mut();
      pairs.append_pair("page", &page.to_string());
      for (name, value) in query {
        pairs.append_pair(name, value);
      }
    }
    self.send(ApiRequest::get(url)).await
  }

  pub async fn get_document(&self, id: &str) -> Result<ApiResponse> {
    let url = self.document_url(id)?;
    Ok(self.send(ApiRequest::get(url)).await)
  }

  pub async fn create_document(&self, body: &Value) -> ApiResponse {
    let request = ApiRequest::new(Method::POST, self.collection.clone()).with_json(body);
    self.send(request).await
  }

  pub async fn update_document(&self, id: &str, body: &Value) -> Result<ApiResponse> {
    let url = self.document_url(id)?;
    let request = ApiRequest::new(Method::PATCH, url).with_json(body);
    Ok(self.send(request).await)
  }

  pub async fn delete_document(&self, id: &str) -> Result<ApiResponse> {
    let url = self.document_url(id)?;
    Ok(self.send(ApiRequest::new(Method::DELETE, url)).await)
  }

  /// Replay queued writes now. Returns how many are still waiting.
  pub async fn sync(&self) -> Result<u64> {
    self.sync_manager.sync().await;
    Ok(self.store.pending_count()?)
  }

  pub fn status(&self) -> Result<OfflineStatus> {
    let pending = self
      .store
      .pending_mutations()?
      .into_iter()
      .map(|mutation| PendingMutation {
        key: mutation.key,
        method: mutation.request_data.method,
        url: mutation.request_data.url,
      })
      .collect();

    Ok(OfflineStatus {
      app_version: self.store.version().app_version().to_string(),
      store_path: self.store.path().to_path_buf(),
      cached_lists: self.store.count(Table::List)?,
      cached_items: self.store.count(Table::Item)?,
      pending,
    })
  }

  /// Drop every cached response and every queued write.
  pub fn purge(&self) -> Result<()> {
    for table in Table::DATA {
      self.store.delete_all(table)?;
    }
    tracing::info!("offline store purged");
    Ok(())
  }

  fn document_url(&self, id: &str) -> Result<Url> {
    member_url(&self.collection, id).map_err(|e| eyre!("Invalid document id {:?}: {}", id, e))
  }

  async fn send(&self, mut request: ApiRequest) -> ApiResponse {
    if let Some(token) = &self.token {
      request.headers.insert(AUTHORIZATION, token.clone());
    }
    self.plugin.fetch(request).await
  }
}

/// Single-flight replay of `store`'s queue over `transport`.
fn replay_manager(
  store: &Arc<DurableStore>,
  transport: &Arc<dyn Transport>,
  config: &Config,
) -> Arc<SyncManager> {
  let sync_store = Arc::clone(store);
  let sync_transport = Arc::clone(transport);
  let check_store = Arc::clone(store);

  SyncManager::new(
    move || {
      let store = Arc::clone(&sync_store);
      let transport = Arc::clone(&sync_transport);
      Box::pin(async move {
        store.sync(transport.as_ref()).await?;
        Ok::<(), color_eyre::Report>(())
      })
    },
    move || {
      let store = Arc::clone(&check_store);
      Box::pin(async move { store.has_sync_to_do() })
    },
    config.sync_settings(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::FakeTransport;
  use reqwest::StatusCode;
  use serde_json::json;
  use tempfile::TempDir;

  const COLLECTION: &str = "https://docs.test/api/v1.0/documents/";

  fn client(dir: &TempDir) -> (OfflineClient, Arc<FakeTransport>) {
    let mut config = Config::with_api_url("https://docs.test");
    config.store.path = Some(dir.path().join("offline.db"));
    config.sync.retry_delay_ms = 5;

    let transport = Arc::new(FakeTransport::new());
    let client = OfflineClient::with_transport(&config, transport.clone()).unwrap();
    (client, transport)
  }

  #[tokio::test]
  async fn test_offline_create_is_queued_then_replayed() {
    let dir = TempDir::new().unwrap();
    let (client, transport) = client(&dir);
    transport.set_online(false);

    let response = client.create_document(&json!({"title": "draft"})).await;
    assert_eq!(response.status, StatusCode::CREATED);
    let body = response.json_body().unwrap().unwrap();
    let id = body["id"].as_str().unwrap().to_string();

    let status = client.status().unwrap();
    assert_eq!(status.pending.len(), 1);
    assert_eq!(status.pending[0].method, "POST");
    assert_eq!(status.pending[0].url, COLLECTION);

    let cached = client.get_document(&id).await.unwrap();
    assert_eq!(cached.status, StatusCode::OK);
    assert_eq!(cached.json_body().unwrap().unwrap()["title"], "draft");

    transport.set_online(true);
    transport.clear_sent();
    assert_eq!(client.sync().await.unwrap(), 0);

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].body_json().unwrap().unwrap()["id"], id.as_str());
    assert!(client.status().unwrap().pending.is_empty());
  }

  #[tokio::test]
  async fn test_list_builds_paged_url() {
    let dir = TempDir::new().unwrap();
    let (client, transport) = client(&dir);
    let url = format!("{}?page=2&ordering=-updated_at", COLLECTION);
    transport.respond(
      Method::GET,
      &url,
      StatusCode::OK,
      json!({"count": 0, "next": null, "previous": null, "results": []}),
    );

    let response = client.list_documents(2, &[("ordering", "-updated_at")]).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(transport.sent()[0].url, url);
    assert_eq!(client.status().unwrap().cached_lists, 1);
  }

  #[tokio::test]
  async fn test_purge_empties_the_store() {
    let dir = TempDir::new().unwrap();
    let (client, transport) = client(&dir);
    client.list_documents(1, &[]).await;
    transport.set_online(false);
    client.delete_document("abc").await.unwrap();

    client.purge().unwrap();

    let status = client.status().unwrap();
    assert_eq!(status.cached_lists, 0);
    assert!(status.pending.is_empty());
    let response = client.list_documents(1, &[]).await;
    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
  }

  #[tokio::test]
  async fn test_document_ids_stay_inside_collection() {
    let dir = TempDir::new().unwrap();
    let (client, transport) = client(&dir);

    client.get_document("../users/me").await.unwrap();
    assert_eq!(
      transport.sent()[0].url,
      format!("{}..%2Fusers%2Fme/", COLLECTION)
    );
    assert!(client.get_document("..").await.is_err());
    assert!(client.delete_document("").await.is_err());
    assert_eq!(transport.sent().len(), 1);
  }
}
