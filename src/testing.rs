//! Test doubles shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::api::routes::Router;
use crate::api::transport::{FetchError, Transport};
use crate::api::{ApiPlugin, ApiRequest, ApiResponse, RequestData};
use crate::cache::{DurableStore, StoreVersion};
use crate::sync::{SyncManager, SyncSettings};

/// Scriptable in-memory transport.
///
/// Online by default; unscripted requests get `200 {}`. Every attempt,
/// successful or not, is recorded.
pub struct FakeTransport {
  online: AtomicBool,
  responses: Mutex<HashMap<(String, String), (StatusCode, Value)>>,
  failing: Mutex<HashSet<String>>,
  rejecting: Mutex<HashSet<String>>,
  sent: Mutex<Vec<RequestData>>,
}

impl FakeTransport {
  pub fn new() -> Self {
    Self {
      online: AtomicBool::new(true),
      responses: Mutex::new(HashMap::new()),
      failing: Mutex::new(HashSet::new()),
      rejecting: Mutex::new(HashSet::new()),
      sent: Mutex::new(Vec::new()),
    }
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  pub fn respond(&self, method: Method, url: &str, status: StatusCode, body: Value) {
    self
      .responses
      .lock()
      .unwrap()
      .insert((method.to_string(), url.to_string()), (status, body));
  }

  /// Requests to `url` fail as if the network were down.
  pub fn fail_url(&self, url: &str) {
    self.failing.lock().unwrap().insert(url.to_string());
  }

  /// Requests to `url` fail without the network being involved.
  pub fn reject_url(&self, url: &str) {
    self.rejecting.lock().unwrap().insert(url.to_string());
  }

  pub fn clear_failures(&self) {
    self.failing.lock().unwrap().clear();
    self.rejecting.lock().unwrap().clear();
  }

  pub fn sent(&self) -> Vec<RequestData> {
    self.sent.lock().unwrap().clone()
  }

  pub fn clear_sent(&self) {
    self.sent.lock().unwrap().clear();
  }
}

#[async_trait]
impl Transport for FakeTransport {
  async fn send(&self, request: ApiRequest) -> Result<ApiResponse, FetchError> {
    let url = request.url.to_string();
    self
      .sent
      .lock()
      .unwrap()
      .push(RequestData::from_request(&request));

    if self.rejecting.lock().unwrap().contains(&url) {
      return Err(FetchError::InvalidRequest(format!("rejected {}", url)));
    }
    if !self.online.load(Ordering::SeqCst) || self.failing.lock().unwrap().contains(&url) {
      return Err(FetchError::Unreachable(format!("offline: {}", url)));
    }

    let scripted = self
      .responses
      .lock()
      .unwrap()
      .get(&(request.method.to_string(), url))
      .cloned();
    let (status, body) = scripted.unwrap_or((StatusCode::OK, json!({})));

    if status == StatusCode::NO_CONTENT {
      Ok(ApiResponse::no_content())
    } else {
      Ok(ApiResponse::json(status, &body))
    }
  }
}

pub fn store_at(dir: &TempDir, app_version: &str) -> DurableStore {
  DurableStore::new(
    dir.path().join("offline.db"),
    StoreVersion::parse(app_version).unwrap(),
  )
}

pub fn fast_sync() -> SyncSettings {
  SyncSettings {
    retry_delay: Duration::from_millis(5),
    max_attempts: 15,
  }
}

/// A plugin wired to a fake transport and a throwaway store.
pub struct Harness {
  pub plugin: ApiPlugin,
  pub store: Arc<DurableStore>,
  pub transport: Arc<FakeTransport>,
  _dir: TempDir,
}

pub fn harness() -> Harness {
  let dir = TempDir::new().unwrap();
  let store = Arc::new(store_at(&dir, "1.0.0"));
  store.cleanup_outdated_version().unwrap();
  let transport = Arc::new(FakeTransport::new());

  let sync_store = Arc::clone(&store);
  let sync_transport = Arc::clone(&transport);
  let check_store = Arc::clone(&store);
  let sync_manager = SyncManager::new(
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
    fast_sync(),
  );

  let plugin = ApiPlugin::new(
    Router::documents("/api/v1.0/", "documents"),
    Arc::clone(&store),
    transport.clone(),
    sync_manager,
  );

  Harness {
    plugin,
    store,
    transport,
    _dir: dir,
  }
}
