//! SQLite-backed durable store.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use super::tables::{QueuedMutation, Table};
use super::version::StoreVersion;
use crate::api::serializer::{RequestData, RequestDataError};
use crate::api::transport::Transport;

/// Key of the single row in the version table.
const VERSION_KEY: &str = "app";

/// How long an operation waits for another connection's lock.
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("serialization error: {0}")]
  Serde(#[from] serde_json::Error),

  #[error("store version {stored} is newer than this build ({current})")]
  Downgrade { stored: u32, current: u32 },

  #[error("queued request is invalid: {0}")]
  Request(#[from] RequestDataError),
}

impl StoreError {
  /// Whether the file itself is unusable at this version. Anything else,
  /// including a lock held by another connection, leaves the file alone.
  fn needs_recreate(&self) -> bool {
    match self {
      StoreError::Downgrade { .. } => true,
      StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => {
        matches!(e.code, ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt)
      }
      _ => false,
    }
  }
}

/// Schema for the four tables. All share the same key/value shape; values are JSON.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS list_cache (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS item_cache (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL
);

-- Keys are zero-padded timestamps, so key order is insertion order
CREATE TABLE IF NOT EXISTS mutation_queue (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_version (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL
);
"#;

/// Versioned key-value store holding the list cache, item cache, mutation
/// queue and schema version.
///
/// Every operation opens its own connection and drops it before returning.
/// There is no atomicity across operations.
#[derive(Debug, Clone)]
pub struct DurableStore {
  path: PathBuf,
  version: StoreVersion,
  busy_timeout: Duration,
}

impl DurableStore {
  pub fn new(path: impl Into<PathBuf>, version: StoreVersion) -> Self {
    Self {
      path: path.into(),
      version,
      busy_timeout: DEFAULT_BUSY_TIMEOUT,
    }
  }

  pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
    self.busy_timeout = busy_timeout;
    self
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn version(&self) -> &StoreVersion {
    &self.version
  }

  /// Open a handle, creating the tables on first use.
  ///
  /// If the file cannot be opened at this build's version (a newer build wrote
  /// it, or it is not a database at all) it is deleted and recreated. Other
  /// failures, such as a lock that outlived the busy timeout, are returned.
  pub fn open(&self) -> Result<Connection, StoreError> {
    match self.try_open() {
      Ok(conn) => Ok(conn),
      Err(e) if !e.needs_recreate() => Err(e),
      Err(e) => {
        tracing::warn!(path = %self.path.display(), error = %e, "failed to open store, recreating it");
        self.destroy()?;
        self.try_open()
      }
    }
  }

  fn try_open(&self) -> Result<Connection, StoreError> {
    if let Some(parent) = self.path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
      }
    }

    let conn = Connection::open(&self.path)?;
    conn.busy_timeout(self.busy_timeout)?;
    let stored: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    let current = self.version.number();
    if stored > current {
      return Err(StoreError::Downgrade { stored, current });
    }

    conn.execute_batch(STORE_SCHEMA)?;
    if stored != current {
      conn.pragma_update(None, "user_version", current)?;
    }

    Ok(conn)
  }

  /// Delete the database file and its journal siblings.
  fn destroy(&self) -> Result<(), StoreError> {
    let mut paths = vec![self.path.clone()];
    for suffix in ["-wal", "-shm", "-journal"] {
      let mut sibling = self.path.clone().into_os_string();
      sibling.push(suffix);
      paths.push(PathBuf::from(sibling));
    }

    for path in paths {
      match std::fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
      }
    }
    Ok(())
  }

  pub fn get<T: DeserializeOwned>(&self, table: Table, key: &str) -> Result<Option<T>, StoreError> {
    let conn = self.open()?;
    let data: Option<Vec<u8>> = conn
      .query_row(
        &format!("SELECT value FROM {} WHERE key = ?1", table.name()),
        params![key],
        |row| row.get(0),
      )
      .optional()?;

    match data {
      Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
      None => Ok(None),
    }
  }

  /// All keys of `table` in ascending order.
  pub fn get_all_keys(&self, table: Table) -> Result<Vec<String>, StoreError> {
    let conn = self.open()?;
    let mut stmt = conn.prepare(&format!("SELECT key FROM {} ORDER BY key", table.name()))?;
    let keys = stmt
      .query_map([], |row| row.get(0))?
      .collect::<Result<Vec<String>, _>>()?;
    Ok(keys)
  }

  /// All entries of `table` in ascending key order. Entries that no longer
  /// deserialize as `T` are skipped.
  pub fn get_all<T: DeserializeOwned>(&self, table: Table) -> Result<Vec<(String, T)>, StoreError> {
    let conn = self.open()?;
    let mut stmt = conn.prepare(&format!(
      "SELECT key, value FROM {} ORDER BY key",
      table.name()
    ))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
      })?
      .collect::<Result<Vec<_>, _>>()?;

    Ok(
      rows
        .into_iter()
        .filter_map(|(key, data)| match serde_json::from_slice(&data) {
          Ok(value) => Some((key, value)),
          Err(e) => {
            tracing::warn!(table = table.name(), key = %key, error = %e, "skipping undecodable entry");
            None
          }
        })
        .collect(),
    )
  }

  pub fn put<T: Serialize>(&self, table: Table, key: &str, value: &T) -> Result<(), StoreError> {
    let data = serde_json::to_vec(value)?;
    let conn = self.open()?;
    conn.execute(
      &format!(
        "INSERT OR REPLACE INTO {} (key, value) VALUES (?1, ?2)",
        table.name()
      ),
      params![key, data],
    )?;
    Ok(())
  }

  pub fn delete(&self, table: Table, key: &str) -> Result<(), StoreError> {
    let conn = self.open()?;
    conn.execute(
      &format!("DELETE FROM {} WHERE key = ?1", table.name()),
      params![key],
    )?;
    Ok(())
  }

  pub fn count(&self, table: Table) -> Result<u64, StoreError> {
    let conn = self.open()?;
    let count: u64 = conn.query_row(
      &format!("SELECT COUNT(*) FROM {}", table.name()),
      [],
      |row| row.get(0),
    )?;
    Ok(count)
  }

  /// Upsert that never fails: cache writes are best effort.
  pub fn cache_response<T: Serialize>(&self, key: &str, value: &T, table: Table) {
    if let Err(e) = self.put(table, key, value) {
      tracing::warn!(table = table.name(), key = %key, error = %e, "failed to write cache entry");
    }
  }

  pub fn delete_all(&self, table: Table) -> Result<(), StoreError> {
    let conn = self.open()?;
    conn.execute(&format!("DELETE FROM {}", table.name()), [])?;
    Ok(())
  }

  /// Purge every data table if the store was last written by another
  /// application version, then record the current one.
  ///
  /// Returns whether a purge happened.
  pub fn cleanup_outdated_version(&self) -> Result<bool, StoreError> {
    let current = self.version.app_version();
    let stored: Option<String> = self.get(Table::Version, VERSION_KEY)?;
    if stored.as_deref() == Some(current) {
      return Ok(false);
    }

    let mut conn = self.open()?;
    let tx = conn.transaction()?;
    for table in Table::DATA {
      tx.execute(&format!("DELETE FROM {}", table.name()), [])?;
    }
    tx.execute(
      "INSERT OR REPLACE INTO schema_version (key, value) VALUES (?1, ?2)",
      params![VERSION_KEY, serde_json::to_vec(current)?],
    )?;
    tx.commit()?;

    tracing::info!(
      previous = stored.as_deref().unwrap_or("none"),
      current,
      "purged cache written by another version"
    );
    Ok(true)
  }

  /// Whether any mutation is waiting for replay. Store errors count as "no".
  pub fn has_sync_to_do(&self) -> bool {
    match self.pending_count() {
      Ok(count) => count > 0,
      Err(e) => {
        tracing::warn!(error = %e, "failed to count queued mutations");
        false
      }
    }
  }

  pub fn pending_count(&self) -> Result<u64, StoreError> {
    self.count(Table::Mutation)
  }

  pub fn pending_mutations(&self) -> Result<Vec<QueuedMutation>, StoreError> {
    Ok(
      self
        .get_all::<QueuedMutation>(Table::Mutation)?
        .into_iter()
        .map(|(_, mutation)| mutation)
        .collect(),
    )
  }

  /// Queue `request` for replay and return its key.
  ///
  /// Keys are microsecond timestamps, bumped past the largest queued key so
  /// they strictly increase even when the clock ties or steps back.
  pub fn enqueue_mutation(&self, request: &RequestData) -> Result<String, StoreError> {
    let mut conn = self.open()?;
    // Holds the write lock from reading MAX(key) until the insert commits.
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let last: Option<String> =
      tx.query_row("SELECT MAX(key) FROM mutation_queue", [], |row| row.get(0))?;

    let now = chrono::Utc::now().timestamp_micros().max(0) as u64;
    let next = match last.and_then(|key| key.parse::<u64>().ok()) {
      Some(last) if last >= now => last + 1,
      _ => now,
    };
    let key = format!("{:020}", next);

    let mutation = QueuedMutation {
      key: key.clone(),
      request_data: request.to_object(),
    };
    tx.execute(
      "INSERT INTO mutation_queue (key, value) VALUES (?1, ?2)",
      params![key, serde_json::to_vec(&mutation)?],
    )?;
    tx.commit()?;

    tracing::debug!(key = %key, method = %request.method, url = %request.url, "queued mutation");
    Ok(key)
  }

  /// Replay queued mutations in key order, removing each once the server
  /// answered. Stops at the first network failure; the rest stay queued.
  ///
  /// Any HTTP response counts as delivered. Returns how many were replayed.
  pub async fn sync(&self, transport: &dyn Transport) -> Result<usize, StoreError> {
    let mut replayed = 0;

    for key in self.get_all_keys(Table::Mutation)? {
      let mutation = match self.get::<QueuedMutation>(Table::Mutation, &key) {
        Ok(Some(mutation)) => mutation,
        // Replayed by someone else in the meantime
        Ok(None) => continue,
        Err(StoreError::Serde(e)) => {
          tracing::warn!(key = %key, error = %e, "dropping undecodable queued mutation");
          self.delete(Table::Mutation, &key)?;
          continue;
        }
        Err(e) => return Err(e),
      };

      let request = match mutation.request_data.to_request() {
        Ok(request) => request,
        Err(e) => {
          tracing::warn!(key = %key, error = %e, "dropping queued mutation that cannot be rebuilt");
          self.delete(Table::Mutation, &key)?;
          continue;
        }
      };

      let method = request.method.clone();
      let url = request.url.clone();
      match transport.send(request).await {
        Ok(response) => {
          if response.status.is_success() {
            tracing::debug!(key = %key, %method, %url, status = %response.status, "replayed mutation");
          } else {
            tracing::warn!(key = %key, %method, %url, status = %response.status, "replayed mutation was rejected");
          }
          self.delete(Table::Mutation, &key)?;
          replayed += 1;
        }
        Err(e) => {
          tracing::warn!(key = %key, %method, %url, error = %e, "replay stopped, mutation stays queued");
          break;
        }
      }
    }

    if replayed > 0 {
      tracing::info!(replayed, "replayed queued mutations");
    }
    Ok(replayed)
  }
}
