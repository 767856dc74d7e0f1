//! Single-flight coordination of mutation replay.
//!
//! [`SyncManager`] wraps two injected callbacks: one that performs a replay
//! pass and one that cheaply reports whether anything is queued. At most one
//! pass runs at a time; callers arriving while a pass is in flight wait a
//! bounded number of times and then give up instead of blocking.
//!
//! ```ignore
//! let manager = SyncManager::new(
//!     move || {
//!         let store = store.clone();
//!         let transport = transport.clone();
//!         Box::pin(async move { store.sync(transport.as_ref()).await.map(|_| ()).map_err(Into::into) })
//!     },
//!     move || {
//!         let store = store.clone();
//!         Box::pin(async move { store.has_sync_to_do() })
//!     },
//!     SyncSettings::default(),
//! );
//!
//! manager.sync().await;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use futures::future::BoxFuture;

/// Performs one replay pass.
pub type ToSync = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Reports whether a replay pass has anything to do.
pub type HasSyncToDo = Arc<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
  /// Wait between attempts while another pass is running
  pub retry_delay: Duration,
  /// Attempts before a waiting caller gives up
  pub max_attempts: u32,
}

impl Default for SyncSettings {
  fn default() -> Self {
    Self {
      retry_delay: Duration::from_millis(300),
      max_attempts: 15,
    }
  }
}

pub struct SyncManager {
  to_sync: ToSync,
  has_sync_to_do: HasSyncToDo,
  busy: AtomicBool,
  settings: SyncSettings,
}

/// Clears the busy flag when the pass ends, however it ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

impl SyncManager {
  /// Build a manager and start an initial replay pass in the background.
  ///
  /// The initial pass is only spawned when called from inside a tokio runtime.
  pub fn new<S, H>(to_sync: S, has_sync_to_do: H, settings: SyncSettings) -> Arc<Self>
  where
    S: Fn() -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    H: Fn() -> BoxFuture<'static, bool> + Send + Sync + 'static,
  {
    let manager = Arc::new(Self {
      to_sync: Arc::new(to_sync),
      has_sync_to_do: Arc::new(has_sync_to_do),
      busy: AtomicBool::new(false),
      settings,
    });

    match tokio::runtime::Handle::try_current() {
      Ok(handle) => {
        let initial = Arc::clone(&manager);
        handle.spawn(async move { initial.sync().await });
      }
      Err(_) => tracing::debug!("no runtime, skipping initial replay pass"),
    }

    manager
  }

  pub fn is_busy(&self) -> bool {
    self.busy.load(Ordering::Acquire)
  }

  /// Run a replay pass unless there is nothing to do.
  ///
  /// If a pass is already in flight, wait and retry up to `max_attempts`
  /// times; a retry that finds the queue drained returns immediately. Errors
  /// from the pass are logged, never returned.
  pub async fn sync(&self) {
    let mut attempt = 0;
    let _guard = loop {
      if !(self.has_sync_to_do)().await {
        return;
      }

      if self
        .busy
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
      {
        break BusyGuard(&self.busy);
      }

      if attempt >= self.settings.max_attempts {
        tracing::debug!(attempt, "replay still busy, giving up");
        return;
      }
      attempt += 1;
      tokio::time::sleep(self.settings.retry_delay).await;
    };

    if let Err(e) = (self.to_sync)().await {
      tracing::warn!(error = %e, "replay pass failed");
    }
  }
}
