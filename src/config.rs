use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::sync::SyncSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub store: StoreConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Origin of the document API server (e.g., "https://docs.example.org")
  pub url: String,
  /// Path the API is mounted under
  #[serde(default = "default_prefix")]
  pub prefix: String,
  /// Name of the intercepted resource collection
  #[serde(default = "default_resource")]
  pub resource: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
  /// Database file (defaults to $XDG_DATA_HOME/docs-offline/offline.db)
  pub path: Option<PathBuf>,
  /// Version the store is stamped with; a change purges the cache
  pub app_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  #[serde(default = "default_retry_delay_ms")]
  pub retry_delay_ms: u64,
  #[serde(default = "default_max_attempts")]
  pub max_attempts: u32,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      retry_delay_ms: default_retry_delay_ms(),
      max_attempts: default_max_attempts(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  /// Directory for the log file (defaults to the store's directory)
  pub dir: Option<PathBuf>,
  /// Default filter, overridden by RUST_LOG
  #[serde(default = "default_log_filter")]
  pub filter: String,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      dir: None,
      filter: default_log_filter(),
    }
  }
}

fn default_prefix() -> String {
  "/api/v1.0/".to_string()
}

fn default_resource() -> String {
  "documents".to_string()
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_retry_delay_ms() -> u64 {
  300
}

fn default_max_attempts() -> u32 {
  15
}

fn default_log_filter() -> String {
  "info".to_string()
}

impl Config {
  /// Configuration with every default and the given API origin.
  pub fn with_api_url(url: &str) -> Self {
    Self {
      api: ApiConfig {
        url: url.to_string(),
        prefix: default_prefix(),
        resource: default_resource(),
        timeout_secs: default_timeout_secs(),
      },
      store: StoreConfig::default(),
      sync: SyncConfig::default(),
      log: LogConfig::default(),
    }
  }

  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./docs-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/docs-offline/config.yaml
  ///
  /// `api_url` overrides the file's API origin, and is enough on its own when
  /// no file exists.
  pub fn load(explicit_path: Option<&Path>, api_url: Option<&str>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match (path, api_url) {
      (Some(p), url) => {
        let mut config = Self::load_from_path(&p)?;
        if let Some(url) = url {
          config.api.url = url.to_string();
        }
        Ok(config)
      }
      (None, Some(url)) => Ok(Self::with_api_url(url)),
      (None, None) => Err(eyre!(
        "No configuration file found. Create one at ~/.config/docs-offline/config.yaml\n\
                 or pass --api-url."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("docs-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("docs-offline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Origin of the API, validated.
  pub fn api_url(&self) -> Result<Url> {
    Url::parse(&self.api.url).map_err(|e| eyre!("Invalid API url {:?}: {}", self.api.url, e))
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.api.timeout_secs)
  }

  /// Database file path, explicit or under the platform data directory.
  pub fn store_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.store.path {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("docs-offline").join("offline.db"))
  }

  pub fn log_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.log.dir {
      return Ok(dir.clone());
    }
    let store_path = self.store_path()?;
    Ok(
      store_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(".")),
    )
  }

  pub fn app_version(&self) -> &str {
    self
      .store
      .app_version
      .as_deref()
      .unwrap_or(env!("CARGO_PKG_VERSION"))
  }

  pub fn sync_settings(&self) -> SyncSettings {
    SyncSettings {
      retry_delay: Duration::from_millis(self.sync.retry_delay_ms),
      max_attempts: self.sync.max_attempts,
    }
  }

  /// Get the API token from the environment, if set.
  ///
  /// Checks DOCS_OFFLINE_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("DOCS_OFFLINE_TOKEN")
      .ok()
      .filter(|token| !token.is_empty())
  }
}
