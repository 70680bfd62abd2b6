use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub server: ServerConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub notifications: NotificationsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  /// Origin of the library API, e.g. "http://library.local:5000"
  pub url: String,
  /// Per-request timeout for live and replayed calls
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Set to false to run without any response caching
  pub enabled: bool,
  /// Bucket name prefix; names become "<prefix>-v<version>" and "<prefix>-data-v<version>"
  pub prefix: String,
  /// Bumped on deploy; buckets from other versions are purged on activation
  pub version: String,
  /// Paths under this prefix use the network-first API policy
  pub api_prefix: String,
  /// API GET paths that may be served stale when offline (prefix match).
  /// Empty means every GET under `api_prefix` is cacheable.
  pub api_cache_allow: Vec<String>,
  /// Asset manifest pre-populated into the static bucket on install
  pub static_assets: Vec<String>,
  /// Served for document requests when both cache and network miss
  pub offline_page: String,
  /// Served for image requests when both cache and network miss
  pub fallback_image: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      prefix: "cal-library".to_string(),
      version: "1.1.0".to_string(),
      api_prefix: "/api/".to_string(),
      api_cache_allow: vec![
        "/api/books/search".to_string(),
        "/api/stats".to_string(),
        "/api/my-books".to_string(),
      ],
      static_assets: [
        "/",
        "/static/css/bootstrap.min.css",
        "/static/css/style.css",
        "/static/css/dark-mode.css",
        "/static/js/main.js",
        "/static/js/books-and-transactions.js",
        "/static/js/pwa-features.js",
        "/static/img/icon-192x192.png",
        "/static/img/icon-144x144.png",
        "/static/manifest.json",
        "/offline",
        "/search",
        "/my_books",
        "/qr_borrow",
        "/kiosk-mode",
      ]
      .iter()
      .map(|s| s.to_string())
      .collect(),
      offline_page: "/offline".to_string(),
      fallback_image: "/static/img/icon-192x192.png".to_string(),
    }
  }
}

impl CacheConfig {
  /// Name of the bucket holding the static asset manifest
  pub fn static_cache_name(&self) -> String {
    format!("{}-v{}", self.prefix, self.version)
  }

  /// Name of the bucket holding API GET responses
  pub fn data_cache_name(&self) -> String {
    format!("{}-data-v{}", self.prefix, self.version)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Periodic drain + data refresh interval. 0 disables periodic sync.
  pub periodic_interval_secs: u64,
  /// How often the connectivity monitor probes the server
  pub probe_interval_secs: u64,
  /// Path probed to decide whether the server is reachable
  pub health_path: String,
  /// API URLs re-fetched into the data bucket on each periodic tick
  pub refresh_urls: Vec<String>,
  /// How often `serve` re-reads the queue for actions written by other
  /// processes. 0 disables the watch.
  pub queue_poll_millis: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      periodic_interval_secs: 15 * 60,
      probe_interval_secs: 30,
      health_path: "/api/stats".to_string(),
      refresh_urls: vec![
        "/api/books/search?limit=50".to_string(),
        "/api/stats".to_string(),
      ],
      queue_poll_millis: 2000,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// Override for the data directory (default: $XDG_DATA_HOME/shelf-sync)
  pub data_dir: Option<PathBuf>,
  /// Skip the SQLite action store and use the flat key-value file only
  pub force_fallback: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
  pub enabled: bool,
}

impl Default for NotificationsConfig {
  fn default() -> Self {
    Self { enabled: true }
  }
}

fn default_timeout_secs() -> u64 {
  5
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shelf-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shelf-sync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/shelf-sync/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("shelf-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("shelf-sync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    Ok(config)
  }

  /// Directory holding the SQLite database, the key-value file and logs.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.storage.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("shelf-sync"))
  }
}
