use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the remote API token.
pub const API_TOKEN_ENV: &str = "OFFSYNC_API_TOKEN";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub storage: StorageConfig,
  pub cache: CacheConfig,
  pub sync: SyncConfig,
  pub remote: RemoteConfig,
  pub connectivity: ConnectivityConfig,
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// Store file (defaults to the platform data dir)
  pub path: Option<PathBuf>,
  /// Bytes the store may use before reporting pressure
  pub quota_bytes: u64,
  /// Usage ratio at which the host should evict
  pub quota_threshold: f64,
}

impl Default for StorageConfig {
  fn default() -> Self {
    Self {
      path: None,
      quota_bytes: 50 * 1024 * 1024,
      quota_threshold: 0.8,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Entries older than this are evicted
  pub max_age_days: u64,
  /// Cached lists younger than this are served without a network call
  pub stale_minutes: u64,
  pub list_limit: usize,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      max_age_days: 7,
      stale_minutes: 5,
      list_limit: 50,
    }
  }
}

impl CacheConfig {
  pub fn max_age(&self) -> Duration {
    Duration::from_secs(self.max_age_days * 24 * 60 * 60)
  }

  pub fn stale_time(&self) -> Duration {
    Duration::from_secs(self.stale_minutes * 60)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub backoff_initial_ms: u64,
  pub backoff_max_ms: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      backoff_initial_ms: 5_000,
      backoff_max_ms: 300_000,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
  /// Base URL of the remote API; commands that talk to it need this set
  pub url: Option<String>,
  pub timeout_secs: u64,
}

impl Default for RemoteConfig {
  fn default() -> Self {
    Self {
      url: None,
      timeout_secs: 15,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
  pub probe_interval_secs: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      probe_interval_secs: 30,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// `EnvFilter` directive, overridden by `RUST_LOG`
  pub level: String,
  /// Also write daily log files here
  pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".into(),
      directory: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offsync/config.yaml
  ///
  /// With no file found, defaults are used.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("offsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if !(0.0..=1.0).contains(&self.storage.quota_threshold) {
      return Err(eyre!(
        "storage.quota_threshold must be between 0 and 1, got {}",
        self.storage.quota_threshold
      ));
    }
    if self.connectivity.probe_interval_secs == 0 {
      return Err(eyre!("connectivity.probe_interval_secs must be positive"));
    }
    Ok(())
  }

  /// Remote base URL, required by commands that reach the network.
  pub fn remote_url(&self) -> Result<&str> {
    self
      .remote
      .url
      .as_deref()
      .ok_or_else(|| eyre!("No remote url configured. Set remote.url in the config file."))
  }

  /// Get the remote API token from the environment, if set.
  pub fn get_api_token() -> Option<String> {
    std::env::var(API_TOKEN_ENV)
      .ok()
      .filter(|t| !t.trim().is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
  }

  #[test]
  fn test_partial_file_keeps_defaults() {
    let file = write_config(
      "cache:\n  max_age_days: 3\nremote:\n  url: https://api.example.com\n",
    );
    let config = Config::load(Some(file.path())).unwrap();

    assert_eq!(config.cache.max_age_days, 3);
    assert_eq!(config.cache.stale_minutes, 5);
    assert_eq!(config.cache.max_age(), Duration::from_secs(3 * 86_400));
    assert_eq!(config.remote_url().unwrap(), "https://api.example.com");
    assert_eq!(config.sync.backoff_initial_ms, 5_000);
    assert_eq!(config.logging.level, "info");
  }

  #[test]
  fn test_missing_explicit_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Config::load(Some(dir.path().join("nope.yaml").as_path())).is_err());
  }

  #[test]
  fn test_rejects_bad_threshold() {
    let file = write_config("storage:\n  quota_threshold: 1.5\n");
    assert!(Config::load(Some(file.path())).is_err());
  }

  #[test]
  fn test_remote_url_required() {
    assert!(Config::default().remote_url().is_err());
  }
}
