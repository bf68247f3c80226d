use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SyncError};

/// Engine tuning knobs. Every field has a default matching the shipped
/// behavior, so an empty config file (or no file at all) is valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Seconds between periodic drain attempts while online.
  pub sync_interval_secs: u64,

  /// Replay attempts before an operation is dropped to the dead-letter
  /// list.
  pub max_retries: u32,

  /// Default cache entry lifetime when a request doesn't specify one.
  pub default_cache_ttl_secs: i64,

  /// Per-request timeout, applied to direct calls and to each replayed
  /// operation so one hung request cannot stall a drain pass.
  pub request_timeout_secs: u64,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      sync_interval_secs: 30,
      max_retries: 3,
      default_cache_ttl_secs: 24 * 60 * 60,
      request_timeout_secs: 30,
    }
  }
}

impl EngineConfig {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./ebs-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/ebs-sync/config.yaml
  ///
  /// Falls back to defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(SyncError::Config(format!(
          "config file not found: {}",
          p.display()
        )));
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
    let local = PathBuf::from("ebs-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("ebs-sync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| SyncError::Config(format!("failed to read {}: {}", path.display(), e)))?;

    serde_yaml::from_str(&contents)
      .map_err(|e| SyncError::Config(format!("failed to parse {}: {}", path.display(), e)))
  }

  pub fn sync_interval(&self) -> Duration {
    Duration::from_secs(self.sync_interval_secs)
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }

  pub fn default_cache_ttl(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.default_cache_ttl_secs)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_tuning_values() {
    let config = EngineConfig::default();
    assert_eq!(config.sync_interval_secs, 30);
    assert_eq!(config.max_retries, 3);
    assert_eq!(config.default_cache_ttl_secs, 86_400);
  }

  #[test]
  fn partial_yaml_fills_in_defaults() {
    let config: EngineConfig = serde_yaml::from_str("max_retries: 5").unwrap();
    assert_eq!(config.max_retries, 5);
    assert_eq!(config.sync_interval_secs, 30);
  }

  #[test]
  fn missing_explicit_path_is_an_error() {
    let result = EngineConfig::load(Some(Path::new("/nonexistent/ebs-sync.yaml")));
    assert!(result.is_err());
  }

  #[test]
  fn load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "sync_interval_secs: 5\nrequest_timeout_secs: 2\n").unwrap();

    let config = EngineConfig::load(Some(&path)).unwrap();
    assert_eq!(config.sync_interval(), Duration::from_secs(5));
    assert_eq!(config.request_timeout(), Duration::from_secs(2));
  }
}
