use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::{Manifest, SqliteStore};

/// Tag of the current cache generation. Bumping it invalidates the whole cache.
pub const DEFAULT_TAG: &str = "ulisse-voice-cache-v1";

/// Where the dashboard is served from when no origin is configured.
pub const DEFAULT_ORIGIN: &str = "http://localhost:8000";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Base URL that manifest locators are resolved against
  pub origin: String,
  pub cache: CacheConfig,
  pub log: LogConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: DEFAULT_ORIGIN.to_string(),
      cache: CacheConfig::default(),
      log: LogConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Generation tag (name + version suffix)
  pub tag: String,
  /// Assets populated at install time, in order
  pub manifest: Manifest,
  /// Database file (default: $XDG_DATA_HOME/ulisse-offline/cache.db)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      tag: DEFAULT_TAG.to_string(),
      manifest: Manifest::default(),
      path: None,
    }
  }
}

impl CacheConfig {
  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.path {
      Some(path) => Ok(path.clone()),
      None => Ok(SqliteStore::default_path()?),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Filter directive, overridden by RUST_LOG
  pub level: String,
  /// Also write daily log files here
  pub directory: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      directory: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./ulisse-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/ulisse-offline/config.yaml
  ///
  /// Without any file the built-in defaults apply.
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
    // Check current directory
    let local = PathBuf::from("ulisse-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("ulisse-offline").join("config.yaml");
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

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.cache.tag.trim().is_empty() {
      return Err(eyre!("cache.tag must not be empty"));
    }
    Ok(config)
  }

  /// Apply command line overrides on top of the loaded file.
  pub fn with_overrides(self, origin: Option<String>, tag: Option<String>) -> Self {
    Self {
      origin: origin.unwrap_or(self.origin),
      cache: CacheConfig {
        tag: tag.unwrap_or(self.cache.tag),
        ..self.cache
      },
      ..self
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::DEFAULT_MANIFEST;

  #[test]
  fn test_empty_file_uses_defaults() {
    let config = Config::parse("{}").unwrap();
    assert_eq!(config.origin, DEFAULT_ORIGIN);
    assert_eq!(config.cache.tag, DEFAULT_TAG);
    assert_eq!(config.cache.manifest, Manifest::default());
    assert_eq!(config.log.level, "info");
  }

  #[test]
  fn test_partial_file() {
    let config = Config::parse(
      r#"
origin: https://ulisse.example.com
cache:
  tag: ulisse-voice-cache-v2
  manifest:
    - /dashboard/voice-creator
    - /dashboard/manifest.json
log:
  directory: /tmp/ulisse-logs
"#,
    )
    .unwrap();

    assert_eq!(config.origin, "https://ulisse.example.com");
    assert_eq!(config.cache.tag, "ulisse-voice-cache-v2");
    assert_eq!(
      config.cache.manifest,
      Manifest::new(["/dashboard/voice-creator", "/dashboard/manifest.json"])
    );
    assert_eq!(config.cache.path, None);
    assert_eq!(config.log.level, "info");
    assert_eq!(config.log.directory, Some(PathBuf::from("/tmp/ulisse-logs")));
  }

  #[test]
  fn test_empty_tag_rejected() {
    assert!(Config::parse("cache:\n  tag: \"\"\n").is_err());
  }

  #[test]
  fn test_overrides() {
    let config = Config::default().with_overrides(None, Some("ulisse-voice-cache-v3".to_string()));
    assert_eq!(config.origin, DEFAULT_ORIGIN);
    assert_eq!(config.cache.tag, "ulisse-voice-cache-v3");
    assert_eq!(config.cache.manifest.len(), DEFAULT_MANIFEST.len());
  }

  #[test]
  fn test_missing_explicit_path() {
    let err = Config::load(Some(Path::new("/nonexistent/ulisse-offline.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_explicit_database_path() {
    let config = Config::parse("cache:\n  path: /var/lib/ulisse/cache.db\n").unwrap();
    assert_eq!(
      config.cache.database_path().unwrap(),
      PathBuf::from("/var/lib/ulisse/cache.db")
    );
  }
}
