use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the admin API, e.g. https://isp.example.com/api/v1
  pub url: String,
  /// Sent as X-Tenant-ID on every request when set
  pub tenant_id: Option<String>,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
  /// How long a fetched result counts as fresh. 0 = always refetch on read.
  #[serde(default)]
  pub stale_time_secs: u64,
  /// Keep a snapshot of query results on disk between runs
  #[serde(default)]
  pub persist: bool,
  /// Snapshot database location (defaults to the platform data dir)
  pub path: Option<PathBuf>,
}

impl CacheConfig {
  pub fn stale_time(&self) -> Duration {
    Duration::from_secs(self.stale_time_secs)
  }
}

fn default_timeout_secs() -> u64 {
  30
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./ispadmin.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/ispadmin/config.yaml
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
        "No configuration file found. Create one at ~/.config/ispadmin/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("ispadmin.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("ispadmin").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml_str(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.api.url.trim().is_empty() {
      return Err(eyre!("api.url must not be empty"));
    }
    Ok(config)
  }

  /// Get the API bearer token from environment variables.
  ///
  /// Checks ISPADMIN_API_TOKEN first, then ISP_API_TOKEN as fallback. Some
  /// deployments authenticate by network position only, so a missing token is
  /// not an error.
  pub fn get_api_token() -> Option<String> {
    std::env::var("ISPADMIN_API_TOKEN")
      .or_else(|_| std::env::var("ISP_API_TOKEN"))
      .ok()
      .filter(|t| !t.trim().is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::from_yaml_str("api:\n  url: https://isp.example.com/api/v1\n").unwrap();
    assert_eq!(config.api.url, "https://isp.example.com/api/v1");
    assert_eq!(config.api.timeout_secs, 30);
    assert!(config.api.tenant_id.is_none());
    assert_eq!(config.cache.stale_time(), Duration::ZERO);
    assert!(!config.cache.persist);
  }

  #[test]
  fn test_full_config() {
    let yaml = r#"
api:
  url: https://isp.example.com/api/v1
  tenant_id: tenant-42
  timeout_secs: 5
cache:
  stale_time_secs: 60
  persist: true
  path: /tmp/ispadmin.db
"#;
    let config = Config::from_yaml_str(yaml).unwrap();
    assert_eq!(config.api.tenant_id.as_deref(), Some("tenant-42"));
    assert_eq!(config.api.timeout_secs, 5);
    assert_eq!(config.cache.stale_time(), Duration::from_secs(60));
    assert!(config.cache.persist);
    assert_eq!(config.cache.path, Some(PathBuf::from("/tmp/ispadmin.db")));
  }

  #[test]
  fn test_empty_url_is_rejected() {
    assert!(Config::from_yaml_str("api:\n  url: ''\n").is_err());
    assert!(Config::from_yaml_str("cache:\n  persist: true\n").is_err());
  }

  #[test]
  fn test_load_explicit_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "api:\n  url: http://localhost:8000").unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.api.url, "http://localhost:8000");
  }

  #[test]
  fn test_load_missing_explicit_path() {
    let err = Config::load(Some(Path::new("/nonexistent/ispadmin.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
