use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::executor::QueryPolicy;

/// Upper bound for `cache.default_ttl_secs` (30 days).
const MAX_TTL_SECS: i64 = 30 * 24 * 60 * 60;
/// Upper bound for `session.refresh_threshold_secs` (one day).
const MAX_REFRESH_THRESHOLD_SECS: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub backend: BackendConfig,
  #[serde(default)]
  pub query: QueryConfig,
  #[serde(default)]
  pub session: SessionConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub probe: ProbeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
  /// Base URL of the hosted store (e.g. "https://abc.supabase.co")
  pub url: String,
  /// Public API key. Falls back to FIELDOPS_ANON_KEY when not set here.
  pub anon_key: Option<String>,
}

/// Process-wide defaults for the retrying executor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
  pub timeout_ms: u64,
  pub max_attempts: u32,
  pub initial_delay_ms: u64,
  pub backoff_multiplier: f64,
  pub max_delay_ms: u64,
}

impl Default for QueryConfig {
  fn default() -> Self {
    Self {
      timeout_ms: 10_000,
      max_attempts: 3,
      initial_delay_ms: 1000,
      backoff_multiplier: 2.0,
      max_delay_ms: 5000,
    }
  }
}

impl QueryConfig {
  pub fn policy(&self) -> QueryPolicy {
    QueryPolicy {
      timeout: Duration::from_millis(self.timeout_ms),
      max_attempts: self.max_attempts,
      initial_delay: Duration::from_millis(self.initial_delay_ms),
      backoff_multiplier: self.backoff_multiplier,
      max_delay: Duration::from_millis(self.max_delay_ms),
      ..QueryPolicy::default()
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
  /// Refresh the access token when less than this much validity is left
  pub refresh_threshold_secs: i64,
}

impl Default for SessionConfig {
  fn default() -> Self {
    Self {
      refresh_threshold_secs: 300,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub default_ttl_secs: i64,
  pub janitor_interval_secs: u64,
  /// Marks the cache's keys in durable storage
  pub key_prefix: String,
  /// Mirror the cache to disk; when false everything stays in memory
  pub persist: bool,
  /// Database location (default: $XDG_DATA_HOME/fieldops/cache.db)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      default_ttl_secs: 300,
      janitor_interval_secs: 60,
      key_prefix: crate::cache::DEFAULT_PREFIX.to_string(),
      persist: true,
      path: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
  pub timeout_ms: u64,
}

impl Default for ProbeConfig {
  fn default() -> Self {
    Self { timeout_ms: 3000 }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./fieldops.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/fieldops/config.yaml
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
        "No configuration file found. Create one at ~/.config/fieldops/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("fieldops.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("fieldops").join("config.yaml");
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
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.query.max_attempts < 1 {
      return Err(eyre!("query.max_attempts must be at least 1"));
    }
    if self.query.backoff_multiplier < 1.0 {
      return Err(eyre!("query.backoff_multiplier must be at least 1.0"));
    }
    if self.query.timeout_ms == 0 || self.probe.timeout_ms == 0 {
      return Err(eyre!("timeouts must be greater than zero"));
    }
    if self.cache.janitor_interval_secs == 0 {
      return Err(eyre!("cache.janitor_interval_secs must be greater than zero"));
    }
    if !(1..=MAX_TTL_SECS).contains(&self.cache.default_ttl_secs) {
      return Err(eyre!(
        "cache.default_ttl_secs must be between 1 and {}",
        MAX_TTL_SECS
      ));
    }
    if !(0..=MAX_REFRESH_THRESHOLD_SECS).contains(&self.session.refresh_threshold_secs) {
      return Err(eyre!(
        "session.refresh_threshold_secs must be between 0 and {}",
        MAX_REFRESH_THRESHOLD_SECS
      ));
    }
    url::Url::parse(&self.backend.url)
      .map_err(|e| eyre!("backend.url is not a valid URL: {}", e))?;
    Ok(())
  }

  /// Get the public API key from the config or FIELDOPS_ANON_KEY.
  pub fn anon_key(&self) -> Result<String> {
    if let Some(key) = &self.backend.anon_key {
      return Ok(key.clone());
    }
    std::env::var("FIELDOPS_ANON_KEY").map_err(|_| {
      eyre!("API key not found. Set backend.anon_key or the FIELDOPS_ANON_KEY environment variable.")
    })
  }

  /// Get sign-in credentials from FIELDOPS_EMAIL and FIELDOPS_PASSWORD.
  pub fn credentials() -> Result<(String, String)> {
    let email = std::env::var("FIELDOPS_EMAIL")
      .map_err(|_| eyre!("Email not found. Set the FIELDOPS_EMAIL environment variable."))?;
    let password = std::env::var("FIELDOPS_PASSWORD")
      .map_err(|_| eyre!("Password not found. Set the FIELDOPS_PASSWORD environment variable."))?;
    Ok((email, password))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::from_yaml("backend:\n  url: https://abc.example.co\n").unwrap();

    assert_eq!(config.query.max_attempts, 3);
    assert_eq!(config.session.refresh_threshold_secs, 300);
    assert_eq!(config.cache.default_ttl_secs, 300);
    assert_eq!(config.cache.janitor_interval_secs, 60);
    assert_eq!(config.cache.key_prefix, "fieldops_cache_");
    assert!(config.cache.persist);
    assert_eq!(config.probe.timeout_ms, 3000);

    let policy = config.query.policy();
    assert_eq!(policy.initial_delay, Duration::from_millis(1000));
    assert_eq!(policy.max_delay, Duration::from_millis(5000));
  }

  #[test]
  fn test_partial_sections_merge_with_defaults() {
    let yaml = r#"
backend:
  url: https://abc.example.co
  anon_key: public
query:
  max_attempts: 5
cache:
  persist: false
"#;
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(config.query.max_attempts, 5);
    assert_eq!(config.query.timeout_ms, 10_000);
    assert!(!config.cache.persist);
    assert_eq!(config.anon_key().unwrap(), "public");
  }

  #[test]
  fn test_rejects_bad_values() {
    let base = "backend:\n  url: https://abc.example.co\n";
    assert!(Config::from_yaml(&format!("{}query:\n  max_attempts: 0\n", base)).is_err());
    assert!(Config::from_yaml(&format!("{}query:\n  backoff_multiplier: 0.5\n", base)).is_err());
    assert!(Config::from_yaml("backend:\n  url: not a url\n").is_err());
    assert!(Config::from_yaml("query:\n  max_attempts: 2\n").is_err());
  }

  #[test]
  fn test_rejects_out_of_range_durations() {
    let base = "backend:\n  url: https://abc.example.co\n";
    assert!(Config::from_yaml(&format!("{}cache:\n  default_ttl_secs: -5\n", base)).is_err());
    assert!(Config::from_yaml(&format!("{}cache:\n  default_ttl_secs: 0\n", base)).is_err());
    assert!(Config::from_yaml(&format!(
      "{}session:\n  refresh_threshold_secs: 9223372036854775807\n",
      base
    ))
    .is_err());
    assert!(Config::from_yaml(&format!("{}session:\n  refresh_threshold_secs: -1\n", base)).is_err());

    let config = Config::from_yaml(&format!(
      "{}cache:\n  default_ttl_secs: 2592000\nsession:\n  refresh_threshold_secs: 0\n",
      base
    ))
    .unwrap();
    assert_eq!(config.cache.default_ttl_secs, 2_592_000);
  }

  #[test]
  fn test_missing_explicit_path() {
    let err = Config::load(Some(Path::new("/nonexistent/fieldops.yaml"))).unwrap_err();
    assert!(err.to_string().contains("not found"));
  }
}
