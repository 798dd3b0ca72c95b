//! Core traits and types for the caching system.

use chrono::Duration;
use color_eyre::Result;

/// Durable string key/value storage mirrored by the tiered cache.
///
/// Calls are synchronous. Implementations must tolerate removing keys that
/// do not exist.
pub trait DurableStore: Send + Sync {
  fn get_item(&self, key: &str) -> Result<Option<String>>;

  fn set_item(&self, key: &str, value: &str) -> Result<()>;

  fn remove_item(&self, key: &str) -> Result<()>;

  /// All keys currently stored.
  fn keys(&self) -> Result<Vec<String>>;
}

/// Result from a cache-first read, including where the data came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// Age of the cached value (if from cache)
  pub age: Option<Duration>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      age: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, age: Option<Duration>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      age,
    }
  }
}

/// Indicates where data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Unexpired data from the cache
  Cache,
}
