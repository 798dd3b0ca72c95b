//! Two-tier TTL cache: an authoritative in-memory map mirrored to durable storage.

use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::entry::CacheEntry;
use super::traits::DurableStore;
use crate::clock::Clock;

/// Prefix marking durable keys owned by the cache.
pub const DEFAULT_PREFIX: &str = "fieldops_cache_";

/// Keyed TTL cache with an in-memory layer and a best-effort durable mirror.
///
/// The memory layer is authoritative for the lifetime of the process. Durable
/// write failures are logged and otherwise ignored. Writers are not
/// coordinated beyond the map lock: concurrent writes to the same key are
/// last-write-wins, and other processes sharing the durable store are not
/// synchronized with.
pub struct TieredCache {
  memory: Mutex<HashMap<String, CacheEntry<Value>>>,
  durable: Arc<dyn DurableStore>,
  clock: Arc<dyn Clock>,
  default_ttl: Duration,
  prefix: String,
}

impl TieredCache {
  pub fn new(durable: Arc<dyn DurableStore>, clock: Arc<dyn Clock>) -> Self {
    Self {
      memory: Mutex::new(HashMap::new()),
      durable,
      clock,
      default_ttl: Duration::minutes(5),
      prefix: DEFAULT_PREFIX.to_string(),
    }
  }

  /// Set the TTL used when `set` is called without one.
  pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
    self.default_ttl = ttl;
    self
  }

  /// Set the prefix that marks this cache's keys in durable storage.
  pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.prefix = prefix.into();
    self
  }

  pub fn default_ttl(&self) -> Duration {
    self.default_ttl
  }

  /// Store a value in memory and mirror it to durable storage.
  ///
  /// Only fails if `data` cannot be serialized.
  pub fn set<T: Serialize>(&self, key: &str, data: &T, ttl: Option<Duration>) -> Result<()> {
    let data =
      serde_json::to_value(data).map_err(|e| eyre!("Failed to serialize cache value: {}", e))?;
    let entry = CacheEntry::new(data, self.clock.now(), ttl.unwrap_or(self.default_ttl));

    self.write_durable(key, &entry);
    self.memory().insert(key.to_string(), entry);
    Ok(())
  }

  /// Get an unexpired value, hydrating from durable storage on a memory miss.
  ///
  /// Expired entries found on the way are deleted from both layers.
  pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let now = self.clock.now();

    let cached = {
      let mut memory = self.memory();
      match memory.get(key) {
        Some(entry) if entry.is_expired(now) => {
          memory.remove(key);
          None
        }
        Some(entry) => Some(entry.clone()),
        None => None,
      }
    };

    let entry = match cached {
      Some(entry) => entry,
      None => self.hydrate(key, now)?,
    };

    match serde_json::from_value(entry.data) {
      Ok(data) => Some(data),
      Err(e) => {
        warn!(key, "Cached value has unexpected shape, ignoring: {}", e);
        None
      }
    }
  }

  /// Remove a key from both layers. Absent keys are fine.
  pub fn delete(&self, key: &str) {
    self.memory().remove(key);
    self.remove_durable(key);
  }

  /// Wipe memory and every durable entry carrying this cache's prefix.
  /// Unrelated durable keys are left alone.
  pub fn clear(&self) {
    self.memory().clear();
    for key in self.durable_keys() {
      self.remove_durable(&key);
    }
    info!("Cache cleared");
  }

  /// Delete every key containing `pattern`, in memory and in durable storage.
  ///
  /// Returns the number of distinct keys removed.
  pub fn invalidate_pattern(&self, pattern: &str) -> usize {
    let mut removed: HashSet<String> = HashSet::new();

    {
      let mut memory = self.memory();
      memory.retain(|key, _| {
        if key.contains(pattern) {
          removed.insert(key.clone());
          false
        } else {
          true
        }
      });
    }

    for key in self.durable_keys() {
      if key.contains(pattern) {
        removed.insert(key);
      }
    }

    for key in &removed {
      self.remove_durable(key);
    }

    if !removed.is_empty() {
      info!(pattern, count = removed.len(), "Invalidated cache entries");
    }
    removed.len()
  }

  /// Whether any layer holds the key, expired or not. Diagnostics only.
  pub fn has(&self, key: &str) -> bool {
    if self.memory().contains_key(key) {
      return true;
    }
    matches!(self.durable.get_item(&self.durable_key(key)), Ok(Some(_)))
  }

  /// Time since the key was last written, from the memory layer only.
  pub fn age(&self, key: &str) -> Option<Duration> {
    let now = self.clock.now();
    self.memory().get(key).map(|entry| entry.age(now))
  }

  /// Raw entry for a key from either layer, ignoring expiry. Diagnostics only.
  pub fn peek(&self, key: &str) -> Option<CacheEntry<Value>> {
    if let Some(entry) = self.memory().get(key) {
      return Some(entry.clone());
    }
    self.read_durable(key)
  }

  /// Delete every expired entry from both layers, whether or not anything is
  /// reading it. Unreadable durable entries are deleted too.
  ///
  /// Returns the number of distinct keys purged.
  pub fn purge_expired(&self) -> usize {
    let now = self.clock.now();
    let mut purged: HashSet<String> = HashSet::new();

    {
      let mut memory = self.memory();
      memory.retain(|key, entry| {
        if entry.is_expired(now) {
          purged.insert(key.clone());
          false
        } else {
          true
        }
      });
    }

    for key in self.durable_keys() {
      let expired = match self.read_durable(&key) {
        Some(entry) => entry.is_expired(now),
        None => true,
      };
      if expired {
        self.remove_durable(&key);
        purged.insert(key);
      }
    }

    debug!(count = purged.len(), "Purged expired cache entries");
    purged.len()
  }

  fn hydrate(&self, key: &str, now: DateTime<Utc>) -> Option<CacheEntry<Value>> {
    let entry = self.read_durable(key)?;
    if entry.is_expired(now) {
      self.remove_durable(key);
      return None;
    }

    debug!(key, "Hydrated cache entry from durable storage");
    self.memory().insert(key.to_string(), entry.clone());
    Some(entry)
  }

  fn read_durable(&self, key: &str) -> Option<CacheEntry<Value>> {
    let raw = match self.durable.get_item(&self.durable_key(key)) {
      Ok(raw) => raw?,
      Err(e) => {
        warn!(key, "Durable cache read failed: {}", e);
        return None;
      }
    };

    match serde_json::from_str(&raw) {
      Ok(entry) => Some(entry),
      Err(e) => {
        warn!(key, "Dropping unreadable durable cache entry: {}", e);
        self.remove_durable(key);
        None
      }
    }
  }

  fn write_durable(&self, key: &str, entry: &CacheEntry<Value>) {
    let written = serde_json::to_string(entry)
      .map_err(|e| eyre!("Failed to serialize cache entry: {}", e))
      .and_then(|raw| self.durable.set_item(&self.durable_key(key), &raw));
    if let Err(e) = written {
      warn!(key, "Durable cache write failed: {}", e);
    }
  }

  fn remove_durable(&self, key: &str) {
    if let Err(e) = self.durable.remove_item(&self.durable_key(key)) {
      warn!(key, "Durable cache delete failed: {}", e);
    }
  }

  /// Cache keys (prefix stripped) present in durable storage.
  fn durable_keys(&self) -> Vec<String> {
    match self.durable.keys() {
      Ok(keys) => keys
        .into_iter()
        .filter_map(|k| k.strip_prefix(&self.prefix).map(String::from))
        .collect(),
      Err(e) => {
        warn!("Failed to list durable cache keys: {}", e);
        Vec::new()
      }
    }
  }

  fn durable_key(&self, key: &str) -> String {
    format!("{}{}", self.prefix, key)
  }

  fn memory(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<Value>>> {
    self.memory.lock().unwrap_or_else(|e| e.into_inner())
  }
}
