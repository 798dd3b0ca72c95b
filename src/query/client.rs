use chrono::Duration;
use color_eyre::Result;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::cache::{CacheResult, TieredCache};
use crate::classify::{ClassifiedError, ErrorKind};
use crate::executor::{PolicyOverrides, QueryOutcome, RetryExecutor};

type SharedLoad = Shared<BoxFuture<'static, QueryOutcome<Value>>>;

/// Cache-first reads on top of the tiered cache and the retry executor.
///
/// Concurrent cache-miss loads of the same key share one in-flight executor
/// run: one network round trip, one cache write, the same outcome for every
/// caller.
#[derive(Clone)]
pub struct QueryClient {
  cache: Arc<TieredCache>,
  executor: RetryExecutor,
  in_flight: Arc<Mutex<HashMap<String, SharedLoad>>>,
}

impl QueryClient {
  /// Cached rows belong to the session that fetched them, so the executor is
  /// given a hook that empties the cache whenever it signs the user out.
  pub fn new(cache: Arc<TieredCache>, executor: RetryExecutor) -> Self {
    let on_sign_out = cache.clone();
    let executor = executor.with_sign_out_hook(move || {
      debug!("Signed out, clearing query cache");
      on_sign_out.clear();
    });
    Self {
      cache,
      executor,
      in_flight: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  pub fn cache(&self) -> &Arc<TieredCache> {
    &self.cache
  }

  pub fn executor(&self) -> &RetryExecutor {
    &self.executor
  }

  /// Return the cached value for `key` if fresh, otherwise load it.
  pub async fn fetch<T, F, Fut>(
    &self,
    key: &str,
    ttl: Option<Duration>,
    fetcher: F,
  ) -> Result<CacheResult<T>, ClassifiedError>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    if let Some(data) = self.cache.get::<T>(key) {
      debug!(key, "Cache hit");
      return Ok(CacheResult::from_cache(data, self.cache.age(key)));
    }

    self
      .load(key, ttl, fetcher)
      .await
      .into_result()
      .map(CacheResult::from_network)
  }

  /// Run `fetcher` through the executor and cache the result on success,
  /// joining a load of the same key that is already in flight.
  pub async fn load<T, F, Fut>(&self, key: &str, ttl: Option<Duration>, fetcher: F) -> QueryOutcome<T>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let shared = {
      let mut in_flight = self.in_flight();
      match in_flight.get(key) {
        Some(existing) => {
          debug!(key, "Joining in-flight load");
          existing.clone()
        }
        None => {
          let load = self
            .clone()
            .run_load(key.to_string(), ttl, fetcher)
            .boxed()
            .shared();
          in_flight.insert(key.to_string(), load.clone());
          load
        }
      }
    };

    decode(shared.await)
  }

  /// Number of keys with a load in flight.
  pub fn in_flight_count(&self) -> usize {
    self.in_flight().len()
  }

  async fn run_load<T, F, Fut>(self, key: String, ttl: Option<Duration>, fetcher: F) -> QueryOutcome<Value>
  where
    T: Serialize + Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let outcome = self
      .executor
      .execute_with(fetcher, PolicyOverrides::new().label(key.as_str()))
      .await;
    let outcome = encode(outcome);

    if let Some(data) = &outcome.data {
      if let Err(e) = self.cache.set(&key, data, ttl) {
        warn!(key = %key, "Failed to cache query result: {}", e);
      }
    }

    self.in_flight().remove(&key);
    outcome
  }

  fn in_flight(&self) -> MutexGuard<'_, HashMap<String, SharedLoad>> {
    self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

fn encode<T: Serialize>(outcome: QueryOutcome<T>) -> QueryOutcome<Value> {
  let attempts = outcome.attempts;
  match outcome.into_result() {
    Ok(data) => match serde_json::to_value(data) {
      Ok(value) => QueryOutcome::success(value, attempts),
      Err(e) => QueryOutcome::failure(
        ClassifiedError::new(ErrorKind::Other, format!("Failed to serialize query result: {}", e)),
        attempts,
      ),
    },
    Err(error) => QueryOutcome::failure(error, attempts),
  }
}

fn decode<T: DeserializeOwned>(outcome: QueryOutcome<Value>) -> QueryOutcome<T> {
  let attempts = outcome.attempts;
  match outcome.into_result() {
    Ok(value) => match serde_json::from_value(value) {
      Ok(data) => QueryOutcome::success(data, attempts),
      Err(e) => QueryOutcome::failure(
        ClassifiedError::new(ErrorKind::Other, format!("Failed to decode query result: {}", e)),
        attempts,
      ),
    },
    Err(error) => QueryOutcome::failure(error, attempts),
  }
}
