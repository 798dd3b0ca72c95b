//! Repository over the REST client: cache-first reads, invalidating writes.

use color_eyre::Result;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::CacheResult;
use crate::executor::PolicyOverrides;
use crate::query::QueryClient;

use super::cache::{detail_key, ListQuery};
use super::client::RestClient;
use super::types::Entity;

/// Backend access with transparent caching.
///
/// Reads are served from the tiered cache when fresh and otherwise loaded
/// through the retry executor. Writes always go to the network, then drop
/// every cached entry for the table they touched and cache the returned row
/// under its detail key.
#[derive(Clone)]
pub struct CachedBackend {
  client: RestClient,
  queries: QueryClient,
}

impl CachedBackend {
  pub fn new(client: RestClient, queries: QueryClient) -> Self {
    Self { client, queries }
  }

  pub fn client(&self) -> &RestClient {
    &self.client
  }

  pub fn queries(&self) -> &QueryClient {
    &self.queries
  }

  /// List rows of `T`, cache-first.
  pub async fn list<T: Entity>(&self, query: &ListQuery) -> Result<CacheResult<Vec<T>>> {
    let key = query.cache_key(T::table());
    let client = self.client.clone();
    let query = query.clone();

    let result = self
      .queries
      .fetch(&key, None, move || {
        let client = client.clone();
        let query = query.clone();
        async move { client.select::<T>(&query).await }
      })
      .await?;

    Ok(result)
  }

  /// Get one row of `T`, cache-first.
  pub async fn get<T: Entity>(&self, id: &str) -> Result<CacheResult<T>> {
    let key = detail_key(T::table(), id);
    let client = self.client.clone();
    let id = id.to_string();

    let result = self
      .queries
      .fetch(&key, None, move || {
        let client = client.clone();
        let id = id.clone();
        async move { client.get::<T>(&id).await }
      })
      .await?;

    Ok(result)
  }

  /// Insert a row. Inserts are not idempotent, so they are never retried.
  pub async fn create<T: Entity>(&self, row: &Value) -> Result<T> {
    let overrides = PolicyOverrides::new()
      .max_attempts(1)
      .label(format!("create {}", T::table()));

    let created = self
      .queries
      .executor()
      .execute_with(|| self.client.insert::<T>(row), overrides)
      .await
      .into_result()?;

    self.invalidate::<T>();
    self.remember(&created);
    Ok(created)
  }

  pub async fn update<T: Entity>(&self, id: &str, patch: &Value) -> Result<T> {
    let overrides = PolicyOverrides::new().label(format!("update {}", T::table()));

    let updated = self
      .queries
      .executor()
      .execute_with(|| self.client.update::<T>(id, patch), overrides)
      .await
      .into_result()?;

    self.invalidate::<T>();
    self.remember(&updated);
    Ok(updated)
  }

  pub async fn delete<T: Entity>(&self, id: &str) -> Result<()> {
    let overrides = PolicyOverrides::new().label(format!("delete {}", T::table()));

    self
      .queries
      .executor()
      .execute_with(|| self.client.delete::<T>(id), overrides)
      .await
      .into_result()?;

    self.invalidate::<T>();
    Ok(())
  }

  fn invalidate<T: Entity>(&self) {
    let removed = self.queries.cache().invalidate_pattern(T::table());
    debug!(table = T::table(), removed, "Invalidated cached queries");
  }

  fn remember<T: Entity>(&self, row: &T) {
    let key = detail_key(T::table(), row.id());
    if let Err(e) = self.queries.cache().set(&key, row, None) {
      warn!(key = %key, "Failed to cache written row: {}", e);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::types::{Account, Space};
  use crate::cache::CacheSource;
  use crate::query::test_client;
  use crate::session::mock::ScriptedAuth;
  use std::sync::Arc;
  use url::Url;

  fn backend() -> CachedBackend {
    let (queries, _clock) = test_client();
    let client = RestClient::new(
      reqwest::Client::new(),
      Url::parse("http://127.0.0.1:9").unwrap(),
      "anon".to_string(),
      Arc::new(ScriptedAuth::signed_out()),
    );
    CachedBackend::new(client, queries)
  }

  fn account(id: &str) -> Account {
    Account {
      id: id.to_string(),
      name: "Harbor Foods".to_string(),
      contact_name: None,
      email: None,
      phone: None,
      billing_address: None,
      active: true,
      created_at: None,
    }
  }

  #[tokio::test]
  async fn test_list_served_from_cache() {
    let backend = backend();
    let query = ListQuery::new();
    backend
      .queries()
      .cache()
      .set(&query.cache_key("accounts"), &vec![account("a1")], None)
      .unwrap();

    let result = backend.list::<Account>(&query).await.unwrap();

    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(result.data, vec![account("a1")]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_update_keeps_cache() {
    let backend = backend();
    let key = detail_key("accounts", "a1");
    backend.queries().cache().set(&key, &account("a1"), None).unwrap();

    let err = backend
      .update::<Account>("a1", &serde_json::json!({"name": "Renamed"}))
      .await
      .unwrap_err();

    assert!(err.to_string().starts_with("connectivity"));
    assert!(backend.queries().cache().has(&key));
  }

  #[test]
  fn test_invalidate_only_touches_own_table() {
    let backend = backend();
    let cache = backend.queries().cache();
    cache.set(&ListQuery::new().cache_key("accounts"), &1u32, None).unwrap();
    cache.set(&detail_key("accounts", "a1"), &1u32, None).unwrap();
    cache.set(&ListQuery::new().cache_key("spaces"), &1u32, None).unwrap();

    backend.invalidate::<Account>();

    assert!(!cache.has(&ListQuery::new().cache_key("accounts")));
    assert!(!cache.has(&detail_key("accounts", "a1")));
    assert!(cache.has(&ListQuery::new().cache_key(Space::table())));
  }

  #[tokio::test]
  async fn test_written_row_serves_detail_reads() {
    let backend = backend();

    backend.remember(&account("a7"));
    let result = backend.get::<Account>("a7").await.unwrap();

    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(result.data, account("a7"));
  }
}
