//! Cache-first query hook with stale-while-revalidate.
//!
//! A `CachedQuery<T>` binds a cache key to a fetcher. Mounting it serves a
//! fresh cached value immediately, or starts a load through the executor.
//! Results arrive on a channel and are picked up by `poll()` from the
//! caller's tick loop.
//!
//! # Example
//!
//! ```ignore
//! let rest = rest_client.clone();
//! let mut query = CachedQuery::new(client, key, move || {
//!     let rest = rest.clone();
//!     async move { rest.select::<Account>(&ListQuery::new()).await }
//! }, CachedQueryOptions::default().stale_while_revalidate(true));
//!
//! query.mount();
//!
//! // In the tick loop
//! if query.poll() {
//!     render(query.data());
//! }
//! ```

mod client;

pub use client::QueryClient;
#[cfg(test)]
pub(crate) use client::tests::test_client;

use chrono::Duration;
use color_eyre::Result;
use futures::future::BoxFuture;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::classify::{ClassifiedError, ErrorKind};
use crate::executor::QueryOutcome;

type FetcherFn<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Called with the error of a failed foreground load.
pub type ErrorCallback = Arc<dyn Fn(&ClassifiedError) + Send + Sync>;

#[derive(Clone, Default)]
pub struct CachedQueryOptions {
  /// TTL for values written by this query; the cache default when unset
  pub ttl: Option<Duration>,
  /// Refresh a cached value in the background after serving it
  pub stale_while_revalidate: bool,
  pub on_error: Option<ErrorCallback>,
}

impl CachedQueryOptions {
  pub fn ttl(mut self, ttl: Duration) -> Self {
    self.ttl = Some(ttl);
    self
  }

  pub fn stale_while_revalidate(mut self, enabled: bool) -> Self {
    self.stale_while_revalidate = enabled;
    self
  }

  pub fn on_error(mut self, callback: impl Fn(&ClassifiedError) + Send + Sync + 'static) -> Self {
    self.on_error = Some(Arc::new(callback));
    self
  }
}

enum Message<T> {
  /// A foreground load finished
  Loaded(QueryOutcome<T>),
  /// A background revalidation produced new data
  Revalidated(T),
}

/// Cache-first query bound to one key at a time.
///
/// Only the most recently started fetch can change the visible state.
/// Starting a new one drops the receiver of the previous one, so its result
/// still lands in the cache but is never shown.
pub struct CachedQuery<T> {
  client: QueryClient,
  key: String,
  fetcher: FetcherFn<T>,
  options: CachedQueryOptions,
  data: Option<T>,
  error: Option<ClassifiedError>,
  is_loading: bool,
  receiver: Option<mpsc::UnboundedReceiver<Message<T>>>,
}

impl<T> CachedQuery<T>
where
  T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
  pub fn new<F, Fut>(
    client: QueryClient,
    key: impl Into<String>,
    fetcher: F,
    options: CachedQueryOptions,
  ) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    Self {
      client,
      key: key.into(),
      fetcher: Arc::new(move || -> BoxFuture<'static, Result<T>> { Box::pin(fetcher()) }),
      options,
      data: None,
      error: None,
      is_loading: false,
      receiver: None,
    }
  }

  /// Serve the cached value if fresh, otherwise start loading.
  pub fn mount(&mut self) {
    self.receiver = None;
    self.error = None;

    match self.client.cache().get::<T>(&self.key) {
      Some(data) => {
        debug!(key = %self.key, "Serving cached value");
        self.data = Some(data);
        self.is_loading = false;
        if self.options.stale_while_revalidate {
          self.revalidate();
        }
      }
      None => {
        self.data = None;
        self.start_load();
      }
    }
  }

  /// Point the query at a different key and mount it. Same key is a no-op.
  pub fn set_key(&mut self, key: impl Into<String>) {
    let key = key.into();
    if key != self.key {
      self.key = key;
      self.mount();
    }
  }

  /// Load from the network regardless of the cache. The current data stays
  /// visible until the result arrives.
  pub fn refetch(&mut self) {
    self.start_load();
  }

  /// Apply a result from a pending fetch. Returns `true` if the visible
  /// state changed.
  pub fn poll(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    match receiver.try_recv() {
      Ok(Message::Loaded(outcome)) => {
        self.receiver = None;
        self.is_loading = false;
        match outcome.into_result() {
          Ok(data) => {
            self.data = Some(data);
            self.error = None;
          }
          Err(error) => {
            if let Some(on_error) = &self.options.on_error {
              on_error(&error);
            }
            self.error = Some(error);
          }
        }
        true
      }
      Ok(Message::Revalidated(data)) => {
        self.receiver = None;
        self.data = Some(data);
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        // A failed revalidation ends without a message and stays invisible
        self.receiver = None;
        if self.is_loading {
          self.is_loading = false;
          self.error = Some(ClassifiedError::new(ErrorKind::Other, "Query was cancelled"));
          true
        } else {
          false
        }
      }
    }
  }

  pub fn key(&self) -> &str {
    &self.key
  }

  pub fn data(&self) -> Option<&T> {
    self.data.as_ref()
  }

  pub fn is_loading(&self) -> bool {
    self.is_loading
  }

  pub fn error(&self) -> Option<&ClassifiedError> {
    self.error.as_ref()
  }

  fn start_load(&mut self) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.is_loading = true;

    let client = self.client.clone();
    let key = self.key.clone();
    let ttl = self.options.ttl;
    let fetcher = self.fetcher.clone();
    tokio::spawn(async move {
      let outcome = client.load(&key, ttl, move || fetcher()).await;
      // Receiver may have been dropped by a newer fetch
      let _ = tx.send(Message::Loaded(outcome));
    });
  }

  fn revalidate(&mut self) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);

    let client = self.client.clone();
    let key = self.key.clone();
    let ttl = self.options.ttl;
    let fetcher = self.fetcher.clone();
    tokio::spawn(async move {
      match client.load(&key, ttl, move || fetcher()).await.into_result() {
        Ok(data) => {
          let _ = tx.send(Message::Revalidated(data));
        }
        Err(e) => warn!(key = %key, "Background revalidation failed: {}", e),
      }
    });
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for CachedQuery<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CachedQuery")
      .field("key", &self.key)
      .field("data", &self.data)
      .field("error", &self.error)
      .field("is_loading", &self.is_loading)
      .finish_non_exhaustive()
  }
}
