//! Periodic purge of expired cache entries.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::tiered::TieredCache;

/// Background task sweeping expired entries on a fixed interval.
///
/// The task stops when the handle is dropped.
pub struct Janitor {
  handle: JoinHandle<()>,
}

impl Janitor {
  /// Start sweeping `cache` every `interval`. The first sweep happens one
  /// interval after spawning.
  pub fn spawn(cache: Arc<TieredCache>, interval: Duration) -> Self {
    let handle = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      // The first tick completes immediately
      ticker.tick().await;

      loop {
        ticker.tick().await;
        let purged = cache.purge_expired();
        if purged > 0 {
          debug!(purged, "Janitor sweep");
        }
      }
    });

    Self { handle }
  }

  /// Stop the janitor.
  pub fn stop(self) {
    drop(self);
  }
}

impl Drop for Janitor {
  fn drop(&mut self) {
    self.handle.abort();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{DurableStore, MemoryStore};
  use crate::clock::ManualClock;

  #[tokio::test(start_paused = true)]
  async fn test_sweeps_without_reads() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::default());
    let cache = Arc::new(TieredCache::new(store.clone(), clock.clone()));
    cache
      .set("k", &1, Some(chrono::Duration::seconds(30)))
      .unwrap();

    let _janitor = Janitor::spawn(cache.clone(), Duration::from_secs(60));
    clock.advance(chrono::Duration::seconds(31));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(store.keys().unwrap().len(), 1);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(store.keys().unwrap().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_stop_halts_sweeps() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::default());
    let cache = Arc::new(TieredCache::new(store.clone(), clock.clone()));
    cache
      .set("k", &1, Some(chrono::Duration::seconds(1)))
      .unwrap();

    let janitor = Janitor::spawn(cache.clone(), Duration::from_secs(60));
    janitor.stop();
    clock.advance(chrono::Duration::seconds(5));

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(store.keys().unwrap().len(), 1);
  }
}
