//! Backend reachability check for status displays.

use color_eyre::Result;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::backend::RestClient;
use crate::executor::{PolicyOverrides, RetryExecutor};

type PingFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Answers "is the backend reachable right now".
#[derive(Clone)]
pub struct ConnectionProbe {
  executor: RetryExecutor,
  ping: PingFn,
  timeout: Duration,
}

impl ConnectionProbe {
  pub fn new<F, Fut>(executor: RetryExecutor, ping: F, timeout: Duration) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
  {
    Self {
      executor,
      ping: Arc::new(move || -> BoxFuture<'static, Result<()>> { Box::pin(ping()) }),
      timeout,
    }
  }

  /// Probe that pings the REST surface with a one-row read.
  pub fn for_backend(executor: RetryExecutor, client: RestClient, timeout: Duration) -> Self {
    Self::new(
      executor,
      move || {
        let client = client.clone();
        async move { client.ping().await }
      },
      timeout,
    )
  }

  /// A valid session counts as connected. Otherwise run one short ping
  /// attempt through the executor. Never fails; any error means `false`.
  pub async fn check_connection(&self) -> bool {
    if self.executor.guard().has_valid_session().await {
      return true;
    }

    let overrides = PolicyOverrides::new()
      .max_attempts(1)
      .timeout(self.timeout)
      .label("connection probe");
    let outcome = self.executor.execute_with(|| (self.ping)(), overrides).await;

    if let Some(error) = &outcome.error {
      debug!("Backend unreachable: {}", error);
    }
    outcome.success
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::{Clock, ManualClock};
  use crate::executor::QueryPolicy;
  use crate::session::mock::ScriptedAuth;
  use crate::session::SessionGuard;
  use chrono::Duration as ChronoDuration;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn probe<F, Fut>(auth: ScriptedAuth, clock: Arc<ManualClock>, ping: F) -> ConnectionProbe
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
  {
    let guard = SessionGuard::new(Arc::new(auth), clock);
    let executor = RetryExecutor::new(guard, QueryPolicy::default());
    ConnectionProbe::new(executor, ping, Duration::from_millis(3000))
  }

  fn counting(result: fn() -> Result<()>) -> (Arc<AtomicU32>, impl Fn() -> futures::future::Ready<Result<()>>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let ping = move || {
      counter.fetch_add(1, Ordering::SeqCst);
      futures::future::ready(result())
    };
    (calls, ping)
  }

  #[tokio::test]
  async fn test_valid_session_skips_ping() {
    let clock = Arc::new(ManualClock::default());
    let auth = ScriptedAuth::signed_in(clock.now() + ChronoDuration::hours(1));
    let (calls, ping) = counting(|| Err(eyre!("network error")));

    assert!(probe(auth, clock, ping).check_connection().await);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_expired_session_falls_back_to_ping() {
    let clock = Arc::new(ManualClock::default());
    let auth = ScriptedAuth::signed_in(clock.now() - ChronoDuration::minutes(1));
    let (calls, ping) = counting(|| Ok(()));

    assert!(probe(auth, clock, ping).check_connection().await);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_connectivity_failure_is_single_attempt() {
    let clock = Arc::new(ManualClock::default());
    let auth = ScriptedAuth::signed_in(clock.now() - ChronoDuration::minutes(1));
    let (calls, ping) = counting(|| Err(eyre!("connection refused")));

    assert!(!probe(auth, clock, ping).check_connection().await);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_hanging_ping_times_out() {
    let clock = Arc::new(ManualClock::default());
    let auth = ScriptedAuth::signed_in(clock.now() - ChronoDuration::minutes(1));
    let ping = || async {
      tokio::time::sleep(Duration::from_secs(60)).await;
      Ok(())
    };

    let start = tokio::time::Instant::now();
    assert!(!probe(auth, clock, ping).check_connection().await);
    assert!(start.elapsed() < Duration::from_secs(60));
  }

  #[tokio::test]
  async fn test_no_session_and_failed_refresh_is_offline() {
    let clock = Arc::new(ManualClock::default());
    let auth = ScriptedAuth::signed_out().with_refresh_results(&[false]);
    let (calls, ping) = counting(|| Ok(()));

    assert!(!probe(auth, clock, ping).check_connection().await);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }
}
