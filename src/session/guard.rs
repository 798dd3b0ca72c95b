//! Pre-flight session checks.

use chrono::Duration;
use color_eyre::Result;
use std::sync::Arc;
use tracing::{info, warn};

use super::AuthProvider;
use crate::classify::ClassifiedError;
use crate::clock::Clock;

/// Runs after every sign-out, whether or not the provider's sign-out succeeded.
pub type SignOutHook = Arc<dyn Fn() + Send + Sync>;

/// Result of a pre-flight session check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuardOutcome {
  /// A refresh was performed and succeeded.
  pub refreshed: bool,
  /// No usable session could be obtained; the caller should not proceed.
  pub fatal: bool,
}

/// Decides whether the current session is usable and refreshes it when needed.
///
/// Concurrent callers are not de-duplicated: two executor runs that both see a
/// soon-to-expire token will each trigger a refresh.
#[derive(Clone)]
pub struct SessionGuard {
  auth: Arc<dyn AuthProvider>,
  clock: Arc<dyn Clock>,
  refresh_threshold: Duration,
  on_sign_out: Option<SignOutHook>,
}

impl SessionGuard {
  pub fn new(auth: Arc<dyn AuthProvider>, clock: Arc<dyn Clock>) -> Self {
    Self {
      auth,
      clock,
      refresh_threshold: Duration::seconds(300),
      on_sign_out: None,
    }
  }

  /// Set the remaining-validity window below which a token is renewed early.
  pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
    self.refresh_threshold = threshold;
    self
  }

  /// Install the hook run after sign-out, replacing any previous one.
  pub fn with_sign_out_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
    self.on_sign_out = Some(Arc::new(hook));
    self
  }

  /// Check the session before the first attempt of a query.
  ///
  /// - No session: try one refresh; failure is fatal.
  /// - Session close to expiry: refresh proactively; failure is not fatal,
  ///   the old token may still be accepted for one more call.
  pub async fn ensure_usable(&self) -> GuardOutcome {
    match self.auth.session().await {
      None => {
        if self.refresh().await.is_ok() {
          GuardOutcome {
            refreshed: true,
            fatal: false,
          }
        } else {
          GuardOutcome {
            refreshed: false,
            fatal: true,
          }
        }
      }
      Some(session) => {
        let remaining = session.time_to_expiry(self.clock.now());
        if remaining >= self.refresh_threshold {
          return GuardOutcome::default();
        }

        info!(
          remaining_secs = remaining.num_seconds(),
          "Session close to expiry, refreshing"
        );
        GuardOutcome {
          refreshed: self.refresh().await.is_ok(),
          fatal: false,
        }
      }
    }
  }

  /// Refresh the session once, returning the classified failure.
  pub async fn refresh(&self) -> Result<(), ClassifiedError> {
    match self.auth.refresh_session().await {
      Ok(_) => {
        info!("Session refreshed");
        Ok(())
      }
      Err(e) => {
        let error = ClassifiedError::from_report(e);
        warn!("Session refresh failed: {}", error);
        Err(error)
      }
    }
  }

  /// Sign out, then run the sign-out hook even if the provider failed.
  pub async fn sign_out(&self) -> Result<()> {
    let result = self.auth.sign_out().await;
    if let Some(hook) = &self.on_sign_out {
      hook();
    }
    result
  }

  /// Whether a session exists and its access token has not yet expired.
  pub async fn has_valid_session(&self) -> bool {
    match self.auth.session().await {
      Some(session) => !session.is_expired(self.clock.now()),
      None => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::classify::ErrorKind;
  use crate::clock::ManualClock;
  use crate::session::mock::ScriptedAuth;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn guard(auth: Arc<ScriptedAuth>, clock: Arc<ManualClock>) -> SessionGuard {
    SessionGuard::new(auth, clock)
  }

  #[tokio::test]
  async fn test_fresh_session_is_left_alone() {
    let clock = Arc::new(ManualClock::default());
    let auth = Arc::new(ScriptedAuth::signed_in(clock.now() + Duration::hours(1)));

    let outcome = guard(auth.clone(), clock).ensure_usable().await;

    assert_eq!(outcome, GuardOutcome::default());
    assert_eq!(auth.refresh_calls(), 0);
  }

  #[tokio::test]
  async fn test_expiring_session_is_refreshed() {
    let clock = Arc::new(ManualClock::default());
    let auth = Arc::new(ScriptedAuth::signed_in(clock.now() + Duration::seconds(120)));

    let outcome = guard(auth.clone(), clock).ensure_usable().await;

    assert!(outcome.refreshed);
    assert!(!outcome.fatal);
    assert_eq!(auth.refresh_calls(), 1);
  }

  #[tokio::test]
  async fn test_failed_proactive_refresh_is_not_fatal() {
    let clock = Arc::new(ManualClock::default());
    let auth = Arc::new(
      ScriptedAuth::signed_in(clock.now() + Duration::seconds(30)).with_refresh_results(&[false]),
    );

    let outcome = guard(auth.clone(), clock).ensure_usable().await;

    assert!(!outcome.refreshed);
    assert!(!outcome.fatal);
  }

  #[tokio::test]
  async fn test_missing_session_refresh_failure_is_fatal() {
    let clock = Arc::new(ManualClock::default());
    let auth = Arc::new(ScriptedAuth::signed_out().with_refresh_results(&[false]));

    let outcome = guard(auth.clone(), clock).ensure_usable().await;

    assert!(outcome.fatal);
    assert_eq!(auth.refresh_calls(), 1);
  }

  #[tokio::test]
  async fn test_missing_session_recovered_by_refresh() {
    let clock = Arc::new(ManualClock::default());
    let auth = Arc::new(ScriptedAuth::signed_out());

    let outcome = guard(auth.clone(), clock).ensure_usable().await;

    assert!(outcome.refreshed);
    assert!(!outcome.fatal);
  }

  #[tokio::test]
  async fn test_custom_threshold() {
    let clock = Arc::new(ManualClock::default());
    let auth = Arc::new(ScriptedAuth::signed_in(clock.now() + Duration::seconds(120)));

    let outcome = guard(auth.clone(), clock)
      .with_refresh_threshold(Duration::seconds(60))
      .ensure_usable()
      .await;

    assert!(!outcome.refreshed);
    assert_eq!(auth.refresh_calls(), 0);
  }

  #[tokio::test]
  async fn test_has_valid_session() {
    let clock = Arc::new(ManualClock::default());
    let auth = Arc::new(ScriptedAuth::signed_in(clock.now() + Duration::seconds(10)));
    let guard = guard(auth, clock.clone());

    assert!(guard.has_valid_session().await);
    clock.advance(Duration::seconds(11));
    assert!(!guard.has_valid_session().await);
  }

  #[tokio::test]
  async fn test_refresh_failure_is_classified() {
    let clock = Arc::new(ManualClock::default());
    let auth = Arc::new(
      ScriptedAuth::signed_in(clock.now() + Duration::hours(1))
        .with_refresh_results(&[false, false])
        .with_refresh_error("network error: error sending request"),
    );
    let guard = guard(auth, clock);

    assert_eq!(guard.refresh().await.unwrap_err().kind, ErrorKind::Connectivity);
  }

  #[tokio::test]
  async fn test_sign_out_hook_runs_when_provider_fails() {
    let clock = Arc::new(ManualClock::default());
    let auth = Arc::new(
      ScriptedAuth::signed_in(clock.now() + Duration::hours(1)).with_failing_sign_out(),
    );
    let hooks = Arc::new(AtomicU32::new(0));
    let seen = hooks.clone();
    let guard = guard(auth.clone(), clock).with_sign_out_hook(move || {
      seen.fetch_add(1, Ordering::SeqCst);
    });

    assert!(guard.sign_out().await.is_err());
    assert_eq!(auth.sign_out_calls(), 1);
    assert_eq!(hooks.load(Ordering::SeqCst), 1);
  }
}
