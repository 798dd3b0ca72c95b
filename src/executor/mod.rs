//! Retrying query executor.
//!
//! Wraps any remote call with a per-attempt timeout, a pre-flight session
//! check, a single auth-recovery retry, and exponential backoff for
//! connectivity failures. Failures never escape as `Err` or as a panic: every
//! run ends in a `QueryOutcome`.

pub mod machine;
mod policy;

pub use policy::{PolicyOverrides, QueryPolicy};

use color_eyre::Result;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::{debug, warn};

use crate::classify::{classify, ClassifiedError, ErrorKind};
use crate::session::SessionGuard;
use machine::{Failure, FailureOrigin, RunContext, State};

/// Result of an executor run.
#[derive(Debug, Clone)]
pub struct QueryOutcome<T> {
  pub data: Option<T>,
  pub error: Option<ClassifiedError>,
  pub success: bool,
  /// Number of times the query function was invoked
  pub attempts: u32,
}

impl<T> QueryOutcome<T> {
  pub fn success(data: T, attempts: u32) -> Self {
    Self {
      data: Some(data),
      error: None,
      success: true,
      attempts,
    }
  }

  pub fn failure(error: ClassifiedError, attempts: u32) -> Self {
    Self {
      data: None,
      error: Some(error),
      success: false,
      attempts,
    }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> QueryOutcome<U> {
    QueryOutcome {
      data: self.data.map(f),
      error: self.error,
      success: self.success,
      attempts: self.attempts,
    }
  }

  pub fn into_result(self) -> Result<T, ClassifiedError> {
    match (self.data, self.error) {
      (Some(data), None) => Ok(data),
      (_, Some(error)) => Err(error),
      (None, None) => Err(ClassifiedError::new(ErrorKind::Other, "Query produced no data")),
    }
  }
}

/// Runs query functions under a `QueryPolicy`, consulting the session guard.
#[derive(Clone)]
pub struct RetryExecutor {
  guard: SessionGuard,
  defaults: QueryPolicy,
}

impl RetryExecutor {
  pub fn new(guard: SessionGuard, defaults: QueryPolicy) -> Self {
    Self { guard, defaults }
  }

  pub fn defaults(&self) -> &QueryPolicy {
    &self.defaults
  }

  pub fn guard(&self) -> &SessionGuard {
    &self.guard
  }

  /// Run `hook` whenever an irrecoverable auth failure signs the user out.
  pub fn with_sign_out_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
    self.guard = self.guard.with_sign_out_hook(hook);
    self
  }

  /// Run `query` under the default policy.
  pub async fn execute<T, F, Fut>(&self, query: F) -> QueryOutcome<T>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    self.execute_with(query, PolicyOverrides::default()).await
  }

  /// Run `query` under the default policy adjusted by `overrides`.
  ///
  /// Attempts are strictly sequential. A timed-out attempt's future is
  /// dropped, which cancels the in-flight request.
  pub async fn execute_with<T, F, Fut>(&self, mut query: F, overrides: PolicyOverrides) -> QueryOutcome<T>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let policy = overrides.resolve(&self.defaults);
    let mut ctx = RunContext::default();
    let mut calls = 0u32;
    let mut state: State<T> = State::Init;

    loop {
      state = match state {
        State::Init => State::Guard,
        State::Guard => machine::after_guard(self.guard.ensure_usable().await),
        State::Attempt => {
          calls += 1;
          State::Evaluate(run_attempt(&policy, &mut query).await)
        }
        State::Evaluate(result) => {
          if let Err(failure) = &result {
            debug!(
              label = %policy.label,
              attempt = ctx.attempt,
              origin = ?failure.origin,
              "Attempt failed: {}",
              failure.error
            );
          }
          machine::after_attempt(&policy, &ctx, result)
        }
        State::BackoffWait(delay) => {
          debug!(label = %policy.label, delay_ms = delay.as_millis() as u64, "Backing off");
          tokio::time::sleep(delay).await;
          machine::after_backoff(&mut ctx)
        }
        State::RefreshThenRetry(error) => {
          let refreshed = match self.guard.refresh().await {
            Ok(()) => true,
            Err(refresh_error) => {
              // Only a rejected refresh token ends the session
              if refresh_error.is_auth() {
                if let Err(e) = self.guard.sign_out().await {
                  warn!(label = %policy.label, "Sign-out failed: {}", e);
                }
              }
              false
            }
          };
          machine::after_refresh(&mut ctx, refreshed, error)
        }
        State::Success(data) => return QueryOutcome::success(data, calls),
        State::Fail(error) => {
          warn!(label = %policy.label, attempts = calls, "Query failed: {}", error);
          return QueryOutcome::failure(error, calls);
        }
      };
    }
  }
}

async fn run_attempt<T, F, Fut>(policy: &QueryPolicy, query: &mut F) -> Result<T, Failure>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T>>,
{
  let attempt = AssertUnwindSafe(async { (*query)().await }).catch_unwind();

  match tokio::time::timeout(policy.timeout, attempt).await {
    Ok(Ok(Ok(data))) => Ok(data),
    Ok(Ok(Err(report))) => Err(Failure {
      error: ClassifiedError::from_report(report),
      origin: FailureOrigin::Returned,
    }),
    Ok(Err(panic)) => {
      let message = panic_message(panic.as_ref());
      Err(Failure {
        error: ClassifiedError::new(classify(&message, None), message),
        origin: FailureOrigin::Panicked,
      })
    }
    Err(_) => Err(Failure {
      error: ClassifiedError::new(
        ErrorKind::Connectivity,
        format!("Query timed out after {}ms", policy.timeout.as_millis()),
      ),
      origin: FailureOrigin::TimedOut,
    }),
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "Query panicked".to_string()
  }
}
