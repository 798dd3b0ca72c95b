//! States and transitions of a single executor run.
//!
//! The transition functions here are pure: they take what an effect produced
//! (a guard outcome, an attempt failure, a refresh result) and return the next
//! state. The executor performs the effects and feeds the results back in.

use std::time::Duration;

use super::policy::QueryPolicy;
use crate::classify::{ClassifiedError, ErrorKind};
use crate::session::GuardOutcome;

/// How a failed attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOrigin {
  /// The query function returned an error.
  Returned,
  /// The query function panicked.
  Panicked,
  /// The attempt ran past the policy timeout.
  TimedOut,
}

/// A failed attempt.
#[derive(Debug, Clone)]
pub struct Failure {
  pub error: ClassifiedError,
  pub origin: FailureOrigin,
}

/// Bookkeeping carried across the states of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunContext {
  /// Current attempt number, starting at 1
  pub attempt: u32,
  /// Whether the one auth-recovery retry has been spent
  pub auth_recovery_used: bool,
}

impl Default for RunContext {
  fn default() -> Self {
    Self {
      attempt: 1,
      auth_recovery_used: false,
    }
  }
}

#[derive(Debug)]
pub enum State<T> {
  Init,
  Guard,
  Attempt,
  Evaluate(Result<T, Failure>),
  BackoffWait(Duration),
  RefreshThenRetry(ClassifiedError),
  Success(T),
  Fail(ClassifiedError),
}

/// Guard → Attempt, or straight to Fail when no session is usable.
pub fn after_guard<T>(outcome: GuardOutcome) -> State<T> {
  if outcome.fatal {
    State::Fail(ClassifiedError::new(
      ErrorKind::Auth,
      "No usable session: authentication refresh failed",
    ))
  } else {
    State::Attempt
  }
}

/// Evaluate → next state.
pub fn after_attempt<T>(policy: &QueryPolicy, ctx: &RunContext, result: Result<T, Failure>) -> State<T> {
  let failure = match result {
    Ok(data) => return State::Success(data),
    Err(failure) => failure,
  };

  match (failure.error.kind, failure.origin) {
    (ErrorKind::Auth, FailureOrigin::Returned)
      if ctx.attempt == 1 && !ctx.auth_recovery_used =>
    {
      State::RefreshThenRetry(failure.error)
    }
    (ErrorKind::Connectivity, _) if ctx.attempt < policy.max_attempts => {
      State::BackoffWait(policy.delay_after(ctx.attempt))
    }
    _ => State::Fail(failure.error),
  }
}

/// BackoffWait → Attempt, moving on to the next attempt number.
pub fn after_backoff<T>(ctx: &mut RunContext) -> State<T> {
  ctx.attempt += 1;
  State::Attempt
}

/// RefreshThenRetry → Attempt (same attempt number) or Fail.
pub fn after_refresh<T>(ctx: &mut RunContext, refreshed: bool, error: ClassifiedError) -> State<T> {
  ctx.auth_recovery_used = true;
  if refreshed {
    State::Attempt
  } else {
    State::Fail(error)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn failure(kind: ErrorKind, origin: FailureOrigin) -> Result<(), Failure> {
    Err(Failure {
      error: ClassifiedError::new(kind, "boom"),
      origin,
    })
  }

  fn policy() -> QueryPolicy {
    QueryPolicy {
      max_attempts: 3,
      ..QueryPolicy::default()
    }
  }

  #[test]
  fn test_fatal_guard_fails_with_auth_error() {
    match after_guard::<()>(GuardOutcome {
      refreshed: false,
      fatal: true,
    }) {
      State::Fail(e) => assert!(e.is_auth()),
      other => panic!("unexpected state {:?}", other),
    }
    assert!(matches!(after_guard::<()>(GuardOutcome::default()), State::Attempt));
  }

  #[test]
  fn test_success() {
    let state = after_attempt(&policy(), &RunContext::default(), Ok::<_, Failure>(7));
    assert!(matches!(state, State::Success(7)));
  }

  #[test]
  fn test_auth_on_first_attempt_refreshes() {
    let state = after_attempt(
      &policy(),
      &RunContext::default(),
      failure(ErrorKind::Auth, FailureOrigin::Returned),
    );
    assert!(matches!(state, State::RefreshThenRetry(_)));
  }

  #[test]
  fn test_auth_after_recovery_fails() {
    let ctx = RunContext {
      attempt: 1,
      auth_recovery_used: true,
    };
    let state = after_attempt(&policy(), &ctx, failure(ErrorKind::Auth, FailureOrigin::Returned));
    assert!(matches!(state, State::Fail(_)));
  }

  #[test]
  fn test_auth_on_later_attempt_fails() {
    let ctx = RunContext {
      attempt: 2,
      auth_recovery_used: false,
    };
    let state = after_attempt(&policy(), &ctx, failure(ErrorKind::Auth, FailureOrigin::Returned));
    assert!(matches!(state, State::Fail(_)));
  }

  #[test]
  fn test_connectivity_backs_off_until_last_attempt() {
    let policy = policy();
    let mut ctx = RunContext::default();

    let state = after_attempt(&policy, &ctx, failure(ErrorKind::Connectivity, FailureOrigin::Returned));
    assert!(matches!(state, State::BackoffWait(d) if d == Duration::from_millis(1000)));
    assert!(matches!(after_backoff::<()>(&mut ctx), State::Attempt));
    assert_eq!(ctx.attempt, 2);

    let state = after_attempt(&policy, &ctx, failure(ErrorKind::Connectivity, FailureOrigin::TimedOut));
    assert!(matches!(state, State::BackoffWait(d) if d == Duration::from_millis(2000)));
    after_backoff::<()>(&mut ctx);

    let state = after_attempt(&policy, &ctx, failure(ErrorKind::Connectivity, FailureOrigin::Returned));
    assert!(matches!(state, State::Fail(_)));
  }

  #[test]
  fn test_other_fails_immediately() {
    let state = after_attempt(
      &policy(),
      &RunContext::default(),
      failure(ErrorKind::Other, FailureOrigin::Returned),
    );
    assert!(matches!(state, State::Fail(_)));
  }

  #[test]
  fn test_panics_only_retry_on_connectivity() {
    let ctx = RunContext::default();
    let state = after_attempt(&policy(), &ctx, failure(ErrorKind::Auth, FailureOrigin::Panicked));
    assert!(matches!(state, State::Fail(_)));

    let state = after_attempt(&policy(), &ctx, failure(ErrorKind::Connectivity, FailureOrigin::Panicked));
    assert!(matches!(state, State::BackoffWait(_)));
  }

  #[test]
  fn test_refresh_keeps_attempt_number() {
    let mut ctx = RunContext::default();
    let error = ClassifiedError::new(ErrorKind::Auth, "jwt expired");

    assert!(matches!(after_refresh::<()>(&mut ctx, true, error.clone()), State::Attempt));
    assert_eq!(ctx.attempt, 1);
    assert!(ctx.auth_recovery_used);

    let mut ctx = RunContext::default();
    assert!(matches!(after_refresh::<()>(&mut ctx, false, error), State::Fail(_)));
  }
}
