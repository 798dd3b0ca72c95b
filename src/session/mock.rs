//! Scripted auth provider for tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use super::{AuthProvider, Session};

/// Auth provider whose refresh results are scripted up front.
///
/// Once the script runs out, refreshes succeed.
pub struct ScriptedAuth {
  session: Mutex<Option<Session>>,
  refresh_results: Mutex<VecDeque<bool>>,
  refresh_error: String,
  fail_sign_out: bool,
  refresh_calls: AtomicU32,
  sign_out_calls: AtomicU32,
}

impl ScriptedAuth {
  pub fn signed_in(expires_at: DateTime<Utc>) -> Self {
    Self::with_session(Some(Session {
      access_token: "access-0".to_string(),
      refresh_token: "refresh-0".to_string(),
      expires_at,
      email: Some("tech@example.com".to_string()),
    }))
  }

  pub fn signed_out() -> Self {
    Self::with_session(None)
  }

  fn with_session(session: Option<Session>) -> Self {
    Self {
      session: Mutex::new(session),
      refresh_results: Mutex::new(VecDeque::new()),
      refresh_error: "Invalid Refresh Token: Refresh Token Not Found".to_string(),
      fail_sign_out: false,
      refresh_calls: AtomicU32::new(0),
      sign_out_calls: AtomicU32::new(0),
    }
  }

  pub fn with_refresh_results(self, results: &[bool]) -> Self {
    *self.refresh_results.lock().unwrap() = results.iter().copied().collect();
    self
  }

  /// Message returned by scripted refresh failures.
  pub fn with_refresh_error(mut self, message: &str) -> Self {
    self.refresh_error = message.to_string();
    self
  }

  pub fn with_failing_sign_out(mut self) -> Self {
    self.fail_sign_out = true;
    self
  }

  pub fn refresh_calls(&self) -> u32 {
    self.refresh_calls.load(Ordering::SeqCst)
  }

  pub fn sign_out_calls(&self) -> u32 {
    self.sign_out_calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl AuthProvider for ScriptedAuth {
  async fn session(&self) -> Option<Session> {
    self.session.lock().unwrap().clone()
  }

  async fn refresh_session(&self) -> Result<Session> {
    let call = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
    let ok = self.refresh_results.lock().unwrap().pop_front().unwrap_or(true);
    if !ok {
      return Err(eyre!("{}", self.refresh_error));
    }

    let session = Session {
      access_token: format!("access-{}", call),
      refresh_token: format!("refresh-{}", call),
      expires_at: Utc::now() + Duration::hours(1),
      email: Some("tech@example.com".to_string()),
    };
    *self.session.lock().unwrap() = Some(session.clone());
    Ok(session)
  }

  async fn sign_out(&self) -> Result<()> {
    self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
    *self.session.lock().unwrap() = None;
    if self.fail_sign_out {
      return Err(eyre!("Failed to revoke session: connection reset"));
    }
    Ok(())
  }
}
