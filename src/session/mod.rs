//! Authentication session handling.
//!
//! The executor only needs to read the current session's expiry and ask for a
//! refresh or sign-out. Everything else about authentication lives behind the
//! `AuthProvider` trait.

mod guard;
#[cfg(test)]
pub(crate) mod mock;
mod rest;

pub use guard::{GuardOutcome, SessionGuard, SignOutHook};
pub use rest::RestAuthProvider;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use serde::{Deserialize, Serialize};

/// An authenticated session against the hosted store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
  pub access_token: String,
  pub refresh_token: String,
  pub expires_at: DateTime<Utc>,
  #[serde(default)]
  pub email: Option<String>,
}

impl Session {
  /// Time left before the access token expires. Negative once expired.
  pub fn time_to_expiry(&self, now: DateTime<Utc>) -> Duration {
    self.expires_at - now
  }

  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    self.expires_at <= now
  }
}

/// Authentication provider consumed by the session guard.
#[async_trait]
pub trait AuthProvider: Send + Sync {
  /// Current session, if signed in.
  async fn session(&self) -> Option<Session>;

  /// Exchange the refresh token for a new session.
  async fn refresh_session(&self) -> Result<Session>;

  /// Drop the session locally and remotely.
  async fn sign_out(&self) -> Result<()>;
}
