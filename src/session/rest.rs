//! Auth provider speaking the hosted store's token endpoints.

use async_trait::async_trait;
use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};
use url::Url;

use super::{AuthProvider, Session};
use crate::backend::api_types::{endpoint, error_from_response, transport_error};
use crate::cache::DurableStore;
use crate::clock::Clock;

/// Durable key holding the serialized session. Outside the cache prefix so
/// clearing the cache keeps the user signed in.
pub const SESSION_KEY: &str = "fieldops_auth_session";

#[derive(Debug, Deserialize)]
struct TokenResponse {
  access_token: String,
  refresh_token: String,
  expires_in: i64,
  user: Option<TokenUser>,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
  email: Option<String>,
}

/// Password/refresh-token auth against `/auth/v1`, with the session mirrored
/// into durable storage between runs.
pub struct RestAuthProvider {
  http: reqwest::Client,
  base_url: Url,
  anon_key: String,
  store: Arc<dyn DurableStore>,
  clock: Arc<dyn Clock>,
  session: RwLock<Option<Session>>,
}

impl RestAuthProvider {
  /// Create a provider, restoring any session persisted by a previous run.
  pub fn new(
    http: reqwest::Client,
    base_url: Url,
    anon_key: String,
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
  ) -> Self {
    let session = match store.get_item(SESSION_KEY) {
      Ok(Some(raw)) => match serde_json::from_str::<Session>(&raw) {
        Ok(session) => Some(session),
        Err(e) => {
          warn!("Discarding unreadable persisted session: {}", e);
          None
        }
      },
      Ok(None) => None,
      Err(e) => {
        warn!("Failed to read persisted session: {}", e);
        None
      }
    };

    Self {
      http,
      base_url,
      anon_key,
      store,
      clock,
      session: RwLock::new(session),
    }
  }

  /// Sign in with email and password, replacing any current session.
  pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
    self
      .token_request(
        "password",
        json!({
          "email": email,
          "password": password,
        }),
      )
      .await
  }

  async fn token_request(&self, grant_type: &str, body: serde_json::Value) -> Result<Session> {
    let mut url = endpoint(&self.base_url, "auth/v1/token")?;
    url.query_pairs_mut().append_pair("grant_type", grant_type);

    let response = self
      .http
      .post(url)
      .header("apikey", &self.anon_key)
      .json(&body)
      .send()
      .await
      .map_err(transport_error)?;

    if !response.status().is_success() {
      return Err(error_from_response(response).await.into());
    }

    let token: TokenResponse = response
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse token response: {}", e))?;

    let session = Session {
      access_token: token.access_token,
      refresh_token: token.refresh_token,
      expires_at: self.clock.now() + Duration::seconds(token.expires_in),
      email: token.user.and_then(|u| u.email),
    };
    self.store_session(Some(session.clone()));
    debug!(grant_type, "Obtained session");

    Ok(session)
  }

  fn store_session(&self, session: Option<Session>) {
    let persisted = match &session {
      Some(s) => serde_json::to_string(s)
        .map_err(|e| eyre!("Failed to serialize session: {}", e))
        .and_then(|raw| self.store.set_item(SESSION_KEY, &raw)),
      None => self.store.remove_item(SESSION_KEY),
    };
    if let Err(e) = persisted {
      warn!("Failed to persist session: {}", e);
    }

    match self.session.write() {
      Ok(mut current) => *current = session,
      Err(e) => *e.into_inner() = session,
    }
  }

  fn current(&self) -> Option<Session> {
    match self.session.read() {
      Ok(current) => current.clone(),
      Err(e) => e.into_inner().clone(),
    }
  }
}

#[async_trait]
impl AuthProvider for RestAuthProvider {
  async fn session(&self) -> Option<Session> {
    self.current()
  }

  async fn refresh_session(&self) -> Result<Session> {
    let refresh_token = self
      .current()
      .map(|s| s.refresh_token)
      .ok_or_else(|| eyre!("No session to refresh, sign in first"))?;

    self
      .token_request("refresh_token", json!({ "refresh_token": refresh_token }))
      .await
  }

  async fn sign_out(&self) -> Result<()> {
    let session = self.current();
    // Local state goes first so a failed remote logout still signs out.
    self.store_session(None);

    let Some(session) = session else {
      return Ok(());
    };

    let url = endpoint(&self.base_url, "auth/v1/logout")?;
    let response = self
      .http
      .post(url)
      .header("apikey", &self.anon_key)
      .bearer_auth(&session.access_token)
      .send()
      .await
      .map_err(transport_error)?;

    if !response.status().is_success() {
      return Err(error_from_response(response).await.into());
    }
    Ok(())
  }
}
