//! Wire-level helpers shared by the REST client and the auth provider.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use url::Url;

use crate::classify::RemoteError;

/// Error body returned by the hosted store. The REST and auth endpoints use
/// different field names, so everything is optional.
#[derive(Debug, Default, Deserialize)]
pub struct ApiErrorBody {
  pub message: Option<String>,
  pub msg: Option<String>,
  pub error_description: Option<String>,
  pub error: Option<String>,
  pub code: Option<serde_json::Value>,
  pub hint: Option<String>,
}

impl ApiErrorBody {
  fn message(&self) -> Option<String> {
    self
      .message
      .clone()
      .or_else(|| self.msg.clone())
      .or_else(|| self.error_description.clone())
      .or_else(|| self.error.clone())
  }

  fn code(&self) -> Option<String> {
    match &self.code {
      Some(serde_json::Value::String(s)) => Some(s.clone()),
      Some(serde_json::Value::Number(n)) => Some(n.to_string()),
      _ => self.error.clone(),
    }
  }
}

/// Build a `RemoteError` from a non-success response.
pub async fn error_from_response(response: reqwest::Response) -> RemoteError {
  let status = response.status();
  let body = response.text().await.unwrap_or_default();
  remote_error(status.as_u16(), status.canonical_reason(), &body)
}

fn remote_error(status: u16, reason: Option<&str>, body: &str) -> RemoteError {
  let parsed: ApiErrorBody = serde_json::from_str(body).unwrap_or_default();

  let message = parsed.message().unwrap_or_else(|| {
    format!("HTTP {} {}", status, reason.unwrap_or("error"))
  });
  let message = match &parsed.hint {
    Some(hint) => format!("{} ({})", message, hint),
    None => message,
  };

  let mut error = RemoteError::new(message);
  if let Some(code) = parsed.code() {
    error = error.with_code(code);
  }
  error
}

/// Map a transport failure to a `RemoteError` carrying the network code.
pub fn transport_error(e: reqwest::Error) -> RemoteError {
  let kind = if e.is_timeout() {
    "request timeout"
  } else if e.is_connect() {
    "connection failed"
  } else {
    "network error"
  };
  RemoteError::network(format!("{}: {}", kind, e))
}

/// Join a relative path onto the base URL, keeping any path the base has.
pub fn endpoint(base: &Url, path: &str) -> Result<Url> {
  let mut base = base.clone();
  if !base.path().ends_with('/') {
    let with_slash = format!("{}/", base.path());
    base.set_path(&with_slash);
  }
  base
    .join(path.trim_start_matches('/'))
    .map_err(|e| eyre!("Failed to build URL for {}: {}", path, e))
}
