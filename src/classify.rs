//! Error classification for remote calls.
//!
//! Every failure that reaches the executor is labelled as an auth problem,
//! a connectivity problem, or something else. The label alone decides whether
//! a call is refreshed, retried with backoff, or failed immediately.

use color_eyre::Report;
use std::fmt;
use std::sync::Arc;

/// Structured code carried by transport-level failures.
pub const NETWORK_ERROR: &str = "NETWORK_ERROR";

const AUTH_KEYWORDS: &[&str] = &[
  "jwt",
  "token",
  "authorization",
  "authentication",
  "session",
];

const CONNECTIVITY_KEYWORDS: &[&str] = &["network", "connection", "fetch", "timeout"];

/// Classification of a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// Expired or rejected credentials. Recoverable once via refresh.
  Auth,
  /// Transport trouble. Recoverable via bounded retry.
  Connectivity,
  /// Anything else. Never retried.
  Other,
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let label = match self {
      ErrorKind::Auth => "auth error",
      ErrorKind::Connectivity => "connectivity error",
      ErrorKind::Other => "error",
    };
    f.write_str(label)
  }
}

/// Error returned by the backend, either from a response body or from the transport.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct RemoteError {
  pub message: String,
  pub code: Option<String>,
}

impl RemoteError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      code: None,
    }
  }

  /// A transport failure (could not connect, timed out, request not sent).
  pub fn network(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      code: Some(NETWORK_ERROR.to_string()),
    }
  }

  pub fn with_code(mut self, code: impl Into<String>) -> Self {
    self.code = Some(code.into());
    self
  }
}

/// A failure with its classification attached.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ClassifiedError {
  pub kind: ErrorKind,
  pub message: String,
  pub cause: Option<Arc<Report>>,
}

impl ClassifiedError {
  pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
      cause: None,
    }
  }

  /// Classify a report.
  ///
  /// When the chain holds a `RemoteError`, only its message and code decide
  /// the kind; context added with `wrap_err` is for display. Otherwise the
  /// whole chain is classified.
  pub fn from_report(report: Report) -> Self {
    let message = report
      .chain()
      .map(|cause| cause.to_string())
      .collect::<Vec<_>>()
      .join(": ");
    let kind = match report
      .chain()
      .find_map(|cause| cause.downcast_ref::<RemoteError>())
    {
      Some(remote) => classify(&remote.message, remote.code.as_deref()),
      None => classify(&message, None),
    };

    Self {
      kind,
      message,
      cause: Some(Arc::new(report)),
    }
  }

  pub fn is_auth(&self) -> bool {
    self.kind == ErrorKind::Auth
  }

  pub fn is_connectivity(&self) -> bool {
    self.kind == ErrorKind::Connectivity
  }
}

/// Label an error from its message text and optional structured code.
///
/// Matching is a case-insensitive substring test. Auth keywords win over
/// connectivity keywords, because a refreshed session may make the
/// connectivity symptom go away.
pub fn classify(message: &str, code: Option<&str>) -> ErrorKind {
  let message = message.to_lowercase();

  if AUTH_KEYWORDS.iter().any(|k| message.contains(k)) {
    return ErrorKind::Auth;
  }

  if code == Some(NETWORK_ERROR) || CONNECTIVITY_KEYWORDS.iter().any(|k| message.contains(k)) {
    return ErrorKind::Connectivity;
  }

  ErrorKind::Other
}

#[cfg(test)]
mod tests {
  use super::*;
  use color_eyre::eyre::{eyre, WrapErr};

  #[test]
  fn test_auth_keywords() {
    assert_eq!(classify("JWT expired", None), ErrorKind::Auth);
    assert_eq!(classify("Invalid Refresh Token", None), ErrorKind::Auth);
    assert_eq!(classify("missing authorization header", None), ErrorKind::Auth);
    assert_eq!(classify("Session not found", None), ErrorKind::Auth);
  }

  #[test]
  fn test_connectivity_keywords() {
    assert_eq!(classify("network error", None), ErrorKind::Connectivity);
    assert_eq!(classify("Connection reset by peer", None), ErrorKind::Connectivity);
    assert_eq!(classify("Failed to fetch", None), ErrorKind::Connectivity);
    assert_eq!(classify("request TIMEOUT", None), ErrorKind::Connectivity);
  }

  #[test]
  fn test_network_code_without_keyword() {
    assert_eq!(classify("socket hang up", Some(NETWORK_ERROR)), ErrorKind::Connectivity);
    assert_eq!(classify("socket hang up", Some("PGRST116")), ErrorKind::Other);
  }

  #[test]
  fn test_auth_wins_over_connectivity() {
    assert_eq!(
      classify("network failure while refreshing token", None),
      ErrorKind::Auth
    );
  }

  #[test]
  fn test_other() {
    assert_eq!(classify("duplicate key value violates unique constraint", None), ErrorKind::Other);
    assert_eq!(classify("", None), ErrorKind::Other);
  }

  #[test]
  fn test_from_report_uses_chain_and_code() {
    let report = Report::new(RemoteError::network("connect refused"))
      .wrap_err("Failed to list accounts");
    let classified = ClassifiedError::from_report(report);
    assert_eq!(classified.kind, ErrorKind::Connectivity);
    assert!(classified.message.starts_with("Failed to list accounts"));
    assert!(classified.cause.is_some());

    let report: Result<(), Report> = Err(eyre!("JWT expired")).wrap_err("Failed to get space");
    let classified = ClassifiedError::from_report(report.unwrap_err());
    assert!(classified.is_auth());
  }

  #[test]
  fn test_context_text_does_not_change_remote_kind() {
    let report = Report::new(RemoteError::network("connection failed: tcp connect error"))
      .wrap_err("Failed to list spaces with filter name=token");
    let classified = ClassifiedError::from_report(report);
    assert_eq!(classified.kind, ErrorKind::Connectivity);
    assert!(classified.message.contains("name=token"));

    let report = Report::new(RemoteError::new("duplicate key value").with_code("23505"))
      .wrap_err("Failed to update sessions row s1");
    assert_eq!(ClassifiedError::from_report(report).kind, ErrorKind::Other);
  }
}
