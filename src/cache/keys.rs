//! Deterministic cache keys.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Build a cache key from a readable prefix and query parameters.
///
/// Parameters are sorted by name before hashing, so two callers asking for the
/// same logical data land on the same key whatever order they pass them in.
/// The prefix stays readable so pattern invalidation can match on it.
pub fn cache_key<I, K, V>(prefix: &str, params: I) -> String
where
  I: IntoIterator<Item = (K, V)>,
  K: Into<String>,
  V: Into<String>,
{
  let sorted: BTreeMap<String, String> = params
    .into_iter()
    .map(|(k, v)| (k.into(), v.into()))
    .collect();

  let input = sorted
    .iter()
    .map(|(k, v)| format!("{}={}", k, v))
    .collect::<Vec<_>>()
    .join("&");

  // SHA256 hash for stable, fixed-length keys
  let mut hasher = Sha256::new();
  hasher.update(input.as_bytes());
  format!("{}:{}", prefix, hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_param_order_does_not_matter() {
    let a = cache_key("accounts", [("page", "1"), ("status", "active")]);
    let b = cache_key("accounts", [("status", "active"), ("page", "1")]);
    assert_eq!(a, b);
    assert!(a.starts_with("accounts:"));
  }

  #[test]
  fn test_different_params_differ() {
    let a = cache_key("accounts", [("page", "1")]);
    let b = cache_key("accounts", [("page", "2")]);
    let c = cache_key("spaces", [("page", "1")]);
    assert_ne!(a, b);
    assert_ne!(a, c);
  }

  #[test]
  fn test_no_params() {
    let key = cache_key("users", Vec::<(String, String)>::new());
    assert_eq!(key.len(), "users:".len() + 64);
  }
}
