use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A cached value with the time it was written and how long it stays valid.
///
/// This is also the JSON shape of the durable mirror.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
  pub data: T,
  pub written_at: DateTime<Utc>,
  pub ttl_ms: i64,
}

impl<T> CacheEntry<T> {
  pub fn new(data: T, written_at: DateTime<Utc>, ttl: Duration) -> Self {
    Self {
      data,
      written_at,
      ttl_ms: ttl.num_milliseconds(),
    }
  }

  pub fn age(&self, now: DateTime<Utc>) -> Duration {
    now - self.written_at
  }

  /// Expired iff strictly more than `ttl_ms` has passed since the write.
  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    self.age(now).num_milliseconds() > self.ttl_ms
  }

  pub fn expires_at(&self) -> DateTime<Utc> {
    self.written_at + Duration::milliseconds(self.ttl_ms)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_expiry_boundary() {
    let written = Utc::now();
    let entry = CacheEntry::new(1, written, Duration::milliseconds(1000));

    assert!(!entry.is_expired(written));
    assert!(!entry.is_expired(written + Duration::milliseconds(1000)));
    assert!(entry.is_expired(written + Duration::milliseconds(1001)));
    assert_eq!(entry.expires_at(), written + Duration::seconds(1));
  }

  #[test]
  fn test_zero_ttl_expires_immediately_after_write() {
    let written = Utc::now();
    let entry = CacheEntry::new("x", written, Duration::zero());
    assert!(!entry.is_expired(written));
    assert!(entry.is_expired(written + Duration::milliseconds(1)));
  }
}
