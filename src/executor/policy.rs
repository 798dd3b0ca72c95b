use std::time::Duration;

/// Timeout and retry settings for one executor run.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPolicy {
  /// Upper bound on a single attempt
  pub timeout: Duration,
  /// Attempts allowed, not counting the free retry after an auth recovery
  pub max_attempts: u32,
  /// Wait after the first failed attempt
  pub initial_delay: Duration,
  /// Growth factor of the wait after each further failure
  pub backoff_multiplier: f64,
  /// Ceiling on any single wait
  pub max_delay: Duration,
  /// Name used in logs
  pub label: String,
}

impl Default for QueryPolicy {
  fn default() -> Self {
    Self {
      timeout: Duration::from_secs(10),
      max_attempts: 3,
      initial_delay: Duration::from_millis(1000),
      backoff_multiplier: 2.0,
      max_delay: Duration::from_millis(5000),
      label: "query".to_string(),
    }
  }
}

impl QueryPolicy {
  /// Wait before the attempt following failed attempt number `attempt` (1-based):
  /// `min(initial_delay * backoff_multiplier^(attempt - 1), max_delay)`.
  pub fn delay_after(&self, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let millis = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
    let capped = millis.min(self.max_delay.as_millis() as f64).max(0.0);
    Duration::from_millis(capped as u64)
  }
}

/// Per-call adjustments to the process-wide default policy. Unset fields keep
/// the default.
#[derive(Debug, Clone, Default)]
pub struct PolicyOverrides {
  pub timeout: Option<Duration>,
  pub max_attempts: Option<u32>,
  pub initial_delay: Option<Duration>,
  pub backoff_multiplier: Option<f64>,
  pub max_delay: Option<Duration>,
  pub label: Option<String>,
}

impl PolicyOverrides {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  pub fn max_attempts(mut self, max_attempts: u32) -> Self {
    self.max_attempts = Some(max_attempts);
    self
  }

  pub fn initial_delay(mut self, delay: Duration) -> Self {
    self.initial_delay = Some(delay);
    self
  }

  pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
    self.backoff_multiplier = Some(multiplier);
    self
  }

  pub fn max_delay(mut self, delay: Duration) -> Self {
    self.max_delay = Some(delay);
    self
  }

  pub fn label(mut self, label: impl Into<String>) -> Self {
    self.label = Some(label.into());
    self
  }

  /// Fill unset fields from `defaults`.
  pub fn resolve(self, defaults: &QueryPolicy) -> QueryPolicy {
    QueryPolicy {
      timeout: self.timeout.unwrap_or(defaults.timeout),
      max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts).max(1),
      initial_delay: self.initial_delay.unwrap_or(defaults.initial_delay),
      backoff_multiplier: self
        .backoff_multiplier
        .unwrap_or(defaults.backoff_multiplier),
      max_delay: self.max_delay.unwrap_or(defaults.max_delay),
      label: self.label.unwrap_or_else(|| defaults.label.clone()),
    }
  }
}
