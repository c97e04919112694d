use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Client configuration. Every field has a default, so a partial TOML or
/// JSON table is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// API root, e.g. `https://erp.example.com/api`. No trailing slash.
    pub base_url: String,
    pub request_timeout_secs: u64,
    /// An access token is treated as expired this many seconds early.
    pub token_buffer_secs: i64,
    /// Upper bound on how long a caller waits for someone else's refresh.
    pub refresh_wait_timeout_ms: u64,
    /// How often a refresh started by another session manager on the same
    /// store is re-checked.
    pub refresh_poll_interval_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            request_timeout_secs: 30,
            token_buffer_secs: 60,
            refresh_wait_timeout_ms: 5000,
            refresh_poll_interval_ms: 100,
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn refresh_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_wait_timeout_ms)
    }

    pub fn refresh_poll_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_poll_interval_ms.max(1))
    }

    /// Absolute URL for an API path (`/customers/` → `{base_url}/customers/`).
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    Linear,
    #[default]
    Exponential,
}

/// Bounded retry for transient failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total dispatches of one request, the first one included.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff: Backoff,
    pub max_delay_ms: u64,
    /// HTTP statuses worth another attempt.
    pub statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 300,
            backoff: Backoff::Exponential,
            max_delay_ms: 5000,
            statuses: vec![502, 503, 504],
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn retries_status(&self, status: u16) -> bool {
        self.statuses.contains(&status)
    }

    /// Whether dispatch number `attempt` (1-based) may be followed by another.
    pub fn allows_another(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before the dispatch that follows failed dispatch `attempt`.
    ///
    /// Linear: `base * attempt`. Exponential: `base * 2^(attempt-1)`. Both
    /// capped at `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let ms = match self.backoff {
            Backoff::Linear => self.base_delay_ms.saturating_mul(u64::from(attempt)),
            Backoff::Exponential => {
                let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
                self.base_delay_ms.saturating_mul(factor)
            }
        };
        Duration::from_millis(ms.min(self.max_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.token_buffer_secs, 60);
        assert_eq!(cfg.refresh_wait_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.retry.statuses, vec![502, 503, 504]);
        assert_eq!(cfg.retry.max_attempts, 3);
    }

    #[test]
    fn partial_table_fills_defaults() {
        let cfg: ClientConfig = serde_json::from_str(
            r#"{"base_url": "https://erp.test/api", "retry": {"backoff": "linear"}}"#,
        )
        .unwrap();
        assert_eq!(cfg.base_url, "https://erp.test/api");
        assert_eq!(cfg.retry.backoff, Backoff::Linear);
        assert_eq!(cfg.retry.base_delay_ms, 300);
        assert_eq!(cfg.request_timeout_secs, 30);
    }

    #[test]
    fn url_joins_without_double_slash() {
        let cfg = ClientConfig::new("https://erp.test/api/");
        assert_eq!(cfg.url("/customers/"), "https://erp.test/api/customers/");
        assert_eq!(cfg.url("auth/login/"), "https://erp.test/api/auth/login/");
    }

    #[test]
    fn backoff_schedules() {
        let mut policy = RetryPolicy {
            base_delay_ms: 100,
            max_delay_ms: 350,
            ..RetryPolicy::default()
        };
        let delays: Vec<u64> = (1..=4).map(|a| policy.delay_for(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 350, 350]);

        policy.backoff = Backoff::Linear;
        let delays: Vec<u64> = (1..=4).map(|a| policy.delay_for(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 300, 350]);

        // Huge attempt numbers saturate instead of overflowing.
        policy.backoff = Backoff::Exponential;
        assert_eq!(policy.delay_for(200), Duration::from_millis(350));
    }

    #[test]
    fn attempt_ceiling() {
        let policy = RetryPolicy::default();
        assert!(policy.allows_another(1));
        assert!(policy.allows_another(2));
        assert!(!policy.allows_another(3));
        assert!(!RetryPolicy::none().allows_another(1));
        assert!(policy.retries_status(503));
        assert!(!policy.retries_status(500));
    }
}
