//! Gate configuration

use serde::Deserialize;
use std::time::Duration;

use crate::error::{GateError, Result};

/// Default evaluation timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default HTTP status for denied requests
pub const DEFAULT_DENIED_STATUS: u16 = 403;

/// Default bound on evaluations running at once
///
/// Kept well below tokio's default of 512 blocking threads.
pub const DEFAULT_MAX_CONCURRENT_EVALUATIONS: usize = 64;

/// Policy gate configuration
///
/// Produced by an external loader (any serde format) or built in code:
///
/// ```rust
/// use rego_gate::Config;
/// use std::time::Duration;
///
/// let config = Config::new("package policy\ndefault allow := false", "data.policy.allow")
///     .with_timeout(Duration::from_millis(250));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Rego module source
    pub policy: String,

    /// Rule path whose value is the verdict (e.g. `data.policy.allow`)
    pub query: String,

    /// Evaluation timeout
    #[serde(rename = "timeout_ms", with = "millis", default = "default_timeout")]
    pub timeout: Duration,

    /// Alternate query target used by `query_url`
    #[serde(default)]
    pub url: Option<String>,

    /// Verdict value that admits the request
    #[serde(default = "default_expected_result")]
    pub expected_result: bool,

    /// HTTP status returned on denial
    #[serde(default = "default_denied_status")]
    pub denied_status: u16,

    /// Message returned in the denial body
    #[serde(default = "default_denied_message")]
    pub denied_message: String,

    /// Evaluations allowed to occupy a blocking thread at once
    ///
    /// Fixed when the gate is created; `reload` does not resize it.
    #[serde(default = "default_max_concurrent_evaluations")]
    pub max_concurrent_evaluations: usize,
}

impl Config {
    /// Create a configuration with default timeout and denial settings
    pub fn new(policy: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            policy: policy.into(),
            query: query.into(),
            timeout: DEFAULT_TIMEOUT,
            url: None,
            expected_result: default_expected_result(),
            denied_status: DEFAULT_DENIED_STATUS,
            denied_message: default_denied_message(),
            max_concurrent_evaluations: DEFAULT_MAX_CONCURRENT_EVALUATIONS,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_expected_result(mut self, expected: bool) -> Self {
        self.expected_result = expected;
        self
    }

    pub fn with_denied_status(mut self, status: u16) -> Self {
        self.denied_status = status;
        self
    }

    pub fn with_denied_message(mut self, message: impl Into<String>) -> Self {
        self.denied_message = message.into();
        self
    }

    pub fn with_max_concurrent_evaluations(mut self, max: usize) -> Self {
        self.max_concurrent_evaluations = max;
        self
    }

    /// Check configuration invariants
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the timeout or evaluation bound is zero, the
    /// policy or query is empty, or the denial status is not a 4xx/5xx code
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(GateError::InvalidConfig("timeout must be greater than zero".into()));
        }
        if self.max_concurrent_evaluations == 0 {
            return Err(GateError::InvalidConfig(
                "max_concurrent_evaluations must be greater than zero".into(),
            ));
        }
        if self.policy.trim().is_empty() {
            return Err(GateError::InvalidConfig("policy source is empty".into()));
        }
        if self.query.trim().is_empty() {
            return Err(GateError::InvalidConfig("query is empty".into()));
        }
        if matches!(&self.url, Some(url) if url.trim().is_empty()) {
            return Err(GateError::InvalidConfig("url target is empty".into()));
        }
        if !(400..=599).contains(&self.denied_status) {
            return Err(GateError::InvalidConfig(format!(
                "denied status {} is not a 4xx or 5xx code",
                self.denied_status
            )));
        }
        Ok(())
    }
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_expected_result() -> bool {
    true
}

fn default_denied_status() -> u16 {
    DEFAULT_DENIED_STATUS
}

fn default_denied_message() -> String {
    "Forbidden".to_string()
}

fn default_max_concurrent_evaluations() -> usize {
    DEFAULT_MAX_CONCURRENT_EVALUATIONS
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = Config::new("package policy", "data.policy.allow");
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.denied_status, 403);
        assert!(config.expected_result);
        assert!(config.url.is_none());
        assert_eq!(config.max_concurrent_evaluations, DEFAULT_MAX_CONCURRENT_EVALUATIONS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_evaluation_bound_rejected() {
        let config = Config::new("package policy", "data.policy.allow")
            .with_max_concurrent_evaluations(0);
        assert!(matches!(config.validate(), Err(GateError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = Config::new("package policy", "data.policy.allow")
            .with_timeout(Duration::ZERO);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, GateError::InvalidConfig(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_empty_fields_rejected() {
        assert!(Config::new("  ", "data.policy.allow").validate().is_err());
        assert!(Config::new("package policy", "").validate().is_err());
        assert!(Config::new("package policy", "data.policy.allow")
            .with_url("")
            .validate()
            .is_err());
    }

    #[test]
    fn test_denied_status_range() {
        let config = Config::new("package policy", "data.policy.allow");
        assert!(config.clone().with_denied_status(401).validate().is_ok());
        assert!(config.clone().with_denied_status(503).validate().is_ok());
        assert!(config.clone().with_denied_status(200).validate().is_err());
        assert!(config.with_denied_status(302).validate().is_err());
    }

    #[test]
    fn test_deserialize() {
        let config: Config = serde_json::from_value(json!({
            "policy": "package policy",
            "query": "data.policy.allow",
            "timeout_ms": 250,
            "denied_status": 401,
            "max_concurrent_evaluations": 8
        }))
        .unwrap();

        assert_eq!(config.timeout, Duration::from_millis(250));
        assert_eq!(config.max_concurrent_evaluations, 8);
        assert_eq!(config.denied_status, 401);
        assert_eq!(config.denied_message, "Forbidden");
        assert!(config.expected_result);
    }

    #[test]
    fn test_deserialize_default_timeout() {
        let config: Config = serde_json::from_value(json!({
            "policy": "package policy",
            "query": "data.policy.allow",
            "url": "data.policy.url_allowed"
        }))
        .unwrap();

        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.url.as_deref(), Some("data.policy.url_allowed"));
    }
}
