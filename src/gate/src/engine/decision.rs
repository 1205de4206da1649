//! Authorization decision types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of gating one request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Unique decision ID (log correlation)
    pub id: String,

    /// Whether the request is admitted
    pub allowed: bool,

    /// Reason for the decision
    pub reason: DecisionReason,

    /// Decision timestamp (milliseconds since epoch)
    pub timestamp: u64,
}

impl Decision {
    /// Verdict matched the expected result
    pub fn allow(query: impl Into<String>) -> Self {
        Self::new(true, DecisionReason::Matched { query: query.into() })
    }

    /// Verdict did not match the expected result
    pub fn deny(query: impl Into<String>) -> Self {
        Self::new(false, DecisionReason::NotMatched { query: query.into() })
    }

    /// Evaluation failed; always a denial
    pub fn failed(error: impl Into<String>) -> Self {
        Self::new(false, DecisionReason::Failed { error: error.into() })
    }

    fn new(allowed: bool, reason: DecisionReason) -> Self {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        Self {
            id: Uuid::new_v4().to_string(),
            allowed,
            reason,
            timestamp,
        }
    }
}

/// Reason for a decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DecisionReason {
    /// Query produced the expected verdict
    Matched { query: String },

    /// Query produced the other verdict (or no result)
    NotMatched { query: String },

    /// Evaluation error, request denied (fail closed)
    Failed { error: String },
}
