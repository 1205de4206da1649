//! # Rego Gate
//!
//! HTTP request authorization gate backed by Rego policies.
//!
//! ## Features
//!
//! - **Compile once** per (policy, query) pair, shared read-only across requests
//! - **Bounded evaluation** with a per-call timeout
//! - **Fail closed**: any evaluation error denies the request
//! - **Hot reload** with snapshot swap, in-flight requests keep their policy
//! - **Tower middleware** for axum routers
//!
//! ## Example
//!
//! ```rust
//! use rego_gate::{BindingMap, Config, PolicyGate};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let policy = r#"
//! package policy
//!
//! import rego.v1
//!
//! default allow := false
//!
//! allow if {
//!     input.path = "/api/v1/users"
//!     input.method = "GET"
//! }
//! "#;
//!
//!     let gate = PolicyGate::new(Config::new(policy, "data.policy.allow"))?;
//!
//!     let mut bindings = BindingMap::new();
//!     bindings.insert("path".to_string(), json!("/api/v1/users"));
//!     bindings.insert("method".to_string(), json!("GET"));
//!
//!     if gate.query_policy(&bindings).await? {
//!         println!("Access granted!");
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod bindings;
pub mod config;
pub mod engine;
pub mod error;
pub mod middleware;
pub mod rego;  // Rego compilation and evaluation

/// Attribute name → value map exposed to the policy as `input`
pub type BindingMap = serde_json::Map<String, serde_json::Value>;

// Re-export commonly used types
pub use bindings::{Attribute, BindingExtractor, RequestBindings};
pub use config::{Config, DEFAULT_MAX_CONCURRENT_EVALUATIONS};
pub use engine::{CacheStats, Decision, DecisionReason, Denial, EvaluatorCache, PolicyGate};
pub use error::{GateError, Result};
pub use middleware::{PolicyGateLayer, PolicyGateService};
pub use rego::CompiledEvaluator;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
