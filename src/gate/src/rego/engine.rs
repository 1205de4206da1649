//! Rego policy compilation and bounded evaluation

use parking_lot::Mutex;
use regorus::unstable::{Expr, Parser, Rule, RuleHead};
use regorus::{Engine, Value as RegoValue};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::{GateError, Result};
use crate::rego::convert::{bindings_to_input, describe};
use crate::BindingMap;

/// File name the policy source is registered under
const POLICY_PATH: &str = "policy.rego";

/// Evaluation slots shared by evaluators compiled outside an `EvaluatorCache`
fn shared_slots() -> Arc<Semaphore> {
    static SLOTS: OnceLock<Arc<Semaphore>> = OnceLock::new();
    Arc::clone(SLOTS.get_or_init(|| {
        Arc::new(Semaphore::new(crate::config::DEFAULT_MAX_CONCURRENT_EVALUATIONS))
    }))
}

/// A policy module compiled together with the query that yields the verdict
///
/// Immutable after creation. Every evaluation works on its own clone of the
/// prepared engine, so concurrent evaluations never wait on each other; the
/// lock only guards the clone itself.
///
/// `regorus` cannot interrupt a running evaluation. One that outlives its
/// timeout keeps its blocking thread until it finishes, so evaluations run
/// under a semaphore sized below tokio's blocking pool. Waiting for a slot
/// counts against the timeout.
pub struct CompiledEvaluator {
    /// Prepared engine with the policy module loaded
    template: Mutex<Engine>,

    /// Validated rule path
    query: String,

    /// Package declared by the policy module (e.g. `data.policy`)
    package: String,

    /// Bound on evaluations occupying a blocking thread
    slots: Arc<Semaphore>,
}

impl CompiledEvaluator {
    /// Compile a policy source and query
    ///
    /// # Arguments
    /// * `policy` - Rego module source
    /// * `query` - Rule path such as `data.policy.allow`
    ///
    /// # Errors
    /// Returns `CompileError` if the module does not parse, the query is not a
    /// rule path, or the query names no rule defined by the module
    pub fn compile(policy: &str, query: &str) -> Result<Self> {
        Self::compile_with_slots(policy, query, shared_slots())
    }

    /// Compile a policy whose evaluations take permits from `slots`
    ///
    /// Evaluators sharing a semaphore share its bound on running evaluations.
    pub fn compile_with_slots(policy: &str, query: &str, slots: Arc<Semaphore>) -> Result<Self> {
        let start = Instant::now();
        let query = query.trim();
        validate_query(query)?;

        let mut engine = Engine::new();
        let package = engine
            .add_policy(POLICY_PATH.to_string(), policy.to_string())
            .map_err(|e| GateError::CompileError(format!("{e:#}")))?;
        let package = if package.starts_with("data.") {
            package
        } else {
            format!("data.{package}")
        };

        if !query.starts_with(&format!("{package}.")) {
            return Err(GateError::CompileError(format!(
                "query '{query}' does not reference a rule in package '{package}'"
            )));
        }

        let rules = defined_rules(&mut engine, &package)?;
        if !rules.iter().any(|rule| rule == query) {
            return Err(GateError::CompileError(format!(
                "query '{query}' does not name a rule defined in package '{package}'"
            )));
        }

        debug!(
            "Compiled policy package {} for query {} in {:?}",
            package,
            query,
            start.elapsed()
        );

        Ok(Self {
            template: Mutex::new(engine),
            query: query.to_string(),
            package,
            slots,
        })
    }

    /// Rule path evaluated for the verdict
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Package declared by the compiled module
    pub fn package(&self) -> &str {
        &self.package
    }

    /// Evaluate the query against a binding map
    ///
    /// The bindings are exposed to the policy as `input`. An undefined result
    /// (no rule body matched and no default) is `false`.
    ///
    /// # Errors
    /// * `EvaluationTimeout` if evaluation does not finish within `timeout`
    /// * `EvaluationFault` if the engine reports an error or panics
    /// * `ResultShapeError` if the query resolves to a non-boolean value
    pub async fn evaluate(&self, bindings: &BindingMap, timeout: Duration) -> Result<bool> {
        let value = self.evaluate_value(bindings, timeout).await?;

        match value {
            RegoValue::Bool(allowed) => Ok(allowed),
            RegoValue::Undefined => Ok(false),
            other => Err(GateError::ResultShapeError {
                query: self.query.clone(),
                found: describe(&other),
            }),
        }
    }

    /// Evaluate the query and return the raw rule value
    async fn evaluate_value(&self, bindings: &BindingMap, timeout: Duration) -> Result<RegoValue> {
        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;
        let input = bindings_to_input(bindings)
            .map_err(|e| GateError::EvaluationFault(format!("{e:#}")))?;

        let permit = match tokio::time::timeout_at(deadline, Arc::clone(&self.slots).acquire_owned()).await {
            Err(_) => {
                warn!("No evaluation slot for {} within {:?}", self.query, timeout);
                return Err(GateError::EvaluationTimeout(timeout));
            }
            Ok(Err(_)) => {
                return Err(GateError::EvaluationFault("evaluation slots closed".to_string()));
            }
            Ok(Ok(permit)) => permit,
        };

        let mut engine = {
            let template = self.template.lock();
            template.clone()
        };
        let query = self.query.clone();

        // The permit is released when the blocking task returns, not when the
        // caller stops waiting for it.
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            engine.set_input(input);
            engine.eval_rule(query)
        });

        let value = match tokio::time::timeout_at(deadline, task).await {
            Err(_) => {
                warn!("Evaluation of {} exceeded {:?}", self.query, timeout);
                return Err(GateError::EvaluationTimeout(timeout));
            }
            Ok(Err(join_error)) => {
                let reason = if join_error.is_panic() {
                    "policy engine panicked".to_string()
                } else {
                    format!("evaluation task failed: {join_error}")
                };
                return Err(GateError::EvaluationFault(reason));
            }
            Ok(Ok(Err(e))) => return Err(GateError::EvaluationFault(format!("{e:#}"))),
            Ok(Ok(Ok(value))) => value,
        };

        debug!("Evaluated {} in {:?}", self.query, start.elapsed());
        Ok(value)
    }
}

impl std::fmt::Debug for CompiledEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledEvaluator")
            .field("query", &self.query)
            .field("package", &self.package)
            .finish_non_exhaustive()
    }
}

/// Rule paths defined by the loaded module, e.g. `data.policy.allow`
///
/// Mirrors how the interpreter registers rules: a partial rule's variable key
/// is not part of its path, a default rule's index is dropped.
fn defined_rules(engine: &mut Engine, package: &str) -> Result<Vec<String>> {
    let mut paths = Vec::new();

    for module in engine.get_modules().iter() {
        for rule in &module.policy {
            let refr = match rule.as_ref() {
                Rule::Spec { head, .. } => {
                    let refr = match head {
                        RuleHead::Compr { refr, .. }
                        | RuleHead::Set { refr, .. }
                        | RuleHead::Func { refr, .. } => refr,
                    };
                    match refr.as_ref() {
                        Expr::RefBrack { index, .. } if matches!(index.as_ref(), Expr::String(_)) => refr,
                        Expr::RefBrack { refr, .. } => refr,
                        _ => refr,
                    }
                }
                Rule::Default { refr, .. } => match refr.as_ref() {
                    Expr::RefBrack { refr, .. } => refr,
                    _ => refr,
                },
            };

            let components = Parser::get_path_ref_components(refr)
                .map_err(|e| GateError::CompileError(format!("{e:#}")))?;
            let name: Vec<&str> = components.iter().map(|span| span.text()).collect();
            paths.push(format!("{package}.{}", name.join(".")));
        }
    }

    Ok(paths)
}

/// Check that a query is a `data.<package>.<rule>` path of identifiers
fn validate_query(query: &str) -> Result<()> {
    let mut segments = query.split('.');

    if segments.next() != Some("data") {
        return Err(GateError::CompileError(format!(
            "query '{query}' must start with 'data.'"
        )));
    }

    let rest: Vec<&str> = segments.collect();
    if rest.len() < 2 {
        return Err(GateError::CompileError(format!(
            "query '{query}' must name a package and a rule"
        )));
    }

    for segment in rest {
        let mut chars = segment.chars();
        let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(GateError::CompileError(format!(
                "query '{query}' has an invalid segment '{segment}'"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const POLICY: &str = r#"
package policy

import rego.v1

default allow := false

allow if {
    input.path = "/api/v1/users"
    input.method = "GET"
}

level := 3
"#;

    fn bindings(path: &str, method: &str) -> BindingMap {
        let mut map = BindingMap::new();
        map.insert("path".to_string(), json!(path));
        map.insert("method".to_string(), json!(method));
        map
    }

    #[test]
    fn test_compile() {
        let evaluator = CompiledEvaluator::compile(POLICY, "data.policy.allow").unwrap();
        assert_eq!(evaluator.query(), "data.policy.allow");
        assert_eq!(evaluator.package(), "data.policy");
    }

    #[test]
    fn test_compile_syntax_error() {
        let result = CompiledEvaluator::compile("package policy\nallow {{ ", "data.policy.allow");
        assert!(matches!(result, Err(GateError::CompileError(_))));
    }

    #[test]
    fn test_query_validation() {
        for query in ["", "policy.allow", "data", "data.policy", "data.policy.", "data.1x.allow", "data.policy.allow == true"] {
            let result = CompiledEvaluator::compile(POLICY, query);
            assert!(
                matches!(result, Err(GateError::CompileError(_))),
                "query {query:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_query_outside_package() {
        let result = CompiledEvaluator::compile(POLICY, "data.other.allow");
        assert!(matches!(result, Err(GateError::CompileError(_))));
    }

    #[test]
    fn test_query_must_name_defined_rule() {
        let result = CompiledEvaluator::compile(POLICY, "data.policy.alow");
        match result {
            Err(GateError::CompileError(msg)) => assert!(msg.contains("data.policy.alow"), "{msg}"),
            other => panic!("Expected CompileError, got {other:?}"),
        }

        // Default-only rules and value rules resolve too
        let policy = "package policy\n\nimport rego.v1\n\ndefault allow := false\n";
        assert!(CompiledEvaluator::compile(policy, "data.policy.allow").is_ok());
        assert!(CompiledEvaluator::compile(POLICY, "data.policy.level").is_ok());
    }

    #[test]
    fn test_partial_set_rule_resolves() {
        let policy = r#"
package policy

import rego.v1

violations contains msg if {
    input.method == "DELETE"
    msg := "delete not allowed"
}

allow if {
    count(violations) == 0
}
"#;
        assert!(CompiledEvaluator::compile(policy, "data.policy.violations").is_ok());
        assert!(CompiledEvaluator::compile(policy, "data.policy.allow").is_ok());
        assert!(CompiledEvaluator::compile(policy, "data.policy.msg").is_err());
    }

    #[tokio::test]
    async fn test_slot_wait_counts_against_timeout() {
        let slots = Arc::new(Semaphore::new(1));
        let evaluator =
            CompiledEvaluator::compile_with_slots(POLICY, "data.policy.allow", Arc::clone(&slots)).unwrap();

        // Hold the only slot: the evaluation cannot start before its deadline
        let held = Arc::clone(&slots).acquire_owned().await.unwrap();
        let timeout = Duration::from_millis(20);
        let result = evaluator.evaluate(&bindings("/api/v1/users", "GET"), timeout).await;
        assert!(matches!(result, Err(GateError::EvaluationTimeout(t)) if t == timeout), "{result:?}");

        drop(held);
        let result = evaluator
            .evaluate(&bindings("/api/v1/users", "GET"), Duration::from_secs(10))
            .await;
        assert!(matches!(result, Ok(true)), "{result:?}");
        assert_eq!(slots.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_evaluate_allow_and_deny() {
        let evaluator = CompiledEvaluator::compile(POLICY, "data.policy.allow").unwrap();
        let timeout = Duration::from_secs(10);

        assert!(evaluator
            .evaluate(&bindings("/api/v1/users", "GET"), timeout)
            .await
            .unwrap());
        assert!(!evaluator
            .evaluate(&bindings("/api/v1/users", "POST"), timeout)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_non_boolean_result() {
        let evaluator = CompiledEvaluator::compile(POLICY, "data.policy.level").unwrap();
        let result = evaluator
            .evaluate(&BindingMap::new(), Duration::from_secs(10))
            .await;

        match result {
            Err(GateError::ResultShapeError { query, found }) => {
                assert_eq!(query, "data.policy.level");
                assert_eq!(found, "3");
            }
            other => panic!("Expected ResultShapeError, got {other:?}"),
        }
    }

    #[test]
    fn test_debug_omits_engine() {
        let evaluator = CompiledEvaluator::compile(POLICY, "data.policy.allow").unwrap();
        let rendered = format!("{evaluator:?}");
        assert!(rendered.contains("data.policy.allow"));
    }
}
