//! Policy gate: owned evaluator cache, hot-reloadable snapshot, verdicts
//!
//! Orchestrates compilation, evaluation, and the fail-closed mapping from
//! evaluation results to allow/deny decisions.

pub mod cache;
pub mod decision;

pub use cache::{CacheStats, EvaluatorCache};
pub use decision::{Decision, DecisionReason};

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::rego::CompiledEvaluator;
use crate::BindingMap;

/// Everything one request is evaluated against
#[derive(Debug)]
struct Snapshot {
    config: Config,
    policy: Arc<CompiledEvaluator>,
    url: Option<Arc<CompiledEvaluator>>,
    denial: Denial,
}

/// How a rejected request is answered
///
/// Taken from the same snapshot as the decision it accompanies, so a reload
/// between deciding and responding cannot mix settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub status: u16,
    pub message: Arc<str>,
}

/// Policy gate - the caller-facing evaluation surface
///
/// # Architecture
///
/// ```text
/// BindingMap → Snapshot(Config, CompiledEvaluator) → verdict → Decision
///                   ↑
///   reload() ── EvaluatorCache (one compile per (policy, query))
/// ```
///
/// Requests grab the current snapshot once and evaluate against it, so a
/// concurrent `reload` never exposes a half-updated policy.
#[derive(Debug)]
pub struct PolicyGate {
    /// Compiled evaluators, owned by this gate
    cache: EvaluatorCache,

    /// Active configuration and evaluators
    snapshot: RwLock<Arc<Snapshot>>,
}

impl PolicyGate {
    /// Create a gate from configuration
    ///
    /// # Errors
    /// Returns `InvalidConfig` or `CompileError`; both are fatal, the gate
    /// cannot serve traffic without a valid policy
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let cache = EvaluatorCache::with_max_concurrent_evaluations(config.max_concurrent_evaluations);
        let snapshot = Self::build_snapshot(&cache, config)?;

        info!(
            "PolicyGate initialized with query={}, timeout={:?}, max_concurrent_evaluations={}",
            snapshot.config.query,
            snapshot.config.timeout,
            cache.max_concurrent_evaluations()
        );

        Ok(Self {
            cache,
            snapshot: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Evaluate the configured query against the bindings
    pub async fn query_policy(&self, bindings: &BindingMap) -> Result<bool> {
        let snapshot = self.snapshot();
        snapshot
            .policy
            .evaluate(bindings, snapshot.config.timeout)
            .await
    }

    /// Evaluate the configured URL target against the bindings
    ///
    /// Falls back to the main query when no URL target is configured.
    pub async fn query_url(&self, bindings: &BindingMap) -> Result<bool> {
        let snapshot = self.snapshot();
        let evaluator = snapshot.url.as_ref().unwrap_or(&snapshot.policy);
        evaluator.evaluate(bindings, snapshot.config.timeout).await
    }

    /// Decide whether a request with these bindings is admitted
    ///
    /// Every evaluation error becomes a denial.
    pub async fn authorize(&self, bindings: &BindingMap) -> Decision {
        self.authorize_with_denial(bindings).await.0
    }

    /// Like [`authorize`](Self::authorize), also returning how to answer a
    /// rejection under the policy that made the decision
    pub async fn authorize_with_denial(&self, bindings: &BindingMap) -> (Decision, Denial) {
        let start = Instant::now();
        let snapshot = self.snapshot();
        let query = snapshot.policy.query();

        let decision = match snapshot
            .policy
            .evaluate(bindings, snapshot.config.timeout)
            .await
        {
            Ok(verdict) if verdict == snapshot.config.expected_result => Decision::allow(query),
            Ok(_) => Decision::deny(query),
            Err(e) => {
                warn!("Denying request after evaluation error on {}: {}", query, e);
                Decision::failed(e.to_string())
            }
        };

        debug!(
            "Decision {}: {} in {:?}",
            decision.id,
            if decision.allowed { "ALLOW" } else { "DENY" },
            start.elapsed()
        );

        (decision, snapshot.denial.clone())
    }

    /// Replace the active configuration
    ///
    /// The new policy is compiled before the swap; on failure the current
    /// snapshot stays active. Evaluations already running finish against the
    /// snapshot they started with.
    pub fn reload(&self, config: Config) -> Result<()> {
        let snapshot = Self::build_snapshot(&self.cache, config)?;
        if snapshot.config.max_concurrent_evaluations != self.cache.max_concurrent_evaluations() {
            warn!(
                "Reload ignores max_concurrent_evaluations={}, keeping {}",
                snapshot.config.max_concurrent_evaluations,
                self.cache.max_concurrent_evaluations()
            );
        }
        let query = snapshot.config.query.clone();

        *self.snapshot.write() = Arc::new(snapshot);

        info!("Policy reloaded, query={}", query);
        Ok(())
    }

    /// Active configuration
    pub fn config(&self) -> Config {
        self.snapshot().config.clone()
    }

    /// Get compile cache statistics
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read())
    }

    fn build_snapshot(cache: &EvaluatorCache, config: Config) -> Result<Snapshot> {
        config.validate()?;

        let policy = cache.get_or_compile(&config.policy, &config.query)?;
        let url = config
            .url
            .as_deref()
            .map(|target| cache.get_or_compile(&config.policy, target))
            .transpose()?;

        let denial = Denial {
            status: config.denied_status,
            message: Arc::from(config.denied_message.as_str()),
        };

        Ok(Snapshot {
            config,
            policy,
            url,
            denial,
        })
    }
}
