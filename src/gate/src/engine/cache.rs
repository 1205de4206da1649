//! Compiled evaluator cache keyed by (policy, query)

use blake3::Hasher;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::config::DEFAULT_MAX_CONCURRENT_EVALUATIONS;
use crate::error::Result;
use crate::rego::CompiledEvaluator;

/// Cache key type (BLAKE3 hash)
type CacheKey = [u8; 32];

/// Cache of compiled evaluators
///
/// Provides:
/// - One compilation per distinct (policy, query) pair
/// - Shared `Arc` handles safe for concurrent evaluation
/// - BLAKE3 hashing for cache keys
/// - One evaluation bound shared by every evaluator it compiles
pub struct EvaluatorCache {
    /// Compiled evaluators (thread-safe)
    evaluators: DashMap<CacheKey, Arc<CompiledEvaluator>>,

    /// Evaluation slots handed to each compiled evaluator
    slots: Arc<Semaphore>,
    max_concurrent_evaluations: usize,

    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for EvaluatorCache {
    fn default() -> Self {
        Self::with_max_concurrent_evaluations(DEFAULT_MAX_CONCURRENT_EVALUATIONS)
    }
}

impl EvaluatorCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty cache whose evaluators run at most `max` evaluations at once
    pub fn with_max_concurrent_evaluations(max: usize) -> Self {
        Self {
            evaluators: DashMap::new(),
            slots: Arc::new(Semaphore::new(max)),
            max_concurrent_evaluations: max,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Bound on evaluations running at once
    pub fn max_concurrent_evaluations(&self) -> usize {
        self.max_concurrent_evaluations
    }

    /// Get the evaluator for a (policy, query) pair, compiling it on first use
    ///
    /// # Errors
    /// Returns `CompileError` if compilation fails; failures are not cached
    pub fn get_or_compile(&self, policy: &str, query: &str) -> Result<Arc<CompiledEvaluator>> {
        let key = Self::compute_key(policy, query);

        if let Some(evaluator) = self.evaluators.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(&evaluator));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);

        // The entry lock serializes concurrent compilation of the same pair
        let entry = self.evaluators.entry(key).or_try_insert_with(|| {
            debug!("Compiling evaluator for query {}", query);
            CompiledEvaluator::compile_with_slots(policy, query, Arc::clone(&self.slots)).map(Arc::new)
        })?;

        Ok(Arc::clone(entry.value()))
    }

    /// Drop every compiled evaluator
    pub fn clear(&self) {
        self.evaluators.clear();
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.evaluators.len(),
        }
    }

    /// Compute cache key from policy source and query
    fn compute_key(policy: &str, query: &str) -> CacheKey {
        let mut hasher = Hasher::new();

        // Length prefix keeps (policy, query) boundaries unambiguous
        hasher.update(&(policy.len() as u64).to_le_bytes());
        hasher.update(policy.as_bytes());
        hasher.update(query.trim().as_bytes());

        *hasher.finalize().as_bytes()
    }
}

impl std::fmt::Debug for EvaluatorCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluatorCache")
            .field("stats", &self.stats())
            .field("max_concurrent_evaluations", &self.max_concurrent_evaluations)
            .finish()
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}
