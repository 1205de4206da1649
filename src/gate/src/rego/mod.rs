//! Rego policy engine for verdict evaluation
//!
//! This module compiles a policy module and query into a reusable evaluator
//! and runs it against per-request bindings under a timeout.

pub mod engine;
pub mod convert;

pub use engine::CompiledEvaluator;
