//! Evaluation latency benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rego_gate::{BindingMap, CompiledEvaluator, Config, EvaluatorCache, PolicyGate};
use serde_json::json;
use std::time::Duration;

const POLICY: &str = r#"
package authz

import rego.v1

default allow := false

isAdminRole := {"admin"}

onlyAdminAPI := {"/admin/api1", "/admin/api2", "/admin/api3"}

allow if {
    isAdminRole[input.role]
    onlyAdminAPI[input.path]
}

allow if {
    not isAdminRole[input.role]
    not onlyAdminAPI[input.path]
}
"#;

fn bindings(role: &str, path: &str) -> BindingMap {
    let mut bindings = BindingMap::new();
    bindings.insert("role".to_string(), json!(role));
    bindings.insert("path".to_string(), json!(path));
    bindings
}

fn bench_compile(c: &mut Criterion) {
    c.bench_function("compile", |b| {
        b.iter(|| CompiledEvaluator::compile(black_box(POLICY), "data.authz.allow").unwrap())
    });

    let cache = EvaluatorCache::new();
    c.bench_function("compile_cached", |b| {
        b.iter(|| cache.get_or_compile(black_box(POLICY), "data.authz.allow").unwrap())
    });
}

fn bench_evaluate(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let evaluator = CompiledEvaluator::compile(POLICY, "data.authz.allow").unwrap();
    let input = bindings("admin", "/admin/api1");
    let timeout = Duration::from_secs(1);

    c.bench_function("evaluate", |b| {
        b.to_async(&runtime)
            .iter(|| evaluator.evaluate(black_box(&input), timeout))
    });
}

fn bench_authorize(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let gate = PolicyGate::new(Config::new(POLICY, "data.authz.allow")).unwrap();
    let input = bindings("member", "/services/api1");

    c.bench_function("authorize", |b| {
        b.to_async(&runtime).iter(|| gate.authorize(black_box(&input)))
    });
}

criterion_group!(benches, bench_compile, bench_evaluate, bench_authorize);
criterion_main!(benches);
