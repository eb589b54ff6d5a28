//! Benchmarks for the admission path.
//!
//! Benchmarks cover:
//! - Payload flattening
//! - Individual built-in rules
//! - Full guardrail phases through the concurrent runner
//! - Scoring and policy evaluation
//! - One job end to end on in-memory backends

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use prometheus_orchestrator::builders::WorkerBuilder;
use prometheus_orchestrator::config::OrchestratorSettings;
use prometheus_orchestrator::core::{Deployment, DeploymentStatus, Job, QueueMessage};
use prometheus_orchestrator::dispatch::ComputeDispatcher;
use prometheus_orchestrator::guardrails::rules::{content_guardrail, pii_guardrail, safety_guardrail};
use prometheus_orchestrator::guardrails::{extract_text, GuardrailOptions, GuardrailRunner, Phase, RuleSet};
use prometheus_orchestrator::infra::{
    InMemoryCounterStore, InMemoryDeploymentStore, InMemoryJobQueue, InMemoryJobStore,
};
use prometheus_orchestrator::policy::{evaluate, score, PolicyThresholds};
use prometheus_orchestrator::util::metrics::Metrics;

use serde_json::{json, Value};
use tokio::runtime::Runtime;
use uuid::Uuid;

// ============================================================================
// Payloads
// ============================================================================

fn payload(paragraphs: usize) -> Value {
    let messages: Vec<Value> = (0..paragraphs)
        .map(|i| {
            json!({
                "role": if i % 2 == 0 { "user" } else { "assistant" },
                "content": format!(
                    "Paragraph {i}: summarize the quarterly report and reach me at user{i}@example.com"
                ),
                "meta": {"index": i, "final": false},
            })
        })
        .collect();
    json!({ "prompt": "hello", "messages": messages })
}

// ============================================================================
// Rules
// ============================================================================

fn bench_extract_text(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract_text");

    for size in [1_usize, 16, 256] {
        let data = payload(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| black_box(extract_text(black_box(data))));
        });
    }

    group.finish();
}

fn bench_builtin_rules(c: &mut Criterion) {
    let mut group = c.benchmark_group("builtin_rules");
    let data = payload(16);

    group.bench_function("pii", |b| b.iter(|| black_box(pii_guardrail(black_box(&data)))));
    group.bench_function("safety", |b| b.iter(|| black_box(safety_guardrail(black_box(&data)))));
    group.bench_function("content", |b| b.iter(|| black_box(content_guardrail(black_box(&data)))));

    group.finish();
}

// ============================================================================
// Runner and policy
// ============================================================================

fn bench_runner_phase(c: &mut Criterion) {
    let mut group = c.benchmark_group("runner_phase");
    let runner = GuardrailRunner::new(Arc::new(RuleSet::builtin()), Arc::new(Metrics::new()));
    let opts = GuardrailOptions::default();

    for size in [1_usize, 64] {
        let data = payload(size);
        group.bench_with_input(BenchmarkId::new("input", size), &data, |b, data| {
            b.to_async(Runtime::new().unwrap())
                .iter(|| async { black_box(runner.run(data, Phase::Input, &opts).await) });
        });
    }

    group.finish();
}

fn bench_score_and_evaluate(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let runner = GuardrailRunner::new(Arc::new(RuleSet::builtin()), Arc::new(Metrics::new()));
    let outcome = rt.block_on(runner.run(&payload(4), Phase::Input, &GuardrailOptions::default()));
    let thresholds = PolicyThresholds::default();

    c.bench_function("score_and_evaluate", |b| {
        b.iter(|| black_box(evaluate(score(black_box(&outcome.results)), &thresholds)));
    });
}

// ============================================================================
// End-to-end
// ============================================================================

fn bench_end_to_end_job(c: &mut Criterion) {
    let jobs = Arc::new(InMemoryJobStore::new());
    let deployments = Arc::new(InMemoryDeploymentStore::new());
    let worker = WorkerBuilder::new(OrchestratorSettings::default())
        .queue(Arc::new(InMemoryJobQueue::new()))
        .jobs(jobs.clone())
        .deployments(deployments.clone())
        .counters(Arc::new(InMemoryCounterStore::new()))
        .dispatcher(ComputeDispatcher::simulated(Duration::ZERO))
        .build()
        .unwrap();

    let deployment = Deployment {
        id: Uuid::new_v4(),
        tenant_id: Uuid::new_v4(),
        model_id: "bench-model".into(),
        config: json!({}),
        status: DeploymentStatus::Ready,
    };
    deployments.insert(deployment.clone());

    c.bench_function("end_to_end_job", |b| {
        b.to_async(Runtime::new().unwrap()).iter(|| async {
            let job = Job::queued(deployment.tenant_id, deployment.id, json!({"prompt": "hello"}));
            jobs.insert(job.clone());
            black_box(worker.process_message(&QueueMessage::for_job(&job).to_json()).await)
        });
    });
}

criterion_group!(rule_benches, bench_extract_text, bench_builtin_rules);

criterion_group!(policy_benches, bench_runner_phase, bench_score_and_evaluate);

criterion_group!(scenario_benches, bench_end_to_end_job);

criterion_main!(rule_benches, policy_benches, scenario_benches);
