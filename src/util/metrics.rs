//! Counters and gauges for guardrail and worker activity.
//!
//! Series are keyed by their sorted label pairs and stored in `DashMap`s so
//! that concurrent rule tasks can record outcomes without a shared lock.
//! [`Metrics::render`] produces the Prometheus text exposition format for an
//! external scrape endpoint.

use std::fmt::Write;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use dashmap::DashMap;

type LabelKey = Vec<(String, String)>;

fn label_key(labels: &[(&str, &str)]) -> LabelKey {
    let mut key: LabelKey = labels
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    key.sort();
    key
}

fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn render_labels(key: &LabelKey) -> String {
    if key.is_empty() {
        return String::new();
    }
    let inner = key
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", escape_label(v)))
        .collect::<Vec<_>>()
        .join(",");
    format!("{{{inner}}}")
}

/// Monotonic counter family with dynamic labels.
#[derive(Debug, Default)]
pub struct CounterVec {
    map: DashMap<LabelKey, AtomicU64>,
}

impl CounterVec {
    /// Increment by 1.
    pub fn inc(&self, labels: &[(&str, &str)]) {
        self.add(labels, 1);
    }

    /// Increment by an arbitrary value.
    pub fn add(&self, labels: &[(&str, &str)], v: u64) {
        self.map
            .entry(label_key(labels))
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(v, Ordering::Relaxed);
    }

    /// Current value of one series, 0 if it was never touched.
    #[must_use]
    pub fn get(&self, labels: &[(&str, &str)]) -> u64 {
        self.map
            .get(&label_key(labels))
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Sum across every series of the family.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.map.iter().map(|r| r.value().load(Ordering::Relaxed)).sum()
    }

    fn render(&self, name: &str, help: &str, out: &mut String) {
        let _ = writeln!(out, "# HELP {name} {help}");
        let _ = writeln!(out, "# TYPE {name} counter");
        let mut rows: Vec<(String, u64)> = self
            .map
            .iter()
            .map(|r| (render_labels(r.key()), r.value().load(Ordering::Relaxed)))
            .collect();
        rows.sort();
        for (labels, val) in rows {
            let _ = writeln!(out, "{name}{labels} {val}");
        }
    }
}

/// Unlabeled gauge.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    /// Overwrite the current value.
    pub fn set(&self, v: i64) {
        self.value.store(v, Ordering::Relaxed);
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    fn render(&self, name: &str, help: &str, out: &mut String) {
        let _ = writeln!(out, "# HELP {name} {help}");
        let _ = writeln!(out, "# TYPE {name} gauge");
        let _ = writeln!(out, "{name} {}", self.get());
    }
}

/// Metric families exposed by the orchestrator.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Results resolved to `flag`, labeled by `rule`.
    pub guardrail_flagged: CounterVec,
    /// Results resolved to `block`, labeled by `rule`.
    pub guardrail_blocked: CounterVec,
    /// Rule executions that returned an error or panicked, labeled by `rule`.
    pub guardrail_errors: CounterVec,
    /// Rules still running when their phase hit the deadline, labeled by `rule`.
    pub guardrail_timeouts: CounterVec,
    /// Terminal transitions performed by workers, labeled by `status`.
    pub jobs: CounterVec,
    /// Messages waiting in the inference queue at the last poll.
    pub queue_depth: Gauge,
}

impl Metrics {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Render every family in Prometheus text exposition format.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.guardrail_flagged.render(
            "guardrail_flagged_total",
            "Requests flagged (but allowed) by guardrails",
            &mut out,
        );
        self.guardrail_blocked.render(
            "guardrail_blocked_total",
            "Requests blocked by guardrails",
            &mut out,
        );
        self.guardrail_errors.render(
            "guardrail_errors_total",
            "Guardrail rule execution errors",
            &mut out,
        );
        self.guardrail_timeouts.render(
            "guardrail_timeouts_total",
            "Guardrail rules abandoned at the phase deadline",
            &mut out,
        );
        self.jobs
            .render("jobs_total", "Jobs moved to a terminal status", &mut out);
        self.queue_depth.render(
            "inference_queue_depth",
            "Number of jobs in the inference queue",
            &mut out,
        );
        out
    }
}
