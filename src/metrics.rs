//! Per-phase performance accounting and the progress channel.
//!
//! Metrics counters are the only shared mutable state that crosses
//! suspension points; they sit behind a mutex and every update is a
//! handful of integer additions.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Aggregated statistics for one pipeline phase.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PhaseStats {
    /// Number of LLM calls issued by the phase.
    pub llm_calls: u64,
    /// Prompt tokens reported by the provider.
    pub prompt_tokens: u64,
    /// Completion tokens reported by the provider.
    pub completion_tokens: u64,
    /// Wall-clock time spent in the phase, milliseconds.
    pub duration_ms: u64,
}

/// The performance report returned alongside the tree.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceReport {
    /// Per-phase statistics, keyed by phase name.
    pub phases: BTreeMap<String, PhaseStats>,
    /// Total wall-clock time, milliseconds.
    pub total_duration_ms: u64,
    /// True when the pipeline stopped early (cancellation or exhausted
    /// budget) and returned the most complete tree produced so far.
    pub partial: bool,
}

impl PerformanceReport {
    /// Total LLM calls across all phases.
    pub fn total_llm_calls(&self) -> u64 {
        self.phases.values().map(|p| p.llm_calls).sum()
    }
}

/// Thread-safe metrics accumulator shared between the orchestrator and
/// the LLM client.
#[derive(Debug, Default)]
pub struct Metrics {
    inner: Mutex<PerformanceReport>,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record one LLM call against a phase.
    pub fn record_call(&self, phase: &str, prompt_tokens: u64, completion_tokens: u64) {
        let mut report = self.inner.lock().expect("metrics poisoned");
        let stats = report.phases.entry(phase.to_string()).or_default();
        stats.llm_calls += 1;
        stats.prompt_tokens += prompt_tokens;
        stats.completion_tokens += completion_tokens;
    }

    /// Record wall-clock time spent in a phase.
    pub fn record_phase_duration(&self, phase: &str, elapsed: Duration) {
        let mut report = self.inner.lock().expect("metrics poisoned");
        let stats = report.phases.entry(phase.to_string()).or_default();
        stats.duration_ms += elapsed.as_millis() as u64;
    }

    /// Mark the run as partial.
    pub fn mark_partial(&self) {
        self.inner.lock().expect("metrics poisoned").partial = true;
    }

    /// Snapshot the report, stamping the total duration.
    pub fn finish(&self, started: Instant) -> PerformanceReport {
        let mut report = self.inner.lock().expect("metrics poisoned").clone();
        report.total_duration_ms = started.elapsed().as_millis() as u64;
        report
    }
}

/// Progress callback invoked at phase boundaries with
/// `(phase_name, message, fraction)`.
pub type ProgressFn = dyn Fn(&str, &str, f64) + Send + Sync;

/// Optional shared progress callback.
pub type Progress = Option<Arc<ProgressFn>>;

/// Invoke the progress callback if one is installed.
pub fn report_progress(progress: &Progress, phase: &str, message: &str, fraction: f64) {
    if let Some(callback) = progress {
        callback(phase, message, fraction.clamp(0.0, 1.0));
    }
}
