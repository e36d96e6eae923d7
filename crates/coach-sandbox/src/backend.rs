//! The seam between the runner and the isolation runtime.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::execution::{TestCase, TestCaseResult};
use crate::harness::{prepare_cases, results_marker};
use crate::limits::ResourceLimits;
use crate::{Language, SandboxError};

/// Everything a backend needs to run one submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxJob {
    /// Run identifier.
    pub execution_id: String,
    /// Source language.
    pub language: Language,
    /// Learner code, already validated.
    pub code: String,
    /// Test cases passed to the harness.
    pub test_cases: Vec<TestCase>,
    /// Ceilings for this run.
    pub limits: ResourceLimits,
    /// Per-run line that introduces the harness results.
    pub results_marker: String,
}

impl SandboxJob {
    /// Creates a job with a fresh results marker.
    #[must_use]
    pub fn new(
        execution_id: impl Into<String>,
        language: Language,
        code: impl Into<String>,
        test_cases: Vec<TestCase>,
        limits: ResourceLimits,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            language,
            code: code.into(),
            test_cases,
            limits,
            results_marker: results_marker(),
        }
    }
}

/// Raw facts about a finished sandbox, before classification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxOutcome {
    /// Exit code, if the process exited.
    pub exit_code: Option<i64>,
    /// Captured stdout (truncated to the output cap).
    pub stdout: String,
    /// Captured stderr (truncated to the output cap).
    pub stderr: String,
    /// Whether the wall-clock timeout fired and the sandbox was killed.
    pub timed_out: bool,
    /// Whether the kernel OOM killer stopped the process.
    pub oom_killed: bool,
    /// Highest sampled memory usage in bytes.
    pub peak_memory_bytes: u64,
    /// Total CPU time in nanoseconds.
    pub cpu_time_ns: u64,
    /// Wall-clock duration in milliseconds.
    pub wall_time_ms: u64,
}

impl SandboxOutcome {
    /// A clean exit whose stdout carries harness results after `marker`.
    #[must_use]
    pub fn from_harness(marker: &str, results: &[TestCaseResult]) -> Self {
        let payload = serde_json::to_string(results).unwrap_or_else(|_| "[]".to_string());
        Self {
            exit_code: Some(0),
            stdout: format!("\n{marker}\n{payload}\n"),
            ..Self::default()
        }
    }
}

/// An isolation runtime able to run a [`SandboxJob`].
///
/// Implementations must release every resource they create (containers,
/// temporary directories) before `run` returns, whatever the outcome.
#[async_trait]
pub trait ExecutionBackend: Send + Sync + std::fmt::Debug {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Cheap reachability probe.
    async fn is_available(&self) -> bool;

    /// Runs one job to completion.
    async fn run(&self, job: SandboxJob) -> Result<SandboxOutcome, SandboxError>;
}

/// Backend used when no runtime could be connected at startup.
///
/// Every execution degrades to static analysis.
#[derive(Debug, Clone)]
pub struct UnavailableBackend {
    reason: String,
}

impl UnavailableBackend {
    /// Creates the backend with the reason shown in warnings.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ExecutionBackend for UnavailableBackend {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    async fn is_available(&self) -> bool {
        false
    }

    async fn run(&self, _job: SandboxJob) -> Result<SandboxOutcome, SandboxError> {
        Err(SandboxError::Unavailable(self.reason.clone()))
    }
}

/// Backend that returns canned outcomes without running anything.
///
/// Queued outcomes are returned in order. Once the queue is empty, every job
/// gets a clean exit in which each test case passed with its expected value.
/// Useful for offline demos and for exercising callers without Docker.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    queued: Mutex<VecDeque<SandboxOutcome>>,
    jobs: Mutex<Vec<SandboxJob>>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedBackend {
    /// Creates a backend with an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an outcome for the next run.
    #[must_use]
    pub fn with_outcome(self, outcome: SandboxOutcome) -> Self {
        self.queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(outcome);
        self
    }

    /// Makes every run take `delay`.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of jobs received so far.
    pub fn runs(&self) -> usize {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Most recent job, if any.
    pub fn last_job(&self) -> Option<SandboxJob> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    /// Highest number of jobs observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn all_passing(job: &SandboxJob) -> SandboxOutcome {
        let results: Vec<TestCaseResult> = prepare_cases(&job.test_cases)
            .into_iter()
            .map(|case| TestCaseResult {
                test_name: case.name,
                passed: true,
                actual: Some(case.expected.clone()),
                expected: case.expected,
                error: None,
            })
            .collect();
        SandboxOutcome::from_harness(&job.results_marker, &results)
    }
}

#[async_trait]
impl ExecutionBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn run(&self, job: SandboxJob) -> Result<SandboxOutcome, SandboxError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let queued = self
            .queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let outcome = queued.unwrap_or_else(|| Self::all_passing(&job));
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(job);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(outcome)
    }
}

/// Truncates `text` to at most `max` bytes on a char boundary.
pub(crate) fn truncate_output(mut text: String, max: usize) -> String {
    if text.len() <= max {
        return text;
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text.push_str("\n[output truncated]");
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unavailable_backend_reports_unavailable() {
        let backend = UnavailableBackend::new("docker not running");
        assert!(!backend.is_available().await);

        let job = SandboxJob::new("run-1", Language::Python, "print(1)", Vec::new(), ResourceLimits::default());
        let err = backend.run(job).await.err();
        assert!(matches!(err, Some(SandboxError::Unavailable(ref r)) if r == "docker not running"));
    }

    #[tokio::test]
    async fn scripted_backend_passes_every_case_by_default() {
        let backend = ScriptedBackend::new();
        let job = SandboxJob::new(
            "run-1",
            Language::Python,
            "def solution(x):\n    return x*2\n",
            vec![TestCase::new("", serde_json::json!(2), serde_json::json!(4))],
            ResourceLimits::default(),
        );
        let marker = job.results_marker.clone();
        let outcome = backend.run(job).await.unwrap_or_default();

        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.stdout.contains(&marker));
        assert!(outcome.stdout.contains("test_1"));
        assert_eq!(backend.runs(), 1);
    }

    #[tokio::test]
    async fn scripted_backend_returns_queued_outcomes_first() {
        let backend = ScriptedBackend::new().with_outcome(SandboxOutcome {
            timed_out: true,
            ..SandboxOutcome::default()
        });
        let job = SandboxJob::new("run-1", Language::Python, "print(1)", Vec::new(), ResourceLimits::default());
        let first = backend.run(job.clone()).await.unwrap_or_default();
        let second = backend.run(job).await.unwrap_or_default();
        assert!(first.timed_out);
        assert!(!second.timed_out);
        assert_eq!(backend.last_job().map(|j| j.execution_id), Some("run-1".to_string()));
    }

    #[test]
    fn truncate_output_keeps_short_text() {
        assert_eq!(truncate_output("abc".into(), 10), "abc");
    }

    #[test]
    fn truncate_output_respects_char_boundaries() {
        let text = "ééééé".to_string();
        let cut = truncate_output(text, 3);
        assert!(cut.starts_with('é'));
        assert!(cut.ends_with("[output truncated]"));
    }
}
