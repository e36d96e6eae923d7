//! The secure code runner.
//!
//! [`SecureCodeRunner::execute`] validates code, refuses anything with a
//! critical finding, and otherwise hands it to an [`ExecutionBackend`] in a
//! spawned task. The spawned task owns its semaphore permit and the backend
//! handle, so a caller that goes away mid-run never leaks a sandbox: the run
//! finishes and the backend removes its container.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::backend::{ExecutionBackend, SandboxJob, SandboxOutcome};
use crate::execution::{
    ErrorKind, ExecutionRequest, ExecutionResult, ExecutionStatus, ResourceUsage, TestCaseResult,
};
use crate::harness::{self, prepare_cases};
use crate::limits::{ResourceLimits, EXIT_CPU_LIMIT, EXIT_KILLED};
use crate::state::{ExecutionState, ExecutionTracker};
use crate::validator::{SecurityValidator, ValidationReport, MAX_CODE_BYTES};
use crate::{Language, SandboxError};

/// Validates and executes learner code under fixed resource ceilings.
#[derive(Debug, Clone)]
pub struct SecureCodeRunner {
    validator: SecurityValidator,
    backend: Arc<dyn ExecutionBackend>,
    limits: ResourceLimits,
    permits: Arc<Semaphore>,
}

impl SecureCodeRunner {
    /// Creates a runner; at most `limits.max_concurrent` sandboxes run at once.
    pub fn new(backend: Arc<dyn ExecutionBackend>, limits: ResourceLimits) -> Self {
        let permits = Arc::new(Semaphore::new(limits.max_concurrent.max(1)));
        Self {
            validator: SecurityValidator::new(),
            backend,
            limits,
            permits,
        }
    }

    /// Limits applied to every run.
    #[must_use]
    pub const fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Name of the configured backend.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Whether the backend can currently run code.
    pub async fn is_available(&self) -> bool {
        self.backend.is_available().await
    }

    /// Runs the static validator only.
    #[must_use]
    pub fn validate(&self, code: &str, language: Language) -> ValidationReport {
        self.validator.scan(code, language)
    }

    /// Validates and, unless rejected, executes `request`.
    ///
    /// Learner failures (exceptions, timeouts, resource ceilings, security
    /// rejections) are reported inside the returned [`ExecutionResult`]. An
    /// unreachable runtime yields [`ExecutionStatus::NotExecuted`].
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::InvalidRequest`] for empty or oversized code,
    /// [`SandboxError::Busy`] if no slot frees up within the queue timeout, and
    /// [`SandboxError::TaskFailed`] if the execution task panicked.
    #[instrument(skip(self, request), fields(language = %request.language, code_len = request.code.len()))]
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, SandboxError> {
        if request.code.trim().is_empty() {
            return Err(SandboxError::InvalidRequest("code must not be empty".into()));
        }
        if request.code.len() > MAX_CODE_BYTES {
            return Err(SandboxError::InvalidRequest(format!(
                "code is {} bytes; the limit is {MAX_CODE_BYTES}",
                request.code.len()
            )));
        }

        let execution_id = Uuid::new_v4().to_string();
        let mut tracker = ExecutionTracker::new();
        let report = self.validator.scan(&request.code, request.language);
        tracker.advance(ExecutionState::Validated)?;

        let mut result = ExecutionResult::empty(&execution_id, ExecutionStatus::Completed);
        result.violations.clone_from(&report.violations);

        if report.has_critical() {
            tracker.advance(ExecutionState::Rejected)?;
            warn!(
                target: "audit",
                execution_id = %execution_id,
                critical = report.count(crate::Severity::Critical),
                "Execution rejected by security validator"
            );
            result.status = ExecutionStatus::Rejected;
            result.error_kind = Some(ErrorKind::SecurityViolation);
            return finish(tracker, result);
        }

        if !self.backend.is_available().await {
            return not_executed(tracker, result, "sandbox runtime is not reachable");
        }

        tracker.advance(ExecutionState::Queued)?;
        let queued = Arc::clone(&self.permits).acquire_owned();
        let permit = match tokio::time::timeout(self.limits.queue_timeout(), queued).await {
            Ok(permit) => permit.map_err(|e| SandboxError::TaskFailed(e.to_string()))?,
            Err(_) => {
                warn!(
                    execution_id = %execution_id,
                    queue_timeout_ms = self.limits.queue_timeout_ms,
                    "No execution slot became free"
                );
                return Err(SandboxError::Busy {
                    waited_ms: self.limits.queue_timeout_ms,
                });
            }
        };
        tracker.advance(ExecutionState::Executing)?;

        let job = SandboxJob::new(
            execution_id.clone(),
            request.language,
            request.code,
            request.test_cases,
            self.limits.clone(),
        );
        let cases = prepare_cases(&job.test_cases);
        let marker = job.results_marker.clone();
        let backend = Arc::clone(&self.backend);
        let handle = tokio::spawn(async move {
            let _permit = permit;
            backend.run(job).await
        });

        let outcome = match handle.await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(SandboxError::InvalidRequest(message))) => {
                return Err(SandboxError::InvalidRequest(message));
            }
            Ok(Err(e)) => {
                warn!(execution_id = %execution_id, error = %e, "Sandbox backend failed");
                return not_executed(tracker, result, &e.to_string());
            }
            Err(e) => return Err(SandboxError::TaskFailed(e.to_string())),
        };

        let (state, status, error_kind) = classify(&outcome);
        tracker.advance(state)?;
        apply_outcome(&mut result, outcome, &cases, &marker, &self.limits);
        result.status = status;
        result.error_kind = error_kind;
        result.success = status == ExecutionStatus::Completed;

        info!(
            execution_id = %execution_id,
            status = %status,
            passed = result.passed_count(),
            total = result.test_results.len(),
            wall_time_ms = result.resource_usage.wall_time_ms,
            "Execution finished"
        );
        finish(tracker, result)
    }
}

fn finish(
    mut tracker: ExecutionTracker,
    result: ExecutionResult,
) -> Result<ExecutionResult, SandboxError> {
    tracker.advance(ExecutionState::ResultReturned)?;
    debug!(
        execution_id = %result.execution_id,
        transitions = tracker.history().len(),
        "Execution result returned"
    );
    Ok(result)
}

fn not_executed(
    mut tracker: ExecutionTracker,
    mut result: ExecutionResult,
    reason: &str,
) -> Result<ExecutionResult, SandboxError> {
    tracker.advance(ExecutionState::NotExecuted)?;
    warn!(execution_id = %result.execution_id, reason = %reason, "Sandbox unavailable, returning static analysis only");
    result.status = ExecutionStatus::NotExecuted;
    result.error_kind = Some(ErrorKind::SandboxUnavailable);
    result.warnings.push(format!(
        "Code was not executed ({reason}); only static analysis was performed"
    ));
    finish(tracker, result)
}

/// Maps raw sandbox facts onto a final state.
fn classify(outcome: &SandboxOutcome) -> (ExecutionState, ExecutionStatus, Option<ErrorKind>) {
    let memory_error = outcome.stderr.contains("MemoryError")
        || outcome.stderr.contains("JavaScript heap out of memory");

    if outcome.timed_out {
        return (
            ExecutionState::TimedOut,
            ExecutionStatus::Timeout,
            Some(ErrorKind::Timeout),
        );
    }
    if outcome.oom_killed || outcome.exit_code == Some(EXIT_KILLED) || memory_error {
        return (
            ExecutionState::ResourceExceeded,
            ExecutionStatus::ResourceExceeded,
            Some(ErrorKind::MemoryExceeded),
        );
    }
    if outcome.exit_code == Some(EXIT_CPU_LIMIT) {
        return (
            ExecutionState::ResourceExceeded,
            ExecutionStatus::ResourceExceeded,
            Some(ErrorKind::CpuExceeded),
        );
    }
    if outcome.exit_code == Some(0) {
        return (ExecutionState::Completed, ExecutionStatus::Completed, None);
    }
    (
        ExecutionState::RuntimeError,
        ExecutionStatus::RuntimeError,
        Some(ErrorKind::RuntimeError),
    )
}

/// Copies output and usage into `result` and fills in per-test results.
///
/// When the harness produced no usable results (crash, timeout, kill, or
/// results that do not match the cases) every case is reported as failed
/// with the reason.
fn apply_outcome(
    result: &mut ExecutionResult,
    outcome: SandboxOutcome,
    cases: &[crate::TestCase],
    marker: &str,
    limits: &ResourceLimits,
) {
    let (state, _, kind) = classify(&outcome);
    let parsed = harness::parse_output(&outcome.stdout, marker);

    result.executed = true;
    result.exit_code = outcome.exit_code;
    result.timed_out = outcome.timed_out;
    result.stdout = parsed.stdout;
    result.stderr = outcome.stderr;
    result.resource_usage = ResourceUsage {
        wall_time_ms: outcome.wall_time_ms,
        peak_memory_bytes: outcome.peak_memory_bytes.min(limits.memory_bytes),
        cpu_time_ns: outcome.cpu_time_ns,
    };

    let reconciled = parsed
        .results
        .filter(|_| state == ExecutionState::Completed)
        .and_then(|results| harness::reconcile(results, cases));
    result.test_results = match reconciled {
        _ if cases.is_empty() => Vec::new(),
        Some(results) => results,
        _ => {
            let reason = match kind {
                Some(ErrorKind::Timeout) => format!(
                    "Execution timed out after {} ms",
                    limits.timeout_ms
                ),
                Some(ErrorKind::MemoryExceeded) => format!(
                    "Memory limit of {} MiB exceeded",
                    limits.memory_bytes / (1024 * 1024)
                ),
                Some(ErrorKind::CpuExceeded) => "CPU time limit exceeded".to_string(),
                _ => last_error_line(&result.stderr)
                    .unwrap_or_else(|| "No test results were reported".to_string()),
            };
            cases
                .iter()
                .map(|case| TestCaseResult {
                    test_name: case.name.clone(),
                    passed: false,
                    actual: None,
                    expected: case.expected.clone(),
                    error: Some(reason.clone()),
                })
                .collect()
        }
    };
}

fn last_error_line(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(ToString::to_string)
}
