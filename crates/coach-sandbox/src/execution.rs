//! Request and result types for code execution.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::validator::Violation;
use crate::Language;

/// One input/expected-output pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    /// Display name; generated from the position when empty.
    #[serde(default)]
    pub name: String,
    /// Value passed as the single argument to `solution`.
    pub input: Value,
    /// Value `solution` must return.
    pub expected: Value,
}

impl TestCase {
    /// Creates a named test case.
    #[must_use]
    pub fn new(name: impl Into<String>, input: Value, expected: Value) -> Self {
        Self {
            name: name.into(),
            input,
            expected,
        }
    }
}

/// Outcome of one test case, as reported by the in-sandbox harness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseResult {
    /// Name of the test case.
    pub test_name: String,
    /// Whether `actual == expected`.
    pub passed: bool,
    /// Value returned by the learner's code.
    #[serde(default)]
    pub actual: Option<Value>,
    /// Expected value.
    pub expected: Value,
    /// Exception raised while running the case.
    #[serde(default)]
    pub error: Option<String>,
}

/// What to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Learner source code.
    pub code: String,
    /// Source language.
    #[serde(default)]
    pub language: Language,
    /// Optional test cases; without them the code just runs.
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

impl ExecutionRequest {
    /// Creates a request without test cases.
    #[must_use]
    pub fn new(code: impl Into<String>, language: Language) -> Self {
        Self {
            code: code.into(),
            language,
            test_cases: Vec::new(),
        }
    }

    /// Adds test cases.
    #[must_use]
    pub fn with_test_cases(mut self, cases: impl IntoIterator<Item = TestCase>) -> Self {
        self.test_cases.extend(cases);
        self
    }
}

/// Final classification of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Code ran to completion.
    Completed,
    /// Refused by the security validator; nothing ran.
    Rejected,
    /// Wall-clock timeout hit; the sandbox was killed.
    Timeout,
    /// Memory or CPU ceiling hit.
    ResourceExceeded,
    /// Learner code raised or exited non-zero.
    RuntimeError,
    /// Sandbox runtime unavailable; static analysis only.
    NotExecuted,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Rejected => write!(f, "rejected"),
            Self::Timeout => write!(f, "timeout"),
            Self::ResourceExceeded => write!(f, "resource_exceeded"),
            Self::RuntimeError => write!(f, "runtime_error"),
            Self::NotExecuted => write!(f, "not_executed"),
        }
    }
}

/// Specific reason an execution did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Critical static finding.
    SecurityViolation,
    /// Wall-clock timeout.
    Timeout,
    /// Memory ceiling.
    MemoryExceeded,
    /// CPU time ceiling.
    CpuExceeded,
    /// Exception or non-zero exit.
    RuntimeError,
    /// Isolation runtime unreachable.
    SandboxUnavailable,
}

/// Measured resource consumption.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Wall-clock duration in milliseconds.
    pub wall_time_ms: u64,
    /// Peak memory in bytes, never above the configured ceiling.
    pub peak_memory_bytes: u64,
    /// Total CPU time in nanoseconds.
    pub cpu_time_ns: u64,
}

/// Everything the caller learns about one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Run identifier, also used in the container name.
    pub execution_id: String,
    /// `true` when the code ran to completion with exit code 0.
    pub success: bool,
    /// Final classification.
    pub status: ExecutionStatus,
    /// Reason for a non-completed status.
    pub error_kind: Option<ErrorKind>,
    /// Process exit code, if the process ran.
    pub exit_code: Option<i64>,
    /// Learner stdout, with harness output removed.
    pub stdout: String,
    /// Learner stderr.
    pub stderr: String,
    /// Per-test-case results.
    pub test_results: Vec<TestCaseResult>,
    /// Measured usage.
    pub resource_usage: ResourceUsage,
    /// Whether the wall-clock timeout fired.
    pub timed_out: bool,
    /// Whether any code actually ran in a sandbox.
    pub executed: bool,
    /// Static findings (all severities).
    pub violations: Vec<Violation>,
    /// Notes such as "static analysis only".
    pub warnings: Vec<String>,
}

impl ExecutionResult {
    /// A result with nothing run yet.
    #[must_use]
    pub fn empty(execution_id: impl Into<String>, status: ExecutionStatus) -> Self {
        Self {
            execution_id: execution_id.into(),
            success: false,
            status,
            error_kind: None,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            test_results: Vec::new(),
            resource_usage: ResourceUsage::default(),
            timed_out: false,
            executed: false,
            violations: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Number of passing test cases.
    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.test_results.iter().filter(|t| t.passed).count()
    }

    /// Returns `true` if the run completed and every test case passed.
    #[must_use]
    pub fn all_tests_passed(&self) -> bool {
        self.success && self.test_results.iter().all(|t| t.passed)
    }

    /// Score in `0..=100`: share of passing tests, or 100 for a successful run
    /// without tests.
    #[must_use]
    pub fn score(&self) -> u8 {
        if !self.success {
            return 0;
        }
        let total = self.test_results.len();
        if total == 0 {
            return 100;
        }
        let scaled = self.passed_count() * 100 / total;
        u8::try_from(scaled).unwrap_or(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn case(passed: bool) -> TestCaseResult {
        TestCaseResult {
            test_name: "t".into(),
            passed,
            actual: Some(json!(1)),
            expected: json!(1),
            error: None,
        }
    }

    #[test]
    fn score_counts_passing_tests() {
        let mut result = ExecutionResult::empty("run-1", ExecutionStatus::Completed);
        result.success = true;
        result.test_results = vec![case(true), case(false), case(true), case(true)];
        assert_eq!(result.score(), 75);
        assert!(!result.all_tests_passed());
    }

    #[test]
    fn score_without_tests_is_full_on_success() {
        let mut result = ExecutionResult::empty("run-1", ExecutionStatus::Completed);
        result.success = true;
        assert_eq!(result.score(), 100);
    }

    #[test]
    fn failed_run_scores_zero() {
        let mut result = ExecutionResult::empty("run-1", ExecutionStatus::Timeout);
        result.test_results = vec![case(true)];
        assert_eq!(result.score(), 0);
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&ExecutionStatus::ResourceExceeded).unwrap_or_default();
        assert_eq!(json, r#""resource_exceeded""#);
        assert_eq!(ExecutionStatus::NotExecuted.to_string(), "not_executed");
    }

    #[test]
    fn test_case_name_defaults_to_empty() {
        let case: TestCase =
            serde_json::from_value(json!({"input": 2, "expected": 4})).unwrap_or_else(|_| {
                TestCase::new("fallback", Value::Null, Value::Null)
            });
        assert!(case.name.is_empty());
        assert_eq!(case.input, json!(2));
    }
}
