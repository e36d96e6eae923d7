//! Integration tests for the code sandbox.
//!
//! Tests that start containers need a Docker daemon with the default
//! `python:3.11-slim` and `node:20-slim` images, so they are marked
//! `#[ignore]`. Run them with `cargo test -- --ignored`.

use std::sync::Arc;

use coach_sandbox::harness::{parse_output, prepare_cases};
use coach_sandbox::{
    ContainerManager, ErrorKind, ExecutionBackend, ExecutionRequest, ExecutionStatus, Language,
    ResourceLimits, SandboxJob, SecureCodeRunner, TestCase,
};
use serde_json::json;

fn docker_runner(limits: ResourceLimits) -> SecureCodeRunner {
    let manager = ContainerManager::new().expect("Failed to connect to Docker");
    SecureCodeRunner::new(Arc::new(manager), limits)
}

fn doubling_cases() -> Vec<TestCase> {
    vec![
        TestCase::new("doubles two", json!(2), json!(4)),
        TestCase::new("doubles zero", json!(0), json!(0)),
    ]
}

/// Critical patterns are refused before any container is involved.
#[tokio::test]
async fn test_validator_rejects_dangerous_python() {
    let runner = SecureCodeRunner::new(
        Arc::new(coach_sandbox::UnavailableBackend::new("not needed")),
        ResourceLimits::default(),
    );

    for code in [
        "import os\nos.system('ls')\n",
        "def solution(x):\n    return eval(x)\n",
    ] {
        let result = runner
            .execute(ExecutionRequest::new(code, Language::Python))
            .await
            .expect("Execution failed");
        assert_eq!(result.status, ExecutionStatus::Rejected, "code: {code}");
        assert_eq!(result.error_kind, Some(ErrorKind::SecurityViolation));
        assert!(!result.executed);
        assert!(!result.violations.is_empty());
    }
}

/// Clean code on a runner without Docker is accepted but not executed.
#[tokio::test]
async fn test_clean_code_without_docker_is_not_executed() {
    let runner = SecureCodeRunner::new(
        Arc::new(coach_sandbox::UnavailableBackend::new("docker not running")),
        ResourceLimits::default(),
    );
    let request = ExecutionRequest::new("def solution(x):\n    return x * 2\n", Language::Python)
        .with_test_cases(doubling_cases());

    let result = runner.execute(request).await.expect("Execution failed");
    assert_eq!(result.status, ExecutionStatus::NotExecuted);
    assert!(!result.executed);
    assert!(!result.warnings.is_empty());
}

#[tokio::test]
#[ignore = "requires running Docker daemon"]
async fn test_python_solution_passes() {
    let runner = docker_runner(ResourceLimits::default());
    let request = ExecutionRequest::new(
        "def solution(x):\n    print('computing')\n    return x * 2\n",
        Language::Python,
    )
    .with_test_cases(doubling_cases());

    let result = runner.execute(request).await.expect("Execution failed");
    assert_eq!(result.status, ExecutionStatus::Completed, "stderr: {}", result.stderr);
    assert!(result.all_tests_passed());
    assert_eq!(result.score(), 100);
    assert!(result.stdout.contains("computing"));
}

#[tokio::test]
#[ignore = "requires running Docker daemon"]
async fn test_javascript_solution_passes() {
    let runner = docker_runner(ResourceLimits::default());
    let request = ExecutionRequest::new("function solution(x) {\n  return x * 2;\n}\n", Language::JavaScript)
        .with_test_cases(doubling_cases());

    let result = runner.execute(request).await.expect("Execution failed");
    assert_eq!(result.status, ExecutionStatus::Completed, "stderr: {}", result.stderr);
    assert!(result.all_tests_passed());
}

#[tokio::test]
#[ignore = "requires running Docker daemon"]
async fn test_infinite_loop_times_out() {
    let limits = ResourceLimits {
        timeout_ms: 2_000,
        ..ResourceLimits::default()
    };
    let runner = docker_runner(limits);
    let request = ExecutionRequest::new("def solution(x):\n    while True:\n        x += 1\n", Language::Python)
        .with_test_cases(doubling_cases());

    let started = std::time::Instant::now();
    let result = runner.execute(request).await.expect("Execution failed");
    assert_eq!(result.status, ExecutionStatus::Timeout);
    assert!(result.timed_out);
    assert!(started.elapsed().as_secs() < 30, "timeout was not enforced");
}

#[tokio::test]
#[ignore = "requires running Docker daemon"]
async fn test_memory_bomb_exceeds_limit() {
    let runner = docker_runner(ResourceLimits::default());
    let request = ExecutionRequest::new(
        "def solution(x):\n    data = [0] * (200 * 1024 * 1024)\n    return len(data)\n",
        Language::Python,
    )
    .with_test_cases(doubling_cases());

    let result = runner.execute(request).await.expect("Execution failed");
    assert_eq!(result.status, ExecutionStatus::ResourceExceeded);
    assert_eq!(result.error_kind, Some(ErrorKind::MemoryExceeded));
}

#[tokio::test]
#[ignore = "requires running Docker daemon"]
async fn test_network_is_blocked() {
    let runner = docker_runner(ResourceLimits::default());
    let code = "import urllib.request\n\
                def solution(x):\n    \
                    return urllib.request.urlopen('http://example.com', timeout=3).status\n";
    let request = ExecutionRequest::new(code, Language::Python).with_test_cases(doubling_cases());

    let result = runner.execute(request).await.expect("Execution failed");
    assert!(!result.success);
    assert!(result.test_results.iter().all(|r| !r.passed));
    assert!(result
        .test_results
        .iter()
        .filter_map(|r| r.error.as_deref())
        .any(|e| e.contains("URLError") || e.contains("gaierror") || e.contains("Errno")));
}

#[tokio::test]
#[ignore = "requires running Docker daemon"]
async fn test_sandbox_runs_as_unprivileged_user() {
    let runner = docker_runner(ResourceLimits::default());
    let request = ExecutionRequest::new("import os\n\ndef solution(x):\n    return os.getuid()\n", Language::Python)
        .with_test_cases(vec![TestCase::new("uid", json!(null), json!(65534))]);

    let result = runner.execute(request).await.expect("Execution failed");
    assert_eq!(result.status, ExecutionStatus::Completed, "stderr: {}", result.stderr);
    let uid = result.test_results[0].actual.clone().expect("No uid reported");
    assert_ne!(uid, json!(0));
    assert!(result.all_tests_passed(), "uid: {uid}");
}

/// Runs a job straight on the backend, skipping static validation, and
/// returns the single boolean the solution reported.
async fn run_raw(manager: &ContainerManager, id: &str, code: &str) -> Option<bool> {
    let cases = prepare_cases(&[TestCase::new("tmp_visibility", json!(null), json!(true))]);
    let job = SandboxJob::new(
        format!("{id}-{}", std::process::id()),
        Language::Python,
        code,
        cases,
        ResourceLimits::default(),
    );
    let marker = job.results_marker.clone();
    let outcome = manager.run(job).await.expect("Run failed");
    parse_output(&outcome.stdout, &marker)
        .results
        .and_then(|r| r.first().and_then(|c| c.actual.clone()))
        .and_then(|v| v.as_bool())
}

#[tokio::test]
#[ignore = "requires running Docker daemon"]
async fn test_concurrent_runs_do_not_share_tmp() {
    let manager = ContainerManager::new().expect("Failed to connect to Docker");
    let writer = "import time\n\n\
                  def solution(x):\n    \
                      with open('/tmp/shared.txt', 'w') as handle:\n        \
                          handle.write('secret')\n    \
                      time.sleep(2)\n    \
                      return True\n";
    let reader = "import os\nimport time\n\n\
                  def solution(x):\n    \
                      time.sleep(1)\n    \
                      return os.path.exists('/tmp/shared.txt')\n";

    let (wrote, seen) = tokio::join!(
        run_raw(&manager, "tmp-writer", writer),
        run_raw(&manager, "tmp-reader", reader)
    );
    assert_eq!(wrote, Some(true), "writer could not use its own /tmp");
    assert_eq!(seen, Some(false), "reader saw the other run's /tmp file");
}
