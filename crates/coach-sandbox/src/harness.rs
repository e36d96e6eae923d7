//! Per-language test harnesses.
//!
//! The learner's code is written verbatim to its own file next to a generated
//! harness and a `tests.json` file. The harness loads the code, calls
//! `solution(input)` for every case and prints a per-run marker followed by
//! one JSON line of `{test_name, passed, actual, expected, error}` objects.
//! Anything the learner prints stays above the marker.
//!
//! The marker is random for every run and reaches the harness through the
//! [`MARKER_ENV`] variable, which the harness removes before loading learner
//! code. The host never trusts the reported verdicts: [`reconcile`] checks the
//! results against the submitted cases and recomputes `passed`.

use std::path::Path;

use serde_json::Value;
use uuid::Uuid;

use crate::execution::{TestCase, TestCaseResult};
use crate::Language;

/// Environment variable carrying the results marker into the sandbox.
pub const MARKER_ENV: &str = "COACH_RESULTS_MARKER";

/// Directory the workspace is mounted at inside the sandbox.
pub const SANDBOX_DIR: &str = "/sandbox";

const PYTHON_HARNESS: &str = r#"import json
import os
import sys

SANDBOX = "/sandbox"


def _load(name):
    with open(SANDBOX + "/" + name, encoding="utf-8") as handle:
        return handle.read()


def _describe(exc):
    return "%s: %s" % (type(exc).__name__, exc)


def main(marker, dumps, loads, write):
    cases = loads(_load("tests.json"))
    source = _load("solution.py")
    namespace = {"__name__": "__solution__"}
    load_error = None
    try:
        exec(compile(source, "solution.py", "exec"), namespace)
    except BaseException as exc:
        load_error = _describe(exc)
    if not cases:
        return
    solution = namespace.get("solution")
    results = []
    for case in cases:
        entry = {
            "test_name": case["name"],
            "passed": False,
            "actual": None,
            "expected": case["expected"],
            "error": None,
        }
        if load_error is not None:
            entry["error"] = load_error
        elif not callable(solution):
            entry["error"] = "NameError: function 'solution' is not defined"
        else:
            try:
                actual = loads(dumps(solution(case["input"]), default=repr))
                entry["actual"] = actual
                entry["passed"] = actual == case["expected"]
            except BaseException as exc:
                entry["error"] = _describe(exc)
        results.append(entry)
    try:
        sys.stdout.flush()
    except BaseException:
        pass
    write(1, ("\n" + marker + "\n" + dumps(results, default=repr) + "\n").encode("utf-8"))


main(os.environ.pop("COACH_RESULTS_MARKER", ""), json.dumps, json.loads, os.write)
"#;

const JAVASCRIPT_HARNESS: &str = r#"'use strict';
const fs = require('fs');

const SANDBOX = '/sandbox';
const MARKER = process.env.COACH_RESULTS_MARKER || '';
delete process.env.COACH_RESULTS_MARKER;
const stringify = JSON.stringify;
const parse = JSON.parse;
const writeOut = fs.writeSync.bind(fs);

function load(name) {
  return fs.readFileSync(SANDBOX + '/' + name, 'utf8');
}

function normalize(value) {
  return value === undefined ? null : parse(stringify(value));
}

function describe(err) {
  return (err && err.name ? err.name : 'Error') + ': ' + (err && err.message ? err.message : String(err));
}

function main() {
  const cases = parse(load('tests.json'));
  const mod = { exports: {} };
  let solution = null;
  let loadError = null;
  try {
    const factory = new Function(
      'module',
      'exports',
      load('solution.js') +
        "\n;return typeof solution === 'function' ? solution : (module.exports && module.exports.solution);"
    );
    solution = factory(mod, mod.exports);
  } catch (err) {
    loadError = describe(err);
  }
  if (cases.length === 0) {
    return;
  }
  const results = cases.map((testCase) => {
    const entry = {
      test_name: testCase.name,
      passed: false,
      actual: null,
      expected: testCase.expected,
      error: null,
    };
    if (loadError !== null) {
      entry.error = loadError;
      return entry;
    }
    if (typeof solution !== 'function') {
      entry.error = "ReferenceError: function 'solution' is not defined";
      return entry;
    }
    try {
      const actual = normalize(solution(testCase.input));
      entry.actual = actual;
      entry.passed = stringify(actual) === stringify(testCase.expected);
    } catch (err) {
      entry.error = describe(err);
    }
    return entry;
  });
  writeOut(1, '\n' + MARKER + '\n' + stringify(results) + '\n');
}

main();
"#;

/// Harness source for `language`.
#[must_use]
pub const fn source(language: Language) -> &'static str {
    match language {
        Language::Python => PYTHON_HARNESS,
        Language::JavaScript => JAVASCRIPT_HARNESS,
    }
}

/// A fresh results marker for one run.
#[must_use]
pub fn results_marker() -> String {
    format!("__COACH_RESULTS_{}__", Uuid::new_v4().simple())
}

/// Gives every unnamed case a positional name.
#[must_use]
pub fn prepare_cases(cases: &[TestCase]) -> Vec<TestCase> {
    cases
        .iter()
        .enumerate()
        .map(|(i, case)| {
            let mut case = case.clone();
            if case.name.trim().is_empty() {
                case.name = format!("test_{}", i + 1);
            }
            case
        })
        .collect()
}

/// Writes harness, solution and test cases into `dir`.
///
/// Files are world-readable so the unprivileged sandbox user can load them.
pub fn write_workspace(
    dir: &Path,
    language: Language,
    code: &str,
    cases: &[TestCase],
) -> std::io::Result<()> {
    let cases = serde_json::to_string(&prepare_cases(cases))?;
    std::fs::write(dir.join(language.harness_file()), source(language))?;
    std::fs::write(dir.join(language.solution_file()), code)?;
    std::fs::write(dir.join("tests.json"), cases)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755))?;
        for name in [language.harness_file(), language.solution_file(), "tests.json"] {
            std::fs::set_permissions(dir.join(name), std::fs::Permissions::from_mode(0o644))?;
        }
    }

    Ok(())
}

/// Output of a harness run split into learner output and parsed results.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedOutput {
    /// Everything printed before the marker.
    pub stdout: String,
    /// Parsed results, or `None` if the marker never appeared.
    pub results: Option<Vec<TestCaseResult>>,
}

/// Splits harness stdout at the last line holding `marker`.
///
/// An empty marker never matches. Results that do not parse are treated as
/// missing.
#[must_use]
pub fn parse_output(stdout: &str, marker: &str) -> ParsedOutput {
    let line = format!("\n{marker}\n");
    let found = if marker.is_empty() { None } else { stdout.rfind(&line) };
    let Some(pos) = found else {
        return ParsedOutput {
            stdout: stdout.to_string(),
            results: None,
        };
    };
    let (before, after) = stdout.split_at(pos);
    let payload = after[line.len()..].trim();
    let results = serde_json::from_str::<Vec<TestCaseResult>>(payload).ok();
    if results.is_none() {
        tracing::warn!("Harness results after marker could not be parsed");
    }
    ParsedOutput {
        stdout: before.to_string(),
        results,
    }
}

/// Checks harness `results` against the `cases` that were sent in.
///
/// The results must name the same cases in the same order. `expected` is
/// taken from the case and `passed` is recomputed on the host. Returns `None`
/// when the results do not line up with the cases.
#[must_use]
pub fn reconcile(results: Vec<TestCaseResult>, cases: &[TestCase]) -> Option<Vec<TestCaseResult>> {
    if results.len() != cases.len() {
        tracing::warn!(
            reported = results.len(),
            expected = cases.len(),
            "Harness reported a different number of results"
        );
        return None;
    }
    if results.iter().zip(cases).any(|(r, c)| r.test_name != c.name) {
        tracing::warn!("Harness results do not match the submitted case names");
        return None;
    }
    Some(
        results
            .into_iter()
            .zip(cases)
            .map(|(result, case)| {
                let passed = result.error.is_none()
                    && result.actual.as_ref().is_some_and(|a| values_match(a, &case.expected));
                TestCaseResult {
                    passed,
                    expected: case.expected.clone(),
                    ..result
                }
            })
            .collect(),
    )
}

/// JSON equality where numbers compare by value (`2 == 2.0`).
fn values_match(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => (x - y).abs() <= f64::EPSILON * x.abs().max(y.abs()).max(1.0),
            _ => a == b,
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_match(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len() && a.iter().all(|(k, x)| b.get(k).is_some_and(|y| values_match(x, y)))
        }
        _ => actual == expected,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    const MARKER: &str = "__COACH_RESULTS_test__";

    fn result(name: &str, passed: bool, actual: Option<serde_json::Value>) -> TestCaseResult {
        TestCaseResult {
            test_name: name.into(),
            passed,
            actual,
            expected: json!(0),
            error: None,
        }
    }

    #[test]
    fn harness_sources_read_marker_from_env() {
        assert!(source(Language::Python).contains(MARKER_ENV));
        assert!(source(Language::JavaScript).contains(MARKER_ENV));
        assert!(!source(Language::Python).contains("__COACH_RESULTS_"));
    }

    #[test]
    fn python_harness_catches_system_exit() {
        let python = source(Language::Python);
        assert!(python.contains("except BaseException"));
        assert!(!python.contains("except Exception"));
    }

    #[test]
    fn markers_differ_per_run() {
        let a = results_marker();
        let b = results_marker();
        assert_ne!(a, b);
        assert!(a.starts_with("__COACH_RESULTS_"));
    }

    #[test]
    fn prepare_cases_names_unnamed_cases() {
        let cases = vec![
            TestCase::new("", json!(1), json!(2)),
            TestCase::new("doubles", json!(2), json!(4)),
            TestCase::new("  ", json!(3), json!(6)),
        ];
        let prepared = prepare_cases(&cases);
        assert_eq!(prepared[0].name, "test_1");
        assert_eq!(prepared[1].name, "doubles");
        assert_eq!(prepared[2].name, "test_3");
    }

    #[test]
    fn parse_output_splits_learner_output() {
        let stdout = "hello\nworld\n\n__COACH_RESULTS_test__\n[{\"test_name\":\"test_1\",\"passed\":true,\"actual\":4,\"expected\":4,\"error\":null}]\n";
        let parsed = parse_output(stdout, MARKER);
        assert_eq!(parsed.stdout, "hello\nworld\n");
        let results = parsed.results.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].passed);
        assert_eq!(results[0].actual, Some(json!(4)));
    }

    #[test]
    fn parse_output_without_marker_keeps_everything() {
        let parsed = parse_output("just output\n", MARKER);
        assert_eq!(parsed.stdout, "just output\n");
        assert!(parsed.results.is_none());
    }

    #[test]
    fn parse_output_ignores_other_markers() {
        let stdout = "__COACH_RESULTS_guess__\n[]\n";
        let parsed = parse_output(stdout, MARKER);
        assert!(parsed.results.is_none());
        assert_eq!(parsed.stdout, stdout);
    }

    #[test]
    fn parse_output_with_empty_marker_finds_nothing() {
        let parsed = parse_output("\n\n[]\n", "");
        assert!(parsed.results.is_none());
    }

    #[test]
    fn parse_output_with_garbage_results_is_none() {
        let parsed = parse_output("\n__COACH_RESULTS_test__\nnot json\n", MARKER);
        assert!(parsed.results.is_none());
        assert!(parsed.stdout.is_empty());
    }

    #[test]
    fn reconcile_rejects_missing_or_renamed_results() {
        let cases = vec![TestCase::new("doubles", json!(2), json!(4))];
        assert!(reconcile(Vec::new(), &cases).is_none());
        assert!(reconcile(vec![result("other", true, Some(json!(4)))], &cases).is_none());
    }

    #[test]
    fn reconcile_recomputes_verdicts() {
        let cases = vec![
            TestCase::new("a", json!(2), json!(4)),
            TestCase::new("b", json!(3), json!(6.0)),
            TestCase::new("c", json!(4), json!([1, {"k": 2}])),
        ];
        let reported = vec![
            result("a", true, Some(json!(-1))),
            result("b", false, Some(json!(6))),
            result("c", false, Some(json!([1, {"k": 2.0}]))),
        ];
        let results = reconcile(reported, &cases).unwrap();
        assert!(!results[0].passed);
        assert_eq!(results[0].expected, json!(4));
        assert!(results[1].passed);
        assert!(results[2].passed);
    }

    #[test]
    fn reconcile_fails_cases_with_errors() {
        let cases = vec![TestCase::new("a", json!(2), json!(4))];
        let mut reported = result("a", true, Some(json!(4)));
        reported.error = Some("SystemExit: 0".into());
        let results = reconcile(vec![reported], &cases).unwrap();
        assert!(!results[0].passed);
    }

    #[test]
    fn write_workspace_creates_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let cases = vec![TestCase::new("", json!(2), json!(4))];
        write_workspace(dir.path(), Language::Python, "def solution(x):\n    return x*2\n", &cases)
            .unwrap();

        assert!(dir.path().join("harness.py").exists());
        let code = std::fs::read_to_string(dir.path().join("solution.py")).unwrap();
        assert!(code.contains("return x*2"));
        let tests: Vec<TestCase> =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("tests.json")).unwrap())
                .unwrap();
        assert_eq!(tests[0].name, "test_1");
    }
}
