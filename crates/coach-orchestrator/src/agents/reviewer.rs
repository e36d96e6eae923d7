//! Reviewer: runs a submission in the sandbox, adds static quality findings
//! and writes encouraging, specific feedback.

use std::fmt::Write as _;

use async_trait::async_trait;
use chrono::Utc;
use coach_sandbox::{ExecutionRequest, ExecutionResult, ExecutionStatus, Language, TestCaseResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::curriculum::{adapt_active_plan, AdaptationOutcome};
use super::progress::{detect_trigger, record_attempt};
use super::{unsupported, Agent, AgentContext, AgentRequest, AgentResult, AgentType, Services};
use crate::error::{CoachError, Result};
use crate::models::{EvaluationResult, ProgressRecord, QualityIssue, Submission, Task};

const SYSTEM_PROMPT: &str = "You are a supportive programming coach. In at most three sentences, \
explain the most likely cause of the failing tests and suggest one next step. Do not reveal the \
full solution.";

const MAX_LINE_CHARS: usize = 100;
const MAX_FUNCTION_LINES: usize = 40;

static TODO_MARKER: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\b(TODO|FIXME|XXX)\b").ok());
static JS_FUNCTION: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\bfunction\b|=>\s*\{").ok());

fn matches(re: &Lazy<Option<Regex>>, line: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(line))
}

/// Everything produced by one review.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOutcome {
    /// The stored submission.
    pub submission: Submission,
    /// The stored evaluation.
    pub evaluation: EvaluationResult,
    /// Updated progress, absent when the code could not be run.
    pub progress: Option<ProgressRecord>,
    /// Difficulty change applied to the active plan, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adaptation: Option<AdaptationOutcome>,
}

// ============================================================================
// Static quality checks
// ============================================================================

/// Lints `code` for style problems a beginner should hear about.
#[must_use]
pub fn quality_issues(code: &str, language: Language) -> Vec<QualityIssue> {
    let mut issues = Vec::new();
    let lines: Vec<&str> = code.lines().collect();

    for (i, line) in lines.iter().enumerate() {
        let len = line.chars().count();
        if len > MAX_LINE_CHARS {
            issues.push(QualityIssue {
                kind: "long_line".into(),
                line: Some(i + 1),
                message: format!(
                    "Line is {len} characters long; split it to stay under {MAX_LINE_CHARS}."
                ),
            });
        }
        if matches(&TODO_MARKER, line) {
            issues.push(QualityIssue {
                kind: "todo_marker".into(),
                line: Some(i + 1),
                message: "Leftover TODO marker; finish the work or remove the note.".into(),
            });
        }
    }

    let documented = match language {
        Language::Python => code.contains("\"\"\"") || code.contains("'''") || code.contains('#'),
        Language::JavaScript => code.contains("//") || code.contains("/*"),
    };
    if !documented {
        issues.push(QualityIssue {
            kind: "missing_documentation".into(),
            line: None,
            message: "Add a docstring or a short comment describing what the function does.".into(),
        });
    }

    let spans = match language {
        Language::Python => python_functions(&lines),
        Language::JavaScript => javascript_functions(&lines),
    };
    for (start, length) in spans {
        if length > MAX_FUNCTION_LINES {
            issues.push(QualityIssue {
                kind: "long_function".into(),
                line: Some(start + 1),
                message: format!(
                    "Function body spans {length} lines; extract helpers to keep it under {MAX_FUNCTION_LINES}."
                ),
            });
        }
    }
    issues
}

fn indentation(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// `(start index, line count)` of every `def`, by indentation.
fn python_functions(lines: &[&str]) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    for (start, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        if !(trimmed.starts_with("def ") || trimmed.starts_with("async def ")) {
            continue;
        }
        let indent = indentation(line);
        let end = lines[start + 1..]
            .iter()
            .position(|l| !l.trim().is_empty() && indentation(l) <= indent)
            .map_or(lines.len(), |offset| start + 1 + offset);
        spans.push((start, end - start));
    }
    spans
}

/// `(start index, line count)` of every function, by brace depth.
fn javascript_functions(lines: &[&str]) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    for (start, line) in lines.iter().enumerate() {
        if !matches(&JS_FUNCTION, line) {
            continue;
        }
        let mut depth = 0i32;
        let mut opened = false;
        for (offset, l) in lines[start..].iter().enumerate() {
            for c in l.chars() {
                match c {
                    '{' => {
                        depth += 1;
                        opened = true;
                    }
                    '}' => depth -= 1,
                    _ => {}
                }
            }
            if opened && depth <= 0 {
                spans.push((start, offset + 1));
                break;
            }
        }
    }
    spans
}

// ============================================================================
// Feedback
// ============================================================================

fn opening_remark(result: &ExecutionResult, issues: &[QualityIssue]) -> String {
    let total = result.test_results.len();
    let passed = result.passed_count();
    match result.status {
        ExecutionStatus::Completed if passed == total && issues.is_empty() => {
            format!("Excellent work: all {total} tests pass and the code reads cleanly.")
        }
        ExecutionStatus::Completed if passed == total => {
            format!("Great job: all {total} tests pass.")
        }
        ExecutionStatus::Completed if passed > 0 => {
            format!("Good progress: {passed} of {total} tests already pass.")
        }
        ExecutionStatus::NotExecuted => {
            "Thanks for submitting; your code is saved and was checked for style and safety.".into()
        }
        _ => "Nice effort getting a complete attempt in; each run narrows down the problem.".into(),
    }
}

fn explain_failure(case: &TestCaseResult) -> String {
    let expected = case.expected.to_string();
    match (&case.error, &case.actual) {
        (Some(error), _) => format!(
            "- `{}` stopped with an error: {error}. Check the line it points to; the expected result is {expected}.",
            case.test_name
        ),
        (None, Some(actual)) => format!(
            "- `{}` expected {expected} but the function returned {actual}. Trace the input by hand to see where the values diverge.",
            case.test_name
        ),
        (None, None) => format!(
            "- `{}` expected {expected} but no value came back. Make sure the function returns its result instead of printing it.",
            case.test_name
        ),
    }
}

fn status_note(status: ExecutionStatus) -> Option<&'static str> {
    match status {
        ExecutionStatus::Timeout => Some(
            "The run hit the time limit. Look for a loop whose exit condition is never reached.",
        ),
        ExecutionStatus::ResourceExceeded => Some(
            "The run used more memory or CPU than allowed. Avoid building very large lists or unbounded recursion.",
        ),
        ExecutionStatus::RuntimeError => {
            Some("The program raised an error before finishing. The first traceback line shows where.")
        }
        ExecutionStatus::NotExecuted => Some(
            "The sandbox is unavailable right now, so tests were not run. Submit again later for a full review.",
        ),
        ExecutionStatus::Completed | ExecutionStatus::Rejected => None,
    }
}

/// Rule-based feedback. Always opens with a positive remark.
///
/// `previous_attempts` picks which hint to show, so hints get more specific
/// with every failed try.
#[must_use]
pub fn build_feedback(
    task: &Task,
    result: &ExecutionResult,
    issues: &[QualityIssue],
    previous_attempts: u32,
) -> String {
    let mut feedback = opening_remark(result, issues);
    if let Some(note) = status_note(result.status) {
        let _ = write!(feedback, "\n\n{note}");
    }

    let failures: Vec<&TestCaseResult> = result.test_results.iter().filter(|t| !t.passed).collect();
    if !failures.is_empty() {
        feedback.push_str("\n\nTests to revisit:");
        for case in failures {
            let _ = write!(feedback, "\n{}", explain_failure(case));
        }
    }

    if !issues.is_empty() {
        feedback.push_str("\n\nStyle suggestions:");
        for issue in issues {
            match issue.line {
                Some(line) => {
                    let _ = write!(feedback, "\n- Line {line}: {}", issue.message);
                }
                None => {
                    let _ = write!(feedback, "\n- {}", issue.message);
                }
            }
        }
    }

    let passed = result.all_tests_passed() && result.status == ExecutionStatus::Completed;
    if !passed && !task.hints.is_empty() {
        let index = usize::try_from(previous_attempts)
            .unwrap_or(usize::MAX)
            .min(task.hints.len() - 1);
        let _ = write!(feedback, "\n\nHint: {}", task.hints[index]);
    }
    feedback
}

async fn coach_note(
    services: &Services,
    task: &Task,
    code: &str,
    result: &ExecutionResult,
    warnings: &mut Vec<String>,
) -> Option<String> {
    let failing: Vec<&str> = result
        .test_results
        .iter()
        .filter(|t| !t.passed)
        .map(|t| t.test_name.as_str())
        .collect();
    let prompt = format!(
        "Task: {}\n{}\n\nLearner code:\n{code}\n\nFailing tests: {}\nStatus: {}",
        task.title,
        task.instructions,
        failing.join(", "),
        result.status
    );
    let reply = services.llm.generate(&prompt, SYSTEM_PROMPT).await;
    if !reply.success {
        warnings.push("Coach note unavailable; feedback built from rules".to_string());
        return None;
    }
    let note = reply.content.trim();
    if note.is_empty() || note.to_lowercase().contains("wrong") {
        return None;
    }
    Some(note.to_string())
}

// ============================================================================
// Agent
// ============================================================================

/// Reviews submissions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReviewerAgent;

#[async_trait]
impl Agent for ReviewerAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Reviewer
    }

    #[instrument(skip(self, ctx), fields(user_id = %ctx.user_id, request = ctx.request.kind()))]
    async fn process(&self, ctx: AgentContext) -> Result<AgentResult> {
        let AgentRequest::ReviewSubmission {
            task_id,
            code,
            language,
        } = &ctx.request
        else {
            return Err(unsupported(self.agent_type(), &ctx.request));
        };
        let mut warnings = Vec::new();
        let outcome = review(&ctx.services, &ctx.user_id, task_id, code, *language, &mut warnings).await?;
        AgentResult::ok(&outcome, warnings)
    }
}

async fn review(
    services: &Services,
    user_id: &str,
    task_id: &str,
    code: &str,
    language: Option<Language>,
    warnings: &mut Vec<String>,
) -> Result<ReviewOutcome> {
    let task = services.store.get_task(user_id, task_id).await?;
    if !task.task_type.is_graded_by_code() {
        return Err(CoachError::validation(format!(
            "task '{task_id}' is a {:?} task; mark it complete instead of submitting code",
            task.task_type
        )));
    }
    let language = language.unwrap_or(task.language);

    let request = ExecutionRequest::new(code, language).with_test_cases(task.test_cases.clone());
    let result = services.runner.execute(request).await?;
    if result.status == ExecutionStatus::Rejected {
        return Err(CoachError::security_violation(result.violations));
    }
    warnings.extend(result.warnings.iter().cloned());

    let previous_attempts = services
        .store
        .get_progress(user_id, task_id)
        .await?
        .map_or(0, |r| r.attempts);
    let issues = quality_issues(code, language);
    let passed = result.all_tests_passed() && result.status == ExecutionStatus::Completed;
    let score = result.score();

    let mut feedback = build_feedback(&task, &result, &issues, previous_attempts);
    if !passed && result.executed {
        if let Some(note) = coach_note(services, &task, code, &result, warnings).await {
            let _ = write!(feedback, "\n\nCoach note: {note}");
        }
    }

    let now = Utc::now();
    let submission = Submission {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        task_id: task_id.to_string(),
        code: code.to_string(),
        language,
        submitted_at: now,
    };
    let evaluation = EvaluationResult {
        id: Uuid::new_v4().to_string(),
        submission_id: submission.id.clone(),
        passed,
        score,
        test_results: result.test_results.clone(),
        feedback,
        quality_issues: issues,
        execution_status: result.status,
        violations: result.violations.clone(),
        warnings: result.warnings.clone(),
        evaluated_at: now,
    };
    services.store.save_evaluated_submission(&submission, &evaluation).await?;
    info!(
        submission_id = %submission.id,
        task_id = %task_id,
        passed,
        score,
        status = %result.status,
        "Submission evaluated"
    );

    if !result.executed {
        warn!(submission_id = %submission.id, "Submission not executed; progress unchanged");
        return Ok(ReviewOutcome {
            submission,
            evaluation,
            progress: None,
            adaptation: None,
        });
    }

    let progress = record_attempt(services, user_id, task_id, passed, score, now).await?;
    let history = services.store.attempt_history(user_id).await?;
    let adaptation = match detect_trigger(&history) {
        Some(signal) => adapt_active_plan(services, user_id, signal).await?,
        None => None,
    };

    Ok(ReviewOutcome {
        submission,
        evaluation,
        progress: Some(progress),
        adaptation,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use coach_sandbox::{SandboxOutcome, ScriptedBackend, UnavailableBackend};

    use super::*;
    use crate::agents::exercises::{pick_template, study_task};
    use crate::agents::testing;
    use crate::llm::ScriptedLlm;
    use crate::models::{AdaptationSignal, TaskType};

    const GOOD: &str = "def solution(numbers):\n    \"\"\"Sum the list.\"\"\"\n    return sum(numbers)\n";

    fn crash() -> SandboxOutcome {
        SandboxOutcome {
            exit_code: Some(1),
            stderr: "Traceback (most recent call last):\nTypeError: unsupported operand".into(),
            ..SandboxOutcome::default()
        }
    }

    async fn code_task(services: &Services, user: &str) -> Task {
        let task = pick_template("sum", 1, false, &[]).to_task("basics", 1, Language::Python);
        services.store.save_task(user, &task).await.unwrap();
        task
    }

    fn request(task: &Task, code: &str) -> AgentRequest {
        AgentRequest::ReviewSubmission {
            task_id: task.id.clone(),
            code: code.into(),
            language: None,
        }
    }

    async fn submit(services: &Services, user: &str, task: &Task, code: &str) -> Result<ReviewOutcome> {
        let ctx = testing::context(services, user, request(task, code));
        let result = ReviewerAgent.process(ctx).await?;
        Ok(serde_json::from_value(result.payload).unwrap())
    }

    #[test]
    fn quality_checks_flag_each_kind() {
        let long = format!("x = '{}'", "a".repeat(120));
        let body: String = (0..45).map(|i| format!("    y{i} = {i}\n")).collect();
        let code = format!("def f():\n{body}    return 1  # TODO tidy\n{long}\n");
        let kinds: Vec<String> = quality_issues(&code, Language::Python)
            .into_iter()
            .map(|i| i.kind)
            .collect();
        assert!(kinds.contains(&"long_line".to_string()));
        assert!(kinds.contains(&"todo_marker".to_string()));
        assert!(kinds.contains(&"long_function".to_string()));
        assert!(!kinds.contains(&"missing_documentation".to_string()));

        let js = "function add(a, b) {\n  return a + b;\n}\n";
        let kinds: Vec<String> = quality_issues(js, Language::JavaScript)
            .into_iter()
            .map(|i| i.kind)
            .collect();
        assert_eq!(kinds, vec!["missing_documentation".to_string()]);
    }

    #[test]
    fn clean_code_has_no_issues() {
        assert!(quality_issues(GOOD, Language::Python).is_empty());
    }

    #[tokio::test]
    async fn passing_submission_is_scored_and_persisted() {
        let services = testing::offline();
        let user = testing::user(&services).await;
        let task = code_task(&services, &user).await;

        let outcome = submit(&services, &user, &task, GOOD).await.unwrap();
        assert!(outcome.evaluation.passed);
        assert_eq!(outcome.evaluation.score, 100);
        assert!(outcome.evaluation.feedback.starts_with("Excellent work"));
        assert!(outcome.progress.as_ref().unwrap().completed);

        let (stored, evaluation) = services.store.get_submission(&user, &outcome.submission.id).await.unwrap();
        assert_eq!(stored.code, GOOD);
        assert_eq!(evaluation.unwrap().id, outcome.evaluation.id);
    }

    #[tokio::test]
    async fn failing_submission_gets_positive_explained_feedback() {
        let backend = Arc::new(ScriptedBackend::new().with_outcome(crash()));
        let services = testing::services_with_backend(ScriptedLlm::failing().into_client(), backend);
        let user = testing::user(&services).await;
        let task = code_task(&services, &user).await;

        let ctx = testing::context(&services, &user, request(&task, GOOD));
        let result = ReviewerAgent.process(ctx).await.unwrap();
        assert!(result.warnings.iter().any(|w| w.contains("Coach note unavailable")));
        let outcome: ReviewOutcome = serde_json::from_value(result.payload).unwrap();

        let evaluation = &outcome.evaluation;
        assert!(!evaluation.passed);
        assert_eq!(evaluation.score, 0);
        assert_eq!(evaluation.execution_status, ExecutionStatus::RuntimeError);
        assert!(evaluation.feedback.starts_with("Nice effort"));
        assert!(evaluation.feedback.contains("Hint: "));
        assert!(!evaluation.feedback.to_lowercase().contains("wrong"));
        assert_eq!(outcome.progress.unwrap().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn coach_note_mentioning_wrong_is_dropped() {
        let backend = Arc::new(ScriptedBackend::new().with_outcome(crash()).with_outcome(crash()));
        let llm = ScriptedLlm::always("Your loop is wrong.")
            .with_reply("Check the loop bounds.")
            .into_client();
        let services = testing::services_with_backend(llm, backend);
        let user = testing::user(&services).await;
        let task = code_task(&services, &user).await;

        let first = submit(&services, &user, &task, GOOD).await.unwrap();
        let second = submit(&services, &user, &task, GOOD).await.unwrap();
        let notes = [&first, &second]
            .iter()
            .filter(|o| o.evaluation.feedback.contains("Coach note: Check the loop bounds."))
            .count();
        assert_eq!(notes, 1);
        assert!(!first.evaluation.feedback.contains("wrong"));
        assert!(!second.evaluation.feedback.contains("wrong"));
    }

    #[tokio::test]
    async fn dangerous_code_is_rejected_and_not_stored() {
        let services = testing::offline();
        let user = testing::user(&services).await;
        let task = code_task(&services, &user).await;

        let err = submit(&services, &user, &task, "import os\nos.system('rm -rf /')\n")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 422);
        assert!(services.store.attempt_history(&user).await.unwrap().is_empty());
        assert!(services.store.get_progress(&user, &task.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unavailable_sandbox_stores_but_does_not_count() {
        let services = testing::services_with_backend(
            ScriptedLlm::failing().into_client(),
            Arc::new(UnavailableBackend::new("docker down")),
        );
        let user = testing::user(&services).await;
        let task = code_task(&services, &user).await;

        let outcome = submit(&services, &user, &task, GOOD).await.unwrap();
        assert_eq!(outcome.evaluation.execution_status, ExecutionStatus::NotExecuted);
        assert!(!outcome.evaluation.passed);
        assert!(outcome.progress.is_none());
        assert!(services.store.attempt_history(&user).await.unwrap().is_empty());
        assert!(services
            .store
            .get_submission(&user, &outcome.submission.id)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn study_tasks_cannot_be_submitted() {
        let services = testing::offline();
        let user = testing::user(&services).await;
        let task = study_task(TaskType::Read, "loops", 2, Language::Python);
        services.store.save_task(&user, &task).await.unwrap();

        let err = submit(&services, &user, &task, GOOD).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn three_failures_lower_the_active_plan() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .with_outcome(crash())
                .with_outcome(crash())
                .with_outcome(crash()),
        );
        let services = testing::services_with_backend(ScriptedLlm::failing().into_client(), backend);
        let user = testing::user(&services).await;
        let ctx = testing::context(
            &services,
            &user,
            AgentRequest::GenerateCurriculum {
                topic: Some("Python".into()),
            },
        );
        crate::agents::CurriculumPlannerAgent.process(ctx).await.unwrap();
        let plan = services.store.active_plan(&user).await.unwrap().unwrap();
        let task = plan.tasks().find(|t| t.task_type == TaskType::Code).unwrap().clone();

        let mut last = None;
        for _ in 0..3 {
            last = Some(submit(&services, &user, &task, GOOD).await.unwrap());
        }
        let adaptation = last.unwrap().adaptation.unwrap();
        assert_eq!(
            adaptation.signal,
            AdaptationSignal::LowerDifficulty { consecutive_failures: 3 }
        );
        assert!(adaptation.tasks_adjusted > 0);
    }

    #[test]
    fn hints_progress_with_attempts() {
        let task = pick_template("sum", 1, false, &[]).to_task("basics", 1, Language::Python);
        let mut result = ExecutionResult::empty("x", ExecutionStatus::RuntimeError);
        result.executed = true;
        let first = build_feedback(&task, &result, &[], 0);
        let later = build_feedback(&task, &result, &[], 99);
        assert!(first.contains(&task.hints[0]));
        assert!(later.contains(task.hints.last().unwrap()));
    }
}
