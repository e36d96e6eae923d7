//! Domain model: learners, plans, tasks, submissions and progress.
//!
//! These types are shared by the store, the agents and the HTTP layer. Plan
//! invariants (acyclic prerequisites, difficulty range, unique ids) are checked
//! by [`LearningPlan::validate`] before every write.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use coach_sandbox::{ExecutionStatus, Language, TestCase, TestCaseResult, Violation};
use serde::{Deserialize, Serialize};

use crate::error::{CoachError, Result};

/// Day offsets of spaced-repetition review checkpoints.
pub const REVIEW_OFFSETS: [u32; 5] = [1, 3, 7, 14, 30];

/// Lowest task difficulty.
pub const MIN_DIFFICULTY: u8 = 1;

/// Highest task difficulty.
pub const MAX_DIFFICULTY: u8 = 10;

/// Clamps `value` into the difficulty range.
#[must_use]
pub fn clamp_difficulty(value: i32) -> u8 {
    u8::try_from(value.clamp(i32::from(MIN_DIFFICULTY), i32::from(MAX_DIFFICULTY)))
        .unwrap_or(MIN_DIFFICULTY)
}

// ============================================================================
// Learner
// ============================================================================

/// A registered learner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Identifier.
    pub id: String,
    /// Unique e-mail address.
    pub email: String,
    /// Name shown on the leaderboard.
    pub display_name: String,
    /// Registration time.
    pub created_at: DateTime<Utc>,
}

/// Self-reported or assessed skill level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillLevel {
    /// New to programming.
    #[default]
    Beginner,
    /// Comfortable with the basics.
    Intermediate,
    /// Builds non-trivial programs.
    Advanced,
    /// Professional experience.
    Expert,
}

impl SkillLevel {
    /// Difficulty the first module of a plan starts at.
    #[must_use]
    pub const fn base_difficulty(self) -> u8 {
        match self {
            Self::Beginner => 2,
            Self::Intermediate => 4,
            Self::Advanced => 6,
            Self::Expert => 8,
        }
    }

    /// Parses a level name, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "beginner" | "novice" | "newbie" => Some(Self::Beginner),
            "intermediate" => Some(Self::Intermediate),
            "advanced" => Some(Self::Advanced),
            "expert" | "senior" => Some(Self::Expert),
            _ => None,
        }
    }
}

impl std::fmt::Display for SkillLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
            Self::Expert => "expert",
        };
        f.write_str(s)
    }
}

/// Preferred way of learning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearningStyle {
    /// Diagrams and videos.
    Visual,
    /// Talks and podcasts.
    Auditory,
    /// Hands-on exercises.
    #[default]
    Kinesthetic,
    /// Documentation and books.
    Reading,
}

const fn default_hours_per_week() -> u32 {
    5
}

const fn default_session_minutes() -> u32 {
    45
}

/// How much time the learner can give.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeConstraints {
    /// Hours available per week.
    #[serde(default = "default_hours_per_week")]
    pub hours_per_week: u32,
    /// Days of the week the learner studies.
    #[serde(default)]
    pub available_days: Vec<String>,
    /// Preferred session length in minutes.
    #[serde(default = "default_session_minutes")]
    pub session_minutes: u32,
}

impl Default for TimeConstraints {
    fn default() -> Self {
        Self {
            hours_per_week: default_hours_per_week(),
            available_days: Vec::new(),
            session_minutes: default_session_minutes(),
        }
    }
}

/// A learner's profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Owner.
    pub user_id: String,
    /// Skill level.
    pub skill_level: SkillLevel,
    /// Learning goals, most important first.
    pub goals: Vec<String>,
    /// Time budget.
    pub time_constraints: TimeConstraints,
    /// Learning style.
    pub learning_style: LearningStyle,
    /// Language exercises are generated in.
    pub preferred_language: Language,
    /// Target completion in weeks, if stated.
    pub timeframe_weeks: Option<u32>,
    /// Soft-archive flag; profiles are never deleted.
    pub archived: bool,
    /// Last modification.
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    /// An empty beginner profile for `user_id`.
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            skill_level: SkillLevel::default(),
            goals: Vec::new(),
            time_constraints: TimeConstraints::default(),
            learning_style: LearningStyle::default(),
            preferred_language: Language::default(),
            timeframe_weeks: None,
            archived: false,
            updated_at: Utc::now(),
        }
    }
}

// ============================================================================
// Plans
// ============================================================================

/// Lifecycle of a learning plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    /// Generated, not yet started.
    #[default]
    Draft,
    /// The learner's current plan.
    Active,
    /// Every task done.
    Completed,
    /// Superseded or abandoned.
    Archived,
}

impl PlanStatus {
    /// Returns `true` if `self -> next` is allowed.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Active | Self::Archived)
                | (Self::Active, Self::Completed | Self::Archived)
                | (Self::Completed, Self::Archived)
        )
    }

    /// Parses the stored representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }

    /// Stored representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Archived => "archived",
        }
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Spaced-repetition review attached to a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewCheckpoint {
    /// Days after the module is completed.
    pub day_offset: u32,
    /// What to review.
    pub topic: String,
}

/// A module: an ordered group of tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    /// Identifier.
    pub id: String,
    /// Title.
    pub title: String,
    /// One-paragraph summary.
    pub summary: String,
    /// Position within the plan, starting at 1.
    pub order: u32,
    /// Modules that must be finished first.
    pub prerequisites: Vec<String>,
    /// Tasks in traversal order.
    pub tasks: Vec<Task>,
    /// Review schedule.
    pub review_checkpoints: Vec<ReviewCheckpoint>,
}

/// A learner's plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningPlan {
    /// Identifier.
    pub id: String,
    /// Owner.
    pub user_id: String,
    /// Title.
    pub title: String,
    /// Lifecycle status.
    pub status: PlanStatus,
    /// Modules in order.
    pub modules: Vec<Module>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification.
    pub updated_at: DateTime<Utc>,
}

impl LearningPlan {
    /// Every task in traversal order (module order, then task order).
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.modules.iter().flat_map(|m| m.tasks.iter())
    }

    /// Mutable access to every task in traversal order.
    pub fn tasks_mut(&mut self) -> impl Iterator<Item = &mut Task> {
        self.modules.iter_mut().flat_map(|m| m.tasks.iter_mut())
    }

    /// Looks up a task by id.
    #[must_use]
    pub fn find_task(&self, task_id: &str) -> Option<&Task> {
        self.tasks().find(|t| t.id == task_id)
    }

    /// Returns `true` if any task is a project.
    #[must_use]
    pub fn has_project(&self) -> bool {
        self.tasks().any(|t| t.task_type == TaskType::Project)
    }

    /// Returns `true` if task difficulty never decreases in traversal order.
    #[must_use]
    pub fn difficulty_is_monotone(&self) -> bool {
        let difficulties: Vec<u8> = self.tasks().map(|t| t.difficulty).collect();
        difficulties.windows(2).all(|w| w[0] <= w[1])
    }

    /// Checks structural invariants.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::Validation` for duplicate ids, out-of-range
    /// difficulty, unknown prerequisites, or a prerequisite cycle.
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(CoachError::validation("plan title must not be empty"));
        }
        if self.modules.is_empty() {
            return Err(CoachError::validation("plan must contain at least one module"));
        }

        let mut task_ids = HashSet::new();
        for task in self.tasks() {
            if !task_ids.insert(task.id.as_str()) {
                return Err(CoachError::validation(format!("duplicate task id '{}'", task.id)));
            }
            if !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&task.difficulty) {
                return Err(CoachError::validation(format!(
                    "task '{}' has difficulty {} outside {MIN_DIFFICULTY}..={MAX_DIFFICULTY}",
                    task.id, task.difficulty
                )));
            }
        }

        validate_prerequisites(&self.modules)
    }
}

/// Checks that module ids are unique and prerequisites form a DAG.
///
/// # Errors
///
/// Returns `CoachError::Validation` naming the offending module.
pub fn validate_prerequisites(modules: &[Module]) -> Result<()> {
    let mut index = HashMap::with_capacity(modules.len());
    for (i, module) in modules.iter().enumerate() {
        if index.insert(module.id.as_str(), i).is_some() {
            return Err(CoachError::validation(format!("duplicate module id '{}'", module.id)));
        }
    }

    let mut in_degree = vec![0usize; modules.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); modules.len()];
    for (i, module) in modules.iter().enumerate() {
        for prereq in &module.prerequisites {
            let Some(&p) = index.get(prereq.as_str()) else {
                return Err(CoachError::validation(format!(
                    "module '{}' depends on unknown module '{prereq}'",
                    module.id
                )));
            };
            in_degree[i] += 1;
            dependents[p].push(i);
        }
    }

    let mut ready: VecDeque<usize> = (0..modules.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut visited = 0;
    while let Some(i) = ready.pop_front() {
        visited += 1;
        for &d in &dependents[i] {
            in_degree[d] -= 1;
            if in_degree[d] == 0 {
                ready.push_back(d);
            }
        }
    }

    if visited == modules.len() {
        return Ok(());
    }
    let stuck: Vec<&str> = modules
        .iter()
        .zip(&in_degree)
        .filter(|(_, &deg)| deg > 0)
        .map(|(m, _)| m.id.as_str())
        .collect();
    Err(CoachError::validation(format!(
        "module prerequisites contain a cycle involving: {}",
        stuck.join(", ")
    )))
}

// ============================================================================
// Tasks
// ============================================================================

/// What kind of work a task asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Read material.
    Read,
    /// Watch a video.
    Watch,
    /// Write code against tests.
    #[default]
    Code,
    /// Answer questions.
    Quiz,
    /// Integrative mini-project.
    Project,
}

impl TaskType {
    /// Every task type.
    pub const ALL: [Self; 5] = [Self::Read, Self::Watch, Self::Code, Self::Quiz, Self::Project];

    /// Returns `true` for task types that are graded by running code.
    #[must_use]
    pub const fn is_graded_by_code(self) -> bool {
        matches!(self, Self::Code | Self::Project)
    }
}

/// A unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Identifier.
    pub id: String,
    /// Owning module, when part of a plan.
    pub module_id: Option<String>,
    /// Title.
    pub title: String,
    /// Kind of task.
    pub task_type: TaskType,
    /// Difficulty from 1 to 10.
    pub difficulty: u8,
    /// Topic slug.
    pub topic: String,
    /// Language of starter code and solution.
    pub language: Language,
    /// What the learner must do.
    pub instructions: String,
    /// Code the learner starts from.
    pub starter_code: String,
    /// Tests run against `solution(input)`.
    pub test_cases: Vec<TestCase>,
    /// Progressive hints.
    pub hints: Vec<String>,
    /// Reference solution.
    pub solution: String,
    /// Estimated effort.
    pub estimated_minutes: u32,
    /// Attached resources.
    pub resources: Vec<Resource>,
    /// Days after plan start the task is scheduled for.
    pub day_offset: Option<u32>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Checks that every required field is present.
    ///
    /// Every task needs a title, instructions, test cases, hints and a
    /// solution. For study tasks the test cases are self-check questions and
    /// the solution is a model answer.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::Validation` listing the missing fields.
    pub fn validate_complete(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.title.trim().is_empty() {
            missing.push("title");
        }
        if self.instructions.trim().is_empty() {
            missing.push("instructions");
        }
        if self.test_cases.is_empty() {
            missing.push("test_cases");
        }
        if self.hints.iter().all(|h| h.trim().is_empty()) {
            missing.push("hints");
        }
        if self.solution.trim().is_empty() {
            missing.push("solution");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(CoachError::validation(format!(
                "task '{}' is missing required fields: {}",
                self.id,
                missing.join(", ")
            )))
        }
    }
}

// ============================================================================
// Submissions and evaluations
// ============================================================================

/// A learner's answer to a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    /// Identifier.
    pub id: String,
    /// Author.
    pub user_id: String,
    /// Task answered.
    pub task_id: String,
    /// Submitted code.
    pub code: String,
    /// Language of `code`.
    pub language: Language,
    /// Submission time.
    pub submitted_at: DateTime<Utc>,
}

/// A static code-quality finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityIssue {
    /// Short machine-readable kind (`long_line`, `todo_marker`, ...).
    pub kind: String,
    /// 1-based line, when the issue is local.
    pub line: Option<usize>,
    /// Explanation with a suggested fix.
    pub message: String,
}

/// Outcome of reviewing one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    /// Identifier.
    pub id: String,
    /// The submission evaluated (one-to-one).
    pub submission_id: String,
    /// Whether every test passed.
    pub passed: bool,
    /// Score from 0 to 100.
    pub score: u8,
    /// Per-test outcomes.
    pub test_results: Vec<TestCaseResult>,
    /// Natural-language feedback.
    pub feedback: String,
    /// Static quality findings.
    pub quality_issues: Vec<QualityIssue>,
    /// How execution ended.
    pub execution_status: ExecutionStatus,
    /// Security findings.
    pub violations: Vec<Violation>,
    /// Degradation notices.
    pub warnings: Vec<String>,
    /// Evaluation time.
    pub evaluated_at: DateTime<Utc>,
}

// ============================================================================
// Progress
// ============================================================================

/// Per-learner, per-task progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    /// Learner.
    pub user_id: String,
    /// Task.
    pub task_id: String,
    /// Number of evaluated submissions.
    pub attempts: u32,
    /// Highest score so far.
    pub best_score: u8,
    /// Whether the task is done.
    pub completed: bool,
    /// Failed attempts since the last pass.
    pub consecutive_failures: u32,
    /// Passed attempts since the last failure.
    pub consecutive_successes: u32,
    /// When the learner started the task.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task was completed.
    pub completed_at: Option<DateTime<Utc>>,
    /// Most recent attempt.
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Accumulated time on task.
    pub time_spent_minutes: u32,
}

impl ProgressRecord {
    /// A fresh record with no attempts.
    #[must_use]
    pub fn new(user_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            task_id: task_id.into(),
            attempts: 0,
            best_score: 0,
            completed: false,
            consecutive_failures: 0,
            consecutive_successes: 0,
            started_at: None,
            completed_at: None,
            last_attempt_at: None,
            time_spent_minutes: 0,
        }
    }

    /// Marks the task as started, keeping the first start time.
    pub fn start(&mut self, at: DateTime<Utc>) {
        self.started_at.get_or_insert(at);
    }

    /// Folds one evaluated attempt into the record.
    pub fn record_attempt(&mut self, passed: bool, score: u8, at: DateTime<Utc>) {
        self.start(at);
        self.attempts += 1;
        self.best_score = self.best_score.max(score);
        self.last_attempt_at = Some(at);
        if passed {
            self.consecutive_successes += 1;
            self.consecutive_failures = 0;
            self.mark_completed(at);
        } else {
            self.consecutive_failures += 1;
            self.consecutive_successes = 0;
        }
    }

    /// Marks the task as completed, keeping the first completion time.
    pub fn mark_completed(&mut self, at: DateTime<Utc>) {
        self.completed = true;
        self.completed_at.get_or_insert(at);
    }
}

// ============================================================================
// Resources
// ============================================================================

/// Kind of learning resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Official documentation.
    #[default]
    Documentation,
    /// Step-by-step tutorial.
    Tutorial,
    /// Video.
    Video,
    /// Blog post or article.
    Article,
    /// Practice problems.
    Exercise,
}

/// A learning resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Stable identifier.
    pub id: String,
    /// Title.
    pub title: String,
    /// Location.
    pub url: String,
    /// Kind.
    pub kind: ResourceKind,
    /// Topic slug.
    pub topic: String,
    /// Quality from 0.0 to 1.0.
    pub quality: f32,
    /// Difficulty from 1 to 10.
    pub difficulty: u8,
}

/// Difficulty adjustment requested by the progress tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "direction")]
pub enum AdaptationSignal {
    /// Repeated failures: make upcoming work easier.
    LowerDifficulty {
        /// Consecutive failures observed.
        consecutive_failures: u32,
    },
    /// Sustained success: make upcoming work harder.
    RaiseDifficulty {
        /// Success rate in percent.
        success_rate: u8,
    },
}

impl AdaptationSignal {
    /// Signed change applied to remaining task difficulty.
    #[must_use]
    pub const fn delta(self) -> i32 {
        match self {
            Self::LowerDifficulty { .. } => -1,
            Self::RaiseDifficulty { .. } => 1,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn task(id: &str, difficulty: u8) -> Task {
        Task {
            id: id.into(),
            module_id: None,
            title: format!("Task {id}"),
            task_type: TaskType::Code,
            difficulty,
            topic: "loops".into(),
            language: Language::Python,
            instructions: "Return double the input.".into(),
            starter_code: "def solution(x):\n    pass\n".into(),
            test_cases: vec![TestCase::new("", json!(2), json!(4))],
            hints: vec!["Multiply by two.".into()],
            solution: "def solution(x):\n    return x * 2\n".into(),
            estimated_minutes: 15,
            resources: Vec::new(),
            day_offset: None,
            created_at: Utc::now(),
        }
    }

    fn module(id: &str, prerequisites: &[&str], tasks: Vec<Task>) -> Module {
        Module {
            id: id.into(),
            title: id.into(),
            summary: String::new(),
            order: 1,
            prerequisites: prerequisites.iter().map(ToString::to_string).collect(),
            tasks,
            review_checkpoints: Vec::new(),
        }
    }

    fn plan(modules: Vec<Module>) -> LearningPlan {
        LearningPlan {
            id: "plan-1".into(),
            user_id: "user-1".into(),
            title: "Python basics".into(),
            status: PlanStatus::Draft,
            modules,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn acyclic_plan_is_valid() {
        let plan = plan(vec![
            module("m1", &[], vec![task("t1", 2)]),
            module("m2", &["m1"], vec![task("t2", 3)]),
            module("m3", &["m1", "m2"], vec![task("t3", 4)]),
        ]);
        assert!(plan.validate().is_ok());
        assert!(plan.difficulty_is_monotone());
    }

    #[test]
    fn cycle_is_rejected() {
        let plan = plan(vec![
            module("m1", &["m3"], vec![task("t1", 2)]),
            module("m2", &["m1"], vec![task("t2", 3)]),
            module("m3", &["m2"], vec![task("t3", 4)]),
        ]);
        let err = plan.validate().unwrap_err().to_string();
        assert!(err.contains("cycle"));
        assert!(err.contains("m1"));
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let err = validate_prerequisites(&[module("m1", &["m1"], vec![])]).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn unknown_prerequisite_is_rejected() {
        let err = validate_prerequisites(&[module("m1", &["ghost"], vec![])]).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn duplicate_task_ids_are_rejected() {
        let plan = plan(vec![module("m1", &[], vec![task("t1", 2), task("t1", 3)])]);
        assert!(plan.validate().unwrap_err().to_string().contains("duplicate task id"));
    }

    #[test]
    fn out_of_range_difficulty_is_rejected() {
        let plan = plan(vec![module("m1", &[], vec![task("t1", 11)])]);
        assert!(plan.validate().is_err());
    }

    #[test]
    fn decreasing_difficulty_is_not_monotone() {
        let plan = plan(vec![module("m1", &[], vec![task("t1", 5), task("t2", 3)])]);
        assert!(plan.validate().is_ok());
        assert!(!plan.difficulty_is_monotone());
    }

    #[test]
    fn code_task_requires_tests_hints_and_solution() {
        let mut t = task("t1", 2);
        assert!(t.validate_complete().is_ok());

        t.test_cases.clear();
        t.hints = vec![" ".into()];
        t.solution.clear();
        let err = t.validate_complete().unwrap_err().to_string();
        assert!(err.contains("test_cases"));
        assert!(err.contains("hints"));
        assert!(err.contains("solution"));
    }

    #[test]
    fn study_task_requires_self_check_and_model_answer() {
        let mut t = task("t1", 2);
        t.task_type = TaskType::Read;
        t.test_cases.clear();
        t.solution.clear();
        let err = t.validate_complete().unwrap_err().to_string();
        assert!(err.contains("test_cases"));
        assert!(err.contains("solution"));
        assert!(!err.contains("hints"));
    }

    #[test]
    fn progress_tracks_streaks() {
        let mut record = ProgressRecord::new("u", "t");
        let now = Utc::now();
        record.record_attempt(false, 0, now);
        record.record_attempt(false, 50, now);
        assert_eq!(record.consecutive_failures, 2);
        assert!(!record.completed);

        record.record_attempt(true, 100, now);
        assert_eq!(record.consecutive_failures, 0);
        assert_eq!(record.consecutive_successes, 1);
        assert_eq!(record.best_score, 100);
        assert_eq!(record.attempts, 3);
        assert!(record.completed);
        assert_eq!(record.completed_at, Some(now));
    }

    #[test]
    fn plan_status_transitions() {
        assert!(PlanStatus::Draft.can_transition_to(PlanStatus::Active));
        assert!(PlanStatus::Active.can_transition_to(PlanStatus::Archived));
        assert!(!PlanStatus::Archived.can_transition_to(PlanStatus::Active));
        assert!(!PlanStatus::Completed.can_transition_to(PlanStatus::Active));
    }

    #[test]
    fn clamp_difficulty_stays_in_range() {
        assert_eq!(clamp_difficulty(-3), 1);
        assert_eq!(clamp_difficulty(5), 5);
        assert_eq!(clamp_difficulty(42), 10);
    }

    #[test]
    fn skill_level_parses_aliases() {
        assert_eq!(SkillLevel::parse("Novice"), Some(SkillLevel::Beginner));
        assert_eq!(SkillLevel::parse("ADVANCED"), Some(SkillLevel::Advanced));
        assert_eq!(SkillLevel::parse("guru"), None);
    }
}
