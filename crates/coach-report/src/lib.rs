//! Learner progress reports.
//!
//! This crate holds the report data model and two renderers. It knows nothing
//! about storage or agents: the orchestrator gathers the numbers and hands
//! them over as a [`Report`].
//!
//! # Types
//!
//! - [`Report`] - The complete report for one learner
//! - [`ReportSummary`] - Headline numbers (streak, completion, success rate)
//! - [`ModuleProgress`] - Completion per plan module
//! - [`TopicPerformance`] - Attempts and scores grouped by topic
//! - [`TimelineEntry`] - A timestamped learning event
//! - [`Recommendation`] - A prioritized next step
//!
//! # Generators
//!
//! - [`json::JsonGenerator`] - Compact or pretty JSON
//! - [`MarkdownGenerator`] - Human-readable Markdown
//!
//! # Example
//!
//! ```rust
//! use coach_report::{LearnerInfo, Report, ReportSummary, MarkdownGenerator};
//!
//! let report = Report::builder()
//!     .learner(LearnerInfo::new("u-1", "Ada"))
//!     .summary(ReportSummary {
//!         tasks_completed: 3,
//!         tasks_total: 12,
//!         ..ReportSummary::default()
//!     })
//!     .build()
//!     .unwrap();
//!
//! let markdown = MarkdownGenerator::new(&report).generate();
//! assert!(markdown.contains("# Learning Progress Report: Ada"));
//! ```

pub mod json;
mod markdown;

pub use markdown::MarkdownGenerator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during report generation.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Failed to serialize the report to JSON.
    #[error("failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to write the report file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid report data.
    #[error("invalid report data: {0}")]
    InvalidData(String),
}

/// Result type for report operations.
pub type Result<T> = std::result::Result<T, ReportError>;

// ============================================================================
// Report Format
// ============================================================================

/// Output format requested by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// Pretty-printed JSON.
    #[default]
    Json,
    /// Markdown document.
    Markdown,
}

impl ReportFormat {
    /// Parses `json`, `markdown` or `md`, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "markdown" | "md" => Some(Self::Markdown),
            _ => None,
        }
    }

    /// MIME type of the rendered output.
    #[must_use]
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Markdown => "text/markdown; charset=utf-8",
        }
    }
}

// ============================================================================
// Report Status
// ============================================================================

/// Overall standing of the learner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// No attempts or completions yet.
    #[default]
    NotStarted,
    /// Practising regularly with a healthy success rate.
    OnTrack,
    /// Low success rate or a broken streak.
    NeedsAttention,
    /// Every task of the plan is done.
    Completed,
}

impl ReportStatus {
    /// Derives the status from headline numbers.
    #[must_use]
    pub const fn from_summary(summary: &ReportSummary) -> Self {
        if summary.tasks_total > 0 && summary.tasks_completed >= summary.tasks_total {
            return Self::Completed;
        }
        if summary.total_attempts == 0 && summary.tasks_completed == 0 {
            return Self::NotStarted;
        }
        if summary.streak_days == 0 || (summary.total_attempts >= 3 && summary.success_rate < 50) {
            return Self::NeedsAttention;
        }
        Self::OnTrack
    }

    /// Returns a human-readable description of the status.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::NotStarted => "Not started yet",
            Self::OnTrack => "On track",
            Self::NeedsAttention => "Needs attention",
            Self::Completed => "Plan completed",
        }
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

// ============================================================================
// Report
// ============================================================================

/// Progress report for one learner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    /// Who the report is about.
    pub learner: LearnerInfo,

    /// When the report was generated.
    pub generated_at: DateTime<Utc>,

    /// Headline numbers.
    pub summary: ReportSummary,

    /// Title of the active plan, if any.
    pub plan_title: Option<String>,

    /// Completion per module of the active plan.
    pub modules: Vec<ModuleProgress>,

    /// Results grouped by topic.
    pub topics: Vec<TopicPerformance>,

    /// Recent learning events, oldest first.
    pub timeline: Vec<TimelineEntry>,

    /// Badge names earned so far.
    pub badges: Vec<String>,

    /// Suggested next steps.
    pub recommendations: Vec<Recommendation>,
}

impl Report {
    /// Creates a new report builder.
    #[must_use]
    pub fn builder() -> ReportBuilder {
        ReportBuilder::default()
    }

    /// Serializes the report to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::Serialization` if JSON serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(ReportError::from)
    }

    /// Renders the report in `format`.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::Serialization` if JSON serialization fails.
    pub fn render(&self, format: ReportFormat) -> Result<String> {
        match format {
            ReportFormat::Json => json::JsonGenerator::new(self).generate_pretty(),
            ReportFormat::Markdown => Ok(MarkdownGenerator::new(self).generate()),
        }
    }

    /// Topics whose average score is below `threshold`, weakest first.
    #[must_use]
    pub fn weak_topics(&self, threshold: u8) -> Vec<&TopicPerformance> {
        let mut weak: Vec<&TopicPerformance> = self
            .topics
            .iter()
            .filter(|t| t.attempts > 0 && t.average_score < threshold)
            .collect();
        weak.sort_by_key(|t| t.average_score);
        weak
    }
}

// ============================================================================
// ReportBuilder
// ============================================================================

/// Builder for constructing [`Report`] instances.
///
/// The status is derived from the summary, and recommendations are generated
/// when none were supplied.
#[derive(Debug, Clone, Default)]
pub struct ReportBuilder {
    learner: Option<LearnerInfo>,
    generated_at: Option<DateTime<Utc>>,
    summary: Option<ReportSummary>,
    plan_title: Option<String>,
    modules: Vec<ModuleProgress>,
    topics: Vec<TopicPerformance>,
    timeline: Vec<TimelineEntry>,
    badges: Vec<String>,
    recommendations: Vec<Recommendation>,
}

impl ReportBuilder {
    /// Sets the learner.
    #[must_use]
    pub fn learner(mut self, learner: LearnerInfo) -> Self {
        self.learner = Some(learner);
        self
    }

    /// Sets the generation time (defaults to now).
    #[must_use]
    pub const fn generated_at(mut self, at: DateTime<Utc>) -> Self {
        self.generated_at = Some(at);
        self
    }

    /// Sets the headline numbers.
    #[must_use]
    pub fn summary(mut self, summary: ReportSummary) -> Self {
        self.summary = Some(summary);
        self
    }

    /// Sets the active plan title.
    #[must_use]
    pub fn plan_title(mut self, title: impl Into<String>) -> Self {
        self.plan_title = Some(title.into());
        self
    }

    /// Adds a module row.
    #[must_use]
    pub fn module(mut self, module: ModuleProgress) -> Self {
        self.modules.push(module);
        self
    }

    /// Sets all topic rows at once.
    #[must_use]
    pub fn topics(mut self, topics: Vec<TopicPerformance>) -> Self {
        self.topics = topics;
        self
    }

    /// Adds a timeline entry.
    #[must_use]
    pub fn timeline_entry(mut self, entry: TimelineEntry) -> Self {
        self.timeline.push(entry);
        self
    }

    /// Sets the badge names.
    #[must_use]
    pub fn badges(mut self, badges: Vec<String>) -> Self {
        self.badges = badges;
        self
    }

    /// Adds a recommendation.
    #[must_use]
    pub fn recommendation(mut self, rec: Recommendation) -> Self {
        self.recommendations.push(rec);
        self
    }

    /// Builds the report.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::InvalidData` if the learner or summary is missing,
    /// or if completed tasks exceed the total.
    pub fn build(self) -> Result<Report> {
        let learner = self
            .learner
            .ok_or_else(|| ReportError::InvalidData("learner is required".to_string()))?;

        let mut summary = self
            .summary
            .ok_or_else(|| ReportError::InvalidData("summary is required".to_string()))?;
        if summary.tasks_total > 0 && summary.tasks_completed > summary.tasks_total {
            return Err(ReportError::InvalidData(format!(
                "{} tasks completed out of {}",
                summary.tasks_completed, summary.tasks_total
            )));
        }
        summary.status = ReportStatus::from_summary(&summary);

        let mut timeline = self.timeline;
        timeline.sort_by_key(|e| e.timestamp);

        let mut report = Report {
            learner,
            generated_at: self.generated_at.unwrap_or_else(Utc::now),
            summary,
            plan_title: self.plan_title,
            modules: self.modules,
            topics: self.topics,
            timeline,
            badges: self.badges,
            recommendations: self.recommendations,
        };
        if report.recommendations.is_empty() {
            report.recommendations = recommend(&report);
        }
        Ok(report)
    }
}

// ============================================================================
// Learner and summary
// ============================================================================

/// Public identity of the learner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerInfo {
    /// Learner id.
    pub user_id: String,
    /// Display name.
    pub display_name: String,
}

impl LearnerInfo {
    /// Creates learner info.
    #[must_use]
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Headline numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    /// Derived standing; set by [`ReportBuilder::build`].
    pub status: ReportStatus,
    /// Consecutive active days.
    pub streak_days: u32,
    /// Completed share of the plan, in percent.
    pub completion_rate: u8,
    /// Passing share of attempts, in percent.
    pub success_rate: u8,
    /// Mean attempt score.
    pub average_score: u8,
    /// Graded attempts.
    pub total_attempts: u32,
    /// Completed tasks.
    pub tasks_completed: u32,
    /// Tasks in the plan.
    pub tasks_total: u32,
    /// Minutes on task.
    pub time_spent_minutes: u32,
    /// Experience points.
    pub xp: u32,
    /// Level.
    pub level: u32,
}

/// Completion of one plan module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleProgress {
    /// Module title.
    pub title: String,
    /// Completed tasks.
    pub completed: u32,
    /// Tasks in the module.
    pub total: u32,
}

impl ModuleProgress {
    /// Completion in percent.
    #[must_use]
    pub fn percent(&self) -> u32 {
        if self.total == 0 {
            0
        } else {
            self.completed.min(self.total) * 100 / self.total
        }
    }
}

/// Results for one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicPerformance {
    /// Topic name.
    pub topic: String,
    /// Graded attempts.
    pub attempts: u32,
    /// Passing attempts.
    pub passed: u32,
    /// Mean score.
    pub average_score: u8,
}

// ============================================================================
// TimelineEntry
// ============================================================================

/// Kind of learning event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineKind {
    /// Task started.
    Started,
    /// Submission that passed.
    Passed,
    /// Submission that did not pass yet.
    Attempted,
    /// Task completed.
    Completed,
}

impl TimelineKind {
    /// Short label for tables.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Started => "Started",
            Self::Passed => "Passed",
            Self::Attempted => "Attempted",
            Self::Completed => "Completed",
        }
    }
}

/// A timestamped learning event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub kind: TimelineKind,
    /// Task title or id.
    pub task: String,
    /// Score for submissions.
    pub score: Option<u8>,
}

impl TimelineEntry {
    /// Creates an entry without a score.
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>, kind: TimelineKind, task: impl Into<String>) -> Self {
        Self {
            timestamp,
            kind,
            task: task.into(),
            score: None,
        }
    }

    /// Creates a submission entry.
    #[must_use]
    pub fn submission(timestamp: DateTime<Utc>, task: impl Into<String>, passed: bool, score: u8) -> Self {
        Self {
            timestamp,
            kind: if passed { TimelineKind::Passed } else { TimelineKind::Attempted },
            task: task.into(),
            score: Some(score),
        }
    }
}

// ============================================================================
// Recommendation
// ============================================================================

/// A prioritized suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Priority (1 = highest).
    pub priority: u32,
    /// Category such as `practice`, `consistency` or `challenge`.
    pub category: String,
    /// What to do.
    pub description: String,
}

impl Recommendation {
    /// Creates a recommendation.
    #[must_use]
    pub fn new(priority: u32, category: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            priority,
            category: category.into(),
            description: description.into(),
        }
    }
}

/// Score under which a topic is called out for review.
pub const WEAK_TOPIC_SCORE: u8 = 60;

/// Rule-based next steps for `report`.
#[must_use]
pub fn recommend(report: &Report) -> Vec<Recommendation> {
    let summary = &report.summary;
    let mut recs = Vec::new();

    if summary.status == ReportStatus::NotStarted {
        recs.push(Recommendation::new(
            1,
            "getting_started",
            "Open today's tasks and start with the first reading; a short first session builds momentum.",
        ));
        return recs;
    }

    for topic in report.weak_topics(WEAK_TOPIC_SCORE).into_iter().take(2) {
        recs.push(Recommendation::new(
            1,
            "practice",
            format!(
                "Revisit {}: the average score is {}. Re-read the hints and try one more exercise on it.",
                topic.topic, topic.average_score
            ),
        ));
    }
    if summary.streak_days == 0 {
        recs.push(Recommendation::new(
            2,
            "consistency",
            "Pick one small task today to restart your streak.",
        ));
    }
    if summary.total_attempts >= 5 && summary.success_rate > 90 {
        recs.push(Recommendation::new(
            3,
            "challenge",
            "You are passing almost everything; ask for a harder exercise or start the mini-project early.",
        ));
    }
    if summary.status == ReportStatus::Completed {
        recs.push(Recommendation::new(
            2,
            "next_goal",
            "Plan complete. Set a new goal to generate the next learning path.",
        ));
    }
    recs
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn summary(attempts: u32, success: u8, streak: u32, completed: u32, total: u32) -> ReportSummary {
        ReportSummary {
            total_attempts: attempts,
            success_rate: success,
            streak_days: streak,
            tasks_completed: completed,
            tasks_total: total,
            ..ReportSummary::default()
        }
    }

    #[test]
    fn status_is_derived_from_numbers() {
        assert_eq!(ReportStatus::from_summary(&summary(0, 0, 0, 0, 10)), ReportStatus::NotStarted);
        assert_eq!(ReportStatus::from_summary(&summary(4, 80, 2, 1, 10)), ReportStatus::OnTrack);
        assert_eq!(ReportStatus::from_summary(&summary(4, 25, 2, 1, 10)), ReportStatus::NeedsAttention);
        assert_eq!(ReportStatus::from_summary(&summary(4, 80, 0, 1, 10)), ReportStatus::NeedsAttention);
        assert_eq!(ReportStatus::from_summary(&summary(9, 80, 0, 10, 10)), ReportStatus::Completed);
    }

    #[test]
    fn builder_requires_learner_and_summary() {
        assert!(Report::builder().summary(ReportSummary::default()).build().is_err());
        assert!(Report::builder().learner(LearnerInfo::new("u", "U")).build().is_err());
        let err = Report::builder()
            .learner(LearnerInfo::new("u", "U"))
            .summary(summary(1, 100, 1, 5, 3))
            .build()
            .unwrap_err();
        assert!(matches!(err, ReportError::InvalidData(_)));
    }

    #[test]
    fn builder_sorts_timeline_and_recommends() {
        let now = Utc::now();
        let report = Report::builder()
            .learner(LearnerInfo::new("u", "U"))
            .summary(summary(6, 33, 0, 1, 10))
            .topics(vec![TopicPerformance {
                topic: "recursion".into(),
                attempts: 3,
                passed: 1,
                average_score: 40,
            }])
            .timeline_entry(TimelineEntry::new(now, TimelineKind::Completed, "b"))
            .timeline_entry(TimelineEntry::new(now - chrono::TimeDelta::hours(1), TimelineKind::Started, "a"))
            .build()
            .unwrap();

        assert_eq!(report.summary.status, ReportStatus::NeedsAttention);
        assert_eq!(report.timeline[0].task, "a");
        let categories: Vec<&str> = report.recommendations.iter().map(|r| r.category.as_str()).collect();
        assert_eq!(categories, vec!["practice", "consistency"]);
        assert!(report.recommendations[0].description.contains("recursion"));
    }

    #[test]
    fn explicit_recommendations_are_kept() {
        let report = Report::builder()
            .learner(LearnerInfo::new("u", "U"))
            .summary(ReportSummary::default())
            .recommendation(Recommendation::new(1, "custom", "Do the thing"))
            .build()
            .unwrap();
        assert_eq!(report.recommendations.len(), 1);
        assert_eq!(report.recommendations[0].category, "custom");
    }

    #[test]
    fn format_parses_aliases() {
        assert_eq!(ReportFormat::parse("MD"), Some(ReportFormat::Markdown));
        assert_eq!(ReportFormat::parse("json"), Some(ReportFormat::Json));
        assert_eq!(ReportFormat::parse("pdf"), None);
    }

    #[test]
    fn module_percent_is_capped() {
        let m = ModuleProgress {
            title: "m".into(),
            completed: 5,
            total: 4,
        };
        assert_eq!(m.percent(), 100);
    }
}
