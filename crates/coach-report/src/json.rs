//! JSON rendering of progress reports.
//!
//! [`JsonGenerator`] produces compact output for API consumers and
//! pretty-printed output for files and humans. Field names are camelCase.
//!
//! # Example
//!
//! ```rust
//! use coach_report::{LearnerInfo, Report, ReportSummary};
//! use coach_report::json::JsonGenerator;
//!
//! let report = Report::builder()
//!     .learner(LearnerInfo::new("u-1", "Ada"))
//!     .summary(ReportSummary::default())
//!     .build()
//!     .unwrap();
//!
//! let compact = JsonGenerator::new(&report).generate().unwrap();
//! assert!(compact.contains(r#""displayName":"Ada""#));
//! ```

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::{Report, ReportError, Result};

/// JSON report generator.
pub struct JsonGenerator<'a> {
    report: &'a Report,
}

impl<'a> JsonGenerator<'a> {
    /// Creates a new JSON generator for the given report.
    #[must_use]
    pub const fn new(report: &'a Report) -> Self {
        Self { report }
    }

    /// Generates compact JSON (single line).
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if JSON serialization fails.
    pub fn generate(&self) -> Result<String> {
        serde_json::to_string(self.report).map_err(ReportError::from)
    }

    /// Generates pretty-printed JSON with 2-space indentation.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if JSON serialization fails.
    pub fn generate_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self.report).map_err(ReportError::from)
    }

    /// Writes the report to `path`, creating or truncating the file.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if JSON serialization fails.
    /// Returns [`ReportError::Io`] if file creation or writing fails.
    pub fn write_to_file(&self, path: &Path, pretty: bool) -> Result<()> {
        let json = if pretty {
            self.generate_pretty()?
        } else {
            self.generate()?
        };

        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::{LearnerInfo, ModuleProgress, ReportSummary, TimelineEntry, TopicPerformance};

    fn sample_report() -> Report {
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).unwrap();
        Report::builder()
            .learner(LearnerInfo::new("u-1", "Ada"))
            .generated_at(at)
            .summary(ReportSummary {
                streak_days: 4,
                completion_rate: 25,
                success_rate: 75,
                average_score: 81,
                total_attempts: 4,
                tasks_completed: 3,
                tasks_total: 12,
                time_spent_minutes: 95,
                xp: 140,
                level: 2,
                ..ReportSummary::default()
            })
            .plan_title("Python fundamentals")
            .module(ModuleProgress {
                title: "Variables".into(),
                completed: 3,
                total: 3,
            })
            .topics(vec![TopicPerformance {
                topic: "variables".into(),
                attempts: 4,
                passed: 3,
                average_score: 81,
            }])
            .timeline_entry(TimelineEntry::submission(at, "Sum a list", true, 100))
            .badges(vec!["first_steps".into()])
            .build()
            .unwrap()
    }

    #[test]
    fn test_generate_compact_json() {
        let report = sample_report();
        let json = JsonGenerator::new(&report).generate().unwrap();

        assert!(!json.contains('\n'));
        assert!(json.contains(r#""status":"on_track""#));
        assert!(json.contains(r#""planTitle":"Python fundamentals""#));
        assert!(json.contains(r#""streakDays":4"#));
    }

    #[test]
    fn test_generate_pretty_json() {
        let report = sample_report();
        let json = JsonGenerator::new(&report).generate_pretty().unwrap();

        assert!(json.contains('\n'));
        for field in ["learner", "generatedAt", "summary", "modules", "topics", "timeline", "badges", "recommendations"] {
            assert!(json.contains(&format!("\"{field}\"")), "missing {field}");
        }
    }

    #[test]
    fn test_json_roundtrip() {
        let report = sample_report();
        let json = JsonGenerator::new(&report).generate().unwrap();
        let parsed: Report = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.learner, report.learner);
        assert_eq!(parsed.summary, report.summary);
        assert_eq!(parsed.timeline, report.timeline);
    }

    #[test]
    fn test_write_to_file() {
        let report = sample_report();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");

        JsonGenerator::new(&report).write_to_file(&path, true).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\"Ada\""));

        JsonGenerator::new(&report).write_to_file(&path, false).unwrap();
        let compact = std::fs::read_to_string(&path).unwrap();
        assert!(!compact.contains('\n'));
    }

    #[test]
    fn test_write_to_file_invalid_path() {
        let report = sample_report();
        let result = JsonGenerator::new(&report).write_to_file(Path::new("/nonexistent/dir/report.json"), true);
        assert!(matches!(result, Err(ReportError::Io(_))));
    }
}
