//! Markdown rendering of progress reports.
//!
//! The document has these sections, in order: title, summary table, plan
//! modules, topic performance, badges, recent activity, recommendations and a
//! footer.

use chrono::{DateTime, Utc};
use std::fmt::Write;

use crate::{ModuleProgress, Report, TimelineEntry, TopicPerformance, WEAK_TOPIC_SCORE};

/// Width of the text progress bar in the modules table.
const PROGRESS_BAR_WIDTH: u32 = 10;

/// Longest task title shown in the activity table.
const MAX_TASK_DISPLAY_LENGTH: usize = 60;

/// Generates Markdown from a [`Report`].
pub struct MarkdownGenerator<'a> {
    report: &'a Report,
}

impl<'a> MarkdownGenerator<'a> {
    /// Creates a new Markdown generator for the given report.
    #[must_use]
    pub const fn new(report: &'a Report) -> Self {
        Self { report }
    }

    /// Generates the complete Markdown report.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut output = String::new();
        self.write_body(&mut output);
        self.write_footer(&mut output);
        output
    }

    fn write_body(&self, output: &mut String) {
        self.write_title(output);
        self.write_summary(output);
        self.write_modules(output);
        self.write_topics(output);
        self.write_badges(output);
        self.write_timeline(output);
        self.write_recommendations(output);
    }

    fn write_title(&self, output: &mut String) {
        let _ = writeln!(
            output,
            "# Learning Progress Report: {}\n",
            escape_markdown(&self.report.learner.display_name)
        );
        if let Some(plan) = &self.report.plan_title {
            let _ = writeln!(output, "Plan: **{}**\n", escape_markdown(plan));
        }
    }

    fn write_summary(&self, output: &mut String) {
        let summary = &self.report.summary;

        let _ = writeln!(output, "## Summary\n");
        let _ = writeln!(output, "| Metric | Value |");
        let _ = writeln!(output, "|--------|-------|");
        let _ = writeln!(output, "| Status | {} |", summary.status.description());
        let _ = writeln!(output, "| Streak | {} |", format_days(summary.streak_days));
        let _ = writeln!(
            output,
            "| Tasks | {} of {} ({}%) |",
            summary.tasks_completed, summary.tasks_total, summary.completion_rate
        );
        let _ = writeln!(
            output,
            "| Success Rate | {}% over {} attempts |",
            summary.success_rate, summary.total_attempts
        );
        let _ = writeln!(output, "| Average Score | {} |", summary.average_score);
        let _ = writeln!(output, "| Time Spent | {} |", format_minutes(summary.time_spent_minutes));
        let _ = writeln!(output, "| Level | {} ({} XP) |", summary.level, summary.xp);
        let _ = writeln!(output);
    }

    fn write_modules(&self, output: &mut String) {
        if self.report.modules.is_empty() {
            return;
        }
        let _ = writeln!(output, "## Modules\n");
        let _ = writeln!(output, "| Module | Progress | Done |");
        let _ = writeln!(output, "|--------|----------|------|");
        for module in &self.report.modules {
            Self::write_module_row(output, module);
        }
        let _ = writeln!(output);
    }

    fn write_module_row(output: &mut String, module: &ModuleProgress) {
        let _ = writeln!(
            output,
            "| {} | `{}` {}% | {}/{} |",
            escape_markdown(&module.title),
            progress_bar(module.percent()),
            module.percent(),
            module.completed,
            module.total
        );
    }

    fn write_topics(&self, output: &mut String) {
        let _ = writeln!(output, "## Topic Performance\n");

        if self.report.topics.is_empty() {
            let _ = writeln!(output, "*No graded attempts yet.*\n");
            return;
        }

        let _ = writeln!(output, "| Topic | Attempts | Passed | Average |");
        let _ = writeln!(output, "|-------|----------|--------|---------|");
        for topic in &self.report.topics {
            Self::write_topic_row(output, topic);
        }
        let _ = writeln!(output);
    }

    fn write_topic_row(output: &mut String, topic: &TopicPerformance) {
        let marker = if topic.attempts > 0 && topic.average_score < WEAK_TOPIC_SCORE {
            " &#9888;"
        } else {
            ""
        };
        let _ = writeln!(
            output,
            "| {}{marker} | {} | {} | {} |",
            escape_markdown(&topic.topic),
            topic.attempts,
            topic.passed,
            topic.average_score
        );
    }

    fn write_badges(&self, output: &mut String) {
        if self.report.badges.is_empty() {
            return;
        }
        let _ = writeln!(output, "## Badges\n");
        for badge in &self.report.badges {
            let _ = writeln!(output, "- {}", escape_markdown(&humanize(badge)));
        }
        let _ = writeln!(output);
    }

    fn write_timeline(&self, output: &mut String) {
        let _ = writeln!(output, "## Recent Activity\n");

        if self.report.timeline.is_empty() {
            let _ = writeln!(output, "*No activity recorded.*\n");
            return;
        }

        let _ = writeln!(output, "| Time | Event | Task | Score |");
        let _ = writeln!(output, "|------|-------|------|-------|");
        for entry in &self.report.timeline {
            Self::write_timeline_entry(output, entry);
        }
        let _ = writeln!(output);
    }

    fn write_timeline_entry(output: &mut String, entry: &TimelineEntry) {
        let time = format_timestamp(&entry.timestamp);
        let event = entry.kind.label();
        let task = escape_markdown(&truncate(&entry.task, MAX_TASK_DISPLAY_LENGTH));
        let score = entry.score.map(|s| s.to_string()).unwrap_or_default();
        let _ = writeln!(output, "| {time} | {event} | {task} | {score} |");
    }

    fn write_recommendations(&self, output: &mut String) {
        let _ = writeln!(output, "## Recommendations\n");

        if self.report.recommendations.is_empty() {
            let _ = writeln!(output, "*Keep going, nothing to flag.*\n");
            return;
        }

        let mut sorted: Vec<_> = self.report.recommendations.iter().collect();
        sorted.sort_by_key(|r| r.priority);

        for (index, rec) in sorted.iter().enumerate() {
            let _ = writeln!(
                output,
                "{}. **[{}]** {}",
                index + 1,
                escape_markdown(&rec.category),
                escape_markdown(&rec.description),
            );
        }
        let _ = writeln!(output);
    }

    fn write_footer(&self, output: &mut String) {
        let _ = writeln!(output, "---");
        let timestamp = format_timestamp(&self.report.generated_at);
        let _ = writeln!(output, "*Generated by the learning coach at {timestamp}*");
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// `90` -> "1h 30m", `45` -> "45m", `0` -> "0m".
fn format_minutes(minutes: u32) -> String {
    let hours = minutes / 60;
    let mins = minutes % 60;
    match (hours, mins) {
        (0, m) => format!("{m}m"),
        (h, 0) => format!("{h}h"),
        (h, m) => format!("{h}h {m}m"),
    }
}

fn format_days(days: u32) -> String {
    if days == 1 {
        "1 day".to_string()
    } else {
        format!("{days} days")
    }
}

/// Format: "YYYY-MM-DD HH:MM UTC"
fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn progress_bar(percent: u32) -> String {
    let filled = (percent.min(100) * PROGRESS_BAR_WIDTH / 100) as usize;
    let empty = PROGRESS_BAR_WIDTH as usize - filled;
    format!("{}{}", "#".repeat(filled), "-".repeat(empty))
}

/// `week_warrior` -> "Week warrior".
fn humanize(snake: &str) -> String {
    let spaced = snake.replace('_', " ");
    let mut chars = spaced.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

/// Escapes Markdown control characters so learner text renders literally.
fn escape_markdown(text: &str) -> String {
    let mut result = String::with_capacity(text.len());

    for ch in text.chars() {
        match ch {
            '*' | '_' | '`' | '#' | '[' | ']' | '(' | ')' | '!' | '\\' | '<' | '>' | '|' => {
                result.push('\\');
                result.push(ch);
            }
            '\n' => result.push_str("<br>"),
            _ => result.push(ch),
        }
    }

    result
}

/// Cuts `text` to `max_chars` characters, adding an ellipsis when shortened.
fn truncate(text: &str, max_chars: usize) -> String {
    let first_line = text.lines().next().unwrap_or("");
    if first_line.chars().count() <= max_chars {
        first_line.to_string()
    } else {
        let cut: String = first_line.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}

// ============================================================================
// Tests
// ============================================================================
