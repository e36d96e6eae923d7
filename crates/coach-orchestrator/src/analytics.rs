//! Learner progress reports.
//!
//! Collects statistics, plan completion, per-topic results and recent
//! activity from the store and hands them to `coach_report` for rendering.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use coach_report::{
    LearnerInfo, ModuleProgress, Report, ReportSummary, TimelineEntry, TimelineKind, TopicPerformance,
};
use tracing::instrument;

use crate::agents::progress::compute_stats;
use crate::agents::Services;
use crate::error::{CoachError, Result};
use crate::gamification;
use crate::models::Task;

/// Most recent events included in the report.
pub const TIMELINE_LIMIT: usize = 20;

#[derive(Default)]
struct TopicTally {
    attempts: u32,
    passed: u32,
    score_sum: u32,
}

/// Builds the progress report for `user_id` as of `now`.
///
/// # Errors
///
/// Returns `CoachError::NotFound` for an unknown user and store errors.
#[instrument(skip(services))]
pub async fn learner_report(services: &Services, user_id: &str, now: DateTime<Utc>) -> Result<Report> {
    let store = &services.store;
    let user = store.get_user(user_id).await?;
    let stats = compute_stats(services, user_id, now).await?;
    let game = gamification::summary(services, user_id, now).await?;
    let plan = store.active_plan(user_id).await?;
    let history = store.attempt_history(user_id).await?;

    let completed: HashSet<&str> = stats
        .records
        .iter()
        .filter(|r| r.completed)
        .map(|r| r.task_id.as_str())
        .collect();

    let mut tasks: HashMap<String, Task> = HashMap::new();
    if let Some(plan) = &plan {
        for task in plan.tasks() {
            tasks.insert(task.id.clone(), task.clone());
        }
    }
    for task_id in history.iter().map(|a| &a.task_id).chain(stats.records.iter().map(|r| &r.task_id)) {
        if tasks.contains_key(task_id) {
            continue;
        }
        match store.get_task(user_id, task_id).await {
            Ok(task) => {
                tasks.insert(task_id.clone(), task);
            }
            Err(CoachError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }
    }
    let title_of = |task_id: &str| tasks.get(task_id).map_or_else(|| task_id.to_string(), |t| t.title.clone());

    let mut topics: BTreeMap<String, TopicTally> = BTreeMap::new();
    for attempt in &history {
        let topic = tasks
            .get(&attempt.task_id)
            .map_or_else(|| "other".to_string(), |t| t.topic.clone());
        let tally = topics.entry(topic).or_default();
        tally.attempts += 1;
        tally.passed += u32::from(attempt.passed);
        tally.score_sum += u32::from(attempt.score);
    }

    let mut timeline: Vec<TimelineEntry> = history
        .iter()
        .map(|a| TimelineEntry::submission(a.submitted_at, title_of(&a.task_id), a.passed, a.score))
        .collect();
    for record in &stats.records {
        if let Some(at) = record.started_at {
            timeline.push(TimelineEntry::new(at, TimelineKind::Started, title_of(&record.task_id)));
        }
        if let Some(at) = record.completed_at {
            timeline.push(TimelineEntry::new(at, TimelineKind::Completed, title_of(&record.task_id)));
        }
    }
    timeline.sort_by_key(|e| std::cmp::Reverse(e.timestamp));
    timeline.truncate(TIMELINE_LIMIT);

    let mut builder = Report::builder()
        .learner(LearnerInfo::new(&user.id, &user.display_name))
        .generated_at(now)
        .summary(ReportSummary {
            streak_days: stats.streak_days,
            completion_rate: stats.completion_rate,
            success_rate: stats.success_rate,
            average_score: stats.average_score,
            total_attempts: stats.total_attempts,
            tasks_completed: stats.tasks_completed,
            tasks_total: stats.tasks_total,
            time_spent_minutes: stats.time_spent_minutes,
            xp: game.xp,
            level: game.level,
            ..ReportSummary::default()
        })
        .topics(
            topics
                .into_iter()
                .map(|(topic, tally)| TopicPerformance {
                    topic,
                    attempts: tally.attempts,
                    passed: tally.passed,
                    average_score: u8::try_from(tally.score_sum / tally.attempts.max(1)).unwrap_or(100),
                })
                .collect(),
        )
        .badges(
            game.badges
                .iter()
                .filter_map(|b| serde_json::to_value(b).ok())
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        );

    if let Some(plan) = &plan {
        builder = builder.plan_title(&plan.title);
        for module in &plan.modules {
            let done = module.tasks.iter().filter(|t| completed.contains(t.id.as_str())).count();
            builder = builder.module(ModuleProgress {
                title: module.title.clone(),
                completed: u32::try_from(done).unwrap_or(u32::MAX),
                total: u32::try_from(module.tasks.len()).unwrap_or(u32::MAX),
            });
        }
    }
    for entry in timeline {
        builder = builder.timeline_entry(entry);
    }

    Ok(builder.build()?)
}
