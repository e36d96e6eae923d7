//! Progress tracker: per-task records, aggregate statistics and adaptation
//! triggers.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::{unsupported, Agent, AgentContext, AgentRequest, AgentResult, AgentType, Services};
use crate::error::{CoachError, Result};
use crate::models::{AdaptationSignal, ProgressRecord};
use crate::store::AttemptRow;

/// Consecutive failed attempts that lower difficulty.
pub const FAILURE_TRIGGER: u32 = 3;

/// Success rate (percent) that must be exceeded to raise difficulty.
pub const SUCCESS_TRIGGER_RATE: u8 = 90;

/// Attempts needed before the success trigger can fire.
pub const SUCCESS_MIN_ATTEMPTS: usize = 5;

/// Most recent attempts the success rate is measured over.
const SUCCESS_WINDOW: usize = 10;

/// Aggregate statistics for one learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressStats {
    /// Consecutive active days ending today or yesterday.
    pub streak_days: u32,
    /// Completed share of the active plan, in percent.
    pub completion_rate: u8,
    /// Passing share of all attempts, in percent.
    pub success_rate: u8,
    /// Mean score over all attempts.
    pub average_score: u8,
    /// Number of graded attempts.
    pub total_attempts: u32,
    /// Tasks completed.
    pub tasks_completed: u32,
    /// Tasks in the active plan (or tracked tasks when there is no plan).
    pub tasks_total: u32,
    /// Accumulated minutes on task.
    pub time_spent_minutes: u32,
    /// Pending difficulty adjustment, if the history calls for one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adaptation: Option<AdaptationSignal>,
    /// Per-task records.
    pub records: Vec<ProgressRecord>,
}

/// Percentage of `part` in `whole`, rounded down; 0 for an empty whole.
#[must_use]
pub fn percent(part: usize, whole: usize) -> u8 {
    if whole == 0 {
        return 0;
    }
    u8::try_from((part.min(whole) * 100) / whole).unwrap_or(100)
}

/// Length of the run of consecutive days in `days` that ends today or
/// yesterday.
#[must_use]
pub fn streak_days(days: &BTreeSet<NaiveDate>, today: NaiveDate) -> u32 {
    let mut cursor = if days.contains(&today) {
        today
    } else {
        match today.pred_opt() {
            Some(yesterday) if days.contains(&yesterday) => yesterday,
            _ => return 0,
        }
    };
    let mut streak = 0;
    while days.contains(&cursor) {
        streak += 1;
        match cursor.pred_opt() {
            Some(prev) => cursor = prev,
            None => break,
        }
    }
    streak
}

/// Checks the attempt history (oldest first) for an adaptation trigger.
///
/// Every third consecutive failure asks for easier work. Every fifth
/// consecutive success asks for harder work, provided the recent success rate
/// is above [`SUCCESS_TRIGGER_RATE`] over at least [`SUCCESS_MIN_ATTEMPTS`]
/// attempts.
#[must_use]
pub fn detect_trigger(history: &[AttemptRow]) -> Option<AdaptationSignal> {
    let tail_failures = history.iter().rev().take_while(|a| !a.passed).count();
    if tail_failures > 0 && tail_failures % FAILURE_TRIGGER as usize == 0 {
        return Some(AdaptationSignal::LowerDifficulty {
            consecutive_failures: u32::try_from(tail_failures).unwrap_or(u32::MAX),
        });
    }

    let tail_successes = history.iter().rev().take_while(|a| a.passed).count();
    let recent = &history[history.len().saturating_sub(SUCCESS_WINDOW)..];
    if recent.len() < SUCCESS_MIN_ATTEMPTS
        || tail_successes == 0
        || tail_successes % SUCCESS_MIN_ATTEMPTS != 0
    {
        return None;
    }
    let rate = percent(recent.iter().filter(|a| a.passed).count(), recent.len());
    (rate > SUCCESS_TRIGGER_RATE).then_some(AdaptationSignal::RaiseDifficulty { success_rate: rate })
}

/// Folds one graded attempt into the learner's record for `task_id`.
pub(crate) async fn record_attempt(
    services: &Services,
    user_id: &str,
    task_id: &str,
    passed: bool,
    score: u8,
    at: DateTime<Utc>,
) -> Result<ProgressRecord> {
    let mut record = services
        .store
        .get_progress(user_id, task_id)
        .await?
        .unwrap_or_else(|| ProgressRecord::new(user_id, task_id));
    record.record_attempt(passed, score, at);
    services.store.save_progress(&record).await?;
    Ok(record)
}

/// Marks `task_id` as started.
///
/// # Errors
///
/// Returns `CoachError::NotFound` if the task does not belong to the user.
pub async fn start_task(services: &Services, user_id: &str, task_id: &str) -> Result<ProgressRecord> {
    services.store.get_task(user_id, task_id).await?;
    let mut record = services
        .store
        .get_progress(user_id, task_id)
        .await?
        .unwrap_or_else(|| ProgressRecord::new(user_id, task_id));
    record.start(Utc::now());
    services.store.save_progress(&record).await?;
    Ok(record)
}

/// Longest single session that can be reported for one task.
pub const MAX_SESSION_MINUTES: u32 = 24 * 60;

/// Marks `task_id` as completed, adding `minutes` (or the task estimate) to
/// the time spent.
///
/// # Errors
///
/// Returns `CoachError::Validation` if `minutes` is outside
/// `1..=MAX_SESSION_MINUTES`, and `CoachError::NotFound` if the task does
/// not belong to the user.
pub async fn complete_task(
    services: &Services,
    user_id: &str,
    task_id: &str,
    minutes: Option<u32>,
) -> Result<ProgressRecord> {
    if let Some(m) = minutes.filter(|m| !(1..=MAX_SESSION_MINUTES).contains(m)) {
        return Err(CoachError::validation(format!(
            "minutes must be between 1 and {MAX_SESSION_MINUTES}, got {m}"
        )));
    }
    let task = services.store.get_task(user_id, task_id).await?;
    let now = Utc::now();
    let mut record = services
        .store
        .get_progress(user_id, task_id)
        .await?
        .unwrap_or_else(|| ProgressRecord::new(user_id, task_id));
    record.start(now);
    if !record.completed {
        record.time_spent_minutes = record
            .time_spent_minutes
            .saturating_add(minutes.unwrap_or(task.estimated_minutes));
    }
    record.mark_completed(now);
    services.store.save_progress(&record).await?;
    info!(%task_id, "Task completed");
    Ok(record)
}

/// Computes statistics for `user_id` as of `now`.
///
/// # Errors
///
/// Returns `CoachError::Database` on store failure.
pub async fn compute_stats(services: &Services, user_id: &str, now: DateTime<Utc>) -> Result<ProgressStats> {
    let store = &services.store;
    let records = store.list_progress(user_id).await?;
    let history = store.attempt_history(user_id).await?;
    let plan_tasks = store
        .active_plan(user_id)
        .await?
        .map(|plan| plan.tasks().map(|t| t.id.clone()).collect::<Vec<_>>());

    let tasks_completed = match &plan_tasks {
        Some(ids) => records.iter().filter(|r| r.completed && ids.contains(&r.task_id)).count(),
        None => records.iter().filter(|r| r.completed).count(),
    };
    let tasks_total = plan_tasks.as_ref().map_or(records.len(), Vec::len);

    let mut days: BTreeSet<NaiveDate> = history.iter().map(|a| a.submitted_at.date_naive()).collect();
    days.extend(records.iter().filter_map(|r| r.completed_at).map(|t| t.date_naive()));

    let passed = history.iter().filter(|a| a.passed).count();
    let score_sum: usize = history.iter().map(|a| usize::from(a.score)).sum();
    let average_score = if history.is_empty() {
        0
    } else {
        u8::try_from(score_sum / history.len()).unwrap_or(100)
    };

    Ok(ProgressStats {
        streak_days: streak_days(&days, now.date_naive()),
        completion_rate: percent(tasks_completed, tasks_total),
        success_rate: percent(passed, history.len()),
        average_score,
        total_attempts: u32::try_from(history.len()).unwrap_or(u32::MAX),
        tasks_completed: u32::try_from(tasks_completed).unwrap_or(u32::MAX),
        tasks_total: u32::try_from(tasks_total).unwrap_or(u32::MAX),
        time_spent_minutes: records
            .iter()
            .fold(0u32, |total, r| total.saturating_add(r.time_spent_minutes)),
        adaptation: detect_trigger(&history),
        records,
    })
}

/// Days since `start`, never negative.
#[must_use]
pub fn days_since(start: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    u32::try_from((now - start).num_days().max(0)).unwrap_or(u32::MAX)
}

/// Reports learner progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressTrackerAgent;

#[async_trait]
impl Agent for ProgressTrackerAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::ProgressTracker
    }

    #[instrument(skip(self, ctx), fields(user_id = %ctx.user_id))]
    async fn process(&self, ctx: AgentContext) -> Result<AgentResult> {
        if ctx.request != AgentRequest::TrackProgress {
            return Err(unsupported(self.agent_type(), &ctx.request));
        }
        ctx.services.store.get_user(&ctx.user_id).await?;
        let stats = compute_stats(&ctx.services, &ctx.user_id, Utc::now()).await?;
        AgentResult::ok(&stats, Vec::new())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use coach_sandbox::Language;

    use super::*;
    use crate::agents::exercises::TEMPLATES;
    use crate::agents::testing;

    fn attempts(outcomes: &[bool]) -> Vec<AttemptRow> {
        outcomes
            .iter()
            .map(|&passed| AttemptRow {
                task_id: "t".into(),
                passed,
                score: if passed { 100 } else { 0 },
                submitted_at: Utc::now(),
            })
            .collect()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[test]
    fn three_consecutive_failures_lower_difficulty() {
        assert_eq!(detect_trigger(&attempts(&[true, false, false])), None);
        assert_eq!(
            detect_trigger(&attempts(&[true, false, false, false])),
            Some(AdaptationSignal::LowerDifficulty { consecutive_failures: 3 })
        );
        assert_eq!(detect_trigger(&attempts(&[false, false, false, false])), None);
    }

    #[test]
    fn sustained_success_raises_difficulty() {
        assert_eq!(detect_trigger(&attempts(&[true; 4])), None);
        assert_eq!(
            detect_trigger(&attempts(&[true; 5])),
            Some(AdaptationSignal::RaiseDifficulty { success_rate: 100 })
        );
        assert_eq!(detect_trigger(&attempts(&[true; 6])), None);
    }

    #[test]
    fn success_rate_must_exceed_threshold() {
        let mut history = vec![false, false];
        history.extend([true; 5]);
        assert_eq!(detect_trigger(&attempts(&history)), None);
    }

    #[test]
    fn streak_counts_back_from_today_or_yesterday() {
        let days: BTreeSet<_> = [day(1), day(2), day(3), day(5)].into_iter().collect();
        assert_eq!(streak_days(&days, day(5)), 1);
        assert_eq!(streak_days(&days, day(4)), 3);
        assert_eq!(streak_days(&days, day(7)), 0);
    }

    #[test]
    fn percent_handles_empty_totals() {
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(5, 5), 100);
    }

    #[tokio::test]
    async fn stats_reflect_completed_tasks() {
        let services = testing::offline();
        let user = testing::user(&services).await;
        for (i, template) in TEMPLATES.iter().take(2).enumerate() {
            let mut task = template.to_task("basics", 2, Language::Python);
            task.id = format!("t{i}");
            services.store.save_task(&user, &task).await.unwrap();
        }

        start_task(&services, &user, "t0").await.unwrap();
        complete_task(&services, &user, "t0", Some(30)).await.unwrap();
        complete_task(&services, &user, "t0", Some(30)).await.unwrap();
        start_task(&services, &user, "t1").await.unwrap();

        let ctx = testing::context(&services, &user, AgentRequest::TrackProgress);
        let result = ProgressTrackerAgent.process(ctx).await.unwrap();
        let stats: ProgressStats = serde_json::from_value(result.payload).unwrap();
        assert_eq!(stats.tasks_completed, 1);
        assert_eq!(stats.tasks_total, 2);
        assert_eq!(stats.completion_rate, 50);
        assert_eq!(stats.time_spent_minutes, 30);
        assert_eq!(stats.streak_days, 1);
        assert_eq!(stats.total_attempts, 0);
    }

    #[tokio::test]
    async fn out_of_range_minutes_are_rejected() {
        let services = testing::offline();
        let user = testing::user(&services).await;
        let mut task = TEMPLATES[0].to_task("basics", 2, Language::Python);
        task.id = "t0".into();
        services.store.save_task(&user, &task).await.unwrap();

        for minutes in [0, MAX_SESSION_MINUTES + 1, u32::MAX] {
            let err = complete_task(&services, &user, "t0", Some(minutes)).await.unwrap_err();
            assert_eq!(err.status_code(), 400, "minutes: {minutes}");
        }
        assert!(services.store.get_progress(&user, "t0").await.unwrap().is_none());
        let record = complete_task(&services, &user, "t0", Some(MAX_SESSION_MINUTES)).await.unwrap();
        assert_eq!(record.time_spent_minutes, MAX_SESSION_MINUTES);
    }

    #[tokio::test]
    async fn total_minutes_saturate() {
        let services = testing::offline();
        let user = testing::user(&services).await;
        for i in 0..2 {
            let mut task = TEMPLATES[0].to_task("basics", 2, Language::Python);
            task.id = format!("t{i}");
            services.store.save_task(&user, &task).await.unwrap();
            let mut record = ProgressRecord::new(&user, &task.id);
            record.time_spent_minutes = u32::MAX - 10;
            services.store.save_progress(&record).await.unwrap();
        }

        let stats = compute_stats(&services, &user, Utc::now()).await.unwrap();
        assert_eq!(stats.time_spent_minutes, u32::MAX);
    }

    #[tokio::test]
    async fn starting_someone_elses_task_is_not_found() {
        let services = testing::offline();
        let user = testing::user(&services).await;
        let err = start_task(&services, &user, "missing").await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }
}
