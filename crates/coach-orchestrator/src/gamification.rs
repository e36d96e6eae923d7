//! Experience points, levels, badges and the leaderboard.
//!
//! Everything here is derived from stored progress; nothing is persisted.
//! Level `n` needs `XP_PER_LEVEL * (n - 1)^2` points, so each level takes
//! longer than the last.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::agents::progress::compute_stats;
use crate::agents::Services;
use crate::error::{CoachError, Result};
use crate::models::{ProgressRecord, Task, TaskType};

const XP_PER_COMPLETION: u32 = 25;
const XP_PER_DIFFICULTY: u32 = 5;
const XP_FIRST_TRY_BONUS: u32 = 10;
const XP_PER_LEVEL: u32 = 50;
const MAX_LEVEL: u32 = 999;

/// Achievement shown on the learner's profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Badge {
    /// Completed a first task.
    FirstSteps,
    /// Practised three days in a row.
    OnARoll,
    /// Practised seven days in a row.
    WeekWarrior,
    /// Scored 100 on a graded task.
    Perfectionist,
    /// Completed a task after three or more attempts.
    Persistent,
    /// Completed a mini-project.
    ProjectBuilder,
    /// Earned 1000 XP.
    Centurion,
}

/// Gamification view for one learner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GamificationSummary {
    /// Total experience points.
    pub xp: u32,
    /// Current level, starting at 1.
    pub level: u32,
    /// XP at which the next level starts.
    pub next_level_xp: u32,
    /// Earned badges.
    pub badges: Vec<Badge>,
    /// Current streak in days.
    pub streak_days: u32,
    /// Completed tasks.
    pub tasks_completed: u32,
}

/// One leaderboard row. Only the display name is exposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    /// 1-based rank.
    pub rank: u32,
    /// Learner id.
    pub user_id: String,
    /// Public name.
    pub display_name: String,
    /// Total experience points.
    pub xp: u32,
    /// Current level.
    pub level: u32,
    /// Current streak in days.
    pub streak_days: u32,
}

/// Level reached with `xp` points.
#[must_use]
pub fn level_for(xp: u32) -> u32 {
    let mut level = 1;
    while level < MAX_LEVEL && xp >= threshold(level + 1) {
        level += 1;
    }
    level
}

/// XP at which `level` starts.
#[must_use]
pub const fn threshold(level: u32) -> u32 {
    let n = level.saturating_sub(1);
    XP_PER_LEVEL.saturating_mul(n.saturating_mul(n))
}

/// XP earned for one record; `task` is `None` when the task is gone.
#[must_use]
pub fn xp_for(record: &ProgressRecord, task: Option<&Task>) -> u32 {
    let mut xp = u32::from(record.best_score) / 10;
    if record.completed {
        let difficulty = task.map_or(1, |t| u32::from(t.difficulty));
        xp += XP_PER_COMPLETION + XP_PER_DIFFICULTY * difficulty;
        if record.attempts == 1 {
            xp += XP_FIRST_TRY_BONUS;
        }
    }
    xp
}

/// Badges earned from `records` (paired with their tasks), streak and XP.
#[must_use]
pub fn badges_for(records: &[(ProgressRecord, Option<Task>)], streak_days: u32, xp: u32) -> Vec<Badge> {
    let mut badges = Vec::new();
    let completed = || records.iter().filter(|(r, _)| r.completed);
    if completed().next().is_some() {
        badges.push(Badge::FirstSteps);
    }
    if streak_days >= 3 {
        badges.push(Badge::OnARoll);
    }
    if streak_days >= 7 {
        badges.push(Badge::WeekWarrior);
    }
    if records.iter().any(|(r, _)| r.best_score == 100 && r.attempts > 0) {
        badges.push(Badge::Perfectionist);
    }
    if completed().any(|(r, _)| r.attempts >= 3) {
        badges.push(Badge::Persistent);
    }
    if completed().any(|(_, t)| t.as_ref().is_some_and(|t| t.task_type == TaskType::Project)) {
        badges.push(Badge::ProjectBuilder);
    }
    if xp >= 1000 {
        badges.push(Badge::Centurion);
    }
    badges
}

/// XP, level, badges and streak for `user_id`.
///
/// # Errors
///
/// Returns store errors.
#[instrument(skip(services))]
pub async fn summary(services: &Services, user_id: &str, now: DateTime<Utc>) -> Result<GamificationSummary> {
    let stats = compute_stats(services, user_id, now).await?;
    let mut paired = Vec::with_capacity(stats.records.len());
    for record in stats.records {
        let task = match services.store.get_task(user_id, &record.task_id).await {
            Ok(task) => Some(task),
            Err(CoachError::NotFound { .. }) => None,
            Err(e) => return Err(e),
        };
        paired.push((record, task));
    }

    let xp = paired.iter().map(|(r, t)| xp_for(r, t.as_ref())).sum();
    let level = level_for(xp);
    Ok(GamificationSummary {
        xp,
        level,
        next_level_xp: threshold(level + 1),
        badges: badges_for(&paired, stats.streak_days, xp),
        streak_days: stats.streak_days,
        tasks_completed: u32::try_from(paired.iter().filter(|(r, _)| r.completed).count())
            .unwrap_or(u32::MAX),
    })
}

/// Learners ranked by XP, ties broken by name. At most `limit` rows.
///
/// # Errors
///
/// Returns store errors.
#[instrument(skip(services))]
pub async fn leaderboard(services: &Services, now: DateTime<Utc>, limit: usize) -> Result<Vec<LeaderboardEntry>> {
    let users = services.store.list_users().await?;
    let mut rows = Vec::with_capacity(users.len());
    for user in users {
        let summary = summary(services, &user.id, now).await?;
        rows.push((user, summary));
    }
    rows.sort_by(|(a_user, a), (b_user, b)| {
        b.xp.cmp(&a.xp)
            .then_with(|| a_user.display_name.cmp(&b_user.display_name))
    });

    Ok(rows
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(i, (user, summary))| LeaderboardEntry {
            rank: u32::try_from(i + 1).unwrap_or(u32::MAX),
            user_id: user.id,
            display_name: user.display_name,
            xp: summary.xp,
            level: summary.level,
            streak_days: summary.streak_days,
        })
        .collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use coach_sandbox::Language;

    use super::*;
    use crate::agents::exercises::pick_template;
    use crate::agents::progress::complete_task;
    use crate::agents::testing;

    #[test]
    fn levels_grow_quadratically() {
        assert_eq!(level_for(0), 1);
        assert_eq!(level_for(49), 1);
        assert_eq!(level_for(50), 2);
        assert_eq!(level_for(199), 2);
        assert_eq!(level_for(200), 3);
        assert_eq!(threshold(4) - threshold(3), 250);
    }

    #[test]
    fn first_try_completion_earns_bonus() {
        let task = pick_template("sum", 1, false, &[]).to_task("basics", 4, Language::Python);
        let mut record = ProgressRecord::new("u", &task.id);
        record.record_attempt(true, 100, Utc::now());
        assert_eq!(xp_for(&record, Some(&task)), 10 + 25 + 20 + 10);

        let mut retried = ProgressRecord::new("u", &task.id);
        retried.record_attempt(false, 40, Utc::now());
        retried.record_attempt(true, 100, Utc::now());
        assert_eq!(xp_for(&retried, Some(&task)), 10 + 25 + 20);
    }

    #[test]
    fn badges_follow_records() {
        let project = pick_template("project", 6, true, &[]).to_task("capstone", 6, Language::Python);
        let mut record = ProgressRecord::new("u", &project.id);
        for passed in [false, false, true] {
            record.record_attempt(passed, if passed { 100 } else { 0 }, Utc::now());
        }
        let badges = badges_for(&[(record, Some(project))], 7, 1200);
        assert_eq!(
            badges,
            vec![
                Badge::FirstSteps,
                Badge::OnARoll,
                Badge::WeekWarrior,
                Badge::Perfectionist,
                Badge::Persistent,
                Badge::ProjectBuilder,
                Badge::Centurion
            ]
        );
        assert!(badges_for(&[], 0, 0).is_empty());
    }

    #[tokio::test]
    async fn leaderboard_ranks_by_xp() {
        let services = testing::offline();
        let ada = services.store.create_user("ada@example.com", "Ada").await.unwrap();
        let bob = services.store.create_user("bob@example.com", "Bob").await.unwrap();
        let task = pick_template("sum", 1, false, &[]).to_task("basics", 1, Language::Python);
        services.store.save_task(&bob.id, &task).await.unwrap();
        complete_task(&services, &bob.id, &task.id, None).await.unwrap();

        let board = leaderboard(&services, Utc::now(), 10).await.unwrap();
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].user_id, bob.id);
        assert_eq!(board[0].rank, 1);
        assert!(board[0].xp > 0);
        assert_eq!(board[1].user_id, ada.id);
        assert_eq!(board[1].xp, 0);

        let summary = summary(&services, &bob.id, Utc::now()).await.unwrap();
        assert_eq!(summary.tasks_completed, 1);
        assert!(summary.badges.contains(&Badge::FirstSteps));
        assert_eq!(summary.streak_days, 1);
    }
}
