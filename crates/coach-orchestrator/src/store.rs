//! SQLite persistence.
//!
//! One connection guarded by a mutex; every call hops onto the blocking pool
//! with [`tokio::task::spawn_blocking`] so request tasks never block the
//! runtime. Structured entities (profiles, plans, tasks, evaluations) are
//! stored as JSON documents next to the relational columns the queries and
//! foreign keys need.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use coach_sandbox::ExecutionStatus;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{CoachError, Result};
use crate::models::{
    EvaluationResult, LearningPlan, PlanStatus, ProgressRecord, Submission, Task, User,
    UserProfile,
};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS profiles (
    user_id TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    archived INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (user_id) REFERENCES users(id)
);

CREATE TABLE IF NOT EXISTS plans (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    title TEXT NOT NULL,
    status TEXT NOT NULL CHECK(status IN ('draft', 'active', 'completed', 'archived')),
    data TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (user_id) REFERENCES users(id)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_plans_one_active
    ON plans(user_id) WHERE status = 'active';

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    plan_id TEXT,
    data TEXT NOT NULL,
    created_at TEXT NOT NULL,
    FOREIGN KEY (user_id) REFERENCES users(id),
    FOREIGN KEY (plan_id) REFERENCES plans(id)
);

CREATE TABLE IF NOT EXISTS submissions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    task_id TEXT NOT NULL,
    code TEXT NOT NULL,
    language TEXT NOT NULL,
    submitted_at TEXT NOT NULL,
    FOREIGN KEY (user_id) REFERENCES users(id),
    FOREIGN KEY (task_id) REFERENCES tasks(id)
);

CREATE TABLE IF NOT EXISTS evaluations (
    id TEXT PRIMARY KEY,
    submission_id TEXT NOT NULL UNIQUE,
    passed INTEGER NOT NULL,
    score INTEGER NOT NULL,
    executed INTEGER NOT NULL DEFAULT 1,
    data TEXT NOT NULL,
    evaluated_at TEXT NOT NULL,
    FOREIGN KEY (submission_id) REFERENCES submissions(id)
);

CREATE TABLE IF NOT EXISTS progress (
    user_id TEXT NOT NULL,
    task_id TEXT NOT NULL,
    data TEXT NOT NULL,
    completed INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (user_id, task_id),
    FOREIGN KEY (user_id) REFERENCES users(id),
    FOREIGN KEY (task_id) REFERENCES tasks(id)
);

CREATE INDEX IF NOT EXISTS idx_tasks_plan ON tasks(plan_id);
CREATE INDEX IF NOT EXISTS idx_submissions_user ON submissions(user_id, submitted_at);
CREATE INDEX IF NOT EXISTS idx_progress_user ON progress(user_id);
";

/// One graded attempt, as needed for statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRow {
    /// Task attempted.
    pub task_id: String,
    /// Whether every test passed.
    pub passed: bool,
    /// Score from 0 to 100.
    pub score: u8,
    /// Submission time.
    pub submitted_at: DateTime<Utc>,
}

/// Handle to the coach database. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Opens (or creates) the database at `path`; `:memory:` opens an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::Database` if the file cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = if path.as_os_str() == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        info!(path = %path.display(), "Opened database");
        Self::init(conn)
    }

    /// Creates a fresh in-memory database.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::Database` if the schema cannot be created.
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| CoachError::TaskJoin("database mutex poisoned".into()))?;
            f(&mut guard)
        })
        .await?
    }

    /// Cheap liveness probe.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::Database` if the connection is unusable.
    pub async fn ping(&self) -> Result<()> {
        self.call(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }

    // ========================================================================
    // Users
    // ========================================================================

    /// Registers a new user.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::Conflict` if the e-mail is already registered.
    pub async fn create_user(&self, email: &str, display_name: &str) -> Result<User> {
        let user = User {
            id: Uuid::new_v4().to_string(),
            email: email.trim().to_lowercase(),
            display_name: display_name.trim().to_string(),
            created_at: Utc::now(),
        };
        let row = user.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO users (id, email, display_name, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![row.id, row.email, row.display_name, row.created_at],
            )
            .map_err(|e| conflict_or(e, || format!("e-mail '{}' is already registered", row.email)))?;
            Ok(())
        })
        .await?;
        debug!(user_id = %user.id, "Created user");
        Ok(user)
    }

    /// Fetches a user by id.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::NotFound` for an unknown id.
    pub async fn get_user(&self, user_id: &str) -> Result<User> {
        let id = user_id.to_string();
        self.call(move |conn| {
            conn.query_row(
                "SELECT id, email, display_name, created_at FROM users WHERE id = ?1",
                params![id],
                user_from_row,
            )
            .optional()?
            .ok_or_else(|| CoachError::not_found("user", id))
        })
        .await
    }

    /// Every registered user, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::Database` on query failure.
    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.call(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, email, display_name, created_at FROM users ORDER BY created_at",
            )?;
            let users = stmt
                .query_map([], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(users)
        })
        .await
    }

    // ========================================================================
    // Profiles
    // ========================================================================

    /// Inserts or replaces a profile.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::Database` if the owning user does not exist.
    pub async fn save_profile(&self, profile: &UserProfile) -> Result<()> {
        let data = to_json(profile)?;
        let user_id = profile.user_id.clone();
        let archived = profile.archived;
        let updated_at = profile.updated_at;
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO profiles (user_id, data, archived, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id) DO UPDATE SET
                    data = excluded.data, archived = excluded.archived, updated_at = excluded.updated_at",
                params![user_id, data, archived, updated_at],
            )?;
            Ok(())
        })
        .await
    }

    /// Fetches a user's profile, if one exists.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::Database` or `CoachError::Json` on failure.
    pub async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let id = user_id.to_string();
        let data = self
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT data FROM profiles WHERE user_id = ?1",
                        params![id],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?)
            })
            .await?;
        data.map(|d| from_json(&d)).transpose()
    }

    // ========================================================================
    // Plans and tasks
    // ========================================================================

    /// Validates and saves a plan together with its tasks.
    ///
    /// Saving an active plan archives the user's previous active plan in the
    /// same transaction.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::Validation` if the plan breaks an invariant.
    pub async fn save_plan(&self, plan: &LearningPlan) -> Result<()> {
        plan.validate()?;
        let plan = plan.clone();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            if plan.status == PlanStatus::Active {
                let archived = tx.execute(
                    "UPDATE plans SET status = 'archived', updated_at = ?3
                     WHERE user_id = ?1 AND status = 'active' AND id != ?2",
                    params![plan.user_id, plan.id, Utc::now()],
                )?;
                if archived > 0 {
                    debug!(user_id = %plan.user_id, archived, "Archived previous active plan");
                }
            }
            tx.execute(
                "INSERT INTO plans (id, user_id, title, status, data, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title, status = excluded.status,
                    data = excluded.data, updated_at = excluded.updated_at",
                params![
                    plan.id,
                    plan.user_id,
                    plan.title,
                    plan.status.as_str(),
                    to_json(&plan)?,
                    plan.created_at,
                    plan.updated_at
                ],
            )?;
            for task in plan.tasks() {
                upsert_task(&tx, &plan.user_id, Some(&plan.id), task)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// The user's active plan, if any.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::Database` or `CoachError::Json` on failure.
    pub async fn active_plan(&self, user_id: &str) -> Result<Option<LearningPlan>> {
        let id = user_id.to_string();
        let data = self
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT data FROM plans WHERE user_id = ?1 AND status = 'active'",
                        params![id],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?)
            })
            .await?;
        data.map(|d| from_json(&d)).transpose()
    }

    /// Saves a standalone task owned by `user_id`.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::Database` if the user does not exist.
    pub async fn save_task(&self, user_id: &str, task: &Task) -> Result<()> {
        let user_id = user_id.to_string();
        let task = task.clone();
        self.call(move |conn| upsert_task(conn, &user_id, None, &task)).await
    }

    /// Fetches a task owned by `user_id`.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::NotFound` if the task does not exist or belongs to
    /// someone else.
    pub async fn get_task(&self, user_id: &str, task_id: &str) -> Result<Task> {
        let user_id = user_id.to_string();
        let task_id = task_id.to_string();
        let data = self
            .call(move |conn| {
                conn.query_row(
                    "SELECT data FROM tasks WHERE id = ?1 AND user_id = ?2",
                    params![task_id, user_id],
                    |row| row.get::<_, String>(0),
                )
                .optional()?
                .ok_or_else(|| CoachError::not_found("task", task_id))
            })
            .await?;
        from_json(&data)
    }

    // ========================================================================
    // Submissions and evaluations
    // ========================================================================

    /// Persists a submission and its evaluation atomically.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::Validation` if the evaluation does not reference
    /// the submission, and `CoachError::Conflict` if the submission was
    /// already evaluated. Nothing is written on error.
    pub async fn save_evaluated_submission(
        &self,
        submission: &Submission,
        evaluation: &EvaluationResult,
    ) -> Result<()> {
        if evaluation.submission_id != submission.id {
            return Err(CoachError::validation(
                "evaluation must reference the submission it is saved with",
            ));
        }
        let submission = submission.clone();
        let evaluation = evaluation.clone();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO submissions (id, user_id, task_id, code, language, submitted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    submission.id,
                    submission.user_id,
                    submission.task_id,
                    submission.code,
                    submission.language.to_string(),
                    submission.submitted_at
                ],
            )
            .map_err(|e| conflict_or(e, || format!("submission '{}' already exists", submission.id)))?;
            tx.execute(
                "INSERT INTO evaluations
                    (id, submission_id, passed, score, executed, data, evaluated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    evaluation.id,
                    evaluation.submission_id,
                    evaluation.passed,
                    evaluation.score,
                    evaluation.execution_status != ExecutionStatus::NotExecuted,
                    to_json(&evaluation)?,
                    evaluation.evaluated_at
                ],
            )
            .map_err(|e| {
                conflict_or(e, || {
                    format!("submission '{}' already has an evaluation", evaluation.submission_id)
                })
            })?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Fetches a submission owned by `user_id` with its evaluation.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::NotFound` if the submission does not exist or
    /// belongs to someone else.
    pub async fn get_submission(
        &self,
        user_id: &str,
        submission_id: &str,
    ) -> Result<(Submission, Option<EvaluationResult>)> {
        let user_id = user_id.to_string();
        let submission_id = submission_id.to_string();
        let (submission, evaluation) = self
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT s.id, s.user_id, s.task_id, s.code, s.language, s.submitted_at, e.data
                         FROM submissions s LEFT JOIN evaluations e ON e.submission_id = s.id
                         WHERE s.id = ?1 AND s.user_id = ?2",
                        params![submission_id, user_id],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, String>(2)?,
                                row.get::<_, String>(3)?,
                                row.get::<_, String>(4)?,
                                row.get::<_, DateTime<Utc>>(5)?,
                                row.get::<_, Option<String>>(6)?,
                            ))
                        },
                    )
                    .optional()?
                    .ok_or_else(|| CoachError::not_found("submission", submission_id))?;
                Ok(row)
            })
            .await
            .map(|(id, user_id, task_id, code, language, submitted_at, data)| {
                let language = coach_sandbox::Language::parse(&language).unwrap_or_default();
                (
                    Submission {
                        id,
                        user_id,
                        task_id,
                        code,
                        language,
                        submitted_at,
                    },
                    data,
                )
            })?;
        let evaluation = evaluation.map(|d| from_json(&d)).transpose()?;
        Ok((submission, evaluation))
    }

    /// Every attempt by `user_id` that actually ran, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::Database` on query failure.
    pub async fn attempt_history(&self, user_id: &str) -> Result<Vec<AttemptRow>> {
        let user_id = user_id.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT s.task_id, e.passed, e.score, s.submitted_at
                 FROM submissions s JOIN evaluations e ON e.submission_id = s.id
                 WHERE s.user_id = ?1 AND e.executed = 1 ORDER BY s.submitted_at",
            )?;
            let rows = stmt
                .query_map(params![user_id], |row| {
                    Ok(AttemptRow {
                        task_id: row.get(0)?,
                        passed: row.get(1)?,
                        score: row.get(2)?,
                        submitted_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    // ========================================================================
    // Progress
    // ========================================================================

    /// Fetches the progress record for one task.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::Database` or `CoachError::Json` on failure.
    pub async fn get_progress(&self, user_id: &str, task_id: &str) -> Result<Option<ProgressRecord>> {
        let user_id = user_id.to_string();
        let task_id = task_id.to_string();
        let data = self
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT data FROM progress WHERE user_id = ?1 AND task_id = ?2",
                        params![user_id, task_id],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?)
            })
            .await?;
        data.map(|d| from_json(&d)).transpose()
    }

    /// Inserts or replaces a progress record.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::Database` if the user or task does not exist.
    pub async fn save_progress(&self, record: &ProgressRecord) -> Result<()> {
        let data = to_json(record)?;
        let record = record.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO progress (user_id, task_id, data, completed, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id, task_id) DO UPDATE SET
                    data = excluded.data, completed = excluded.completed, updated_at = excluded.updated_at",
                params![record.user_id, record.task_id, data, record.completed, Utc::now()],
            )?;
            Ok(())
        })
        .await
    }

    /// Every progress record for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::Database` or `CoachError::Json` on failure.
    pub async fn list_progress(&self, user_id: &str) -> Result<Vec<ProgressRecord>> {
        let user_id = user_id.to_string();
        let rows = self
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT data FROM progress WHERE user_id = ?1 ORDER BY updated_at")?;
                let rows = stmt
                    .query_map(params![user_id], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        rows.iter().map(|d| from_json(d)).collect()
    }
}

fn upsert_task(conn: &Connection, user_id: &str, plan_id: Option<&str>, task: &Task) -> Result<()> {
    conn.execute(
        "INSERT INTO tasks (id, user_id, plan_id, data, created_at) VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET data = excluded.data, plan_id = excluded.plan_id",
        params![task.id, user_id, plan_id, to_json(task)?, task.created_at],
    )?;
    Ok(())
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn from_json<T: DeserializeOwned>(data: &str) -> Result<T> {
    Ok(serde_json::from_str(data)?)
}

/// Maps unique-constraint failures to `Conflict`, everything else to `Database`.
fn conflict_or(err: rusqlite::Error, message: impl FnOnce() -> String) -> CoachError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY) =>
        {
            CoachError::conflict(message())
        }
        _ => CoachError::Database(err),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use coach_sandbox::{Language, TestCase};
    use serde_json::json;

    use super::*;
    use crate::models::{Module, SkillLevel, TaskType};

    fn task(id: &str) -> Task {
        Task {
            id: id.into(),
            module_id: Some("m1".into()),
            title: "Double it".into(),
            task_type: TaskType::Code,
            difficulty: 2,
            topic: "functions".into(),
            language: Language::Python,
            instructions: "Return x * 2".into(),
            starter_code: "def solution(x):\n    pass\n".into(),
            test_cases: vec![TestCase::new("", json!(2), json!(4))],
            hints: vec!["Use *".into()],
            solution: "def solution(x):\n    return x * 2\n".into(),
            estimated_minutes: 10,
            resources: Vec::new(),
            day_offset: Some(0),
            created_at: Utc::now(),
        }
    }

    fn plan(user_id: &str, id: &str, status: PlanStatus) -> LearningPlan {
        LearningPlan {
            id: id.into(),
            user_id: user_id.into(),
            title: "Python".into(),
            status,
            modules: vec![Module {
                id: "m1".into(),
                title: "Functions".into(),
                summary: String::new(),
                order: 1,
                prerequisites: Vec::new(),
                tasks: vec![task(&format!("{id}-t1"))],
                review_checkpoints: Vec::new(),
            }],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn evaluation(id: &str, submission_id: &str, passed: bool) -> EvaluationResult {
        EvaluationResult {
            id: id.into(),
            submission_id: submission_id.into(),
            passed,
            score: if passed { 100 } else { 0 },
            test_results: Vec::new(),
            feedback: "Nice work.".into(),
            quality_issues: Vec::new(),
            execution_status: ExecutionStatus::Completed,
            violations: Vec::new(),
            warnings: Vec::new(),
            evaluated_at: Utc::now(),
        }
    }

    fn submission(id: &str, user_id: &str, task_id: &str) -> Submission {
        Submission {
            id: id.into(),
            user_id: user_id.into(),
            task_id: task_id.into(),
            code: "def solution(x): return x*2".into(),
            language: Language::Python,
            submitted_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let store = Store::in_memory().unwrap();
        store.create_user("Ada@example.com", "Ada").await.unwrap();
        let err = store.create_user("ada@example.com", "Ada 2").await.unwrap_err();
        assert!(matches!(err, CoachError::Conflict { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn profile_round_trips_field_for_field() {
        let store = Store::in_memory().unwrap();
        let user = store.create_user("ada@example.com", "Ada").await.unwrap();

        let mut profile = UserProfile::new(&user.id);
        profile.skill_level = SkillLevel::Intermediate;
        profile.goals = vec!["Learn async Python".into(), "Build an API".into()];
        profile.time_constraints.hours_per_week = 7;
        profile.time_constraints.available_days = vec!["mon".into(), "thu".into()];
        profile.preferred_language = Language::JavaScript;
        profile.timeframe_weeks = Some(12);

        store.save_profile(&profile).await.unwrap();
        let loaded = store.get_profile(&user.id).await.unwrap().unwrap();
        assert_eq!(loaded, profile);
    }

    #[tokio::test]
    async fn activating_a_plan_archives_the_previous_one() {
        let store = Store::in_memory().unwrap();
        let user = store.create_user("ada@example.com", "Ada").await.unwrap();

        store.save_plan(&plan(&user.id, "p1", PlanStatus::Active)).await.unwrap();
        store.save_plan(&plan(&user.id, "p2", PlanStatus::Active)).await.unwrap();

        let active = store.active_plan(&user.id).await.unwrap().unwrap();
        assert_eq!(active.id, "p2");
        assert!(store.get_task(&user.id, "p1-t1").await.is_ok());
    }

    #[tokio::test]
    async fn invalid_plan_is_not_written() {
        let store = Store::in_memory().unwrap();
        let user = store.create_user("ada@example.com", "Ada").await.unwrap();
        let mut bad = plan(&user.id, "p1", PlanStatus::Active);
        bad.modules[0].prerequisites = vec!["m1".into()];

        assert!(matches!(
            store.save_plan(&bad).await.unwrap_err(),
            CoachError::Validation { .. }
        ));
        assert!(store.active_plan(&user.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tasks_are_scoped_to_their_owner() {
        let store = Store::in_memory().unwrap();
        let ada = store.create_user("ada@example.com", "Ada").await.unwrap();
        let bob = store.create_user("bob@example.com", "Bob").await.unwrap();
        store.save_task(&ada.id, &task("t1")).await.unwrap();

        assert!(store.get_task(&ada.id, "t1").await.is_ok());
        assert!(matches!(
            store.get_task(&bob.id, "t1").await.unwrap_err(),
            CoachError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn submission_and_evaluation_are_saved_together() {
        let store = Store::in_memory().unwrap();
        let user = store.create_user("ada@example.com", "Ada").await.unwrap();
        store.save_task(&user.id, &task("t1")).await.unwrap();

        let sub = submission("s1", &user.id, "t1");
        store
            .save_evaluated_submission(&sub, &evaluation("e1", "s1", true))
            .await
            .unwrap();

        let (loaded, eval) = store.get_submission(&user.id, "s1").await.unwrap();
        assert_eq!(loaded.code, sub.code);
        assert_eq!(eval.unwrap().score, 100);

        let history = store.attempt_history(&user.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].passed);
    }

    #[tokio::test]
    async fn failed_evaluation_insert_rolls_back_submission() {
        let store = Store::in_memory().unwrap();
        let user = store.create_user("ada@example.com", "Ada").await.unwrap();
        store.save_task(&user.id, &task("t1")).await.unwrap();
        store
            .save_evaluated_submission(&submission("s1", &user.id, "t1"), &evaluation("e1", "s1", true))
            .await
            .unwrap();

        // Same evaluation id collides after the submission insert succeeded.
        let err = store
            .save_evaluated_submission(&submission("s2", &user.id, "t1"), &evaluation("e1", "s2", false))
            .await
            .unwrap_err();
        assert!(matches!(err, CoachError::Conflict { .. }), "got {err:?}");
        assert!(store.get_submission(&user.id, "s2").await.is_err());
    }

    #[tokio::test]
    async fn submission_for_unknown_task_is_rejected() {
        let store = Store::in_memory().unwrap();
        let user = store.create_user("ada@example.com", "Ada").await.unwrap();
        let result = store
            .save_evaluated_submission(&submission("s1", &user.id, "ghost"), &evaluation("e1", "s1", true))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn mismatched_evaluation_is_rejected() {
        let store = Store::in_memory().unwrap();
        let err = store
            .save_evaluated_submission(&submission("s1", "u", "t"), &evaluation("e1", "other", true))
            .await
            .unwrap_err();
        assert!(matches!(err, CoachError::Validation { .. }));
    }

    #[tokio::test]
    async fn progress_upserts() {
        let store = Store::in_memory().unwrap();
        let user = store.create_user("ada@example.com", "Ada").await.unwrap();
        store.save_task(&user.id, &task("t1")).await.unwrap();

        let mut record = ProgressRecord::new(&user.id, "t1");
        record.record_attempt(false, 0, Utc::now());
        store.save_progress(&record).await.unwrap();
        record.record_attempt(true, 100, Utc::now());
        store.save_progress(&record).await.unwrap();

        let loaded = store.get_progress(&user.id, "t1").await.unwrap().unwrap();
        assert_eq!(loaded.attempts, 2);
        assert!(loaded.completed);
        assert_eq!(store.list_progress(&user.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn file_database_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coach.db");
        {
            let store = Store::open(&path).unwrap();
            store.create_user("ada@example.com", "Ada").await.unwrap();
        }
        let store = Store::open(&path).unwrap();
        assert_eq!(store.list_users().await.unwrap().len(), 1);
        store.ping().await.unwrap();
    }
}
