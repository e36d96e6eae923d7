//! HTTP API for the learning coach.
//!
//! Every route under `/api/v1` except `/auth/register` requires an
//! `Authorization: Bearer <token>` header. Agent-backed routes go through the
//! [`Orchestrator`], so they share its circuit breakers and degraded
//! responses; a degraded response is returned as `503` with a `Retry-After`
//! header when the breaker is open.
//!
//! # Endpoints
//!
//! - `POST /api/v1/auth/register` - Create a learner and issue a token
//! - `POST /api/v1/goals` - Assess goals and skill level from free text
//! - `GET /api/v1/profile` - Current profile
//! - `POST /api/v1/curriculum`, `GET /api/v1/curriculum` - Generate or fetch the active plan
//! - `GET /api/v1/tasks/today` - Tasks due today
//! - `GET /api/v1/tasks/:id`, `POST /api/v1/tasks/:id/start`, `POST /api/v1/tasks/:id/complete`
//! - `POST /api/v1/exercises` - Generate a standalone exercise
//! - `POST /api/v1/submissions`, `GET /api/v1/submissions/:id`
//! - `GET /api/v1/progress` - Progress statistics
//! - `GET /api/v1/resources?topic=` - Ranked resources
//! - `POST /api/v1/orchestrate` - Free-form message routed by intent
//! - `GET /api/v1/gamification/summary` - XP, level, badges and streak
//! - `GET /api/v1/social/leaderboard` - Learners ranked by XP
//! - `GET /api/v1/analytics/report?format=markdown|json` - Progress report
//! - `GET /health/live`, `GET /health/detailed`

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use axum::{
    extract::{FromRef, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use coach_report::ReportFormat;
use coach_sandbox::{Language, Violation};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::agents::curriculum::due_tasks;
use crate::agents::progress::{complete_task, days_since, start_task};
use crate::agents::AgentRequest;
use crate::analytics::learner_report;
use crate::auth::{AuthUser, JwtKeys};
use crate::breaker::BreakerSnapshot;
use crate::config::Config;
use crate::error::CoachError;
use crate::gamification::{self, GamificationSummary, LeaderboardEntry};
use crate::models::{EvaluationResult, LearningPlan, ProgressRecord, Submission, Task, TaskType, User, UserProfile};
use crate::router::{Orchestrator, OrchestratorResponse};

/// Header clients may set to correlate requests of one session.
pub const SESSION_HEADER: &str = "x-session-id";

const DEFAULT_LEADERBOARD_SIZE: usize = 10;
const MAX_LEADERBOARD_SIZE: usize = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Body of `POST /auth/register`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    /// Unique e-mail address.
    pub email: String,
    /// Public name.
    pub display_name: String,
}

/// Response of `POST /auth/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    /// The new learner.
    pub user: User,
    /// Bearer token.
    pub token: String,
    /// Token expiry.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Body of free-text endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    /// What the learner wrote.
    pub message: String,
}

/// Body of `POST /curriculum`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurriculumRequest {
    /// Focus topic; defaults to the first goal.
    #[serde(default)]
    pub topic: Option<String>,
}

/// Body of `POST /exercises`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseRequest {
    /// Exercise topic.
    pub topic: String,
    /// Difficulty from 1 to 10.
    #[serde(default)]
    pub difficulty: Option<u8>,
    /// Language; defaults to the profile preference.
    #[serde(default)]
    pub language: Option<Language>,
    /// Task type; defaults to `code`.
    #[serde(default)]
    pub task_type: Option<TaskType>,
}

/// Body of `POST /submissions`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRequest {
    /// Task answered.
    pub task_id: String,
    /// Learner code.
    pub code: String,
    /// Language; defaults to the task language.
    #[serde(default)]
    pub language: Option<Language>,
}

/// Body of `POST /tasks/:id/complete`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    /// Minutes spent; defaults to the task estimate.
    #[serde(default)]
    pub minutes: Option<u32>,
}

/// Response of `GET /tasks/today`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodayResponse {
    /// Plan the tasks belong to.
    pub plan_id: String,
    /// Days since the plan was created.
    pub day: u32,
    /// Tasks due and not yet completed.
    pub tasks: Vec<Task>,
}

/// Response of `GET /submissions/:id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResponse {
    /// The submission.
    pub submission: Submission,
    /// Its evaluation.
    pub evaluation: Option<EvaluationResult>,
}

/// Query of `GET /resources`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourcesQuery {
    /// Topic to search.
    pub topic: Option<String>,
    /// Maximum number of results.
    pub limit: Option<usize>,
}

/// Query of `GET /social/leaderboard`.
#[derive(Debug, Clone, Deserialize)]
pub struct LeaderboardQuery {
    /// Number of rows.
    pub limit: Option<usize>,
}

/// Query of `GET /analytics/report`.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportQuery {
    /// `json` (default) or `markdown`.
    pub format: Option<String>,
}

/// Response of `GET /health/detailed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// `ok` or `degraded`.
    pub status: String,
    /// Whether the database answered.
    pub database: bool,
    /// Code runner backend.
    pub sandbox_backend: String,
    /// Whether the backend can run code.
    pub sandbox_available: bool,
    /// Configured LLM client.
    pub llm: String,
    /// Breaker state per agent.
    pub breakers: BTreeMap<String, BreakerSnapshot>,
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
    /// Security findings for refused code.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<Violation>,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for the HTTP server.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,
    /// Agent router.
    pub orchestrator: Arc<Orchestrator>,
    /// Token keys.
    pub keys: JwtKeys,
}

impl AppState {
    /// Creates the state.
    #[must_use]
    pub fn new(config: Config, orchestrator: Orchestrator, keys: JwtKeys) -> Self {
        Self {
            config,
            orchestrator: Arc::new(orchestrator),
            keys,
        }
    }
}

impl FromRef<Arc<AppState>> for JwtKeys {
    fn from_ref(state: &Arc<AppState>) -> Self {
        state.keys.clone()
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// A [`CoachError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub CoachError);

impl From<CoachError> for ApiError {
    fn from(err: CoachError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        } else {
            warn!(status = status.as_u16(), error = %self.0, "Request rejected");
        }

        let violations = match &self.0 {
            CoachError::SecurityViolation { violations, .. } => violations.clone(),
            _ => Vec::new(),
        };
        let body = Json(ErrorResponse {
            error: self.0.to_string(),
            violations,
        });
        (status, body).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with every endpoint, request tracing and CORS.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    let api_routes = Router::new()
        .route("/auth/register", post(handle_register))
        .route("/goals", post(handle_goals))
        .route("/profile", get(handle_profile))
        .route("/curriculum", post(handle_generate_curriculum).get(handle_curriculum))
        .route("/tasks/today", get(handle_today))
        .route("/tasks/:id", get(handle_task))
        .route("/tasks/:id/start", post(handle_start_task))
        .route("/tasks/:id/complete", post(handle_complete_task))
        .route("/exercises", post(handle_exercise))
        .route("/submissions", post(handle_submit))
        .route("/submissions/:id", get(handle_submission))
        .route("/progress", get(handle_progress))
        .route("/resources", get(handle_resources))
        .route("/orchestrate", post(handle_orchestrate))
        .route("/gamification/summary", get(handle_gamification))
        .route("/social/leaderboard", get(handle_leaderboard))
        .route("/analytics/report", get(handle_report));

    let health_routes = Router::new()
        .route("/live", get(handle_live))
        .route("/detailed", get(handle_detailed));

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/health", health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

fn cors_layer(config: &Config) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if config.cors_allows_any() {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

fn session_id(headers: &HeaderMap) -> String {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_string)
}

/// `200` for a served request, `503` (plus `Retry-After`) for a degraded one.
fn agent_response(response: OrchestratorResponse) -> Response {
    if response.message.is_none() {
        return (StatusCode::OK, Json(response)).into_response();
    }
    let mut headers = HeaderMap::new();
    if let Some(secs) = response.retry_after_secs {
        headers.insert(header::RETRY_AFTER, HeaderValue::from(secs));
    }
    (StatusCode::SERVICE_UNAVAILABLE, headers, Json(response)).into_response()
}

async fn dispatch(state: &AppState, user: &AuthUser, headers: &HeaderMap, request: AgentRequest) -> ApiResult<Response> {
    let response = state
        .orchestrator
        .dispatch(&user.user_id, &session_id(headers), request)
        .await?;
    Ok(agent_response(response))
}

// ============================================================================
// Handlers
// ============================================================================

async fn handle_register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<RegisterResponse>)> {
    let email = request.email.trim();
    let display_name = request.display_name.trim();
    if !email.contains('@') || email.len() < 3 {
        return Err(CoachError::validation("email must be a valid address").into());
    }
    if display_name.is_empty() {
        return Err(CoachError::validation("displayName must not be empty").into());
    }

    let user = state
        .orchestrator
        .services()
        .store
        .create_user(email, display_name)
        .await?;
    let token = state.keys.issue(&user.id)?;
    let expires_at = state.keys.verify(&token)?.expires_at();
    info!(user_id = %user.id, "Learner registered");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user,
            token,
            expires_at,
        }),
    ))
}

async fn handle_goals(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    headers: HeaderMap,
    Json(request): Json<MessageRequest>,
) -> ApiResult<Response> {
    let request = AgentRequest::AssessSkill {
        message: request.message,
    };
    dispatch(&state, &user, &headers, request).await
}

async fn handle_profile(State(state): State<Arc<AppState>>, user: AuthUser) -> ApiResult<Json<UserProfile>> {
    let profile = state
        .orchestrator
        .services()
        .store
        .get_profile(&user.user_id)
        .await?
        .ok_or_else(|| CoachError::not_found("profile", &user.user_id))?;
    Ok(Json(profile))
}

async fn handle_generate_curriculum(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    headers: HeaderMap,
    body: Option<Json<CurriculumRequest>>,
) -> ApiResult<Response> {
    let topic = body.and_then(|Json(b)| b.topic);
    dispatch(&state, &user, &headers, AgentRequest::GenerateCurriculum { topic }).await
}

async fn active_plan(state: &AppState, user_id: &str) -> ApiResult<LearningPlan> {
    let plan = state
        .orchestrator
        .services()
        .store
        .active_plan(user_id)
        .await?
        .ok_or_else(|| CoachError::not_found("active plan", user_id))?;
    Ok(plan)
}

async fn handle_curriculum(State(state): State<Arc<AppState>>, user: AuthUser) -> ApiResult<Json<LearningPlan>> {
    Ok(Json(active_plan(&state, &user.user_id).await?))
}

async fn handle_today(State(state): State<Arc<AppState>>, user: AuthUser) -> ApiResult<Json<TodayResponse>> {
    let plan = active_plan(&state, &user.user_id).await?;
    let completed: HashSet<String> = state
        .orchestrator
        .services()
        .store
        .list_progress(&user.user_id)
        .await?
        .into_iter()
        .filter(|r| r.completed)
        .map(|r| r.task_id)
        .collect();
    let day = days_since(plan.created_at, Utc::now());
    let tasks = due_tasks(&plan, day, &completed).into_iter().cloned().collect();
    Ok(Json(TodayResponse {
        plan_id: plan.id.clone(),
        day,
        tasks,
    }))
}

async fn handle_task(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(task_id): Path<String>,
) -> ApiResult<Json<Task>> {
    let task = state
        .orchestrator
        .services()
        .store
        .get_task(&user.user_id, &task_id)
        .await?;
    Ok(Json(task))
}

async fn handle_start_task(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(task_id): Path<String>,
) -> ApiResult<Json<ProgressRecord>> {
    let record = start_task(state.orchestrator.services(), &user.user_id, &task_id).await?;
    Ok(Json(record))
}

async fn handle_complete_task(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(task_id): Path<String>,
    body: Option<Json<CompleteRequest>>,
) -> ApiResult<Json<ProgressRecord>> {
    let minutes = body.and_then(|Json(b)| b.minutes);
    let record = complete_task(state.orchestrator.services(), &user.user_id, &task_id, minutes).await?;
    Ok(Json(record))
}

async fn handle_exercise(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    headers: HeaderMap,
    Json(request): Json<ExerciseRequest>,
) -> ApiResult<Response> {
    let request = AgentRequest::GenerateExercise {
        topic: request.topic,
        difficulty: request.difficulty,
        language: request.language,
        task_type: request.task_type,
    };
    dispatch(&state, &user, &headers, request).await
}

async fn handle_submit(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    headers: HeaderMap,
    Json(request): Json<SubmissionRequest>,
) -> ApiResult<Response> {
    let request = AgentRequest::ReviewSubmission {
        task_id: request.task_id,
        code: request.code,
        language: request.language,
    };
    dispatch(&state, &user, &headers, request).await
}

async fn handle_submission(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(submission_id): Path<String>,
) -> ApiResult<Json<SubmissionResponse>> {
    let (submission, evaluation) = state
        .orchestrator
        .services()
        .store
        .get_submission(&user.user_id, &submission_id)
        .await?;
    Ok(Json(SubmissionResponse {
        submission,
        evaluation,
    }))
}

async fn handle_progress(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    headers: HeaderMap,
) -> ApiResult<Response> {
    dispatch(&state, &user, &headers, AgentRequest::TrackProgress).await
}

async fn handle_resources(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    headers: HeaderMap,
    Query(query): Query<ResourcesQuery>,
) -> ApiResult<Response> {
    let topic = query
        .topic
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| CoachError::validation("query parameter 'topic' is required"))?;
    let request = AgentRequest::DiscoverResources {
        topic,
        limit: query.limit,
    };
    dispatch(&state, &user, &headers, request).await
}

async fn handle_orchestrate(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    headers: HeaderMap,
    Json(request): Json<MessageRequest>,
) -> ApiResult<Response> {
    let response = state
        .orchestrator
        .handle_message(&user.user_id, &session_id(&headers), &request.message)
        .await?;
    Ok(agent_response(response))
}

async fn handle_gamification(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> ApiResult<Json<GamificationSummary>> {
    let summary = gamification::summary(state.orchestrator.services(), &user.user_id, Utc::now()).await?;
    Ok(Json(summary))
}

async fn handle_leaderboard(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Query(query): Query<LeaderboardQuery>,
) -> ApiResult<Json<Vec<LeaderboardEntry>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LEADERBOARD_SIZE)
        .clamp(1, MAX_LEADERBOARD_SIZE);
    let board = gamification::leaderboard(state.orchestrator.services(), Utc::now(), limit).await?;
    Ok(Json(board))
}

async fn handle_report(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<ReportQuery>,
) -> ApiResult<Response> {
    let format = match query.format.as_deref() {
        None => ReportFormat::default(),
        Some(raw) => ReportFormat::parse(raw).ok_or_else(|| {
            CoachError::validation(format!("unknown report format '{raw}'; use 'json' or 'markdown'"))
        })?,
    };
    let report = learner_report(state.orchestrator.services(), &user.user_id, Utc::now()).await?;
    let body = report.render(format).map_err(CoachError::from)?;
    Ok(([(header::CONTENT_TYPE, format.content_type())], body).into_response())
}

async fn handle_live() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn handle_detailed(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthReport>) {
    let services = state.orchestrator.services();
    let database = services.store.ping().await.is_ok();
    let sandbox_available = services.runner.is_available().await;
    let breakers: BTreeMap<String, BreakerSnapshot> = state
        .orchestrator
        .breaker_snapshots()
        .into_iter()
        .map(|(agent, snapshot)| (agent.to_string(), snapshot))
        .collect();
    let any_degraded = breakers.values().any(BreakerSnapshot::is_degraded);

    let healthy = database && sandbox_available && !any_degraded;
    let report = HealthReport {
        status: if healthy { "ok" } else { "degraded" }.to_string(),
        database,
        sandbox_backend: services.runner.backend_name().to_string(),
        sandbox_available,
        llm: services.llm.name().to_string(),
        breakers,
    };
    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

// ============================================================================
// Tests
// ============================================================================
