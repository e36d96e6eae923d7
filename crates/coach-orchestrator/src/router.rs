//! Intent classification and agent dispatch.
//!
//! Free-form messages are scored against keyword lists to pick one
//! [`Intent`]. Each intent maps to exactly one [`AgentType`] through a fixed
//! table, so routing is deterministic once the intent is known. Every agent
//! call goes through that agent's [`CircuitBreaker`] and a timeout; agent
//! faults come back as a degraded [`OrchestratorResponse`] instead of an
//! error.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::agents::{AgentContext, AgentRegistry, AgentRequest, AgentType, Services};
use crate::breaker::{BreakerSnapshot, CircuitBreaker};
use crate::config::BreakerConfig;
use crate::error::{CoachError, Result};

/// Message returned when an agent is failing or its breaker is open.
pub const DEGRADED_MESSAGE: &str = "service temporarily limited, try again";

/// Confidence below which a classification is flagged as ambiguous.
const AMBIGUITY_THRESHOLD: f32 = 0.5;

// ============================================================================
// Intent
// ============================================================================

/// What the learner is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Describe goals and experience.
    AssessSkill,
    /// Get a learning plan.
    GenerateCurriculum,
    /// Get a practice exercise.
    GenerateExercise,
    /// Have code reviewed.
    ReviewSubmission,
    /// See progress.
    TrackProgress,
    /// Find learning material.
    DiscoverResources,
}

impl Intent {
    /// Every intent, in dispatch-table order.
    pub const ALL: [Self; 6] = [
        Self::AssessSkill,
        Self::GenerateCurriculum,
        Self::GenerateExercise,
        Self::ReviewSubmission,
        Self::TrackProgress,
        Self::DiscoverResources,
    ];

    /// The agent responsible for this intent.
    #[must_use]
    pub const fn agent(self) -> AgentType {
        match self {
            Self::AssessSkill => AgentType::Profile,
            Self::GenerateCurriculum => AgentType::CurriculumPlanner,
            Self::GenerateExercise => AgentType::ExerciseGenerator,
            Self::ReviewSubmission => AgentType::Reviewer,
            Self::TrackProgress => AgentType::ProgressTracker,
            Self::DiscoverResources => AgentType::Resources,
        }
    }

    /// Intent a structured request belongs to.
    #[must_use]
    pub const fn of(request: &AgentRequest) -> Self {
        match request {
            AgentRequest::AssessSkill { .. } => Self::AssessSkill,
            AgentRequest::GenerateCurriculum { .. } | AgentRequest::AdaptPlan { .. } => {
                Self::GenerateCurriculum
            }
            AgentRequest::GenerateExercise { .. } => Self::GenerateExercise,
            AgentRequest::ReviewSubmission { .. } => Self::ReviewSubmission,
            AgentRequest::TrackProgress => Self::TrackProgress,
            AgentRequest::DiscoverResources { .. } => Self::DiscoverResources,
        }
    }

    const fn keywords(self) -> &'static [(&'static str, u32)] {
        match self {
            Self::AssessSkill => &[
                ("i want to", 2),
                ("my goal", 3),
                ("goal", 2),
                ("beginner", 2),
                ("experience", 2),
                ("i know", 2),
                ("hours", 1),
                ("become", 2),
            ],
            Self::GenerateCurriculum => &[
                ("curriculum", 3),
                ("plan", 3),
                ("roadmap", 3),
                ("learning path", 3),
                ("syllabus", 3),
                ("schedule", 2),
                ("course", 2),
            ],
            Self::GenerateExercise => &[
                ("exercise", 3),
                ("challenge", 3),
                ("practice", 2),
                ("problem", 2),
                ("kata", 3),
                ("task", 1),
            ],
            Self::ReviewSubmission => &[
                ("review", 3),
                ("my code", 3),
                ("submit", 3),
                ("feedback", 2),
                ("check", 1),
                ("bug", 2),
            ],
            Self::TrackProgress => &[
                ("progress", 3),
                ("streak", 3),
                ("how am i doing", 3),
                ("stats", 2),
                ("completed", 2),
                ("score", 1),
            ],
            Self::DiscoverResources => &[
                ("resource", 3),
                ("tutorial", 3),
                ("documentation", 3),
                ("docs", 2),
                ("video", 2),
                ("article", 2),
                ("book", 2),
                ("read about", 2),
            ],
        }
    }

    /// Stable identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AssessSkill => "assess_skill",
            Self::GenerateCurriculum => "generate_curriculum",
            Self::GenerateExercise => "generate_exercise",
            Self::ReviewSubmission => "review_submission",
            Self::TrackProgress => "track_progress",
            Self::DiscoverResources => "discover_resources",
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Result of classifying a free-form message.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    /// Winning intent.
    pub intent: Intent,
    /// Winner's share of all keyword points, from 0.0 to 1.0.
    pub confidence: f32,
    /// Nothing matched, the top two intents tied, or confidence is low.
    pub ambiguous: bool,
}

/// Scores `message` against every intent's keywords.
///
/// A message with no keyword at all is treated as a skill assessment, which
/// answers with clarifying questions.
#[must_use]
pub fn classify(message: &str) -> Classification {
    let text = message.to_lowercase();
    let mut scores: Vec<(Intent, u32)> = Intent::ALL
        .iter()
        .map(|&intent| {
            let score = intent
                .keywords()
                .iter()
                .filter(|(kw, _)| text.contains(kw))
                .map(|(_, weight)| weight)
                .sum();
            (intent, score)
        })
        .collect();
    // Stable sort keeps table order on ties.
    scores.sort_by(|a, b| b.1.cmp(&a.1));

    let total: u32 = scores.iter().map(|(_, s)| s).sum();
    let (intent, top) = scores[0];
    if total == 0 {
        return Classification {
            intent: Intent::AssessSkill,
            confidence: 0.0,
            ambiguous: true,
        };
    }
    #[allow(clippy::cast_precision_loss)]
    let confidence = top as f32 / total as f32;
    Classification {
        intent,
        confidence,
        ambiguous: scores[1].1 == top || confidence < AMBIGUITY_THRESHOLD,
    }
}

static TOPIC_RE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:about|on|for|learn|practice|with)\s+([a-z0-9+#.\- ]{2,40})").ok()
});

/// Topic named in a message ("an exercise on recursion" gives "recursion").
#[must_use]
pub fn extract_topic(message: &str) -> Option<String> {
    let captures = TOPIC_RE.as_ref()?.captures(message)?;
    let topic = captures.get(1)?.as_str().trim().trim_end_matches(['.', '-']).trim();
    (!topic.is_empty()).then(|| topic.to_lowercase())
}

/// Turns a classified message into a structured request.
///
/// # Errors
///
/// Returns `CoachError::Validation` for a review request, which needs a task
/// id and code that free text cannot carry.
pub fn request_for(intent: Intent, message: &str) -> Result<AgentRequest> {
    let topic = extract_topic(message);
    Ok(match intent {
        Intent::AssessSkill => AgentRequest::AssessSkill {
            message: message.to_string(),
        },
        Intent::GenerateCurriculum => AgentRequest::GenerateCurriculum { topic },
        Intent::GenerateExercise => AgentRequest::GenerateExercise {
            topic: topic.unwrap_or_else(|| "basics".to_string()),
            difficulty: None,
            language: None,
            task_type: None,
        },
        Intent::ReviewSubmission => {
            return Err(CoachError::validation(
                "code reviews need a task id and code; send them to POST /api/v1/submissions",
            ))
        }
        Intent::TrackProgress => AgentRequest::TrackProgress,
        Intent::DiscoverResources => AgentRequest::DiscoverResources {
            topic: topic.unwrap_or_else(|| message.trim().to_string()),
            limit: None,
        },
    })
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Outcome of one dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorResponse {
    /// Intent served.
    pub intent: Intent,
    /// Agent that handled (or would have handled) the request.
    pub agent: AgentType,
    /// `false` for a degraded response.
    pub success: bool,
    /// Agent payload; `null` when degraded.
    pub payload: Value,
    /// Fallback and degradation notices.
    pub warnings: Vec<String>,
    /// Present on degraded responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Seconds until the agent accepts calls again, when its breaker is open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    /// Set when the request came from free text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
}

impl OrchestratorResponse {
    fn degraded(intent: Intent, retry_after_secs: Option<u64>) -> Self {
        Self {
            intent,
            agent: intent.agent(),
            success: false,
            payload: Value::Null,
            warnings: Vec::new(),
            message: Some(DEGRADED_MESSAGE.to_string()),
            retry_after_secs,
            classification: None,
        }
    }
}

/// Routes requests to agents behind per-agent circuit breakers.
#[derive(Debug)]
pub struct Orchestrator {
    registry: AgentRegistry,
    services: Services,
    agent_timeout: Duration,
    breakers: Mutex<HashMap<AgentType, CircuitBreaker>>,
}

impl Orchestrator {
    /// Creates an orchestrator with one closed breaker per agent type.
    #[must_use]
    pub fn new(
        services: Services,
        registry: AgentRegistry,
        agent_timeout: Duration,
        breaker: BreakerConfig,
    ) -> Self {
        let breakers = AgentType::ALL
            .iter()
            .map(|&agent| (agent, CircuitBreaker::new(breaker)))
            .collect();
        Self {
            registry,
            services,
            agent_timeout,
            breakers: Mutex::new(breakers),
        }
    }

    /// Shared services handed to agents.
    #[must_use]
    pub const fn services(&self) -> &Services {
        &self.services
    }

    /// Breaker state of every agent, for health reporting.
    #[must_use]
    pub fn breaker_snapshots(&self) -> Vec<(AgentType, BreakerSnapshot)> {
        let now = Instant::now();
        let breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut snapshots: Vec<(AgentType, BreakerSnapshot)> = breakers
            .iter()
            .map(|(agent, breaker)| (*agent, breaker.snapshot(now)))
            .collect();
        snapshots.sort_by_key(|(agent, _)| *agent);
        snapshots
    }

    /// Classifies `message` and dispatches it.
    ///
    /// # Errors
    ///
    /// Returns caller errors (validation, not found) from the agent or from
    /// [`request_for`]. Agent faults are reported as degraded responses.
    #[instrument(skip(self, message), fields(user_id = %user_id))]
    pub async fn handle_message(
        &self,
        user_id: &str,
        session_id: &str,
        message: &str,
    ) -> Result<OrchestratorResponse> {
        if message.trim().is_empty() {
            return Err(CoachError::validation("message must not be empty"));
        }
        let classification = classify(message);
        debug!(
            intent = %classification.intent,
            confidence = classification.confidence,
            ambiguous = classification.ambiguous,
            "Message classified"
        );
        let request = request_for(classification.intent, message)?;
        let mut response = self.dispatch(user_id, session_id, request).await?;
        response.classification = Some(classification);
        Ok(response)
    }

    /// Sends a structured request to the agent its intent maps to.
    ///
    /// # Errors
    ///
    /// Returns caller errors unchanged. Agent errors, timeouts and open
    /// breakers produce `Ok` with a degraded response.
    #[instrument(skip(self, request), fields(user_id = %user_id, request = request.kind()))]
    pub async fn dispatch(
        &self,
        user_id: &str,
        session_id: &str,
        request: AgentRequest,
    ) -> Result<OrchestratorResponse> {
        let intent = Intent::of(&request);
        let agent_type = intent.agent();

        if let Some(retry_after) = self.acquire(agent_type) {
            warn!(agent = %agent_type, "Circuit open, short-circuiting call");
            return Ok(OrchestratorResponse::degraded(intent, retry_after));
        }

        let pending = PendingCall {
            breakers: &self.breakers,
            agent: agent_type,
            reported: false,
        };
        let Some(agent) = self.registry.get(agent_type) else {
            pending.finish();
            self.record_failure(agent_type, "agent not registered");
            return Ok(OrchestratorResponse::degraded(intent, None));
        };
        let ctx = AgentContext {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            request,
            services: self.services.clone(),
        };

        let budget = self.time_budget(agent_type);
        let outcome = tokio::time::timeout(budget, agent.process(ctx))
            .await
            .unwrap_or_else(|_| {
                Err(CoachError::AgentTimeout {
                    agent: agent_type.to_string(),
                    timeout_ms: u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
                })
            });
        pending.finish();

        match outcome {
            Ok(result) => {
                self.record_success(agent_type);
                info!(agent = %agent_type, warnings = result.warnings.len(), "Agent call succeeded");
                Ok(OrchestratorResponse {
                    intent,
                    agent: agent_type,
                    success: result.success,
                    payload: result.payload,
                    warnings: result.warnings,
                    message: None,
                    retry_after_secs: None,
                    classification: None,
                })
            }
            Err(err) if !err.counts_against_breaker() => {
                self.record_success(agent_type);
                Err(err)
            }
            Err(err) => {
                warn!(agent = %agent_type, error = %err, "Agent call failed, returning degraded response");
                self.record_failure(agent_type, &err.to_string());
                Ok(OrchestratorResponse::degraded(intent, None))
            }
        }
    }

    /// How long `agent` may take before its call is abandoned.
    ///
    /// The reviewer waits for a sandbox slot and then for the run itself, so
    /// both sandbox ceilings are added to the base agent timeout.
    fn time_budget(&self, agent: AgentType) -> Duration {
        if agent == AgentType::Reviewer {
            let limits = self.services.runner.limits();
            self.agent_timeout + limits.queue_timeout() + limits.timeout()
        } else {
            self.agent_timeout
        }
    }

    /// `None` when the call may proceed; otherwise the retry hint.
    fn acquire(&self, agent: AgentType) -> Option<Option<u64>> {
        let now = Instant::now();
        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        let breaker = breakers.get_mut(&agent)?;
        if breaker.try_acquire(now) {
            None
        } else {
            Some(breaker.snapshot(now).retry_after_secs)
        }
    }

    fn record_success(&self, agent: AgentType) {
        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(breaker) = breakers.get_mut(&agent) {
            breaker.record_success(Instant::now());
        }
    }

    fn record_failure(&self, agent: AgentType, error: &str) {
        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(breaker) = breakers.get_mut(&agent) {
            breaker.record_failure(Instant::now(), error);
        }
    }
}

/// An admitted call that has not yet reported back to its breaker.
///
/// Dropping it unreported (the dispatch future was cancelled) releases a
/// half-open probe so the breaker does not wait on a caller that is gone.
struct PendingCall<'a> {
    breakers: &'a Mutex<HashMap<AgentType, CircuitBreaker>>,
    agent: AgentType,
    reported: bool,
}

impl PendingCall<'_> {
    fn finish(mut self) {
        self.reported = true;
    }
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        if self.reported {
            return;
        }
        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(breaker) = breakers.get_mut(&self.agent) {
            debug!(agent = %self.agent, "Call cancelled before reporting");
            breaker.abandon_probe();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::agents::{testing, Agent, AgentResult};
    use crate::breaker::BreakerState;

    #[derive(Debug, Default)]
    struct BrokenResources {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Agent for BrokenResources {
        fn agent_type(&self) -> AgentType {
            AgentType::Resources
        }

        async fn process(&self, _ctx: AgentContext) -> Result<AgentResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CoachError::upstream("vector_store", "connection refused"))
        }
    }

    /// Fails twice, hangs on the third call, then recovers.
    #[derive(Debug, Default)]
    struct FlakyResources {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Agent for FlakyResources {
        fn agent_type(&self) -> AgentType {
            AgentType::Resources
        }

        async fn process(&self, _ctx: AgentContext) -> Result<AgentResult> {
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => Err(CoachError::upstream("vector_store", "connection refused")),
                2 => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    AgentResult::ok(&"late", Vec::new())
                }
                _ => AgentResult::ok(&"back", Vec::new()),
            }
        }
    }

    #[derive(Debug)]
    struct SlowProgress;

    #[async_trait]
    impl Agent for SlowProgress {
        fn agent_type(&self) -> AgentType {
            AgentType::ProgressTracker
        }

        async fn process(&self, _ctx: AgentContext) -> Result<AgentResult> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            AgentResult::ok(&"late", Vec::new())
        }
    }

    fn breaker_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 2,
            window_secs: 60,
            cooldown_secs: 300,
        }
    }

    fn orchestrator(registry: AgentRegistry) -> Orchestrator {
        Orchestrator::new(
            testing::offline(),
            registry,
            Duration::from_millis(100),
            breaker_config(),
        )
    }

    fn resources_request() -> AgentRequest {
        AgentRequest::DiscoverResources {
            topic: "python".into(),
            limit: None,
        }
    }

    #[test]
    fn dispatch_table_is_total_and_injective() {
        let agents: std::collections::HashSet<AgentType> =
            Intent::ALL.iter().map(|i| i.agent()).collect();
        assert_eq!(agents.len(), Intent::ALL.len());
        for intent in Intent::ALL {
            assert_eq!(intent.agent(), intent.agent());
        }
    }

    #[test]
    fn classifies_common_messages() {
        let cases = [
            ("Can you make me a learning plan for Python?", Intent::GenerateCurriculum),
            ("Give me an exercise on recursion", Intent::GenerateExercise),
            ("Please review my code", Intent::ReviewSubmission),
            ("How am I doing? Show my streak", Intent::TrackProgress),
            ("Any good tutorial or video about closures?", Intent::DiscoverResources),
            ("My goal is to become a backend developer", Intent::AssessSkill),
        ];
        for (message, expected) in cases {
            let c = classify(message);
            assert_eq!(c.intent, expected, "{message}");
            assert!(c.confidence > 0.0);
        }
    }

    #[test]
    fn unmatched_message_is_ambiguous_assessment() {
        let c = classify("hello there");
        assert_eq!(c.intent, Intent::AssessSkill);
        assert!(c.ambiguous);
        assert!(c.confidence.abs() < f32::EPSILON);
    }

    #[test]
    fn tie_is_ambiguous() {
        // "plan" (3) vs "exercise" (3).
        let c = classify("plan or exercise");
        assert!(c.ambiguous);
    }

    #[test]
    fn extracts_topics() {
        assert_eq!(extract_topic("Give me an exercise on recursion."), Some("recursion".into()));
        assert_eq!(extract_topic("I want to learn Rust"), Some("rust".into()));
        assert_eq!(extract_topic("progress please"), None);
    }

    #[test]
    fn free_text_review_is_a_caller_error() {
        let err = request_for(Intent::ReviewSubmission, "review my code").unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn healthy_agent_answers() {
        let orchestrator = orchestrator(AgentRegistry::standard());
        let response = orchestrator
            .dispatch("u1", "s1", resources_request())
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.agent, AgentType::Resources);
        assert!(response.message.is_none());
    }

    #[tokio::test]
    async fn failures_degrade_then_open_the_breaker() {
        let broken = Arc::new(BrokenResources::default());
        let registry = AgentRegistry::standard().with_agent(broken.clone());
        let orchestrator = orchestrator(registry);

        for _ in 0..2 {
            let response = orchestrator.dispatch("u1", "s1", resources_request()).await.unwrap();
            assert!(!response.success);
            assert_eq!(response.message.as_deref(), Some(DEGRADED_MESSAGE));
        }
        let response = orchestrator.dispatch("u1", "s1", resources_request()).await.unwrap();
        assert!(!response.success);
        assert!(response.retry_after_secs.is_some());
        assert_eq!(broken.calls.load(Ordering::SeqCst), 2);

        let snapshots = orchestrator.breaker_snapshots();
        let (_, resources) = snapshots
            .iter()
            .find(|(agent, _)| *agent == AgentType::Resources)
            .unwrap();
        assert_eq!(resources.state, BreakerState::Open);
        let (_, profile) = snapshots
            .iter()
            .find(|(agent, _)| *agent == AgentType::Profile)
            .unwrap();
        assert_eq!(profile.state, BreakerState::Closed);
    }

    #[tokio::test]
    async fn timeout_is_degraded() {
        let registry = AgentRegistry::standard().with_agent(Arc::new(SlowProgress));
        let orchestrator = orchestrator(registry);
        let response = orchestrator
            .dispatch("u1", "s1", AgentRequest::TrackProgress)
            .await
            .unwrap();
        assert!(!response.success);
        let snapshots = orchestrator.breaker_snapshots();
        let (_, progress) = snapshots
            .iter()
            .find(|(agent, _)| *agent == AgentType::ProgressTracker)
            .unwrap();
        assert_eq!(progress.consecutive_failures, 1);
        assert!(progress.last_error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn cancelled_half_open_call_does_not_wedge_the_breaker() {
        let flaky = Arc::new(FlakyResources::default());
        let registry = AgentRegistry::standard().with_agent(flaky.clone());
        let orchestrator = Orchestrator::new(
            testing::offline(),
            registry,
            Duration::from_secs(10),
            BreakerConfig {
                failure_threshold: 2,
                window_secs: 60,
                cooldown_secs: 1,
            },
        );

        for _ in 0..2 {
            orchestrator.dispatch("u1", "s1", resources_request()).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(1_100)).await;

        // The half-open call is cancelled by its client.
        let cancelled = tokio::time::timeout(
            Duration::from_millis(50),
            orchestrator.dispatch("u1", "s1", resources_request()),
        )
        .await;
        assert!(cancelled.is_err());
        let resources_state = |o: &Orchestrator| {
            o.breaker_snapshots()
                .into_iter()
                .find(|(agent, _)| *agent == AgentType::Resources)
                .map(|(_, s)| s)
                .unwrap()
        };
        assert_eq!(resources_state(&orchestrator).state, BreakerState::HalfOpen);
        assert!(resources_state(&orchestrator).is_degraded());

        let response = orchestrator.dispatch("u1", "s1", resources_request()).await.unwrap();
        assert!(response.success);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 4);
        assert_eq!(resources_state(&orchestrator).state, BreakerState::Closed);
    }

    #[tokio::test]
    async fn queued_reviews_get_the_sandbox_budget_and_full_queue_is_busy() {
        use coach_sandbox::{Language, ResourceLimits, ScriptedBackend, SecureCodeRunner};

        use crate::agents::exercises::pick_template;

        let mut services = testing::offline();
        services.runner = SecureCodeRunner::new(
            Arc::new(ScriptedBackend::new().with_delay(Duration::from_millis(300))),
            ResourceLimits {
                max_concurrent: 1,
                queue_timeout_ms: 50,
                ..ResourceLimits::default()
            },
        );
        let user = testing::user(&services).await;
        let task = pick_template("sum", 1, false, &[]).to_task("basics", 1, Language::Python);
        services.store.save_task(&user, &task).await.unwrap();
        let orchestrator = Orchestrator::new(
            services,
            AgentRegistry::standard(),
            Duration::from_millis(100),
            breaker_config(),
        );
        let review = || AgentRequest::ReviewSubmission {
            task_id: task.id.clone(),
            code: "def solution(numbers):\n    return sum(numbers)\n".into(),
            language: None,
        };

        let (first, second) = tokio::join!(orchestrator.dispatch(&user, "s1", review()), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            orchestrator.dispatch(&user, "s1", review()).await
        });

        // Longer than the base agent timeout, but inside the reviewer budget.
        assert!(first.unwrap().success);
        let err = second.unwrap_err();
        assert!(matches!(err, CoachError::Busy { .. }), "got {err:?}");
        assert_eq!(err.status_code(), 503);
        let (_, reviewer) = orchestrator
            .breaker_snapshots()
            .into_iter()
            .find(|(agent, _)| *agent == AgentType::Reviewer)
            .unwrap();
        assert_eq!(reviewer.state, BreakerState::Closed);
        assert_eq!(reviewer.total_failures, 0);
    }

    #[tokio::test]
    async fn caller_errors_surface_and_do_not_trip() {
        let orchestrator = orchestrator(AgentRegistry::standard());
        for _ in 0..3 {
            let err = orchestrator
                .dispatch("u1", "s1", AgentRequest::DiscoverResources { topic: " ".into(), limit: None })
                .await
                .unwrap_err();
            assert_eq!(err.status_code(), 400);
        }
        assert!(orchestrator
            .breaker_snapshots()
            .iter()
            .all(|(_, s)| s.state == BreakerState::Closed && s.consecutive_failures == 0));
    }

    #[tokio::test]
    async fn handle_message_attaches_classification() {
        let orchestrator = orchestrator(AgentRegistry::standard());
        let response = orchestrator
            .handle_message("u1", "s1", "Find me a tutorial about python loops")
            .await
            .unwrap();
        assert_eq!(response.intent, Intent::DiscoverResources);
        assert_eq!(
            response.classification.unwrap().intent,
            Intent::DiscoverResources
        );
    }
}
