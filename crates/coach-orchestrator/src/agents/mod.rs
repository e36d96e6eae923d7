//! Specialist agents.
//!
//! Every agent answers one kind of [`AgentRequest`] behind the same
//! [`Agent::process`] call. Agents are stateless: everything they touch (the
//! store, the LLM, the code runner, the resource cache) arrives through the
//! [`Services`] carried by the [`AgentContext`]. When the LLM fails, an agent
//! falls back to deterministic template or rule output and says so in
//! [`AgentResult::warnings`].

pub mod curriculum;
pub mod exercises;
pub mod profile;
pub mod progress;
pub mod resources;
pub mod reviewer;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use coach_sandbox::{Language, SecureCodeRunner};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoachError, Result};
use crate::llm::LlmClient;
use crate::models::{AdaptationSignal, TaskType};
use crate::store::Store;

pub use curriculum::CurriculumPlannerAgent;
pub use exercises::ExerciseGeneratorAgent;
pub use profile::ProfileAgent;
pub use progress::{ProgressStats, ProgressTrackerAgent};
pub use resources::{ResourceCache, ResourcesAgent, VectorStore};
pub use reviewer::ReviewerAgent;

// ============================================================================
// AgentType
// ============================================================================

/// The specialist agents known to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    /// Builds the learner profile.
    Profile,
    /// Builds and adapts learning plans.
    CurriculumPlanner,
    /// Generates exercises.
    ExerciseGenerator,
    /// Grades submissions.
    Reviewer,
    /// Finds learning resources.
    Resources,
    /// Computes progress statistics.
    ProgressTracker,
}

impl AgentType {
    /// Every agent type, in a stable order.
    pub const ALL: [Self; 6] = [
        Self::Profile,
        Self::CurriculumPlanner,
        Self::ExerciseGenerator,
        Self::Reviewer,
        Self::Resources,
        Self::ProgressTracker,
    ];

    /// Stable identifier used in logs and health output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::CurriculumPlanner => "curriculum_planner",
            Self::ExerciseGenerator => "exercise_generator",
            Self::Reviewer => "reviewer",
            Self::Resources => "resources",
            Self::ProgressTracker => "progress_tracker",
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Requests and results
// ============================================================================

/// Typed payload handed to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentRequest {
    /// Extract goals and skill level from free text.
    AssessSkill {
        /// What the learner wrote.
        message: String,
    },
    /// Build and activate a new plan.
    GenerateCurriculum {
        /// Focus topic; defaults to the learner's first goal.
        #[serde(default)]
        topic: Option<String>,
    },
    /// Adjust the difficulty of the remaining tasks of the active plan.
    AdaptPlan {
        /// Direction of the adjustment.
        signal: AdaptationSignal,
    },
    /// Generate a standalone exercise.
    GenerateExercise {
        /// Exercise topic.
        topic: String,
        /// Requested difficulty (1 to 10).
        #[serde(default)]
        difficulty: Option<u8>,
        /// Requested language; defaults to the learner's preference.
        #[serde(default)]
        language: Option<Language>,
        /// Requested task type; defaults to a coding task.
        #[serde(default)]
        task_type: Option<TaskType>,
    },
    /// Grade a submission.
    ReviewSubmission {
        /// Task being answered.
        task_id: String,
        /// Learner code.
        code: String,
        /// Language of `code`; defaults to the task language.
        #[serde(default)]
        language: Option<Language>,
    },
    /// Summarise progress.
    TrackProgress,
    /// Find resources for a topic.
    DiscoverResources {
        /// Topic to search.
        topic: String,
        /// Maximum number of results.
        #[serde(default)]
        limit: Option<usize>,
    },
}

impl AgentRequest {
    /// Short name used in logs and errors.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AssessSkill { .. } => "assess_skill",
            Self::GenerateCurriculum { .. } => "generate_curriculum",
            Self::AdaptPlan { .. } => "adapt_plan",
            Self::GenerateExercise { .. } => "generate_exercise",
            Self::ReviewSubmission { .. } => "review_submission",
            Self::TrackProgress => "track_progress",
            Self::DiscoverResources { .. } => "discover_resources",
        }
    }
}

/// Shared handles injected into every agent call. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Services {
    /// Persistence.
    pub store: Store,
    /// Language model.
    pub llm: LlmClient,
    /// Sandboxed code runner.
    pub runner: SecureCodeRunner,
    /// Per-topic resource cache.
    pub resources: ResourceCache,
    /// Optional semantic search over curated resources.
    pub vector_store: Option<VectorStore>,
}

/// Everything an agent needs for one call.
#[derive(Debug, Clone)]
pub struct AgentContext {
    /// Learner making the request.
    pub user_id: String,
    /// Correlation id for the request.
    pub session_id: String,
    /// Typed payload.
    pub request: AgentRequest,
    /// Injected handles.
    pub services: Services,
}

/// Outcome of an agent call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResult {
    /// Whether the agent produced its primary output.
    pub success: bool,
    /// Agent-specific JSON payload.
    pub payload: Value,
    /// Degradations the caller should know about (fallback content, ...).
    pub warnings: Vec<String>,
}

impl AgentResult {
    /// A successful result carrying `payload`.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::Json` if `payload` cannot be serialised.
    pub fn ok(payload: &impl Serialize, warnings: Vec<String>) -> Result<Self> {
        Ok(Self {
            success: true,
            payload: serde_json::to_value(payload)?,
            warnings,
        })
    }
}

/// A request-scoped specialist.
#[async_trait]
pub trait Agent: Send + Sync + std::fmt::Debug {
    /// Which agent this is.
    fn agent_type(&self) -> AgentType;

    /// Handles one request.
    async fn process(&self, ctx: AgentContext) -> Result<AgentResult>;
}

/// Error for a request routed to the wrong agent.
pub(crate) fn unsupported(agent: AgentType, request: &AgentRequest) -> CoachError {
    CoachError::validation(format!(
        "agent '{agent}' cannot handle '{}' requests",
        request.kind()
    ))
}

// ============================================================================
// AgentRegistry
// ============================================================================

/// Agents keyed by type.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    agents: HashMap<AgentType, Arc<dyn Agent>>,
}

impl AgentRegistry {
    /// A registry holding one instance of every built-in agent.
    #[must_use]
    pub fn standard() -> Self {
        let agents: [Arc<dyn Agent>; 6] = [
            Arc::new(ProfileAgent),
            Arc::new(CurriculumPlannerAgent),
            Arc::new(ExerciseGeneratorAgent),
            Arc::new(ReviewerAgent),
            Arc::new(ResourcesAgent),
            Arc::new(ProgressTrackerAgent),
        ];
        agents.into_iter().fold(Self::empty(), Self::with_agent)
    }

    /// A registry with no agents.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    /// Registers `agent`, replacing any agent of the same type.
    #[must_use]
    pub fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agents.insert(agent.agent_type(), agent);
        self
    }

    /// Looks up the agent for `agent_type`.
    #[must_use]
    pub fn get(&self, agent_type: AgentType) -> Option<Arc<dyn Agent>> {
        self.agents.get(&agent_type).cloned()
    }
}
