//! Curriculum planner: builds, activates and adapts learning plans.
//!
//! A generated plan always has progressive difficulty, a mini-project in its
//! last module, review checkpoints on every module and a linear prerequisite
//! chain. Adaptation only rewrites the difficulty of tasks that are not yet
//! completed; the prerequisite graph is left untouched.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::exercises::{pick_template, study_task};
use super::resources;
use super::{unsupported, Agent, AgentContext, AgentRequest, AgentResult, AgentType, Services};
use crate::error::{CoachError, Result};
use crate::models::{
    clamp_difficulty, AdaptationSignal, LearningPlan, LearningStyle, Module, PlanStatus,
    ReviewCheckpoint, Task, TaskType, UserProfile, REVIEW_OFFSETS,
};

const SYSTEM_PROMPT: &str = "You are a curriculum designer for programming learners. \
Reply with JSON only: {\"title\": string, \"modules\": [{\"title\": string, \"summary\": string, \
\"topic\": string}]}. Order modules from easiest to hardest; the last module is a mini-project.";

const MIN_MODULES: usize = 3;
const MAX_MODULES: usize = 6;
const DEFAULT_WEEKS: u32 = 4;

/// Title and topic of one module before tasks are attached.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModuleOutline {
    /// Module title.
    pub title: String,
    /// One-sentence summary.
    #[serde(default)]
    pub summary: String,
    /// Topic used to pick exercises and resources.
    #[serde(default)]
    pub topic: String,
}

#[derive(Debug, Deserialize)]
struct PlanOutline {
    #[serde(default)]
    title: String,
    #[serde(default)]
    modules: Vec<ModuleOutline>,
}

/// Result of an adaptation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptationOutcome {
    /// Plan that was changed.
    pub plan_id: String,
    /// Applied signal.
    pub signal: AdaptationSignal,
    /// Tasks whose difficulty changed.
    pub tasks_adjusted: usize,
}

/// Number of modules for a plan spanning `weeks`.
#[must_use]
pub fn module_count(weeks: Option<u32>) -> usize {
    usize::try_from(weeks.unwrap_or(DEFAULT_WEEKS))
        .unwrap_or(MAX_MODULES)
        .clamp(MIN_MODULES, MAX_MODULES)
}

/// Deterministic module outline for `topic`.
#[must_use]
pub fn template_outline(topic: &str, count: usize) -> Vec<ModuleOutline> {
    const STAGES: [(&str, &str); 5] = [
        ("Foundations of {}", "Core syntax and the mental model behind {}."),
        ("Working with data in {}", "Strings, lists and dictionaries in {}."),
        ("Control flow and functions in {}", "Breaking {} problems into small functions."),
        ("Problem solving with {}", "Classic algorithms expressed in {}."),
        ("Data structures in {}", "Stacks, maps and recursion applied to {}."),
    ];
    const TOPICS: [&str; 5] = [
        "basics",
        "list string",
        "functions condition",
        "algorithm search",
        "recursion stack",
    ];

    let count = count.clamp(MIN_MODULES, MAX_MODULES);
    let mut outline: Vec<ModuleOutline> = STAGES
        .iter()
        .zip(TOPICS)
        .take(count - 1)
        .map(|((title, summary), sub)| ModuleOutline {
            title: title.replace("{}", topic),
            summary: summary.replace("{}", topic),
            topic: format!("{topic} {sub}"),
        })
        .collect();
    outline.push(ModuleOutline {
        title: format!("Capstone: a {topic} mini-project"),
        summary: format!("Combine everything into a small {topic} program."),
        topic: format!("{topic} project"),
    });
    outline
}

/// Builds a plan for `profile` from `outline`.
///
/// Difficulty starts at the profile's base level and rises by one per module.
/// Tasks are scheduled over the learner's study days.
pub(crate) async fn build_plan(
    services: &Services,
    profile: &UserProfile,
    title: &str,
    outline: &[ModuleOutline],
    warnings: &mut Vec<String>,
) -> LearningPlan {
    let language = profile.preferred_language;
    let base = i32::from(profile.skill_level.base_difficulty());
    let study_type = match profile.learning_style {
        LearningStyle::Visual | LearningStyle::Auditory => TaskType::Watch,
        LearningStyle::Kinesthetic | LearningStyle::Reading => TaskType::Read,
    };
    let day_step = schedule_step(profile);

    let mut used_templates: Vec<&str> = Vec::new();
    let mut modules = Vec::with_capacity(outline.len());
    let mut day = 0u32;
    let last = outline.len().saturating_sub(1);

    for (i, module_outline) in outline.iter().enumerate() {
        let module_id = Uuid::new_v4().to_string();
        let difficulty = clamp_difficulty(base + i32::try_from(i).unwrap_or(0));
        let topic = if module_outline.topic.trim().is_empty() {
            module_outline.title.as_str()
        } else {
            module_outline.topic.as_str()
        };

        let mut study = study_task(study_type, &module_outline.title, difficulty, language);
        study.resources = resources::find(services, topic, 2, warnings).await;

        let is_last = i == last;
        let exercise = pick_template(topic, difficulty, false, &used_templates);
        used_templates.push(exercise.slug);
        let mut tasks = vec![study, exercise.to_task(topic, difficulty, language)];
        if is_last {
            let project = pick_template(topic, difficulty, true, &[]);
            tasks.push(project.to_task(topic, difficulty, language));
        } else {
            tasks.push(study_task(TaskType::Quiz, &module_outline.title, difficulty, language));
        }

        for task in &mut tasks {
            task.module_id = Some(module_id.clone());
            task.day_offset = Some(day);
            day += day_step;
        }

        modules.push(Module {
            id: module_id,
            title: module_outline.title.clone(),
            summary: module_outline.summary.clone(),
            order: u32::try_from(i + 1).unwrap_or(u32::MAX),
            prerequisites: modules
                .last()
                .map(|prev: &Module| vec![prev.id.clone()])
                .unwrap_or_default(),
            tasks,
            review_checkpoints: REVIEW_OFFSETS
                .iter()
                .map(|&day_offset| ReviewCheckpoint {
                    day_offset,
                    topic: module_outline.title.clone(),
                })
                .collect(),
        });
    }

    let now = Utc::now();
    LearningPlan {
        id: Uuid::new_v4().to_string(),
        user_id: profile.user_id.clone(),
        title: title.to_string(),
        status: PlanStatus::Active,
        modules,
        created_at: now,
        updated_at: now,
    }
}

/// Days between consecutive tasks, from weekly hours and session length.
fn schedule_step(profile: &UserProfile) -> u32 {
    let constraints = &profile.time_constraints;
    let sessions = constraints.hours_per_week.saturating_mul(60) / constraints.session_minutes.max(1);
    let days = if constraints.available_days.is_empty() {
        7
    } else {
        u32::try_from(constraints.available_days.len()).unwrap_or(7).min(7)
    };
    let per_week = sessions.clamp(1, days);
    (7 / per_week).max(1)
}

/// Shifts the difficulty of every not-yet-completed task of the active plan.
///
/// Returns `None` when the user has no active plan.
///
/// # Errors
///
/// Returns store errors.
pub(crate) async fn adapt_active_plan(
    services: &Services,
    user_id: &str,
    signal: AdaptationSignal,
) -> Result<Option<AdaptationOutcome>> {
    let Some(mut plan) = services.store.active_plan(user_id).await? else {
        return Ok(None);
    };
    let completed: HashSet<String> = services
        .store
        .list_progress(user_id)
        .await?
        .into_iter()
        .filter(|r| r.completed)
        .map(|r| r.task_id)
        .collect();

    let mut tasks_adjusted = 0;
    for task in plan.tasks_mut().filter(|t| !completed.contains(&t.id)) {
        let adjusted = clamp_difficulty(i32::from(task.difficulty) + signal.delta());
        if adjusted != task.difficulty {
            task.difficulty = adjusted;
            tasks_adjusted += 1;
        }
    }
    if tasks_adjusted > 0 {
        plan.updated_at = Utc::now();
        services.store.save_plan(&plan).await?;
    }
    info!(plan_id = %plan.id, ?signal, tasks_adjusted, "Plan adapted");
    Ok(Some(AdaptationOutcome {
        plan_id: plan.id,
        signal,
        tasks_adjusted,
    }))
}

fn from_llm(value: &Value) -> Option<(String, Vec<ModuleOutline>)> {
    let outline: PlanOutline = serde_json::from_value(value.clone()).ok()?;
    let modules: Vec<ModuleOutline> = outline
        .modules
        .into_iter()
        .filter(|m| !m.title.trim().is_empty())
        .take(MAX_MODULES)
        .collect();
    if modules.len() < MIN_MODULES || outline.title.trim().is_empty() {
        return None;
    }
    Some((outline.title, modules))
}

/// Plans curricula.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurriculumPlannerAgent;

#[async_trait]
impl Agent for CurriculumPlannerAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::CurriculumPlanner
    }

    #[instrument(skip(self, ctx), fields(user_id = %ctx.user_id, request = ctx.request.kind()))]
    async fn process(&self, ctx: AgentContext) -> Result<AgentResult> {
        match &ctx.request {
            AgentRequest::GenerateCurriculum { topic } => {
                generate(&ctx.services, &ctx.user_id, topic.as_deref()).await
            }
            AgentRequest::AdaptPlan { signal } => {
                let outcome = adapt_active_plan(&ctx.services, &ctx.user_id, *signal)
                    .await?
                    .ok_or_else(|| CoachError::not_found("active plan", &ctx.user_id))?;
                AgentResult::ok(&outcome, Vec::new())
            }
            other => Err(unsupported(self.agent_type(), other)),
        }
    }
}

async fn generate(services: &Services, user_id: &str, topic: Option<&str>) -> Result<AgentResult> {
    services.store.get_user(user_id).await?;
    let mut warnings = Vec::new();
    let profile = if let Some(profile) = services.store.get_profile(user_id).await? {
        profile
    } else {
        warnings.push("No profile yet; planned for a beginner with default availability".to_string());
        UserProfile::new(user_id)
    };

    let topic = topic
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .or_else(|| profile.goals.first().cloned())
        .unwrap_or_else(|| format!("{} fundamentals", profile.preferred_language));
    let count = module_count(profile.timeframe_weeks);

    let prompt = format!(
        "Learner level: {}\nGoal: {topic}\nLanguage: {}\nModules: {count}\nWeekly hours: {}",
        profile.skill_level, profile.preferred_language, profile.time_constraints.hours_per_week
    );
    let reply = services.llm.generate(&prompt, SYSTEM_PROMPT).await;
    let (title, outline) = match reply.json().as_ref().and_then(from_llm) {
        Some(parsed) => parsed,
        None => {
            warnings.push("Plan outline built from templates; LLM unavailable".to_string());
            (format!("Learning path: {topic}"), template_outline(&topic, count))
        }
    };

    let plan = build_plan(services, &profile, &title, &outline, &mut warnings).await;
    if !plan.has_project() {
        return Err(CoachError::validation("generated plan has no mini-project"));
    }
    if !plan.difficulty_is_monotone() {
        warn!(plan_id = %plan.id, "Plan difficulty is not monotone");
        warnings.push("Task difficulty is not strictly progressive in this plan".to_string());
    }
    services.store.save_plan(&plan).await?;
    info!(plan_id = %plan.id, modules = plan.modules.len(), "Plan activated");
    AgentResult::ok(&plan, warnings)
}

/// Tasks scheduled up to `day` that are not completed yet, oldest first.
#[must_use]
pub fn due_tasks<'a>(plan: &'a LearningPlan, day: u32, completed: &HashSet<String>) -> Vec<&'a Task> {
    let pending: Vec<&Task> = plan.tasks().filter(|t| !completed.contains(&t.id)).collect();
    let due: Vec<&Task> = pending
        .iter()
        .copied()
        .filter(|t| t.day_offset.map_or(true, |d| d <= day))
        .collect();
    if due.is_empty() {
        pending.into_iter().take(1).collect()
    } else {
        due
    }
}
