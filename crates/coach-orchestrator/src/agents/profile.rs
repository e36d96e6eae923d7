//! Profile agent: turns a learner's free-text goals into a [`UserProfile`].

use async_trait::async_trait;
use chrono::Utc;
use coach_sandbox::Language;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument};

use super::{unsupported, Agent, AgentContext, AgentRequest, AgentResult, AgentType};
use crate::error::Result;
use crate::models::{LearningStyle, SkillLevel, UserProfile};

const SYSTEM_PROMPT: &str = "You are an experienced programming coach. Extract the learner's \
profile from their message. Reply with JSON only: {\"goals\": [string], \"skillLevel\": \
\"beginner|intermediate|advanced|expert\" or null, \"timeframeWeeks\": number or null, \
\"hoursPerWeek\": number or null, \"language\": \"python|javascript\" or null, \
\"learningStyle\": \"visual|auditory|kinesthetic|reading\" or null}.";

/// Messages shorter than this many words always get clarifying questions.
const MIN_WORDS: usize = 4;

const MAX_GOALS: usize = 5;

static GOAL_RE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:learn|master|build|become|understand|practice|get better at|improve(?: my)?|prepare for|write)\s+([^.,;!?\n]+)",
    )
    .ok()
});

static TIMEFRAME_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,3})\s*(day|week|month)s?\b").ok());

static HOURS_RE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})\s*(?:hours?|hrs?|h)\s*(?:a|per|each|every)\s*week\b").ok()
});

/// Result of a profile assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileAssessment {
    /// The profile after applying what was extracted.
    pub profile: UserProfile,
    /// Questions that would fill the gaps.
    pub clarifying_questions: Vec<String>,
    /// `true` when no goal could be identified.
    pub needs_clarification: bool,
    /// `llm` or `rules`.
    pub source: String,
}

/// Fields extracted from one message; `None` means "not mentioned".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    /// Learning goals.
    pub goals: Vec<String>,
    /// Self-reported level.
    pub skill_level: Option<SkillLevel>,
    /// Desired duration.
    pub timeframe_weeks: Option<u32>,
    /// Weekly availability.
    pub hours_per_week: Option<u32>,
    /// Language mentioned.
    pub language: Option<Language>,
    /// Preferred way of learning.
    pub learning_style: Option<LearningStyle>,
}

impl Extracted {
    fn apply(self, profile: &mut UserProfile) {
        if !self.goals.is_empty() {
            profile.goals = self.goals;
        }
        if let Some(level) = self.skill_level {
            profile.skill_level = level;
        }
        if let Some(weeks) = self.timeframe_weeks {
            profile.timeframe_weeks = Some(weeks);
        }
        if let Some(hours) = self.hours_per_week {
            profile.time_constraints.hours_per_week = hours;
        }
        if let Some(language) = self.language {
            profile.preferred_language = language;
        }
        if let Some(style) = self.learning_style {
            profile.learning_style = style;
        }
        profile.updated_at = Utc::now();
    }
}

/// Builds and updates learner profiles.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileAgent;

#[async_trait]
impl Agent for ProfileAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Profile
    }

    #[instrument(skip(self, ctx), fields(user_id = %ctx.user_id))]
    async fn process(&self, ctx: AgentContext) -> Result<AgentResult> {
        let AgentRequest::AssessSkill { message } = &ctx.request else {
            return Err(unsupported(self.agent_type(), &ctx.request));
        };
        let store = &ctx.services.store;
        store.get_user(&ctx.user_id).await?;

        let mut warnings = Vec::new();
        let (extracted, source) = match ctx.services.llm.generate(message, SYSTEM_PROMPT).await.json() {
            Some(value) => (from_llm(&value), "llm"),
            None => {
                warnings.push("Profile extracted with rule-based fallback; LLM unavailable".to_string());
                (extract_rules(message), "rules")
            }
        };

        let too_short = message.split_whitespace().count() < MIN_WORDS;
        let needs_clarification = extracted.goals.is_empty() || too_short;
        let clarifying_questions = questions_for(&extracted, too_short);

        let mut profile = store
            .get_profile(&ctx.user_id)
            .await?
            .unwrap_or_else(|| UserProfile::new(&ctx.user_id));
        extracted.apply(&mut profile);
        store.save_profile(&profile).await?;
        info!(
            goals = profile.goals.len(),
            skill = %profile.skill_level,
            needs_clarification,
            "Profile updated"
        );

        let assessment = ProfileAssessment {
            profile,
            clarifying_questions,
            needs_clarification,
            source: source.to_string(),
        };
        AgentResult::ok(&assessment, warnings)
    }
}

/// Reads an LLM reply, ignoring fields with unexpected shapes.
fn from_llm(value: &Value) -> Extracted {
    let goals = value
        .get("goals")
        .and_then(Value::as_array)
        .map(|goals| {
            goals
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .take(MAX_GOALS)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    let number = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n > 0)
    };
    let text = |key: &str| value.get(key).and_then(Value::as_str);

    Extracted {
        goals,
        skill_level: text("skillLevel").and_then(SkillLevel::parse),
        timeframe_weeks: number("timeframeWeeks"),
        hours_per_week: number("hoursPerWeek"),
        language: text("language").and_then(Language::parse),
        learning_style: text("learningStyle").and_then(parse_style),
    }
}

/// Rule-based extraction used when the LLM is unavailable.
#[must_use]
pub fn extract_rules(message: &str) -> Extracted {
    let lower = message.to_lowercase();

    let mut goals: Vec<String> = Vec::new();
    if let Some(re) = GOAL_RE.as_ref() {
        for caps in re.captures_iter(message) {
            let goal = caps[1].trim();
            let goal = goal
                .split(" in ")
                .next()
                .unwrap_or(goal)
                .trim()
                .to_string();
            if !goal.is_empty() && !goals.contains(&goal) {
                goals.push(goal);
            }
            if goals.len() == MAX_GOALS {
                break;
            }
        }
    }

    let timeframe_weeks = TIMEFRAME_RE.as_ref().and_then(|re| {
        let caps = re.captures(&lower)?;
        let n: u32 = caps[1].parse().ok()?;
        let weeks = match &caps[2] {
            "day" => n.div_ceil(7),
            "month" => n * 4,
            _ => n,
        };
        Some(weeks.max(1))
    });

    let hours_per_week = HOURS_RE
        .as_ref()
        .and_then(|re| re.captures(&lower))
        .and_then(|caps| caps[1].parse().ok())
        .filter(|h: &u32| *h > 0);

    Extracted {
        goals,
        skill_level: detect_skill(&lower),
        timeframe_weeks,
        hours_per_week,
        language: detect_language(&lower),
        learning_style: detect_style(&lower),
    }
}

fn detect_skill(lower: &str) -> Option<SkillLevel> {
    const TABLE: [(&[&str], SkillLevel); 4] = [
        (&["expert", "professional", "senior"], SkillLevel::Expert),
        (&["advanced", "experienced", "years of"], SkillLevel::Advanced),
        (
            &["intermediate", "some experience", "familiar with", "a bit of"],
            SkillLevel::Intermediate,
        ),
        (
            &["beginner", "new to", "never", "just started", "no experience", "from scratch"],
            SkillLevel::Beginner,
        ),
    ];
    TABLE
        .iter()
        .find(|(words, _)| words.iter().any(|w| lower.contains(w)))
        .map(|(_, level)| *level)
}

fn detect_language(lower: &str) -> Option<Language> {
    lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .find_map(Language::parse)
}

fn detect_style(lower: &str) -> Option<LearningStyle> {
    if ["hands-on", "hands on", "by doing", "projects", "practice"]
        .iter()
        .any(|w| lower.contains(w))
    {
        Some(LearningStyle::Kinesthetic)
    } else if ["video", "visual", "diagram"].iter().any(|w| lower.contains(w)) {
        Some(LearningStyle::Visual)
    } else if ["podcast", "listen", "audio"].iter().any(|w| lower.contains(w)) {
        Some(LearningStyle::Auditory)
    } else if ["reading", "books", "documentation", "articles"]
        .iter()
        .any(|w| lower.contains(w))
    {
        Some(LearningStyle::Reading)
    } else {
        None
    }
}

fn parse_style(s: &str) -> Option<LearningStyle> {
    match s.trim().to_lowercase().as_str() {
        "visual" => Some(LearningStyle::Visual),
        "auditory" => Some(LearningStyle::Auditory),
        "kinesthetic" | "hands-on" => Some(LearningStyle::Kinesthetic),
        "reading" => Some(LearningStyle::Reading),
        _ => None,
    }
}

fn questions_for(extracted: &Extracted, too_short: bool) -> Vec<String> {
    let mut questions = Vec::new();
    if extracted.goals.is_empty() || too_short {
        questions.push(
            "What would you like to be able to build or do when you finish?".to_string(),
        );
    }
    if extracted.skill_level.is_none() {
        questions.push(
            "How much programming experience do you have: beginner, intermediate or advanced?"
                .to_string(),
        );
    }
    if extracted.timeframe_weeks.is_none() {
        questions.push(
            "How many weeks would you like to spend, and how many hours per week can you study?"
                .to_string(),
        );
    }
    questions
}
