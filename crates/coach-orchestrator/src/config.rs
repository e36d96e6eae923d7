//! Configuration for the learning coach service.
//!
//! Settings come from `coach.json` (camelCase, every field optional) and are
//! then overlaid with environment variables. Secrets such as the JWT signing
//! key and provider API keys are only ever read from the environment.

use std::path::Path;

use coach_sandbox::ResourceLimits;
use serde::{Deserialize, Serialize};

use crate::error::{CoachError, Result};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "coach.json";

/// Minimum length of the JWT signing secret in bytes.
pub const MIN_JWT_SECRET_BYTES: usize = 32;

fn default_database_url() -> String {
    "coach.db".to_string()
}

const fn default_llm_timeout_ms() -> u64 {
    20_000
}

const fn default_agent_timeout_ms() -> u64 {
    45_000
}

const fn default_resource_ttl_secs() -> u64 {
    3600
}

const fn default_token_ttl_hours() -> i64 {
    24
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_window_secs() -> u64 {
    60
}

const fn default_cooldown_secs() -> u64 {
    30
}

const fn default_true() -> bool {
    true
}

fn default_python_image() -> String {
    coach_sandbox::Language::Python.default_image().to_string()
}

fn default_javascript_image() -> String {
    coach_sandbox::Language::JavaScript.default_image().to_string()
}

/// Main configuration for the coach service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// SQLite database path (`:memory:` for an in-memory database).
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Optional Qdrant base URL for resource search.
    #[serde(default)]
    pub vector_store_url: Option<String>,

    /// LLM provider used by the agents.
    #[serde(default)]
    pub llm_provider: LlmProvider,

    /// Model override for the selected provider.
    #[serde(default)]
    pub llm_model: Option<String>,

    /// Timeout for a single LLM call in milliseconds.
    #[serde(default = "default_llm_timeout_ms")]
    pub llm_timeout_ms: u64,

    /// Timeout for a single agent invocation in milliseconds.
    #[serde(default = "default_agent_timeout_ms")]
    pub agent_timeout_ms: u64,

    /// How long cached resources stay fresh, in seconds.
    #[serde(default = "default_resource_ttl_secs")]
    pub resource_cache_ttl_secs: u64,

    /// Lifetime of issued bearer tokens, in hours.
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,

    /// Origins allowed by CORS. Empty or `*` allows any origin.
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,

    /// Circuit breaker tuning shared by every agent.
    #[serde(default)]
    pub breaker: BreakerConfig,

    /// Code sandbox settings.
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Secrets loaded from the environment; never serialized.
    #[serde(skip)]
    pub secrets: Secrets,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            vector_store_url: None,
            llm_provider: LlmProvider::default(),
            llm_model: None,
            llm_timeout_ms: default_llm_timeout_ms(),
            agent_timeout_ms: default_agent_timeout_ms(),
            resource_cache_ttl_secs: default_resource_ttl_secs(),
            token_ttl_hours: default_token_ttl_hours(),
            cors_allowed_origins: Vec::new(),
            breaker: BreakerConfig::default(),
            sandbox: SandboxConfig::default(),
            secrets: Secrets::default(),
        }
    }
}

impl Config {
    /// Loads configuration from `coach.json` in the current working directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            CoachError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `coach.json` in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// A missing file yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::ConfigParseError` for unreadable files or invalid
    /// JSON, and `CoachError::ConfigValidationError` for out-of-range values.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(CoachError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| CoachError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Overlays values from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::ConfigValidationError` if `COACH_LLM_PROVIDER` is
    /// not a known provider.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlays values from `lookup`, which maps variable names to values.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::ConfigValidationError` if `COACH_LLM_PROVIDER` is
    /// not a known provider.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("DATABASE_URL") {
            self.database_url = url.trim_start_matches("sqlite://").to_string();
        }
        if let Some(url) = get("VECTOR_STORE_URL") {
            self.vector_store_url = Some(url);
        }
        if let Some(provider) = get("COACH_LLM_PROVIDER") {
            self.llm_provider = LlmProvider::from_str_case_insensitive(&provider).ok_or_else(|| {
                CoachError::config_validation(
                    format!("COACH_LLM_PROVIDER '{provider}' is not a known provider"),
                    "Use one of 'anthropic', 'openai', 'offline'",
                )
            })?;
        }
        if let Some(origins) = get("CORS_ALLOWED_ORIGINS") {
            self.cors_allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(ToString::to_string)
                .collect();
        }

        self.secrets.jwt_secret = get("JWT_SECRET");
        self.secrets.anthropic_api_key = get("ANTHROPIC_API_KEY");
        self.secrets.openai_api_key = get("OPENAI_API_KEY");
        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::ConfigValidationError` if any check fails.
    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            return Err(CoachError::config_validation(
                "databaseUrl must not be empty",
                "Set databaseUrl in coach.json or DATABASE_URL (use ':memory:' for tests)",
            ));
        }

        if self.llm_timeout_ms == 0 || self.agent_timeout_ms == 0 {
            return Err(CoachError::config_validation(
                "llmTimeoutMs and agentTimeoutMs must be greater than 0",
                "Set both timeouts to at least 1 millisecond in your coach.json",
            ));
        }

        if self.token_ttl_hours <= 0 {
            return Err(CoachError::config_validation(
                "tokenTtlHours must be greater than 0",
                "Set tokenTtlHours to at least 1 in your coach.json",
            ));
        }

        if self.breaker.failure_threshold == 0 {
            return Err(CoachError::config_validation(
                "breaker.failureThreshold must be greater than 0",
                "Set breaker.failureThreshold to at least 1 in your coach.json",
            ));
        }

        if self.breaker.cooldown_secs == 0 || self.breaker.window_secs == 0 {
            return Err(CoachError::config_validation(
                "breaker.cooldownSecs and breaker.windowSecs must be greater than 0",
                "Set both to at least 1 second in your coach.json",
            ));
        }

        self.sandbox.limits.validate().map_err(|e| {
            CoachError::config_validation(
                format!("invalid sandbox limits: {e}"),
                "Check the sandbox section of your coach.json",
            )
        })?;

        Ok(())
    }

    /// Returns the JWT signing secret, enforcing its presence and minimum length.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::ConfigValidationError` if `JWT_SECRET` is unset or
    /// shorter than [`MIN_JWT_SECRET_BYTES`].
    pub fn require_jwt_secret(&self) -> Result<&str> {
        match self.secrets.jwt_secret.as_deref() {
            Some(secret) if secret.len() >= MIN_JWT_SECRET_BYTES => Ok(secret),
            Some(_) => Err(CoachError::config_validation(
                format!("JWT_SECRET must be at least {MIN_JWT_SECRET_BYTES} bytes"),
                "Generate one with 'openssl rand -hex 32'",
            )),
            None => Err(CoachError::config_validation(
                "JWT_SECRET is not set",
                "Export JWT_SECRET (at least 32 bytes) before starting the server",
            )),
        }
    }

    /// Returns `true` when CORS should allow any origin.
    #[must_use]
    pub fn cors_allows_any(&self) -> bool {
        self.cors_allowed_origins.is_empty() || self.cors_allowed_origins.iter().any(|o| o == "*")
    }
}

/// Supported LLM providers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LlmProvider {
    /// Anthropic Messages API (default).
    #[default]
    Anthropic,
    /// `OpenAI` Chat Completions API.
    OpenAi,
    /// No provider; every agent uses its deterministic fallback.
    Offline,
}

impl LlmProvider {
    /// Parses a string into an `LlmProvider`, case-insensitively.
    fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "anthropic" | "claude" => Some(Self::Anthropic),
            "openai" | "gpt" => Some(Self::OpenAi),
            "offline" | "none" => Some(Self::Offline),
            _ => None,
        }
    }

    /// Canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Offline => "offline",
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LlmProvider {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid LLM provider '{s}': expected one of 'anthropic', 'openai', 'offline'"
            ))
        })
    }
}

impl Serialize for LlmProvider {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// Circuit breaker tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerConfig {
    /// Consecutive failures inside the window that open the breaker.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Failures older than this many seconds no longer count.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Seconds the breaker stays open before allowing a probe.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            window_secs: default_window_secs(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

/// Code sandbox settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxConfig {
    /// When `false` the runner never contacts Docker and only validates code.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Image used for Python submissions.
    #[serde(default = "default_python_image")]
    pub python_image: String,

    /// Image used for JavaScript submissions.
    #[serde(default = "default_javascript_image")]
    pub javascript_image: String,

    /// Resource ceilings.
    #[serde(flatten)]
    pub limits: ResourceLimits,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            python_image: default_python_image(),
            javascript_image: default_javascript_image(),
            limits: ResourceLimits::default(),
        }
    }
}

/// Secrets sourced from the environment.
#[derive(Clone, Default)]
pub struct Secrets {
    /// HS256 signing key for bearer tokens.
    pub jwt_secret: Option<String>,
    /// Anthropic API key.
    pub anthropic_api_key: Option<String>,
    /// `OpenAI` API key.
    pub openai_api_key: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |s: &Option<String>| if s.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Secrets")
            .field("jwt_secret", &mask(&self.jwt_secret))
            .field("anthropic_api_key", &mask(&self.anthropic_api_key))
            .field("openai_api_key", &mask(&self.openai_api_key))
            .finish()
    }
}
