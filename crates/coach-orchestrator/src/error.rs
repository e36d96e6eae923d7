//! Error types for the learning coach.
//!
//! Every fallible operation in the orchestrator crate returns [`CoachError`].
//! Variants carry enough context to map onto an HTTP status (see
//! [`CoachError::status_code`]) and, where the caller can act on it, an
//! actionable suggestion.

use std::path::PathBuf;

use coach_sandbox::{SandboxError, Violation};

/// A specialized `Result` type for learning coach operations.
pub type Result<T> = std::result::Result<T, CoachError>;

/// Errors that can occur while serving a learner.
#[derive(Debug, thiserror::Error)]
pub enum CoachError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in the configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your coach.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Caller Errors
    // ========================================================================
    /// The request is malformed or violates a domain rule.
    #[error("Validation failed: {message}")]
    Validation {
        /// Which field or rule failed.
        message: String,
    },

    /// Submitted code was refused before execution.
    #[error("Security violation: {summary}")]
    SecurityViolation {
        /// Short description.
        summary: String,
        /// Every violation the validator reported.
        violations: Vec<Violation>,
    },

    /// A requested entity does not exist.
    #[error("{entity} not found: '{id}'")]
    NotFound {
        /// Kind of entity ("task", "submission", ...).
        entity: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// Duplicate or concurrently modified entity.
    #[error("Conflict: {message}")]
    Conflict {
        /// What collided.
        message: String,
    },

    /// Missing, malformed, or expired bearer token.
    #[error("Unauthorized: {message}")]
    Unauthorized {
        /// Why the token was refused.
        message: String,
    },

    // ========================================================================
    // Execution Errors
    // ========================================================================
    /// Learner code hit a resource ceiling.
    #[error("Resource limit exceeded: {kind}")]
    ResourceLimitExceeded {
        /// Which ceiling (`memory_exceeded`, `cpu_exceeded`, `timeout`).
        kind: String,
    },

    /// The sandbox failed for reasons unrelated to learner code.
    #[error("Execution failed: {message}")]
    Execution {
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // Upstream Errors
    // ========================================================================
    /// An LLM provider, vector store, or container runtime is unreachable.
    #[error("{service} is unavailable: {message}\n\nSuggestion: {suggestion}")]
    UpstreamUnavailable {
        /// Which dependency failed.
        service: String,
        /// Description of the failure.
        message: String,
        /// Actionable suggestion for the operator.
        suggestion: String,
    },

    /// Every sandbox slot stayed taken for the whole queue timeout.
    #[error("Sandbox is busy: {message}\n\nSuggestion: Retry in a few seconds")]
    Busy {
        /// Description of the wait.
        message: String,
    },

    /// An agent exceeded its time budget.
    #[error("Agent '{agent}' timed out after {timeout_ms}ms")]
    AgentTimeout {
        /// Agent that timed out.
        agent: String,
        /// The timeout in milliseconds.
        timeout_ms: u64,
    },

    // ========================================================================
    // Persistence Errors
    // ========================================================================
    /// Database failure.
    #[error("Database error: {0}\n\nSuggestion: Check DATABASE_URL and that the file is writable")]
    Database(#[from] rusqlite::Error),

    /// A blocking task was cancelled or panicked.
    #[error("Background task failed: {0}")]
    TaskJoin(String),

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Report rendering failed.
    #[error("Report error: {0}")]
    Report(#[from] coach_report::ReportError),

    // ========================================================================
    // State Machine Errors
    // ========================================================================
    /// Invalid state transition attempted.
    #[error("Invalid state transition: cannot go from {from} to {to}")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
    },
}

impl CoachError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `Validation` error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a new `Unauthorized` error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Creates a `SecurityViolation` from validator findings.
    #[must_use]
    pub fn security_violation(violations: Vec<Violation>) -> Self {
        let rules: Vec<&str> = violations.iter().map(|v| v.rule.as_str()).collect();
        Self::SecurityViolation {
            summary: format!("code refused ({})", rules.join(", ")),
            violations,
        }
    }

    /// Creates a new `UpstreamUnavailable` error with a suggestion derived from the service.
    #[must_use]
    pub fn upstream(service: impl Into<String>, message: impl Into<String>) -> Self {
        let service = service.into();
        let suggestion = match service.as_str() {
            "llm" => "Check ANTHROPIC_API_KEY / OPENAI_API_KEY and the provider's status page",
            "sandbox" => "Ensure Docker is installed and the daemon is running (try 'docker info')",
            "vector_store" => "Check VECTOR_STORE_URL or unset it to use the curated catalogue",
            _ => "Retry later",
        }
        .to_string();
        Self::UpstreamUnavailable {
            service,
            message: message.into(),
            suggestion,
        }
    }

    /// Creates a new `InvalidStateTransition` error.
    #[must_use]
    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Returns `true` if this error is transient and may be retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable { .. }
                | Self::Busy { .. }
                | Self::AgentTimeout { .. }
                | Self::TaskJoin(_)
        )
    }

    /// Returns `true` if this error should trip the agent's circuit breaker.
    ///
    /// Caller mistakes (bad input, unknown ids, refused code) and a full
    /// sandbox queue say nothing about the agent's health.
    #[must_use]
    pub const fn counts_against_breaker(&self) -> bool {
        !matches!(
            self,
            Self::Validation { .. }
                | Self::NotFound { .. }
                | Self::Conflict { .. }
                | Self::Unauthorized { .. }
                | Self::SecurityViolation { .. }
                | Self::Busy { .. }
        )
    }

    /// HTTP status code this error maps to.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::SecurityViolation { .. } | Self::ResourceLimitExceeded { .. } => 422,
            Self::Unauthorized { .. } => 401,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::UpstreamUnavailable { .. } | Self::Busy { .. } | Self::AgentTimeout { .. } => 503,
            _ => 500,
        }
    }
}

impl From<SandboxError> for CoachError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::InvalidRequest(message) => Self::Validation { message },
            err @ SandboxError::Busy { .. } => Self::Busy {
                message: err.to_string(),
            },
            err if err.is_unavailable() => Self::upstream("sandbox", err.to_string()),
            SandboxError::InvalidTransition { from, to } => Self::invalid_transition(from, to),
            err => Self::Execution {
                message: err.to_string(),
            },
        }
    }
}

impl From<tokio::task::JoinError> for CoachError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}
