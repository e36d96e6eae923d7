//! Learning coach orchestrator
//!
//! Specialist agents, the intent router with per-agent circuit breakers,
//! SQLite persistence, bearer-token auth and the HTTP API.

pub mod agents;
pub mod analytics;
pub mod api;
pub mod auth;
pub mod breaker;
pub mod config;
pub mod error;
pub mod gamification;
pub mod llm;
pub mod models;
pub mod router;
pub mod store;

pub use agents::{Agent, AgentContext, AgentRegistry, AgentRequest, AgentResult, AgentType, Services};
pub use api::{create_router, ApiError, AppState, ErrorResponse};
pub use auth::{AuthUser, Claims, JwtKeys};
pub use breaker::{BreakerSnapshot, BreakerState, CircuitBreaker};
pub use config::{BreakerConfig, Config, LlmProvider, SandboxConfig};
pub use error::{CoachError, Result};
pub use llm::{LlmClient, LlmErrorKind, LlmResponse};
pub use router::{classify, Classification, Intent, Orchestrator, OrchestratorResponse};
pub use store::Store;
