//! Learning Coach Sandbox
//!
//! Static security validation and isolated execution of learner-submitted code.
//!
//! The crate is organised leaf-first:
//!
//! - [`validator`] scans source code for dangerous patterns before anything runs
//! - [`limits`] holds the resource ceilings applied to every sandbox
//! - [`harness`] wraps learner code in a per-language test harness
//! - [`manager`] drives the Docker daemon through bollard
//! - [`runner`] ties the pieces together behind [`SecureCodeRunner::execute`]

pub mod backend;
pub mod execution;
pub mod harness;
pub mod limits;
pub mod manager;
pub mod runner;
pub mod state;
pub mod validator;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use backend::{
    ExecutionBackend, SandboxJob, SandboxOutcome, ScriptedBackend, UnavailableBackend,
};
pub use execution::{
    ErrorKind, ExecutionRequest, ExecutionResult, ExecutionStatus, ResourceUsage, TestCase,
    TestCaseResult,
};
pub use limits::ResourceLimits;
pub use manager::{ContainerManager, CreateContainerOptions};
pub use runner::SecureCodeRunner;
pub use state::{ExecutionState, ExecutionTracker};
pub use validator::{SecurityValidator, Severity, ValidationReport, Violation, MAX_CODE_BYTES};

/// Errors that can occur while validating or executing code.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Failed to create container.
    #[error("failed to create container: {0}")]
    CreateFailed(String),

    /// Failed to start container.
    #[error("failed to start container: {0}")]
    StartFailed(String),

    /// Failed to remove container.
    #[error("failed to remove container: {0}")]
    RemoveFailed(String),

    /// Docker API error.
    #[error("docker API error: {0}")]
    DockerApi(#[from] bollard::errors::Error),

    /// Invalid container state for the requested operation.
    #[error("invalid container state: expected {expected}, found {actual}")]
    InvalidState {
        /// The expected container state.
        expected: ContainerStatus,
        /// The actual container state.
        actual: ContainerStatus,
    },

    /// Mount path error.
    #[error("invalid mount path: {0}")]
    InvalidMountPath(String),

    /// The isolation runtime cannot be reached.
    #[error("sandbox runtime unavailable: {0}")]
    Unavailable(String),

    /// The execution request is malformed (empty code, oversized input, ...).
    #[error("invalid execution request: {0}")]
    InvalidRequest(String),

    /// Execution state machine was asked to make an illegal move.
    #[error("invalid execution state transition: cannot go from {from} to {to}")]
    InvalidTransition {
        /// The current state.
        from: ExecutionState,
        /// The attempted target state.
        to: ExecutionState,
    },

    /// Failed to prepare the per-run workspace on the host.
    #[error("workspace error: {0}")]
    Workspace(#[from] std::io::Error),

    /// Failed to encode harness input.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Every execution slot stayed taken for the whole queue timeout.
    #[error("sandbox is busy: no execution slot became free within {waited_ms}ms")]
    Busy {
        /// How long the run waited.
        waited_ms: u64,
    },

    /// The spawned execution task panicked or was aborted.
    #[error("execution task failed: {0}")]
    TaskFailed(String),
}

impl SandboxError {
    /// Returns `true` when the error means the runtime itself is unreachable.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::DockerApi(_))
    }
}

/// Languages the sandbox knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Python 3.
    #[default]
    Python,
    /// JavaScript on Node.js.
    #[serde(alias = "js", alias = "node")]
    JavaScript,
}

impl Language {
    /// Parses a language tag, case-insensitively, accepting common aliases.
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_lowercase().as_str() {
            "python" | "python3" | "py" => Some(Self::Python),
            "javascript" | "js" | "node" | "nodejs" => Some(Self::JavaScript),
            _ => None,
        }
    }

    /// Default container image for this language.
    #[must_use]
    pub const fn default_image(self) -> &'static str {
        match self {
            Self::Python => "python:3.11-slim",
            Self::JavaScript => "node:20-alpine",
        }
    }

    /// File name the learner's code is written to inside the sandbox.
    #[must_use]
    pub const fn solution_file(self) -> &'static str {
        match self {
            Self::Python => "solution.py",
            Self::JavaScript => "solution.js",
        }
    }

    /// File name of the generated harness.
    #[must_use]
    pub const fn harness_file(self) -> &'static str {
        match self {
            Self::Python => "harness.py",
            Self::JavaScript => "harness.js",
        }
    }

    /// Command that runs the harness from `dir`.
    #[must_use]
    pub fn command(self, dir: &str) -> Vec<String> {
        let harness = format!("{dir}/{}", self.harness_file());
        match self {
            Self::Python => vec!["python3".into(), "-B".into(), "-I".into(), harness],
            Self::JavaScript => vec!["node".into(), harness],
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Python => write!(f, "python"),
            Self::JavaScript => write!(f, "javascript"),
        }
    }
}

/// Status of a Docker container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    /// Container has been created but not started.
    #[default]
    Created,
    /// Container is currently running.
    Running,
    /// Container process has exited.
    Exited,
    /// Container no longer exists.
    Gone,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Exited => write!(f, "exited"),
            Self::Gone => write!(f, "gone"),
        }
    }
}

/// A mount point binding a host path to a container path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Path on the host filesystem.
    pub host_path: PathBuf,
    /// Path inside the container.
    pub container_path: String,
    /// Whether the mount is read-only.
    pub read_only: bool,
}

impl Mount {
    /// Creates a new read-only mount.
    ///
    /// Sandboxes never receive writable bind mounts; the only writable area is
    /// the tmpfs configured through [`ResourceLimits`].
    #[must_use]
    pub fn read_only(host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: true,
        }
    }
}

/// A sandbox container managed by the runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    /// Unique identifier assigned by Docker.
    pub id: String,
    /// Human-readable name for the container.
    pub name: String,
    /// Docker image used to create this container.
    pub image: String,
    /// Current status of the container.
    pub status: ContainerStatus,
    /// Read-only bind mounts.
    pub mounts: Vec<Mount>,
}

impl Container {
    /// Creates a new container representation.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            image: image.into(),
            status: ContainerStatus::default(),
            mounts: Vec::new(),
        }
    }

    /// Adds multiple mounts to the container.
    #[must_use]
    pub fn with_mounts(mut self, mounts: impl IntoIterator<Item = Mount>) -> Self {
        self.mounts.extend(mounts);
        self
    }

    /// Returns whether the container can be started.
    #[must_use]
    pub const fn can_start(&self) -> bool {
        matches!(self.status, ContainerStatus::Created)
    }
}
