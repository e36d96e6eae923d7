//! Docker container manager for sandboxed execution.
//!
//! This module provides the [`ContainerManager`] struct, which drives the
//! Docker daemon through bollard and implements [`ExecutionBackend`]. Every
//! container it creates is hardened: no network, read-only root filesystem,
//! all capabilities dropped, `no-new-privileges`, an unprivileged user, memory,
//! CPU and process ceilings, and a size-capped `noexec` tmpfs at `/tmp`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bollard::container::{
    Config as BollardConfig, CreateContainerOptions as BollardCreateOptions,
    KillContainerOptions, ListContainersOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StatsOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, Mount as BollardMount, MountTypeEnum, ResourcesUlimits};
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, info, instrument, warn};

use crate::backend::{truncate_output, ExecutionBackend, SandboxJob, SandboxOutcome};
use crate::harness::{self, SANDBOX_DIR};
use crate::limits::ResourceLimits;
use crate::{Container, ContainerStatus, Language, Mount, SandboxError};

/// Label attached to every sandbox container.
pub const SANDBOX_LABEL: &str = "coach.sandbox";

/// How long to keep draining stats after the container stops.
const STATS_GRACE: Duration = Duration::from_millis(250);

/// Options for creating a sandbox container.
///
/// # Example
///
/// ```no_run
/// use coach_sandbox::{CreateContainerOptions, Mount, ResourceLimits};
///
/// let options = CreateContainerOptions::new("coach-run-1", "python:3.11-slim")
///     .with_mount(Mount::read_only("/tmp/coach-run-1", "/sandbox"))
///     .with_env("PYTHONUNBUFFERED", "1")
///     .with_cmd(vec!["python3", "/sandbox/harness.py"])
///     .with_limits(ResourceLimits::default());
/// ```
#[derive(Debug, Clone)]
pub struct CreateContainerOptions {
    /// Human-readable name for the container.
    pub name: String,
    /// Docker image to use.
    pub image: String,
    /// Read-only mounts to attach to the container.
    pub mounts: Vec<Mount>,
    /// Environment variables to set in the container.
    pub env: Option<Vec<String>>,
    /// Optional command to run instead of the image's default.
    pub cmd: Option<Vec<String>>,
    /// Resource ceilings and sandbox user.
    pub limits: ResourceLimits,
}

impl CreateContainerOptions {
    /// Creates new container options with the specified name and image.
    #[must_use]
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            mounts: Vec::new(),
            env: None,
            cmd: None,
            limits: ResourceLimits::default(),
        }
    }

    /// Adds a volume mount to the container options.
    #[must_use]
    pub fn with_mount(mut self, mount: Mount) -> Self {
        self.mounts.push(mount);
        self
    }

    /// Adds an environment variable to the container options.
    ///
    /// Environment variables are passed as `KEY=VALUE` strings.
    #[must_use]
    pub fn with_env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        let env_var = format!("{}={}", key.as_ref(), value.as_ref());
        match &mut self.env {
            Some(env) => env.push(env_var),
            None => self.env = Some(vec![env_var]),
        }
        self
    }

    /// Sets the command to run in the container.
    #[must_use]
    pub fn with_cmd(mut self, cmd: Vec<impl Into<String>>) -> Self {
        self.cmd = Some(cmd.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the resource ceilings.
    #[must_use]
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// Manages sandbox containers.
///
/// `ContainerManager` wraps a bollard [`Docker`] client. Per-run workspaces are
/// created as temporary directories under `work_dir` and removed with the
/// container.
///
/// # Example
///
/// ```no_run
/// use coach_sandbox::ContainerManager;
///
/// # async fn example() -> Result<(), coach_sandbox::SandboxError> {
/// let manager = ContainerManager::new()?;
/// manager.health_check().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ContainerManager {
    docker: Docker,
    work_dir: PathBuf,
    images: HashMap<Language, String>,
}

impl ContainerManager {
    /// Connects to the local Docker daemon.
    ///
    /// Connecting does not contact the daemon; use [`Self::health_check`] to
    /// verify it is reachable.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::DockerApi`] if the client cannot be configured.
    pub fn new() -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()?;
        debug!("Connected to Docker daemon");
        Ok(Self {
            docker,
            work_dir: std::env::temp_dir(),
            images: HashMap::new(),
        })
    }

    /// Sets the host directory under which per-run workspaces are created.
    #[must_use]
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    /// Overrides the image used for `language`.
    #[must_use]
    pub fn with_image(mut self, language: Language, image: impl Into<String>) -> Self {
        self.images.insert(language, image.into());
        self
    }

    /// Image used for `language`.
    #[must_use]
    pub fn image_for(&self, language: Language) -> &str {
        self.images
            .get(&language)
            .map_or_else(|| language.default_image(), String::as_str)
    }

    /// Returns a reference to the underlying Docker client.
    #[must_use]
    pub const fn docker(&self) -> &Docker {
        &self.docker
    }

    /// Checks if the Docker daemon is reachable.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), SandboxError> {
        self.docker.ping().await?;
        debug!("Docker daemon health check passed");
        Ok(())
    }

    /// Pulls `image` if it is not present locally.
    #[instrument(skip(self))]
    pub async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        info!(image = %image, "Pulling sandbox image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            progress.map_err(|e| SandboxError::CreateFailed(format!("pull {image}: {e}")))?;
        }
        Ok(())
    }

    /// Creates a hardened sandbox container.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::InvalidMountPath`] if any mount's host path
    /// does not exist, or [`SandboxError::CreateFailed`] if Docker refuses.
    #[instrument(skip(self), fields(name = %options.name, image = %options.image))]
    pub async fn create_container(
        &self,
        options: CreateContainerOptions,
    ) -> Result<Container, SandboxError> {
        for mount in &options.mounts {
            validate_mount_path(&mount.host_path)?;
        }

        let host_config = sandbox_host_config(&options.mounts, &options.limits);
        let config = BollardConfig {
            image: Some(options.image.clone()),
            env: options.env.clone(),
            cmd: options.cmd.clone(),
            user: Some(options.limits.user.clone()),
            working_dir: Some("/tmp".to_string()),
            network_disabled: Some(true),
            tty: Some(false),
            labels: Some(HashMap::from([(SANDBOX_LABEL.to_string(), "true".to_string())])),
            host_config: Some(host_config),
            ..Default::default()
        };

        let create_options = BollardCreateOptions {
            name: options.name.as_str(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .map_err(|e| SandboxError::CreateFailed(e.to_string()))?;

        for warning in &response.warnings {
            warn!(container_id = %response.id, warning = %warning, "Docker warning during container creation");
        }

        debug!(container_id = %response.id, "Sandbox container created");

        Ok(Container::new(&response.id, &options.name, &options.image)
            .with_mounts(options.mounts))
    }

    /// Starts a created container.
    pub async fn start_container(&self, container: &mut Container) -> Result<(), SandboxError> {
        if !container.can_start() {
            return Err(SandboxError::InvalidState {
                expected: ContainerStatus::Created,
                actual: container.status,
            });
        }
        self.docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| SandboxError::StartFailed(e.to_string()))?;
        container.status = ContainerStatus::Running;
        Ok(())
    }

    /// Force-removes a container and its anonymous volumes.
    pub async fn remove_container(&self, container: &mut Container) -> Result<(), SandboxError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match self
            .docker
            .remove_container(&container.id, Some(options))
            .await
        {
            Ok(()) | Err(BollardError::DockerResponseServerError { status_code: 404, .. }) => {
                container.status = ContainerStatus::Gone;
                debug!(container_id = %container.id, "Sandbox container removed");
                Ok(())
            }
            Err(e) => Err(SandboxError::RemoveFailed(e.to_string())),
        }
    }

    /// Removes sandbox containers left behind by a previous process.
    ///
    /// Returns the number of containers removed.
    #[instrument(skip(self))]
    pub async fn sweep_orphans(&self) -> Result<usize, SandboxError> {
        let options = ListContainersOptions {
            all: true,
            filters: HashMap::from([("label".to_string(), vec![format!("{SANDBOX_LABEL}=true")])]),
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(options)).await?;
        let mut removed = 0;
        for summary in containers {
            let Some(id) = summary.id else { continue };
            let mut container = Container::new(id, "orphan", summary.image.unwrap_or_default());
            match self.remove_container(&mut container).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(container_id = %container.id, error = %e, "Failed to remove orphaned sandbox"),
            }
        }
        if removed > 0 {
            info!(removed, "Removed orphaned sandbox containers");
        }
        Ok(removed)
    }

    /// Runs a started container to completion under `limits`.
    ///
    /// Kills the container when the wall-clock timeout fires. Does not remove
    /// the container.
    async fn supervise(
        &self,
        container: &mut Container,
        limits: &ResourceLimits,
    ) -> Result<SandboxOutcome, SandboxError> {
        let started = Instant::now();
        self.start_container(container).await?;

        let peak_memory = Arc::new(AtomicU64::new(0));
        let cpu_time = Arc::new(AtomicU64::new(0));
        let mut sampler = tokio::spawn(sample_stats(
            self.docker.clone(),
            container.id.clone(),
            Arc::clone(&peak_memory),
            Arc::clone(&cpu_time),
        ));

        let wait = async {
            let mut stream = self.docker.wait_container(
                &container.id,
                Some(WaitContainerOptions {
                    condition: "not-running",
                }),
            );
            match stream.next().await {
                Some(Ok(response)) => Ok(Some(response.status_code)),
                Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(Some(code)),
                Some(Err(e)) => Err(e),
                None => Ok(None),
            }
        };

        let (mut exit_code, timed_out) = match tokio::time::timeout(limits.timeout(), wait).await {
            Ok(result) => (result?, false),
            Err(_) => {
                warn!(container_id = %container.id, timeout_ms = limits.timeout_ms, "Sandbox timed out, killing");
                if let Err(e) = self
                    .docker
                    .kill_container(&container.id, None::<KillContainerOptions<String>>)
                    .await
                {
                    warn!(container_id = %container.id, error = %e, "Failed to kill timed out sandbox");
                }
                (None, true)
            }
        };
        let wall_time = started.elapsed();
        container.status = ContainerStatus::Exited;

        let _ = tokio::time::timeout(STATS_GRACE, &mut sampler).await;
        sampler.abort();

        let mut oom_killed = false;
        match self.docker.inspect_container(&container.id, None).await {
            Ok(details) => {
                if let Some(state) = details.state {
                    oom_killed = state.oom_killed.unwrap_or(false);
                    if exit_code.is_none() {
                        exit_code = state.exit_code;
                    }
                }
            }
            Err(e) => warn!(container_id = %container.id, error = %e, "Failed to inspect sandbox"),
        }

        let (stdout, stderr) = self.collect_logs(&container.id).await;

        Ok(SandboxOutcome {
            exit_code,
            stdout: truncate_output(stdout, limits.max_output_bytes),
            stderr: truncate_output(stderr, limits.max_output_bytes),
            timed_out,
            oom_killed,
            peak_memory_bytes: peak_memory.load(Ordering::Relaxed),
            cpu_time_ns: cpu_time.load(Ordering::Relaxed),
            wall_time_ms: u64::try_from(wall_time.as_millis()).unwrap_or(u64::MAX),
        })
    }

    async fn collect_logs(&self, container_id: &str) -> (String, String) {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut stream = self.docker.logs(container_id, Some(options));
        let mut stdout = String::new();
        let mut stderr = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(LogOutput::StdOut { message } | LogOutput::Console { message }) => {
                    stdout.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(LogOutput::StdErr { message }) => {
                    stderr.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(LogOutput::StdIn { .. }) => {}
                Err(e) => {
                    warn!(container_id = %container_id, error = %e, "Failed to read sandbox logs");
                    break;
                }
            }
        }
        (stdout, stderr)
    }
}

#[async_trait]
impl ExecutionBackend for ContainerManager {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn is_available(&self) -> bool {
        self.health_check().await.is_ok()
    }

    #[instrument(skip(self, job), fields(execution_id = %job.execution_id, language = %job.language))]
    async fn run(&self, job: SandboxJob) -> Result<SandboxOutcome, SandboxError> {
        let image = self.image_for(job.language).to_string();
        self.ensure_image(&image).await?;

        let workspace = tempfile::Builder::new()
            .prefix("coach-run-")
            .tempdir_in(&self.work_dir)?;
        harness::write_workspace(workspace.path(), job.language, &job.code, &job.test_cases)?;

        let options = CreateContainerOptions::new(format!("coach-run-{}", job.execution_id), &image)
            .with_mount(Mount::read_only(workspace.path(), SANDBOX_DIR))
            .with_env("PYTHONUNBUFFERED", "1")
            .with_env("HOME", "/tmp")
            .with_env(harness::MARKER_ENV, &job.results_marker)
            .with_cmd(job.language.command(SANDBOX_DIR))
            .with_limits(job.limits.clone());

        let mut container = self.create_container(options).await?;
        let outcome = self.supervise(&mut container, &job.limits).await;

        if let Err(e) = self.remove_container(&mut container).await {
            warn!(container_id = %container.id, error = %e, "Failed to remove sandbox container");
        }

        let outcome = outcome?;
        info!(
            exit_code = ?outcome.exit_code,
            timed_out = outcome.timed_out,
            oom_killed = outcome.oom_killed,
            wall_time_ms = outcome.wall_time_ms,
            "Sandbox run finished"
        );
        Ok(outcome)
    }
}

/// Samples container stats until the stream ends or the task is aborted.
async fn sample_stats(
    docker: Docker,
    container_id: String,
    peak_memory: Arc<AtomicU64>,
    cpu_time: Arc<AtomicU64>,
) {
    let mut stream = docker.stats(
        &container_id,
        Some(StatsOptions {
            stream: true,
            one_shot: false,
        }),
    );
    while let Some(Ok(stats)) = stream.next().await {
        let usage = stats
            .memory_stats
            .usage
            .unwrap_or(0)
            .max(stats.memory_stats.max_usage.unwrap_or(0));
        peak_memory.fetch_max(usage, Ordering::Relaxed);
        cpu_time.fetch_max(stats.cpu_stats.cpu_usage.total_usage, Ordering::Relaxed);
    }
}

/// Host configuration applied to every sandbox.
fn sandbox_host_config(mounts: &[Mount], limits: &ResourceLimits) -> HostConfig {
    let cpu_secs = limits.cpu_time_limit_secs();
    HostConfig {
        mounts: Some(mounts.iter().map(convert_mount_to_bollard).collect()),
        memory: Some(limits.memory_i64()),
        memory_swap: Some(limits.memory_i64()),
        nano_cpus: Some(limits.nano_cpus()),
        pids_limit: Some(limits.pids_limit),
        network_mode: Some("none".to_string()),
        readonly_rootfs: Some(true),
        tmpfs: Some(HashMap::from([("/tmp".to_string(), limits.tmpfs_options())])),
        cap_drop: Some(vec!["ALL".to_string()]),
        security_opt: Some(vec!["no-new-privileges".to_string()]),
        ulimits: Some(vec![
            ResourcesUlimits {
                name: Some("cpu".to_string()),
                soft: Some(cpu_secs),
                hard: Some(cpu_secs.saturating_add(1)),
            },
            ResourcesUlimits {
                name: Some("nofile".to_string()),
                soft: Some(64),
                hard: Some(64),
            },
        ]),
        ..Default::default()
    }
}

/// Validates that a mount host path exists on the filesystem.
fn validate_mount_path(path: &Path) -> Result<(), SandboxError> {
    if !path.exists() {
        return Err(SandboxError::InvalidMountPath(format!(
            "host path does not exist: {}",
            path.display()
        )));
    }
    Ok(())
}

/// Converts our Mount struct to bollard's Mount format.
fn convert_mount_to_bollard(mount: &Mount) -> BollardMount {
    BollardMount {
        target: Some(mount.container_path.clone()),
        source: Some(mount.host_path.to_string_lossy().into_owned()),
        typ: Some(MountTypeEnum::BIND),
        read_only: Some(mount.read_only),
        ..Default::default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::execution::TestCase;
    use serde_json::json;

    #[test]
    fn create_container_options_defaults() {
        let options = CreateContainerOptions::new("coach-run-1", "python:3.11-slim");
        assert_eq!(options.name, "coach-run-1");
        assert!(options.mounts.is_empty());
        assert!(options.env.is_none());
        assert!(options.cmd.is_none());
        assert_eq!(options.limits, ResourceLimits::default());
    }

    #[test]
    fn create_container_options_with_env() {
        let options = CreateContainerOptions::new("test", "python:3.11-slim")
            .with_env("KEY1", "value1")
            .with_env("KEY2", "value2");
        let env = options.env.expect("env should be Some");
        assert_eq!(env, vec!["KEY1=value1", "KEY2=value2"]);
    }

    #[test]
    fn create_container_options_with_cmd() {
        let options = CreateContainerOptions::new("test", "python:3.11-slim")
            .with_cmd(Language::Python.command(SANDBOX_DIR));
        let cmd = options.cmd.expect("cmd should be Some");
        assert_eq!(cmd.last().map(String::as_str), Some("/sandbox/harness.py"));
    }

    #[test]
    fn host_config_isolates_network_and_filesystem() {
        let limits = ResourceLimits::default();
        let config = sandbox_host_config(&[Mount::read_only("/tmp", SANDBOX_DIR)], &limits);

        assert_eq!(config.network_mode.as_deref(), Some("none"));
        assert_eq!(config.readonly_rootfs, Some(true));
        assert_eq!(config.cap_drop, Some(vec!["ALL".to_string()]));
        assert_eq!(
            config.security_opt,
            Some(vec!["no-new-privileges".to_string()])
        );
        let tmpfs = config.tmpfs.expect("tmpfs should be set");
        assert!(tmpfs["/tmp"].contains("noexec"));
        let mounts = config.mounts.expect("mounts should be set");
        assert_eq!(mounts[0].read_only, Some(true));
    }

    #[test]
    fn host_config_applies_resource_ceilings() {
        let limits = ResourceLimits::default();
        let config = sandbox_host_config(&[], &limits);

        assert_eq!(config.memory, Some(256 * 1024 * 1024));
        assert_eq!(config.memory_swap, config.memory);
        assert_eq!(config.nano_cpus, Some(500_000_000));
        assert_eq!(config.pids_limit, Some(64));
        let ulimits = config.ulimits.expect("ulimits should be set");
        let cpu = ulimits
            .iter()
            .find(|u| u.name.as_deref() == Some("cpu"))
            .expect("cpu ulimit");
        assert_eq!(cpu.soft, Some(10));
        assert_eq!(cpu.hard, Some(11));
    }

    #[test]
    fn validate_mount_path_nonexistent() {
        let err = validate_mount_path(Path::new("/nonexistent/path/12345")).unwrap_err();
        assert!(
            matches!(err, SandboxError::InvalidMountPath(_)),
            "Expected InvalidMountPath, got: {err:?}"
        );
    }

    #[test]
    fn validate_mount_path_exists() {
        assert!(validate_mount_path(Path::new("/tmp")).is_ok());
    }

    #[test]
    fn convert_mount_to_bollard_read_only() {
        let mount = Mount::read_only("/host/run", SANDBOX_DIR);
        let bollard_mount = convert_mount_to_bollard(&mount);

        assert_eq!(bollard_mount.source, Some("/host/run".to_string()));
        assert_eq!(bollard_mount.target, Some(SANDBOX_DIR.to_string()));
        assert_eq!(bollard_mount.typ, Some(MountTypeEnum::BIND));
        assert_eq!(bollard_mount.read_only, Some(true));
    }

    #[test]
    fn image_overrides_take_precedence() {
        let Ok(manager) = ContainerManager::new() else {
            return;
        };
        let manager = manager.with_image(Language::Python, "coach-python:latest");
        assert_eq!(manager.image_for(Language::Python), "coach-python:latest");
        assert_eq!(manager.image_for(Language::JavaScript), "node:20-alpine");
    }

    fn job(code: &str, test_cases: Vec<TestCase>, limits: ResourceLimits) -> SandboxJob {
        SandboxJob::new(uuid::Uuid::new_v4().to_string(), Language::Python, code, test_cases, limits)
    }

    #[tokio::test]
    #[ignore = "requires running Docker daemon"]
    async fn health_check_succeeds_with_running_docker() {
        let manager = ContainerManager::new().expect("Failed to create manager");
        assert!(manager.health_check().await.is_ok());
    }

    #[tokio::test]
    #[ignore = "requires running Docker daemon"]
    async fn run_reports_harness_output() {
        let manager = ContainerManager::new().expect("Failed to create manager");
        let job = job(
            "def solution(x):\n    return x*2\nprint('hi')\n",
            vec![TestCase::new("", json!(2), json!(4))],
            ResourceLimits::default(),
        );
        let marker = job.results_marker.clone();
        let outcome = manager.run(job).await.expect("run");

        assert_eq!(outcome.exit_code, Some(0));
        assert!(!outcome.timed_out);
        assert!(outcome.stdout.contains("hi"));
        assert!(outcome.stdout.contains(&marker));
        let parsed = harness::parse_output(&outcome.stdout, &marker);
        assert!(parsed.results.is_some_and(|r| r.len() == 1 && r[0].passed));
    }

    #[tokio::test]
    #[ignore = "requires running Docker daemon"]
    async fn run_kills_on_timeout_and_removes_container() {
        let manager = ContainerManager::new().expect("Failed to create manager");
        let limits = ResourceLimits {
            timeout_ms: 2_000,
            ..ResourceLimits::default()
        };
        let job = job("while True:\n    pass\n", Vec::new(), limits);
        let name = format!("coach-run-{}", job.execution_id);
        let started = Instant::now();
        let outcome = manager.run(job).await.expect("run");

        assert!(outcome.timed_out);
        assert!(started.elapsed() < Duration::from_secs(8));
        assert!(manager.docker.inspect_container(&name, None).await.is_err());
    }

    #[tokio::test]
    #[ignore = "requires running Docker daemon"]
    async fn run_without_network() {
        let manager = ContainerManager::new().expect("Failed to create manager");
        let code = "import socket\ns = socket.create_connection(('1.1.1.1', 80), timeout=2)\n";
        let outcome = manager
            .run(job(code, Vec::new(), ResourceLimits::default()))
            .await
            .expect("run");
        assert_ne!(outcome.exit_code, Some(0));
    }
}
