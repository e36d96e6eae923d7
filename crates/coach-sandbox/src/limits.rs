//! Resource ceilings applied to every sandbox.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::SandboxError;

/// Exit status of a process killed by `SIGXCPU` (128 + 24).
pub const EXIT_CPU_LIMIT: i64 = 152;

/// Exit status of a process killed by `SIGKILL` (128 + 9).
pub const EXIT_KILLED: i64 = 137;

const MIB: u64 = 1024 * 1024;

const fn default_memory_bytes() -> u64 {
    256 * MIB
}

const fn default_cpu_share() -> f64 {
    0.5
}

const fn default_timeout_ms() -> u64 {
    10_000
}

const fn default_tmpfs_bytes() -> u64 {
    16 * MIB
}

const fn default_pids_limit() -> i64 {
    64
}

fn default_user() -> String {
    "65534:65534".to_string()
}

const fn default_max_output_bytes() -> usize {
    64 * 1024
}

const fn default_max_concurrent() -> usize {
    4
}

const fn default_queue_timeout_ms() -> u64 {
    10_000
}

/// Limits for a single execution.
///
/// Defaults: 256 MiB memory with swap disabled, half a CPU core, 10 second
/// wall clock, 16 MiB `noexec` scratch space at `/tmp`, 64 processes and the
/// unprivileged `nobody` user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimits {
    /// Memory ceiling in bytes. Swap is capped to the same value.
    #[serde(default = "default_memory_bytes")]
    pub memory_bytes: u64,

    /// Fraction of one CPU core the sandbox may use.
    #[serde(default = "default_cpu_share")]
    pub cpu_share: f64,

    /// Wall-clock timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Size of the writable `/tmp` tmpfs in bytes.
    #[serde(default = "default_tmpfs_bytes")]
    pub tmpfs_bytes: u64,

    /// Maximum number of processes inside the sandbox.
    #[serde(default = "default_pids_limit")]
    pub pids_limit: i64,

    /// `uid:gid` the sandboxed process runs as.
    #[serde(default = "default_user")]
    pub user: String,

    /// Captured stdout/stderr is truncated beyond this many bytes.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Maximum number of sandboxes running at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// How long a run may wait for a free slot before it is refused.
    #[serde(default = "default_queue_timeout_ms")]
    pub queue_timeout_ms: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_bytes: default_memory_bytes(),
            cpu_share: default_cpu_share(),
            timeout_ms: default_timeout_ms(),
            tmpfs_bytes: default_tmpfs_bytes(),
            pids_limit: default_pids_limit(),
            user: default_user(),
            max_output_bytes: default_max_output_bytes(),
            max_concurrent: default_max_concurrent(),
            queue_timeout_ms: default_queue_timeout_ms(),
        }
    }
}

impl ResourceLimits {
    /// Wall-clock timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Longest wait for a free execution slot.
    #[must_use]
    pub const fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }

    /// CPU quota expressed in Docker's nano-CPU units.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn nano_cpus(&self) -> i64 {
        (self.cpu_share * 1_000_000_000.0).round() as i64
    }

    /// `RLIMIT_CPU` soft limit in seconds.
    ///
    /// At the configured share a CPU-bound process reaches this only after the
    /// wall-clock timeout, so it catches runaway CPU use when the share is
    /// raised above one core.
    #[must_use]
    pub fn cpu_time_limit_secs(&self) -> i64 {
        i64::try_from(self.timeout_ms.div_ceil(1000)).unwrap_or(i64::MAX)
    }

    /// Memory ceiling as the signed value Docker expects.
    #[must_use]
    pub fn memory_i64(&self) -> i64 {
        i64::try_from(self.memory_bytes).unwrap_or(i64::MAX)
    }

    /// Mount options for the `/tmp` scratch area.
    #[must_use]
    pub fn tmpfs_options(&self) -> String {
        format!("rw,noexec,nosuid,nodev,size={}", self.tmpfs_bytes)
    }

    /// Checks that every limit is usable.
    pub fn validate(&self) -> Result<(), SandboxError> {
        if self.memory_bytes < 16 * MIB {
            return Err(SandboxError::InvalidRequest(
                "memoryBytes must be at least 16 MiB".into(),
            ));
        }
        if !(self.cpu_share > 0.0 && self.cpu_share <= 4.0) {
            return Err(SandboxError::InvalidRequest(
                "cpuShare must be in (0, 4]".into(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(SandboxError::InvalidRequest(
                "timeoutMs must be greater than 0".into(),
            ));
        }
        if self.pids_limit <= 0 {
            return Err(SandboxError::InvalidRequest(
                "pidsLimit must be greater than 0".into(),
            ));
        }
        if self.max_concurrent == 0 {
            return Err(SandboxError::InvalidRequest(
                "maxConcurrent must be greater than 0".into(),
            ));
        }
        if self.queue_timeout_ms == 0 {
            return Err(SandboxError::InvalidRequest(
                "queueTimeoutMs must be greater than 0".into(),
            ));
        }
        if self.user.starts_with("0:") || self.user == "0" || self.user == "root" {
            return Err(SandboxError::InvalidRequest(
                "sandbox user must not be root".into(),
            ));
        }
        Ok(())
    }
}
