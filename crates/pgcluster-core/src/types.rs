use crate::error::{ProvisionError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Plan,
    Apply,
    DeriveInventory,
    RenderConfig,
    RunConfig,
}

impl Phase {
    pub fn all() -> &'static [Phase] {
        &[
            Phase::Init,
            Phase::Plan,
            Phase::Apply,
            Phase::DeriveInventory,
            Phase::RenderConfig,
            Phase::RunConfig,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Plan => "plan",
            Phase::Apply => "apply",
            Phase::DeriveInventory => "derive_inventory",
            Phase::RenderConfig => "render_config",
            Phase::RunConfig => "run_config",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PhaseResult
// ---------------------------------------------------------------------------

/// Outcome of a single pipeline phase. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: Phase,
    pub succeeded: bool,
    pub stdout: String,
    pub stderr: String,
    /// `None` when the child was killed (signal or timeout) or the phase
    /// did not spawn a process.
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl PhaseResult {
    /// Result for a phase that ran in-process rather than as an external tool.
    pub fn internal(phase: Phase, message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            phase,
            succeeded: true,
            stdout: message.into(),
            stderr: String::new(),
            exit_code: None,
            timed_out: false,
            duration_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// ProvisioningRequest
// ---------------------------------------------------------------------------

pub const DEFAULT_MACHINE_CLASS: &str = "t2.micro";
pub const DEFAULT_REPLICA_COUNT: u32 = 1;
pub const MAX_REPLICA_COUNT: u32 = 32;

static MACHINE_CLASS_RE: OnceLock<Regex> = OnceLock::new();

fn machine_class_re() -> &'static Regex {
    MACHINE_CLASS_RE
        .get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9.\-]{0,63}$").expect("valid regex"))
}

/// Validated provisioning parameters. Construct through [`ProvisioningRequest::new`]
/// or deserialize (which runs the same validation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawProvisioningRequest")]
pub struct ProvisioningRequest {
    machine_class: String,
    replica_count: u32,
}

#[derive(Deserialize)]
struct RawProvisioningRequest {
    #[serde(default = "default_machine_class")]
    machine_class: String,
    #[serde(default = "default_replica_count")]
    replica_count: u32,
}

fn default_machine_class() -> String {
    DEFAULT_MACHINE_CLASS.to_string()
}

fn default_replica_count() -> u32 {
    DEFAULT_REPLICA_COUNT
}

impl TryFrom<RawProvisioningRequest> for ProvisioningRequest {
    type Error = ProvisionError;

    fn try_from(raw: RawProvisioningRequest) -> Result<Self> {
        ProvisioningRequest::new(raw.machine_class, raw.replica_count)
    }
}

impl Default for ProvisioningRequest {
    fn default() -> Self {
        Self {
            machine_class: default_machine_class(),
            replica_count: default_replica_count(),
        }
    }
}

impl ProvisioningRequest {
    pub fn new(machine_class: impl Into<String>, replica_count: u32) -> Result<Self> {
        let machine_class = machine_class.into();
        if !machine_class_re().is_match(&machine_class) {
            return Err(ProvisionError::InvalidRequest(format!(
                "machine class '{machine_class}' must be a lowercase identifier such as 't3.medium'"
            )));
        }
        if replica_count > MAX_REPLICA_COUNT {
            return Err(ProvisionError::InvalidRequest(format!(
                "replica count {replica_count} exceeds the maximum of {MAX_REPLICA_COUNT}"
            )));
        }
        Ok(Self {
            machine_class,
            replica_count,
        })
    }

    pub fn machine_class(&self) -> &str {
        &self.machine_class
    }

    pub fn replica_count(&self) -> u32 {
        self.replica_count
    }
}

// ---------------------------------------------------------------------------
// TuningRequest
// ---------------------------------------------------------------------------

pub const DEFAULT_MAX_CONNECTIONS: u32 = 100;
pub const DEFAULT_SHARED_BUFFERS: &str = "256MB";

static SIZE_RE: OnceLock<Regex> = OnceLock::new();

fn size_re() -> &'static Regex {
    SIZE_RE.get_or_init(|| Regex::new(r"^[0-9]+(kB|MB|GB|TB)?$").expect("valid regex"))
}

/// PostgreSQL tuning values as supplied by the caller.
///
/// `max_connections` accepts either a JSON number or a numeric string, so the
/// structural check happens in [`TuningRequest::validate`] and surfaces as a
/// render failure rather than a deserialization error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuningRequest {
    #[serde(default = "default_max_connections")]
    pub max_connections: serde_json::Value,
    #[serde(default = "default_shared_buffers")]
    pub shared_buffers: String,
}

fn default_max_connections() -> serde_json::Value {
    serde_json::Value::from(DEFAULT_MAX_CONNECTIONS)
}

fn default_shared_buffers() -> String {
    DEFAULT_SHARED_BUFFERS.to_string()
}

impl Default for TuningRequest {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            shared_buffers: default_shared_buffers(),
        }
    }
}

/// Tuning values that passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tuning {
    pub max_connections: u32,
    pub shared_buffers: String,
}

impl TuningRequest {
    pub fn new(max_connections: u32, shared_buffers: impl Into<String>) -> Self {
        Self {
            max_connections: serde_json::Value::from(max_connections),
            shared_buffers: shared_buffers.into(),
        }
    }

    pub fn validate(&self) -> Result<Tuning> {
        let max_connections = match &self.max_connections {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        }
        .filter(|n| *n > 0)
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| {
            ProvisionError::Render(format!(
                "max_connections must be a positive integer, got {}",
                self.max_connections
            ))
        })?;

        let shared_buffers = self.shared_buffers.trim();
        if !size_re().is_match(shared_buffers) {
            return Err(ProvisionError::Render(format!(
                "shared_buffers must be a size such as '256MB', got '{}'",
                self.shared_buffers
            )));
        }

        Ok(Tuning {
            max_connections,
            shared_buffers: shared_buffers.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
