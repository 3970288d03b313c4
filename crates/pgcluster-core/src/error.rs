use crate::types::{Phase, PhaseResult};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Machine-readable failure classification reported alongside every error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    IoFailure,
    ProvisioningFailure,
    InventoryDerivationFailure,
    RenderFailure,
    Busy,
    TimeoutFailure,
    InvalidRequest,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::IoFailure => "io_failure",
            FailureKind::ProvisioningFailure => "provisioning_failure",
            FailureKind::InventoryDerivationFailure => "inventory_derivation_failure",
            FailureKind::RenderFailure => "render_failure",
            FailureKind::Busy => "busy",
            FailureKind::TimeoutFailure => "timeout_failure",
            FailureKind::InvalidRequest => "invalid_request",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("working directory {0} is busy: another run holds its lock")]
    Busy(PathBuf),

    #[error("{phase} failed with exit code {}", exit_code_label(.result.exit_code))]
    Provisioning {
        phase: Phase,
        result: Box<PhaseResult>,
    },

    #[error("{phase} timed out after {after_secs}s")]
    Timeout {
        phase: Phase,
        after_secs: u64,
        result: Box<PhaseResult>,
    },

    #[error("inventory derivation failed: {0}")]
    InventoryDerivation(String),

    #[error("render failed: {0}")]
    Render(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn exit_code_label(code: Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "none (killed by signal)".to_string())
}

impl ProvisionError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ProvisionError::Busy(_) => FailureKind::Busy,
            ProvisionError::Provisioning { .. } => FailureKind::ProvisioningFailure,
            ProvisionError::Timeout { .. } => FailureKind::TimeoutFailure,
            ProvisionError::InventoryDerivation(_) => FailureKind::InventoryDerivationFailure,
            ProvisionError::Render(_) => FailureKind::RenderFailure,
            ProvisionError::InvalidRequest(_) => FailureKind::InvalidRequest,
            ProvisionError::Spawn { .. }
            | ProvisionError::Io(_)
            | ProvisionError::Yaml(_)
            | ProvisionError::Json(_) => FailureKind::IoFailure,
        }
    }

    /// The phase the failure belongs to, when it came from an external tool.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            ProvisionError::Provisioning { phase, .. } | ProvisionError::Timeout { phase, .. } => {
                Some(*phase)
            }
            ProvisionError::InventoryDerivation(_) => Some(Phase::DeriveInventory),
            ProvisionError::Render(_) => Some(Phase::RenderConfig),
            _ => None,
        }
    }

    /// Captured output of the failed phase, if any.
    pub fn phase_result(&self) -> Option<&PhaseResult> {
        match self {
            ProvisionError::Provisioning { result, .. } | ProvisionError::Timeout { result, .. } => {
                Some(result)
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
