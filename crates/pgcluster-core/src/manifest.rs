use crate::error::Result;
use crate::types::ProvisioningRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Record of the last accepted request and the last successful apply for a
/// working tree. Lets independent calls agree on what the current
/// infrastructure is supposed to look like.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub request: ProvisioningRequest,
    pub rendered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
    /// Fresh per successful apply; stamped into the derived inventory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply_id: Option<String>,
}

impl RunManifest {
    pub fn new(request: ProvisioningRequest) -> Self {
        Self {
            request,
            rendered_at: Utc::now(),
            applied_at: None,
            apply_id: None,
        }
    }

    /// Load the manifest at `path`, or `None` if no descriptor was ever
    /// generated there.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(path)?;
        Ok(Some(serde_yaml::from_str(&data)?))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    pub fn mark_applied(&mut self) -> &str {
        self.applied_at = Some(Utc::now());
        self.apply_id.insert(uuid::Uuid::new_v4().to_string())
    }

    pub fn clear_apply(&mut self) {
        self.applied_at = None;
        self.apply_id = None;
    }
}
