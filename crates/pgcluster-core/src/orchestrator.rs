//! Multi-phase provisioning orchestrator.
//!
//! Each public operation acquires the working-tree lock, runs its phases in
//! order, and stops at the first failure. Nothing is retried and nothing is
//! rolled back: artifacts from completed phases stay on disk for inspection.

use crate::ansible::ConfigurationDriver;
use crate::config::Config;
use crate::descriptor;
use crate::error::{ProvisionError, Result};
use crate::inventory::Inventory;
use crate::lock::WorkingTreeHandle;
use crate::manifest::RunManifest;
use crate::playbook;
use crate::process::{CommandRunner, SystemRunner};
use crate::terraform::ProvisioningDriver;
use crate::types::{Phase, PhaseResult, ProvisioningRequest, TuningRequest};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Serialize)]
pub struct DescriptorReport {
    pub message: String,
    pub request: ProvisioningRequest,
    pub infrastructure_path: PathBuf,
    pub outputs_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct InventoryReport {
    pub message: String,
    pub path: PathBuf,
    pub inventory: Inventory,
    pub phase: PhaseResult,
}

/// Ordered results of the phases an operation ran.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub phases: Vec<PhaseResult>,
}

impl PhaseReport {
    /// Stdout of the last phase, the value the caller usually wants.
    pub fn last_stdout(&self) -> &str {
        self.phases.last().map(|p| p.stdout.as_str()).unwrap_or("")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolStatus {
    pub terraform: bool,
    pub ansible_playbook: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub terraform_dir: PathBuf,
    pub ansible_dir: PathBuf,
    pub busy: bool,
    pub manifest: Option<RunManifest>,
    pub descriptor_present: bool,
    pub inventory_present: bool,
    /// Inventory is stamped with the most recent successful apply.
    pub inventory_current: bool,
    pub playbook_present: bool,
    pub tools: ToolStatus,
}

#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<Config>,
    runner: Arc<dyn CommandRunner>,
}

impl Orchestrator {
    pub fn new(config: Config) -> Self {
        Self::with_runner(config, Arc::new(SystemRunner))
    }

    pub fn with_runner(config: Config, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config: Arc::new(config),
            runner,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn lock(&self) -> Result<WorkingTreeHandle> {
        WorkingTreeHandle::acquire(&self.config)
    }

    fn terraform(&self) -> ProvisioningDriver<'_> {
        ProvisioningDriver::new(self.runner.as_ref(), &self.config)
    }

    // -----------------------------------------------------------------------
    // Caller-visible operations
    // -----------------------------------------------------------------------

    pub async fn generate_descriptor(&self, request: ProvisioningRequest) -> Result<DescriptorReport> {
        let tree = self.lock()?;
        self.generate_in(&tree, request)
    }

    /// `terraform init` followed by `terraform plan`.
    pub async fn plan(&self) -> Result<PhaseReport> {
        let tree = self.lock()?;
        self.plan_in(&tree).await
    }

    pub async fn apply(&self) -> Result<PhaseReport> {
        let tree = self.lock()?;
        let result = self.apply_in(&tree).await?;
        Ok(PhaseReport {
            phases: vec![result],
        })
    }

    pub async fn derive_inventory(&self) -> Result<InventoryReport> {
        let tree = self.lock()?;
        self.derive_in(&tree).await
    }

    pub async fn render_and_run_config(&self, tuning: &TuningRequest) -> Result<PhaseReport> {
        let tree = self.lock()?;
        self.configure_in(&tree, tuning).await
    }

    /// Every phase in order under a single lock. Tuning is validated before
    /// any infrastructure is created.
    pub async fn provision(
        &self,
        request: ProvisioningRequest,
        tuning: &TuningRequest,
    ) -> Result<PhaseReport> {
        tuning.validate()?;
        let tree = self.lock()?;
        tracing::info!(
            machine_class = request.machine_class(),
            replicas = request.replica_count(),
            "full provisioning run started"
        );

        self.generate_in(&tree, request)?;
        let mut phases = self.plan_in(&tree).await?.phases;
        phases.push(self.apply_in(&tree).await?);
        phases.push(self.derive_in(&tree).await?.phase);
        phases.extend(self.configure_in(&tree, tuning).await?.phases);

        tracing::info!(phases = phases.len(), "full provisioning run finished");
        Ok(PhaseReport { phases })
    }

    /// Snapshot of the working tree. Does not acquire the exclusive lock
    /// and creates no files; busyness comes from a shared-lock check.
    pub fn status(&self) -> Result<Status> {
        let terraform_dir = self.config.terraform_dir();
        let ansible_dir = self.config.ansible_dir();
        let busy = WorkingTreeHandle::is_held(&terraform_dir)?;

        let manifest = RunManifest::load(&crate::paths::manifest_path(&terraform_dir))?;
        let inventory_path = crate::paths::inventory_path(&ansible_dir);
        let stamp = Inventory::read_apply_id(&inventory_path).ok().flatten();
        let inventory_current = match (&manifest, &stamp) {
            (Some(m), Some(s)) => m.apply_id.as_deref() == Some(s.as_str()),
            _ => false,
        };

        Ok(Status {
            busy,
            descriptor_present: crate::paths::infrastructure_path(&terraform_dir).exists(),
            inventory_present: inventory_path.exists(),
            inventory_current,
            playbook_present: crate::paths::playbook_path(&ansible_dir).exists(),
            tools: ToolStatus {
                terraform: which::which(&self.config.terraform_bin).is_ok(),
                ansible_playbook: which::which(&self.config.ansible_playbook_bin).is_ok(),
            },
            manifest,
            terraform_dir,
            ansible_dir,
        })
    }

    // -----------------------------------------------------------------------
    // Phase steps, run under an already-held lock
    // -----------------------------------------------------------------------

    fn generate_in(
        &self,
        tree: &WorkingTreeHandle,
        request: ProvisioningRequest,
    ) -> Result<DescriptorReport> {
        let rendered = descriptor::render(&request, &self.config.aws);
        descriptor::persist(&rendered, tree.terraform_dir())?;
        RunManifest::new(request.clone()).save(&tree.manifest_path())?;
        invalidate_inventory(tree)?;

        Ok(DescriptorReport {
            message: "Terraform configuration generated successfully".to_string(),
            request,
            infrastructure_path: tree.infrastructure_path(),
            outputs_path: tree.outputs_path(),
        })
    }

    async fn plan_in(&self, tree: &WorkingTreeHandle) -> Result<PhaseReport> {
        require_manifest(tree)?;
        let tf = self.terraform();
        let init = tf.initialize(tree.terraform_dir()).await?;
        let plan = tf.plan(tree.terraform_dir()).await?;
        Ok(PhaseReport {
            phases: vec![init, plan],
        })
    }

    async fn apply_in(&self, tree: &WorkingTreeHandle) -> Result<PhaseResult> {
        let mut manifest = require_manifest(tree)?;

        // From here on the old inventory no longer describes reality, even
        // if this apply fails halfway.
        manifest.clear_apply();
        manifest.save(&tree.manifest_path())?;
        invalidate_inventory(tree)?;

        let result = self.terraform().apply(tree.terraform_dir()).await?;

        let apply_id = manifest.mark_applied().to_string();
        manifest.save(&tree.manifest_path())?;
        tracing::info!(%apply_id, "apply recorded");
        Ok(result)
    }

    async fn derive_in(&self, tree: &WorkingTreeHandle) -> Result<InventoryReport> {
        let start = Instant::now();
        let manifest = RunManifest::load(&tree.manifest_path())?.ok_or_else(|| {
            ProvisionError::InventoryDerivation("no descriptor has been generated".to_string())
        })?;
        let apply_id = manifest.apply_id.as_deref().ok_or_else(|| {
            ProvisionError::InventoryDerivation(
                "no successful apply since the descriptor was generated".to_string(),
            )
        })?;

        let outputs = self.terraform().outputs(tree.terraform_dir()).await?;
        let inventory = Inventory::from_outputs(
            &outputs,
            manifest.request.replica_count(),
            &self.config.ssh,
            apply_id,
        )?;
        let path = tree.inventory_path();
        inventory.write(&path)?;

        let message = format!(
            "Inventory written with 1 primary and {} replica host(s)",
            inventory.replicas.len()
        );
        let phase = PhaseResult::internal(Phase::DeriveInventory, message.clone(), elapsed_ms(start));
        Ok(InventoryReport {
            message,
            path,
            inventory,
            phase,
        })
    }

    async fn configure_in(
        &self,
        tree: &WorkingTreeHandle,
        tuning: &TuningRequest,
    ) -> Result<PhaseReport> {
        let start = Instant::now();
        let script = playbook::render(tuning, &self.config.postgres)?;
        ensure_inventory_current(tree)?;
        let playbook_path = tree.playbook_path();
        script.write(&playbook_path)?;
        let rendered = PhaseResult::internal(
            Phase::RenderConfig,
            format!("Playbook written to {}", playbook_path.display()),
            elapsed_ms(start),
        );

        let run = ConfigurationDriver::new(self.runner.as_ref(), &self.config)
            .run(&tree.inventory_path(), &playbook_path)
            .await?;
        Ok(PhaseReport {
            phases: vec![rendered, run],
        })
    }
}

fn require_manifest(tree: &WorkingTreeHandle) -> Result<RunManifest> {
    RunManifest::load(&tree.manifest_path())?.ok_or_else(|| {
        ProvisionError::InvalidRequest(
            "no descriptor in the working directory; generate one first".to_string(),
        )
    })
}

fn invalidate_inventory(tree: &WorkingTreeHandle) -> Result<()> {
    if crate::io::remove_if_exists(&tree.inventory_path())? {
        tracing::info!("previous inventory invalidated");
    }
    Ok(())
}

fn ensure_inventory_current(tree: &WorkingTreeHandle) -> Result<()> {
    let stamp = Inventory::read_apply_id(&tree.inventory_path())?.ok_or_else(|| {
        ProvisionError::InventoryDerivation("no inventory; derive it after apply".to_string())
    })?;
    let current = RunManifest::load(&tree.manifest_path())?.and_then(|m| m.apply_id);
    if current.as_deref() != Some(stamp.as_str()) {
        return Err(ProvisionError::InventoryDerivation(
            "inventory is stale: it predates the latest apply".to_string(),
        ));
    }
    Ok(())
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
