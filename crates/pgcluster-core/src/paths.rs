use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// File name constants
// ---------------------------------------------------------------------------

pub const CONFIG_FILE: &str = "pgcluster.yaml";

pub const INFRASTRUCTURE_FILE: &str = "main.tf.json";
pub const OUTPUTS_FILE: &str = "outputs.tf.json";
pub const MANIFEST_FILE: &str = "pgcluster-run.yaml";
pub const LOCK_FILE: &str = ".pgcluster.lock";

/// HCL files from hand-written or older layouts. Terraform would load them
/// next to the JSON descriptors and report duplicate resources.
pub const LEGACY_DESCRIPTOR_FILES: &[&str] = &["main.tf", "outputs.tf"];

pub const INVENTORY_DIR: &str = "inventory";
pub const INVENTORY_FILE: &str = "hosts.yml";
pub const PLAYBOOK_FILE: &str = "main.yml";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn infrastructure_path(terraform_dir: &Path) -> PathBuf {
    terraform_dir.join(INFRASTRUCTURE_FILE)
}

pub fn outputs_path(terraform_dir: &Path) -> PathBuf {
    terraform_dir.join(OUTPUTS_FILE)
}

pub fn manifest_path(terraform_dir: &Path) -> PathBuf {
    terraform_dir.join(MANIFEST_FILE)
}

pub fn lock_path(terraform_dir: &Path) -> PathBuf {
    terraform_dir.join(LOCK_FILE)
}

pub fn inventory_path(ansible_dir: &Path) -> PathBuf {
    ansible_dir.join(INVENTORY_DIR).join(INVENTORY_FILE)
}

pub fn playbook_path(ansible_dir: &Path) -> PathBuf {
    ansible_dir.join(PLAYBOOK_FILE)
}
