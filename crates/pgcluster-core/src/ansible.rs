//! `ansible-playbook` driver.

use crate::config::Config;
use crate::error::Result;
use crate::process::{CommandRunner, Invocation};
use crate::types::{Phase, PhaseResult};
use std::path::Path;

pub struct ConfigurationDriver<'a> {
    runner: &'a dyn CommandRunner,
    config: &'a Config,
}

impl<'a> ConfigurationDriver<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: &'a Config) -> Self {
        Self { runner, config }
    }

    /// Run the playbook against the inventory. Rerun safety is the
    /// playbook's concern, not the driver's.
    pub async fn run(&self, inventory: &Path, playbook: &Path) -> Result<PhaseResult> {
        let timeout = self.config.timeouts.config();
        let cwd = playbook.parent().unwrap_or(Path::new("."));
        let inv = Invocation::new(&self.config.ansible_playbook_bin, cwd, timeout)
            .arg("-i")
            .arg(inventory.to_string_lossy())
            .arg(playbook.to_string_lossy())
            .env("ANSIBLE_HOST_KEY_CHECKING", "False")
            .env("ANSIBLE_NOCOLOR", "1");
        tracing::info!(phase = %Phase::RunConfig, command = %inv.display(), "phase started");
        let out = self.runner.run(&inv).await?;
        out.into_phase(Phase::RunConfig, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProvisionError;
    use crate::process::SystemRunner;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn fake_ansible(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("ansible-playbook");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[tokio::test]
    async fn passes_inventory_and_playbook() {
        let dir = TempDir::new().unwrap();
        let bin = fake_ansible(dir.path(), "echo \"args: $*\"; echo \"hkc=$ANSIBLE_HOST_KEY_CHECKING\"");
        let mut config = Config::new(dir.path());
        config.ansible_playbook_bin = bin.to_string_lossy().into_owned();

        let inventory = dir.path().join("inventory/hosts.yml");
        let playbook = dir.path().join("main.yml");
        let result = ConfigurationDriver::new(&SystemRunner, &config)
            .run(&inventory, &playbook)
            .await
            .unwrap();

        assert!(result.succeeded);
        assert_eq!(result.phase, Phase::RunConfig);
        assert!(result.stdout.contains(&format!(
            "args: -i {} {}",
            inventory.display(),
            playbook.display()
        )));
        assert!(result.stdout.contains("hkc=False"));
    }

    #[tokio::test]
    async fn failing_playbook_reports_stderr() {
        let dir = TempDir::new().unwrap();
        let bin = fake_ansible(dir.path(), "echo 'UNREACHABLE! replica-db1' >&2; exit 4");
        let mut config = Config::new(dir.path());
        config.ansible_playbook_bin = bin.to_string_lossy().into_owned();

        let err = ConfigurationDriver::new(&SystemRunner, &config)
            .run(&dir.path().join("hosts.yml"), &dir.path().join("main.yml"))
            .await
            .unwrap_err();
        match err {
            ProvisionError::Provisioning { phase, result } => {
                assert_eq!(phase, Phase::RunConfig);
                assert_eq!(result.exit_code, Some(4));
                assert!(result.stderr.contains("UNREACHABLE!"));
            }
            other => panic!("expected provisioning failure, got {other:?}"),
        }
    }
}
