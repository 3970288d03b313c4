//! Terraform lifecycle driver.

use crate::config::Config;
use crate::error::{ProvisionError, Result};
use crate::process::{CommandRunner, Invocation};
use crate::types::Phase;
use crate::types::PhaseResult;
use std::path::Path;
use std::time::Duration;

pub struct ProvisioningDriver<'a> {
    runner: &'a dyn CommandRunner,
    config: &'a Config,
}

impl<'a> ProvisioningDriver<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: &'a Config) -> Self {
        Self { runner, config }
    }

    /// `terraform init`; safe to rerun.
    pub async fn initialize(&self, work_dir: &Path) -> Result<PhaseResult> {
        self.lifecycle(
            Phase::Init,
            work_dir,
            &["init", "-input=false", "-no-color"],
            self.config.timeouts.init(),
        )
        .await
    }

    /// `terraform plan`; safe to rerun.
    pub async fn plan(&self, work_dir: &Path) -> Result<PhaseResult> {
        self.lifecycle(
            Phase::Plan,
            work_dir,
            &["plan", "-input=false", "-no-color"],
            self.config.timeouts.plan(),
        )
        .await
    }

    /// `terraform apply -auto-approve`. Not idempotent after a partial
    /// failure; the caller decides whether to rerun.
    pub async fn apply(&self, work_dir: &Path) -> Result<PhaseResult> {
        self.lifecycle(
            Phase::Apply,
            work_dir,
            &["apply", "-auto-approve", "-input=false", "-no-color"],
            self.config.timeouts.apply(),
        )
        .await
    }

    /// `terraform output -json`, returned as parsed JSON.
    ///
    /// Failures here belong to inventory derivation: the outputs are the
    /// deriver's input, not a lifecycle step of their own.
    pub async fn outputs(&self, work_dir: &Path) -> Result<serde_json::Value> {
        let timeout = self.config.timeouts.output();
        let inv = self.invocation(work_dir, &["output", "-json", "-no-color"], timeout);
        let out = self.runner.run(&inv).await?;
        if out.timed_out {
            return Err(ProvisionError::InventoryDerivation(format!(
                "terraform output timed out after {}s",
                timeout.as_secs()
            )));
        }
        if !out.success() {
            return Err(ProvisionError::InventoryDerivation(format!(
                "terraform output exited with {:?}: {}",
                out.exit_code,
                out.stderr.trim()
            )));
        }
        serde_json::from_str(&out.stdout).map_err(|e| {
            ProvisionError::InventoryDerivation(format!("terraform output is not valid JSON: {e}"))
        })
    }

    async fn lifecycle(
        &self,
        phase: Phase,
        work_dir: &Path,
        args: &[&str],
        timeout: Duration,
    ) -> Result<PhaseResult> {
        let inv = self.invocation(work_dir, args, timeout);
        tracing::info!(%phase, command = %inv.display(), "phase started");
        let out = self.runner.run(&inv).await?;
        out.into_phase(phase, timeout)
    }

    fn invocation(&self, work_dir: &Path, args: &[&str], timeout: Duration) -> Invocation {
        Invocation::new(&self.config.terraform_bin, work_dir, timeout)
            .args(args.iter().copied())
            .env("TF_IN_AUTOMATION", "1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{CommandOutput, SystemRunner};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<Invocation>>,
        exit_code: i32,
        stdout: String,
    }

    #[async_trait]
    impl CommandRunner for Recorder {
        async fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
            self.calls.lock().unwrap().push(invocation.clone());
            Ok(CommandOutput {
                stdout: self.stdout.clone(),
                stderr: if self.exit_code == 0 { String::new() } else { "Error: boom".into() },
                exit_code: Some(self.exit_code),
                ..CommandOutput::default()
            })
        }
    }

    #[tokio::test]
    async fn lifecycle_commands_run_in_work_dir() {
        let dir = TempDir::new().unwrap();
        let config = Config::default();
        let recorder = Recorder::default();
        let driver = ProvisioningDriver::new(&recorder, &config);

        driver.initialize(dir.path()).await.unwrap();
        driver.plan(dir.path()).await.unwrap();
        driver.apply(dir.path()).await.unwrap();

        let calls = recorder.calls.lock().unwrap();
        let subcommands: Vec<&str> = calls.iter().map(|c| c.args[0].as_str()).collect();
        assert_eq!(subcommands, vec!["init", "plan", "apply"]);
        assert!(calls.iter().all(|c| c.cwd == dir.path()));
        assert!(calls.iter().all(|c| c.program == "terraform"));
        assert!(calls[2].args.contains(&"-auto-approve".to_string()));
        assert_eq!(calls[2].timeout, Duration::from_secs(1800));
    }

    #[tokio::test]
    async fn non_zero_exit_is_provisioning_failure() {
        let config = Config::default();
        let recorder = Recorder {
            exit_code: 1,
            ..Recorder::default()
        };
        let driver = ProvisioningDriver::new(&recorder, &config);
        let err = driver.plan(Path::new("/tmp")).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Provisioning { phase: Phase::Plan, .. }));
        assert_eq!(err.phase_result().unwrap().stderr, "Error: boom");
    }

    #[tokio::test]
    async fn outputs_parse_json() {
        let config = Config::default();
        let recorder = Recorder {
            stdout: r#"{"primary_db_public_ip": {"value": "10.0.0.1"}}"#.into(),
            ..Recorder::default()
        };
        let driver = ProvisioningDriver::new(&recorder, &config);
        let v = driver.outputs(Path::new("/tmp")).await.unwrap();
        assert_eq!(v["primary_db_public_ip"]["value"], "10.0.0.1");
    }

    #[tokio::test]
    async fn outputs_failure_is_derivation_failure() {
        let config = Config::default();
        let recorder = Recorder {
            exit_code: 1,
            ..Recorder::default()
        };
        let driver = ProvisioningDriver::new(&recorder, &config);
        let err = driver.outputs(Path::new("/tmp")).await.unwrap_err();
        assert!(matches!(err, ProvisionError::InventoryDerivation(_)));
    }

    #[tokio::test]
    async fn timeout_from_real_process_is_timeout_failure() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("slow-terraform");
        std::fs::write(&script, "#!/bin/sh\nsleep 10\n").unwrap();
        make_executable(&script);

        let mut config = Config::new(dir.path());
        config.terraform_bin = script.to_string_lossy().into_owned();
        config.timeouts.apply_secs = 1;
        let driver = ProvisioningDriver::new(&SystemRunner, &config);
        let err = driver.apply(dir.path()).await.unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::Timeout { phase: Phase::Apply, after_secs: 1, .. }
        ));
    }

    fn make_executable(path: &Path) {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(path, perms).unwrap();
    }
}
