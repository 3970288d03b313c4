//! Bounded-duration external process invocation.
//!
//! Both drivers go through [`CommandRunner`], so tests can substitute a
//! scripted runner and the server never blocks on a hung `terraform` or
//! `ansible-playbook`.

use crate::error::{ProvisionError, Result};
use crate::types::{Phase, PhaseResult};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// How long pipe readers may keep draining after a timed-out child is killed.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// One external tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

impl Invocation {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: Vec::new(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// `program arg1 arg2`, for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of an invocation that ran (to completion or to timeout).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when killed by a signal or on timeout.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Convert into the phase's result, failing on non-zero exit or timeout.
    pub fn into_phase(self, phase: Phase, timeout: Duration) -> Result<PhaseResult> {
        let succeeded = self.success();
        let timed_out = self.timed_out;
        let result = PhaseResult {
            phase,
            succeeded,
            stdout: self.stdout,
            stderr: self.stderr,
            exit_code: self.exit_code,
            timed_out,
            duration_ms: u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX),
        };

        if timed_out {
            tracing::warn!(%phase, timeout_secs = timeout.as_secs(), "phase timed out");
            return Err(ProvisionError::Timeout {
                phase,
                after_secs: timeout.as_secs(),
                result: Box::new(result),
            });
        }
        if !succeeded {
            tracing::warn!(%phase, exit_code = ?result.exit_code, "phase failed");
            return Err(ProvisionError::Provisioning {
                phase,
                result: Box::new(result),
            });
        }
        tracing::info!(%phase, duration_ms = result.duration_ms, "phase succeeded");
        Ok(result)
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion or timeout. Only spawn/wait I/O errors are `Err`;
    /// a non-zero exit or a timeout is reported in the output.
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;
}

/// Runs real child processes via `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        let start = Instant::now();
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .current_dir(&invocation.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (k, v) in &invocation.env {
            cmd.env(k, v);
        }

        tracing::debug!(command = %invocation.display(), cwd = %invocation.cwd.display(), "spawning");
        let mut child = cmd.spawn().map_err(|source| ProvisionError::Spawn {
            program: invocation.program.clone(),
            source,
        })?;

        // Pipes are drained into shared buffers so a timeout still reports
        // whatever the tool printed before it was killed.
        let stdout = SharedBuf::default();
        let stderr = SharedBuf::default();
        let readers: Vec<JoinHandle<()>> = [
            child.stdout.take().map(|p| drain(p, stdout.clone())),
            child.stderr.take().map(|p| drain(p, stderr.clone())),
        ]
        .into_iter()
        .flatten()
        .collect();

        match tokio::time::timeout(invocation.timeout, child.wait()).await {
            Ok(status) => {
                let status = status?;
                for reader in readers {
                    let _ = reader.await;
                }
                Ok(CommandOutput {
                    stdout: stdout.text(),
                    stderr: stderr.text(),
                    exit_code: status.code(),
                    timed_out: false,
                    duration: start.elapsed(),
                })
            }
            Err(_) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "failed to kill timed-out command");
                }
                tracing::warn!(
                    command = %invocation.display(),
                    timeout_secs = invocation.timeout.as_secs(),
                    "command timed out, killed"
                );
                // A grandchild may still hold the pipes open; stop waiting
                // for EOF after a short grace.
                for mut reader in readers {
                    if tokio::time::timeout(DRAIN_GRACE, &mut reader).await.is_err() {
                        reader.abort();
                    }
                }

                let mut diagnostics = stderr.text();
                if !diagnostics.is_empty() && !diagnostics.ends_with('\n') {
                    diagnostics.push('\n');
                }
                diagnostics.push_str(&format!(
                    "'{}' did not finish within {}s and was killed",
                    invocation.program,
                    invocation.timeout.as_secs()
                ));
                Ok(CommandOutput {
                    stdout: stdout.text(),
                    stderr: diagnostics,
                    exit_code: None,
                    timed_out: true,
                    duration: start.elapsed(),
                })
            }
        }
    }
}

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn push(&self, bytes: &[u8]) -> bool {
        match self.0.lock() {
            Ok(mut buf) => {
                buf.extend_from_slice(bytes);
                true
            }
            Err(_) => false,
        }
    }

    fn text(&self) -> String {
        self.0
            .lock()
            .map(|buf| String::from_utf8_lossy(&buf).into_owned())
            .unwrap_or_default()
    }
}

fn drain<R>(mut pipe: R, sink: SharedBuf) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if !sink.push(&chunk[..n]) {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str, timeout: Duration) -> Invocation {
        Invocation::new("sh", std::env::temp_dir(), timeout)
            .arg("-c")
            .arg(script)
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let out = SystemRunner
            .run(&sh("echo hello", Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.exit_code, Some(0));
    }

    #[tokio::test]
    async fn captures_stderr_and_non_zero_exit() {
        let out = SystemRunner
            .run(&sh("echo boom >&2; exit 3", Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(!out.success());
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stderr.trim(), "boom");
    }

    #[tokio::test]
    async fn runs_in_requested_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let inv = Invocation::new("pwd", dir.path(), Duration::from_secs(5));
        let out = SystemRunner.run(&inv).await.unwrap();
        let reported = std::fs::canonicalize(out.stdout.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[tokio::test]
    async fn passes_environment() {
        let inv = sh("printf %s \"$PGCLUSTER_TEST\"", Duration::from_secs(5))
            .env("PGCLUSTER_TEST", "value-1");
        let out = SystemRunner.run(&inv).await.unwrap();
        assert_eq!(out.stdout, "value-1");
    }

    #[tokio::test]
    async fn timeout_kills_and_reports() {
        let start = Instant::now();
        let out = SystemRunner
            .run(&sh("sleep 10", Duration::from_millis(300)))
            .await
            .unwrap();
        assert!(out.timed_out);
        assert!(!out.success());
        assert_eq!(out.exit_code, None);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn timeout_keeps_output_printed_before_the_kill() {
        let script = "echo 'aws_instance.primary_db: Creating...'; echo 'still waiting' >&2; sleep 10";
        let out = SystemRunner
            .run(&sh(script, Duration::from_millis(500)))
            .await
            .unwrap();
        assert!(out.timed_out);
        assert!(out.stdout.contains("aws_instance.primary_db: Creating..."));
        assert!(out.stderr.contains("still waiting"));
        assert!(out.stderr.contains("did not finish within"));
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let inv = Invocation::new(
            "__pgcluster_nonexistent_tool__",
            std::env::temp_dir(),
            Duration::from_secs(5),
        );
        let err = SystemRunner.run(&inv).await.unwrap_err();
        assert!(
            err.to_string().contains("__pgcluster_nonexistent_tool__"),
            "error should name the program, got: {err}"
        );
    }

    #[test]
    fn into_phase_classifies_outcomes() {
        let t = Duration::from_secs(30);
        let ok = CommandOutput {
            stdout: "Apply complete!".into(),
            exit_code: Some(0),
            ..CommandOutput::default()
        };
        let result = ok.into_phase(Phase::Apply, t).unwrap();
        assert!(result.succeeded);
        assert_eq!(result.stdout, "Apply complete!");

        let failed = CommandOutput {
            stderr: "Error: no credentials".into(),
            exit_code: Some(1),
            ..CommandOutput::default()
        };
        let err = failed.into_phase(Phase::Plan, t).unwrap_err();
        assert!(matches!(err, ProvisionError::Provisioning { phase: Phase::Plan, .. }));
        assert_eq!(err.phase_result().unwrap().stderr, "Error: no credentials");

        let hung = CommandOutput {
            timed_out: true,
            ..CommandOutput::default()
        };
        let err = hung.into_phase(Phase::RunConfig, t).unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::Timeout { phase: Phase::RunConfig, after_secs: 30, .. }
        ));
    }

    #[test]
    fn display_joins_program_and_args() {
        let inv = Invocation::new("terraform", "/tmp", Duration::from_secs(1))
            .args(["apply", "-auto-approve"]);
        assert_eq!(inv.display(), "terraform apply -auto-approve");
    }
}
