//! Per-working-directory exclusive lock.
//!
//! Every orchestrator operation runs against a [`WorkingTreeHandle`]. The
//! handle owns an advisory `flock` on `<terraform_dir>/.pgcluster.lock` and
//! carries every artifact path, so no code path depends on the process's
//! current directory. Acquisition never blocks: a held lock yields
//! [`ProvisionError::Busy`] before any artifact is touched.

use crate::config::Config;
use crate::error::{ProvisionError, Result};
use crate::paths;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct WorkingTreeHandle {
    terraform_dir: PathBuf,
    ansible_dir: PathBuf,
    lock_file: File,
}

impl WorkingTreeHandle {
    /// Acquire the lock for the working tree described by `config`.
    pub fn acquire(config: &Config) -> Result<Self> {
        Self::acquire_dirs(config.terraform_dir(), config.ansible_dir())
    }

    pub fn acquire_dirs(terraform_dir: PathBuf, ansible_dir: PathBuf) -> Result<Self> {
        crate::io::ensure_dir(&terraform_dir)?;
        let lock_path = paths::lock_path(&terraform_dir);
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;

        match FileExt::try_lock_exclusive(&lock_file) {
            Ok(()) => {}
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                tracing::warn!(dir = %terraform_dir.display(), "working tree busy");
                return Err(ProvisionError::Busy(terraform_dir));
            }
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(dir = %terraform_dir.display(), "working tree locked");
        Ok(Self {
            terraform_dir,
            ansible_dir,
            lock_file,
        })
    }

    /// Whether another handle holds the lock on `terraform_dir`. Never
    /// creates the lock file; takes a shared lock for the instant of the
    /// check, so a concurrent `acquire` can observe `Busy` in that window.
    pub fn is_held(terraform_dir: &Path) -> Result<bool> {
        let lock_path = paths::lock_path(terraform_dir);
        let file = match File::open(&lock_path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        match FileExt::try_lock_shared(&file) {
            Ok(()) => {
                FileExt::unlock(&file)?;
                Ok(false)
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    pub fn terraform_dir(&self) -> &Path {
        &self.terraform_dir
    }

    pub fn infrastructure_path(&self) -> PathBuf {
        paths::infrastructure_path(&self.terraform_dir)
    }

    pub fn outputs_path(&self) -> PathBuf {
        paths::outputs_path(&self.terraform_dir)
    }

    pub fn manifest_path(&self) -> PathBuf {
        paths::manifest_path(&self.terraform_dir)
    }

    pub fn inventory_path(&self) -> PathBuf {
        paths::inventory_path(&self.ansible_dir)
    }

    pub fn playbook_path(&self) -> PathBuf {
        paths::playbook_path(&self.ansible_dir)
    }
}

impl Drop for WorkingTreeHandle {
    fn drop(&mut self) {
        // Closing the descriptor releases the flock as well; unlocking
        // explicitly keeps the release visible in traces.
        if let Err(e) = FileExt::unlock(&self.lock_file) {
            tracing::warn!(error = %e, "failed to release working tree lock");
        }
        tracing::debug!(dir = %self.terraform_dir.display(), "working tree released");
    }
}
