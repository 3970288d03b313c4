//! Ansible inventory derived from Terraform outputs.
//!
//! Grouping contract: one `primary` group holding `primary-db`, one `replica`
//! group holding `replica-db1 … replica-dbN` numbered by position in the
//! `replica_db_public_ips` output. The playbook conditions tasks on these
//! group names.

use crate::config::SshConfig;
use crate::descriptor::{PRIMARY_OUTPUT, REPLICA_OUTPUT};
use crate::error::{ProvisionError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const PRIMARY_GROUP: &str = "primary";
pub const REPLICA_GROUP: &str = "replica";
pub const PRIMARY_HOSTNAME: &str = "primary-db";
pub const APPLY_ID_VAR: &str = "pgcluster_apply_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostGroup {
    Primary,
    Replica,
}

impl HostGroup {
    pub fn as_str(self) -> &'static str {
        match self {
            HostGroup::Primary => PRIMARY_GROUP,
            HostGroup::Replica => REPLICA_GROUP,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEntry {
    pub group: HostGroup,
    pub hostname: String,
    pub address: String,
    pub ssh_user: String,
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub apply_id: String,
    pub primary: HostEntry,
    pub replicas: Vec<HostEntry>,
}

pub fn replica_hostname(position: usize) -> String {
    format!("replica-db{}", position + 1)
}

impl Inventory {
    /// Build from `terraform output -json`. `expected_replicas` is the
    /// count requested for the run; a mismatch is an error rather than a
    /// silently short replica group.
    pub fn from_outputs(
        outputs: &serde_json::Value,
        expected_replicas: u32,
        ssh: &SshConfig,
        apply_id: &str,
    ) -> Result<Self> {
        let primary_addr = output_value(outputs, PRIMARY_OUTPUT)?
            .as_str()
            .ok_or_else(|| {
                ProvisionError::InventoryDerivation(format!("output '{PRIMARY_OUTPUT}' is not a string"))
            })?;
        let primary_addr = checked_address(PRIMARY_OUTPUT, primary_addr)?;

        let replica_addrs = output_value(outputs, REPLICA_OUTPUT)?
            .as_array()
            .ok_or_else(|| {
                ProvisionError::InventoryDerivation(format!("output '{REPLICA_OUTPUT}' is not a list"))
            })?
            .iter()
            .map(|v| {
                v.as_str()
                    .ok_or_else(|| {
                        ProvisionError::InventoryDerivation(format!(
                            "output '{REPLICA_OUTPUT}' contains a non-string entry: {v}"
                        ))
                    })
                    .and_then(|s| checked_address(REPLICA_OUTPUT, s))
            })
            .collect::<Result<Vec<_>>>()?;

        if replica_addrs.len() != expected_replicas as usize {
            return Err(ProvisionError::InventoryDerivation(format!(
                "expected {expected_replicas} replica addresses, terraform reported {}",
                replica_addrs.len()
            )));
        }

        let entry = |group, hostname: String, address: String| HostEntry {
            group,
            hostname,
            address,
            ssh_user: ssh.user.clone(),
            key_path: ssh.private_key_path.clone(),
        };

        Ok(Self {
            apply_id: apply_id.to_string(),
            primary: entry(HostGroup::Primary, PRIMARY_HOSTNAME.to_string(), primary_addr),
            replicas: replica_addrs
                .into_iter()
                .enumerate()
                .map(|(i, addr)| entry(HostGroup::Replica, replica_hostname(i), addr))
                .collect(),
        })
    }

    pub fn hosts(&self) -> impl Iterator<Item = &HostEntry> {
        std::iter::once(&self.primary).chain(self.replicas.iter())
    }

    /// Render as an Ansible YAML inventory.
    pub fn to_yaml(&self) -> Result<String> {
        let group = |entries: &[&HostEntry]| AnsibleGroup {
            hosts: entries
                .iter()
                .map(|e| {
                    (
                        e.hostname.clone(),
                        AnsibleHost {
                            ansible_host: e.address.clone(),
                            ansible_user: e.ssh_user.clone(),
                            ansible_ssh_private_key_file: e.key_path.clone(),
                        },
                    )
                })
                .collect(),
        };
        let replicas: Vec<&HostEntry> = self.replicas.iter().collect();

        let doc = AnsibleInventory {
            all: AnsibleAll {
                vars: BTreeMap::from([(APPLY_ID_VAR.to_string(), self.apply_id.clone())]),
                children: BTreeMap::from([
                    (PRIMARY_GROUP.to_string(), group(&[&self.primary])),
                    (REPLICA_GROUP.to_string(), group(&replicas)),
                ]),
            },
        };
        Ok(serde_yaml::to_string(&doc)?)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        crate::io::atomic_write(path, self.to_yaml()?.as_bytes())?;
        tracing::info!(
            path = %path.display(),
            replicas = self.replicas.len(),
            "inventory written"
        );
        Ok(())
    }

    /// Apply id stamped into an inventory file, `None` if the file is absent.
    pub fn read_apply_id(path: &Path) -> Result<Option<String>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(path)?;
        let doc: AnsibleInventory = serde_yaml::from_str(&data)?;
        Ok(doc.all.vars.get(APPLY_ID_VAR).cloned())
    }
}

fn output_value<'v>(outputs: &'v serde_json::Value, key: &str) -> Result<&'v serde_json::Value> {
    match outputs.get(key).and_then(|o| o.get("value")) {
        Some(v) if !v.is_null() => Ok(v),
        _ => Err(ProvisionError::InventoryDerivation(format!(
            "terraform output '{key}' is missing; has apply completed?"
        ))),
    }
}

fn checked_address(key: &str, addr: &str) -> Result<String> {
    let addr = addr.trim();
    if addr.is_empty() || addr.chars().any(char::is_whitespace) {
        return Err(ProvisionError::InventoryDerivation(format!(
            "terraform output '{key}' holds an empty or malformed address"
        )));
    }
    Ok(addr.to_string())
}

// ---------------------------------------------------------------------------
// Ansible YAML inventory shape
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct AnsibleInventory {
    all: AnsibleAll,
}

#[derive(Serialize, Deserialize)]
struct AnsibleAll {
    #[serde(default)]
    vars: BTreeMap<String, String>,
    #[serde(default)]
    children: BTreeMap<String, AnsibleGroup>,
}

#[derive(Serialize, Deserialize)]
struct AnsibleGroup {
    #[serde(default)]
    hosts: BTreeMap<String, AnsibleHost>,
}

#[derive(Serialize, Deserialize)]
struct AnsibleHost {
    ansible_host: String,
    ansible_user: String,
    ansible_ssh_private_key_file: PathBuf,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
