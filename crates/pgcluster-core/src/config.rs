use crate::error::Result;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// AwsConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwsConfig {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_ami")]
    pub ami: String,
    #[serde(default = "default_key_name")]
    pub key_name: String,
    /// Prefix for instance `Name` tags, e.g. `pgcluster-primary-db`.
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
    /// CIDR allowed to reach SSH and PostgreSQL on the cluster.
    #[serde(default = "default_allowed_cidr")]
    pub allowed_cidr: String,
}

fn default_region() -> String {
    "ap-south-1".to_string()
}

fn default_ami() -> String {
    "ami-0dee22c13ea7a9a67".to_string()
}

fn default_key_name() -> String {
    "pgcluster".to_string()
}

fn default_name_prefix() -> String {
    "pgcluster".to_string()
}

fn default_allowed_cidr() -> String {
    "0.0.0.0/0".to_string()
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            ami: default_ami(),
            key_name: default_key_name(),
            name_prefix: default_name_prefix(),
            allowed_cidr: default_allowed_cidr(),
        }
    }
}

// ---------------------------------------------------------------------------
// SshConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(default = "default_ssh_user")]
    pub user: String,
    #[serde(default = "default_private_key_path")]
    pub private_key_path: PathBuf,
}

fn default_ssh_user() -> String {
    "ubuntu".to_string()
}

fn default_private_key_path() -> PathBuf {
    PathBuf::from("/home/ubuntu/pgcluster.pem")
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: default_ssh_user(),
            private_key_path: default_private_key_path(),
        }
    }
}

// ---------------------------------------------------------------------------
// PostgresConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Major version; selects `/etc/postgresql/<v>/main` and the data dir.
    #[serde(default = "default_pg_version")]
    pub version: u32,
    #[serde(default = "default_replication_user")]
    pub replication_user: String,
    #[serde(default = "default_replication_password")]
    pub replication_password: String,
    #[serde(default = "default_max_wal_senders")]
    pub max_wal_senders: u32,
}

fn default_pg_version() -> u32 {
    16
}

fn default_replication_user() -> String {
    "replica_user".to_string()
}

fn default_replication_password() -> String {
    "replica_password".to_string()
}

fn default_max_wal_senders() -> u32 {
    5
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            version: default_pg_version(),
            replication_user: default_replication_user(),
            replication_password: default_replication_password(),
            max_wal_senders: default_max_wal_senders(),
        }
    }
}

impl PostgresConfig {
    pub fn conf_dir(&self) -> String {
        format!("/etc/postgresql/{}/main", self.version)
    }

    pub fn data_dir(&self) -> String {
        format!("/var/lib/postgresql/{}/main", self.version)
    }
}

// ---------------------------------------------------------------------------
// TimeoutConfig
// ---------------------------------------------------------------------------

/// Upper bound, in seconds, for each external tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_init_secs")]
    pub init_secs: u64,
    #[serde(default = "default_plan_secs")]
    pub plan_secs: u64,
    #[serde(default = "default_apply_secs")]
    pub apply_secs: u64,
    #[serde(default = "default_output_secs")]
    pub output_secs: u64,
    #[serde(default = "default_config_secs")]
    pub config_secs: u64,
}

fn default_init_secs() -> u64 {
    300
}

fn default_plan_secs() -> u64 {
    600
}

fn default_apply_secs() -> u64 {
    1800
}

fn default_output_secs() -> u64 {
    60
}

fn default_config_secs() -> u64 {
    1800
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            init_secs: default_init_secs(),
            plan_secs: default_plan_secs(),
            apply_secs: default_apply_secs(),
            output_secs: default_output_secs(),
            config_secs: default_config_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn init(&self) -> Duration {
        Duration::from_secs(self.init_secs)
    }

    pub fn plan(&self) -> Duration {
        Duration::from_secs(self.plan_secs)
    }

    pub fn apply(&self) -> Duration {
        Duration::from_secs(self.apply_secs)
    }

    pub fn output(&self) -> Duration {
        Duration::from_secs(self.output_secs)
    }

    pub fn config(&self) -> Duration {
        Duration::from_secs(self.config_secs)
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Terraform working directory. Relative paths resolve against the
    /// directory holding the config file.
    #[serde(default = "default_terraform_dir")]
    pub terraform_dir: PathBuf,
    #[serde(default = "default_ansible_dir")]
    pub ansible_dir: PathBuf,
    #[serde(default = "default_terraform_bin")]
    pub terraform_bin: String,
    #[serde(default = "default_ansible_playbook_bin")]
    pub ansible_playbook_bin: String,
    #[serde(default)]
    pub aws: AwsConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub postgres: PostgresConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(skip)]
    base_dir: PathBuf,
}

fn default_version() -> u32 {
    1
}

fn default_terraform_dir() -> PathBuf {
    PathBuf::from("terraform")
}

fn default_ansible_dir() -> PathBuf {
    PathBuf::from("ansible")
}

fn default_terraform_bin() -> String {
    "terraform".to_string()
}

fn default_ansible_playbook_bin() -> String {
    "ansible-playbook".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            terraform_dir: default_terraform_dir(),
            ansible_dir: default_ansible_dir(),
            terraform_bin: default_terraform_bin(),
            ansible_playbook_bin: default_ansible_playbook_bin(),
            aws: AwsConfig::default(),
            ssh: SshConfig::default(),
            postgres: PostgresConfig::default(),
            timeouts: TimeoutConfig::default(),
            base_dir: PathBuf::from("."),
        }
    }
}

impl Config {
    /// Default configuration rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    /// Load from `path`; a missing file yields the defaults rooted at the
    /// file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::new(base_dir));
        }
        let data = std::fs::read_to_string(path)?;
        let mut cfg: Config = serde_yaml::from_str(&data)?;
        cfg.base_dir = base_dir;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    /// Default config location inside `dir`.
    pub fn default_path(dir: &Path) -> PathBuf {
        dir.join(paths::CONFIG_FILE)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn terraform_dir(&self) -> PathBuf {
        self.resolve(&self.terraform_dir)
    }

    pub fn ansible_dir(&self) -> PathBuf {
        self.resolve(&self.ansible_dir)
    }

    fn resolve(&self, p: &Path) -> PathBuf {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.base_dir.join(p)
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.terraform_dir() == self.ansible_dir() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "terraform_dir and ansible_dir must differ".to_string(),
            });
        }

        for (name, bin) in [
            ("terraform_bin", &self.terraform_bin),
            ("ansible_playbook_bin", &self.ansible_playbook_bin),
        ] {
            if bin.trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("{name} is empty"),
                });
            } else if which::which(bin).is_err() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("{name} '{bin}' not found on PATH"),
                });
            }
        }

        let t = &self.timeouts;
        for (name, secs) in [
            ("init_secs", t.init_secs),
            ("plan_secs", t.plan_secs),
            ("apply_secs", t.apply_secs),
            ("output_secs", t.output_secs),
            ("config_secs", t.config_secs),
        ] {
            if secs == 0 {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("timeouts.{name} must be greater than zero"),
                });
            }
        }

        if self.aws.allowed_cidr == "0.0.0.0/0" {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "aws.allowed_cidr is 0.0.0.0/0: SSH and PostgreSQL are open to the internet"
                    .to_string(),
            });
        }

        if self.postgres.replication_password == default_replication_password() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "postgres.replication_password is the built-in default".to_string(),
            });
        }

        if !self.ssh.private_key_path.exists() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "ssh.private_key_path '{}' does not exist",
                    self.ssh.private_key_path.display()
                ),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
