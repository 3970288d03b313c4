//! Terraform descriptor rendering and persistence.
//!
//! Descriptors use Terraform's JSON syntax and are built from typed structs,
//! so request values are always JSON string or number literals and can never
//! change the shape of the declaration.

use crate::config::AwsConfig;
use crate::error::Result;
use crate::paths;
use crate::types::ProvisioningRequest;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

pub const PRIMARY_RESOURCE: &str = "primary_db";
pub const REPLICA_RESOURCE: &str = "replica_db";
pub const SECURITY_GROUP_RESOURCE: &str = "postgres_sg";
pub const PRIMARY_OUTPUT: &str = "primary_db_public_ip";
pub const REPLICA_OUTPUT: &str = "replica_db_public_ips";

const SSH_PORT: u16 = 22;
const POSTGRES_PORT: u16 = 5432;

/// Rendered descriptor text, one entry per file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub infrastructure: String,
    pub outputs: String,
}

// ---------------------------------------------------------------------------
// Typed Terraform model
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct InfrastructureDoc<'a> {
    provider: BTreeMap<&'static str, Provider<'a>>,
    resource: Resources<'a>,
}

#[derive(Serialize)]
struct Provider<'a> {
    region: &'a str,
}

#[derive(Serialize)]
struct Resources<'a> {
    aws_security_group: BTreeMap<&'static str, SecurityGroup>,
    aws_instance: BTreeMap<&'static str, Instance<'a>>,
}

#[derive(Serialize)]
struct SecurityGroup {
    name: String,
    description: &'static str,
    ingress: Vec<Rule>,
    egress: Vec<Rule>,
}

/// Terraform JSON treats `ingress`/`egress` as attributes, so every
/// argument must be present even when empty.
#[derive(Serialize)]
struct Rule {
    description: &'static str,
    from_port: u16,
    to_port: u16,
    protocol: &'static str,
    cidr_blocks: Vec<String>,
    ipv6_cidr_blocks: Vec<String>,
    prefix_list_ids: Vec<String>,
    security_groups: Vec<String>,
    #[serde(rename = "self")]
    self_: bool,
}

impl Rule {
    fn tcp(description: &'static str, port: u16, cidr: &str) -> Self {
        Self {
            description,
            from_port: port,
            to_port: port,
            protocol: "tcp",
            cidr_blocks: vec![cidr.to_string()],
            ipv6_cidr_blocks: Vec::new(),
            prefix_list_ids: Vec::new(),
            security_groups: Vec::new(),
            self_: false,
        }
    }

    fn all_egress() -> Self {
        Self {
            description: "Allow all outbound traffic",
            from_port: 0,
            to_port: 0,
            protocol: "-1",
            cidr_blocks: vec!["0.0.0.0/0".to_string()],
            ipv6_cidr_blocks: Vec::new(),
            prefix_list_ids: Vec::new(),
            security_groups: Vec::new(),
            self_: false,
        }
    }
}

#[derive(Serialize)]
struct Instance<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<u32>,
    ami: &'a str,
    instance_type: &'a str,
    key_name: &'a str,
    security_groups: Vec<String>,
    tags: BTreeMap<&'static str, String>,
}

#[derive(Serialize)]
struct OutputsDoc {
    output: BTreeMap<&'static str, OutputValue>,
}

#[derive(Serialize)]
struct OutputValue {
    value: String,
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Render the descriptor for `request`. Pure: no I/O.
pub fn render(request: &ProvisioningRequest, aws: &AwsConfig) -> Descriptor {
    let sg_ref = format!("${{aws_security_group.{SECURITY_GROUP_RESOURCE}.name}}");

    let security_group = SecurityGroup {
        name: format!("{}-postgres-sg", aws.name_prefix),
        description: "Security group for PostgreSQL instances",
        ingress: vec![
            Rule::tcp("Allow SSH", SSH_PORT, &aws.allowed_cidr),
            Rule::tcp("Allow PostgreSQL", POSTGRES_PORT, &aws.allowed_cidr),
        ],
        egress: vec![Rule::all_egress()],
    };

    let primary = Instance {
        count: None,
        ami: &aws.ami,
        instance_type: request.machine_class(),
        key_name: &aws.key_name,
        security_groups: vec![sg_ref.clone()],
        tags: BTreeMap::from([("Name", format!("{}-primary-db", aws.name_prefix))]),
    };

    let replica = Instance {
        count: Some(request.replica_count()),
        ami: &aws.ami,
        instance_type: request.machine_class(),
        key_name: &aws.key_name,
        security_groups: vec![sg_ref],
        tags: BTreeMap::from([(
            "Name",
            format!("{}-replica-db-${{count.index + 1}}", aws.name_prefix),
        )]),
    };

    let infra = InfrastructureDoc {
        provider: BTreeMap::from([("aws", Provider { region: &aws.region })]),
        resource: Resources {
            aws_security_group: BTreeMap::from([(SECURITY_GROUP_RESOURCE, security_group)]),
            aws_instance: BTreeMap::from([(PRIMARY_RESOURCE, primary), (REPLICA_RESOURCE, replica)]),
        },
    };

    let outputs = OutputsDoc {
        output: BTreeMap::from([
            (
                PRIMARY_OUTPUT,
                OutputValue {
                    value: format!("${{aws_instance.{PRIMARY_RESOURCE}.public_ip}}"),
                },
            ),
            (
                REPLICA_OUTPUT,
                OutputValue {
                    value: format!("${{aws_instance.{REPLICA_RESOURCE}[*].public_ip}}"),
                },
            ),
        ]),
    };

    Descriptor {
        infrastructure: to_pretty_json(&infra),
        outputs: to_pretty_json(&outputs),
    }
}

fn to_pretty_json<T: Serialize>(value: &T) -> String {
    // The model holds only strings, integers, bools, and string-keyed maps,
    // none of which can fail to serialize.
    let mut text = serde_json::to_string_pretty(value).unwrap_or_default();
    text.push('\n');
    text
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Write both descriptor files into `work_dir`, replacing prior contents.
pub fn persist(descriptor: &Descriptor, work_dir: &Path) -> Result<()> {
    crate::io::ensure_dir(work_dir)?;
    crate::io::atomic_write(
        &paths::infrastructure_path(work_dir),
        descriptor.infrastructure.as_bytes(),
    )?;
    crate::io::atomic_write(&paths::outputs_path(work_dir), descriptor.outputs.as_bytes())?;
    for legacy in paths::LEGACY_DESCRIPTOR_FILES {
        if crate::io::remove_if_exists(&work_dir.join(legacy))? {
            tracing::info!(file = legacy, "removed legacy HCL descriptor");
        }
    }
    tracing::info!(dir = %work_dir.display(), "descriptor written");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
