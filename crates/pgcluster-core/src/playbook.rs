//! Ansible playbook rendering.
//!
//! The playbook is a typed task list serialized with serde_yaml. Tuning
//! values are validated before they reach the model, and every
//! primary-only or replica-only task carries a `when` guard on the group
//! names from [`crate::inventory`]. Replica rebuild tasks are also skipped
//! on hosts that already run as a standby, so the playbook can be rerun.

use crate::config::PostgresConfig;
use crate::error::Result;
use crate::inventory::{PRIMARY_GROUP, REPLICA_GROUP};
use crate::types::{Tuning, TuningRequest};
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// Rendered playbook text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationScript {
    pub text: String,
}

impl ConfigurationScript {
    pub fn write(&self, path: &Path) -> Result<()> {
        crate::io::atomic_write(path, self.text.as_bytes())?;
        tracing::info!(path = %path.display(), "playbook written");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    All,
    Primary,
    Replica,
}

/// Registered result of the `standby.signal` check on replicas.
const STANDBY_FACT: &str = "standby";

impl Target {
    fn when(self) -> Option<String> {
        match self {
            Target::All => None,
            Target::Primary => Some(format!("'{PRIMARY_GROUP}' in group_names")),
            Target::Replica => Some(format!("'{REPLICA_GROUP}' in group_names")),
        }
    }
}

#[derive(Serialize)]
struct Play {
    name: &'static str,
    hosts: &'static str,
    #[serde(rename = "become")]
    become_root: bool,
    tasks: Vec<Task>,
}

#[derive(Serialize)]
struct Task {
    name: String,
    #[serde(flatten)]
    action: Mapping,
    #[serde(rename = "loop", skip_serializing_if = "Option::is_none")]
    loop_items: Option<Value>,
    #[serde(rename = "become", skip_serializing_if = "Option::is_none")]
    become_root: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    become_user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    environment: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    register: Option<String>,
    /// A single condition, or a list that must all hold.
    #[serde(skip_serializing_if = "Option::is_none")]
    when: Option<Value>,
}

impl Task {
    fn new(name: impl Into<String>, target: Target, module: &str, args: Value) -> Self {
        let mut action = Mapping::new();
        action.insert(Value::from(module), args);
        Self {
            name: name.into(),
            action,
            loop_items: None,
            become_root: None,
            become_user: None,
            environment: None,
            register: None,
            when: target.when().map(Value::String),
        }
    }

    fn looping(mut self, items: Value) -> Self {
        self.loop_items = Some(items);
        self
    }

    fn as_root(mut self) -> Self {
        self.become_root = Some(true);
        self
    }

    fn as_user(mut self, user: &str) -> Self {
        self.become_root = Some(true);
        self.become_user = Some(user.to_string());
        self
    }

    fn registering(mut self, fact: &str) -> Self {
        self.register = Some(fact.to_string());
        self
    }

    /// Add a condition on top of the target guard.
    fn also_when(mut self, condition: String) -> Self {
        let mut conditions = match self.when.take() {
            Some(Value::Sequence(seq)) => seq,
            Some(other) => vec![other],
            None => Vec::new(),
        };
        conditions.push(Value::String(condition));
        self.when = Some(Value::Sequence(conditions));
        self
    }

    fn with_env(mut self, key: &str, value: &str) -> Self {
        self.environment
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
        self
    }
}

/// Build a YAML mapping from `(key, value)` pairs, preserving order.
fn map<const N: usize>(pairs: [(&str, Value); N]) -> Value {
    let mut m = Mapping::new();
    for (k, v) in pairs {
        m.insert(Value::from(k), v);
    }
    Value::Mapping(m)
}

fn s(text: impl Into<String>) -> Value {
    Value::String(text.into())
}

fn line_in_file(path: &str, regexp: &str, line: String) -> Value {
    map([("path", s(path)), ("regexp", s(regexp)), ("line", s(line))])
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Validate `tuning` and render the cluster playbook.
pub fn render(tuning: &TuningRequest, pg: &PostgresConfig) -> Result<ConfigurationScript> {
    let tuning = tuning.validate()?;
    let plays = vec![Play {
        name: "Set up PostgreSQL primary/replica cluster",
        hosts: "all",
        become_root: true,
        tasks: tasks(&tuning, pg),
    }];
    let text = serde_yaml::to_string(&plays)?;
    Ok(ConfigurationScript {
        text: format!("---\n{text}"),
    })
}

fn tasks(tuning: &Tuning, pg: &PostgresConfig) -> Vec<Task> {
    let conf = format!("{}/postgresql.conf", pg.conf_dir());
    let hba = format!("{}/pg_hba.conf", pg.conf_dir());
    let data_dir = pg.data_dir();

    let mut tasks = vec![
        // -- all hosts -------------------------------------------------------
        Task::new(
            "Install PostgreSQL and support packages",
            Target::All,
            "apt",
            map([
                ("update_cache", Value::Bool(true)),
                (
                    "name",
                    Value::Sequence(vec![
                        s("postgresql"),
                        s("postgresql-contrib"),
                        s("acl"),
                        s("python3-psycopg2"),
                    ]),
                ),
                ("state", s("present")),
            ]),
        ),
        Task::new(
            "Ensure PostgreSQL is running and enabled",
            Target::All,
            "systemd",
            map([
                ("name", s("postgresql")),
                ("state", s("started")),
                ("enabled", Value::Bool(true)),
            ]),
        ),
        Task::new(
            "Set max_connections",
            Target::All,
            "lineinfile",
            line_in_file(
                &conf,
                "^#?max_connections",
                format!("max_connections = {}", tuning.max_connections),
            ),
        ),
        Task::new(
            "Set shared_buffers",
            Target::All,
            "lineinfile",
            line_in_file(
                &conf,
                "^#?shared_buffers",
                format!("shared_buffers = '{}'", tuning.shared_buffers),
            ),
        ),
    ];

    // -- primary only ---------------------------------------------------------
    tasks.push(
        Task::new(
            "Enable replication settings",
            Target::Primary,
            "lineinfile",
            map([
                ("path", s(conf.as_str())),
                ("regexp", s("{{ item.regexp }}")),
                ("line", s("{{ item.line }}")),
            ]),
        )
        .looping(Value::Sequence(vec![
            map([("regexp", s("^#?wal_level")), ("line", s("wal_level = logical"))]),
            map([("regexp", s("^#?wal_log_hints")), ("line", s("wal_log_hints = on"))]),
            map([
                ("regexp", s("^#?max_wal_senders")),
                ("line", s(format!("max_wal_senders = {}", pg.max_wal_senders))),
            ]),
            map([
                ("regexp", s("^#?listen_addresses")),
                ("line", s("listen_addresses = '*'")),
            ]),
        ])),
    );
    tasks.push(
        Task::new(
            "Allow replication connections from replicas",
            Target::Primary,
            "lineinfile",
            map([
                ("path", s(hba.as_str())),
                (
                    "line",
                    s(format!("host replication {} {{{{ item }}}}/32 md5", pg.replication_user)),
                ),
            ]),
        )
        .looping(s(format!(
            "{{{{ groups['{REPLICA_GROUP}'] | default([]) | map('extract', hostvars, 'ansible_host') | list }}}}"
        ))),
    );
    tasks.push(
        Task::new(
            "Create replication role",
            Target::Primary,
            "postgresql_user",
            map([
                ("name", s(pg.replication_user.as_str())),
                ("password", s(pg.replication_password.as_str())),
                ("role_attr_flags", s("REPLICATION")),
                ("state", s("present")),
            ]),
        )
        .as_user("postgres"),
    );
    tasks.push(Task::new(
        "Restart PostgreSQL on primary",
        Target::Primary,
        "systemd",
        map([("name", s("postgresql")), ("state", s("restarted"))]),
    ));

    // -- replica only ---------------------------------------------------------
    // A replica that already has standby.signal was built by an earlier run;
    // wiping it again would also collide with its existing replication slot.
    let fresh = format!("not {STANDBY_FACT}.stat.exists");
    tasks.push(
        Task::new(
            "Check for existing standby",
            Target::Replica,
            "stat",
            map([("path", s(format!("{data_dir}/standby.signal")))]),
        )
        .as_root()
        .registering(STANDBY_FACT),
    );
    tasks.push(
        Task::new(
            "Stop PostgreSQL on replica",
            Target::Replica,
            "systemd",
            map([("name", s("postgresql")), ("state", s("stopped"))]),
        )
        .also_when(fresh.clone()),
    );
    tasks.push(
        Task::new(
            "Clear replica data directory",
            Target::Replica,
            "file",
            map([("path", s(data_dir.as_str())), ("state", s("absent"))]),
        )
        .as_root()
        .also_when(fresh.clone()),
    );
    tasks.push(
        Task::new(
            "Derive replication slot name",
            Target::Replica,
            "set_fact",
            map([(
                "replication_slot_name",
                s("replica_{{ inventory_hostname | regex_replace('-', '_') }}"),
            )]),
        )
        .also_when(fresh.clone()),
    );
    tasks.push(
        Task::new(
            "Base backup from primary",
            Target::Replica,
            "command",
            s(format!(
                "pg_basebackup -h {{{{ hostvars[groups['{PRIMARY_GROUP}'][0]].ansible_host }}}} \
                 -U {user} -X stream -C -S {{{{ replication_slot_name }}}} -v -R -D {data_dir}/",
                user = pg.replication_user,
            )),
        )
        .as_user("postgres")
        .with_env("PGPASSWORD", &pg.replication_password)
        .also_when(fresh),
    );
    tasks.push(
        Task::new(
            "Ensure data directory ownership",
            Target::Replica,
            "file",
            map([
                ("path", s(data_dir.as_str())),
                ("state", s("directory")),
                ("owner", s("postgres")),
                ("group", s("postgres")),
                ("mode", s("0700")),
                ("recurse", Value::Bool(true)),
            ]),
        )
        .as_root(),
    );
    tasks.push(Task::new(
        "Start PostgreSQL on replica",
        Target::Replica,
        "systemd",
        map([("name", s("postgresql")), ("state", s("started"))]),
    ));

    tasks
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
