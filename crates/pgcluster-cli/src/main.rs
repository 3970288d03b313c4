mod cmd;
mod output;
mod root;

use anyhow::Context;
use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use pgcluster_core::config::Config;
use pgcluster_core::types::{
    TuningRequest, DEFAULT_MACHINE_CLASS, DEFAULT_MAX_CONNECTIONS, DEFAULT_REPLICA_COUNT,
    DEFAULT_SHARED_BUFFERS,
};
use pgcluster_core::Orchestrator;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "pgcluster",
    about = "Provision a primary/replica PostgreSQL cluster with Terraform and Ansible",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to pgcluster.yaml
    #[arg(long, global = true, env = "PGCLUSTER_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default pgcluster.yaml and create the working directories
    Init,

    /// Run the HTTP control plane
    Serve {
        #[arg(long, default_value = "5000")]
        port: u16,
    },

    /// Render the Terraform descriptor for a cluster
    Generate {
        #[arg(long, default_value = DEFAULT_MACHINE_CLASS)]
        machine_class: String,
        #[arg(long, default_value_t = DEFAULT_REPLICA_COUNT)]
        replicas: u32,
    },

    /// terraform init + plan
    Plan,

    /// terraform apply
    Apply,

    /// Derive the Ansible inventory from Terraform outputs
    Inventory,

    /// Render the PostgreSQL playbook and run it
    Configure {
        #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS)]
        max_connections: u32,
        #[arg(long, default_value = DEFAULT_SHARED_BUFFERS)]
        shared_buffers: String,
    },

    /// Every phase in order: generate, plan, apply, inventory, configure
    Up {
        #[arg(long, default_value = DEFAULT_MACHINE_CLASS)]
        machine_class: String,
        #[arg(long, default_value_t = DEFAULT_REPLICA_COUNT)]
        replicas: u32,
        #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS)]
        max_connections: u32,
        #[arg(long, default_value = DEFAULT_SHARED_BUFFERS)]
        shared_buffers: String,
    },

    /// Show the working tree's provisioning state
    Status,

    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } | Commands::Up { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = root::resolve_config_path(cli.config.as_deref());

    let json = cli.json;
    let orchestrator = || load_config(&config_path).map(Orchestrator::new);

    let result = match cli.command {
        Commands::Init => cmd::init::run(&config_path),
        Commands::Config { subcommand } => cmd::config::run(&config_path, subcommand, json),
        Commands::Serve { port } => {
            load_config(&config_path).and_then(|config| cmd::serve::run(config, port))
        }
        Commands::Generate {
            machine_class,
            replicas,
        } => orchestrator()
            .and_then(|o| cmd::pipeline::generate(&o, &machine_class, replicas, json)),
        Commands::Plan => orchestrator().and_then(|o| cmd::pipeline::plan(&o, json)),
        Commands::Apply => orchestrator().and_then(|o| cmd::pipeline::apply(&o, json)),
        Commands::Inventory => orchestrator().and_then(|o| cmd::pipeline::inventory(&o, json)),
        Commands::Configure {
            max_connections,
            shared_buffers,
        } => orchestrator().and_then(|o| {
            let tuning = TuningRequest::new(max_connections, shared_buffers);
            cmd::pipeline::configure(&o, tuning, json)
        }),
        Commands::Up {
            machine_class,
            replicas,
            max_connections,
            shared_buffers,
        } => orchestrator().and_then(|o| {
            let tuning = TuningRequest::new(max_connections, shared_buffers);
            cmd::pipeline::up(&o, &machine_class, replicas, tuning, json)
        }),
        Commands::Status => orchestrator().and_then(|o| cmd::status::run(&o, json)),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn load_config(path: &std::path::Path) -> anyhow::Result<Config> {
    Config::load(path).with_context(|| format!("failed to load {}", path.display()))
}
