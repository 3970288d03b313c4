pub mod ansible;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod inventory;
pub mod io;
pub mod lock;
pub mod manifest;
pub mod orchestrator;
pub mod paths;
pub mod playbook;
pub mod process;
pub mod terraform;
pub mod types;

pub use error::{FailureKind, ProvisionError, Result};
pub use orchestrator::Orchestrator;
