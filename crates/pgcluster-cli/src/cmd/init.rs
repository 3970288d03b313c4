use anyhow::Context;
use pgcluster_core::{config::Config, io};
use std::path::Path;

/// Write a default `pgcluster.yaml` if missing and create the working
/// directories it names.
pub fn run(config_path: &Path) -> anyhow::Result<()> {
    let display = config_path.display();

    let config = if config_path.exists() {
        println!("  exists:  {display}");
        Config::load(config_path).with_context(|| format!("failed to load {display}"))?
    } else {
        let config = Config::load(config_path)?;
        config
            .save(config_path)
            .with_context(|| format!("failed to write {display}"))?;
        println!("  created: {display}");
        config
    };

    for dir in [config.terraform_dir(), config.ansible_dir()] {
        if dir.is_dir() {
            println!("  exists:  {}", dir.display());
        } else {
            io::ensure_dir(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
            println!("  created: {}", dir.display());
        }
    }

    Ok(())
}
