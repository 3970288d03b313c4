use pgcluster_core::config::Config;
use std::path::{Path, PathBuf};

/// Resolve the path of `pgcluster.yaml`.
///
/// Priority:
/// 1. `--config` flag / `PGCLUSTER_CONFIG` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `pgcluster.yaml`
/// 3. Fall back to `cwd/pgcluster.yaml` (which may not exist yet)
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_upward(&cwd).unwrap_or_else(|| Config::default_path(&cwd))
}

fn find_upward(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(Config::default_path)
        .find(|candidate| candidate.is_file())
}
