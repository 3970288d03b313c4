use pgcluster_core::config::Config;

pub fn run(config: Config, port: u16) -> anyhow::Result<()> {
    for w in config.validate() {
        tracing::warn!(level = ?w.level, "{}", w.message);
    }
    super::block_on(pgcluster_server::serve(config, port))?
}
