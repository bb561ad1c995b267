use clap::Parser;
use workflow_server::{Config, init_tracing, run, shutdown_signal};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(&config.log_level);

    run(config, shutdown_signal()).await
}
