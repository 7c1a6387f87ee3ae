//! Hostlink agent entrypoint.

use clap::Parser;
use hostlink_agent::{Agent, logging};
use hostlink_core::config::Config;
use std::path::PathBuf;
use tracing::info;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "hostlink-agent")]
#[command(version, about = "Endpoint management and observability agent", long_about = None)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;
    let _logging_guard = logging::init(&config.logging)?;

    info!(version = VERSION, device_id = %config.device_id, "Starting hostlink-agent");

    let mut agent = Agent::new(config, VERSION).await?;
    agent.run().await?;

    Ok(())
}
