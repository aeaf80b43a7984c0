use agora_client_core::cli::{self, Cli};
use agora_client_core::telemetry::logging;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env values must be visible before clap reads AGORA_* defaults
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init(&cli.logging.to_config())?;
    cli::run(cli).await
}
