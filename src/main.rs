use clap::Parser;
use ruggine_sync::client::cli_client::{self, CliArgs};
use ruggine_sync::client::config::ClientConfig;
use ruggine_sync::utils::logger::SyncLogger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // load environment from .env (optional)
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();

    let mut config = ClientConfig::from_env();
    args.apply(&mut config);
    SyncLogger::init(&config.log_level)?;

    let credential = args.credential()?;
    cli_client::run(config, credential).await
}
