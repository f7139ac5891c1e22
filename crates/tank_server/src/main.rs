//! Tank Arena - Dedicated Server

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tank_server::config::{load_map, load_rules, Cli};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    tracing::info!("Starting Tank Arena Dedicated Server");

    let config = cli.into_config();
    let rules = load_rules(config.rules_path.as_deref());
    let map = load_map(config.map_path.as_deref());

    match tank_server::run(config, rules, map).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Server stopped");
            std::process::ExitCode::FAILURE
        }
    }
}
