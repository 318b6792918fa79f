mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use fleet_controller::config::Settings;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)?;

    match cli.command {
        Commands::Serve { addr } => commands::serve::run(settings, &addr).await?,
        Commands::Schedule => commands::schedule::run(settings).await?,
        Commands::Status { app } => commands::status::run(settings, &app).await?,
        Commands::Start { app, dry_run } => commands::lifecycle::start(settings, &app, dry_run).await?,
        Commands::Stop { app } => commands::lifecycle::stop(settings, &app).await?,
        Commands::Check => commands::check::run(settings).await?,
    }

    Ok(())
}
