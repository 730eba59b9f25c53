mod commands;
mod config;
mod db;

use anyhow::Result;
use clap::Parser;
use config::{Cli, Commands, ResolvedConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("codetrace=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let config = ResolvedConfig::resolve(&cli)?;

    match cli.command {
        Commands::Index { project, force } => commands::index::run(&config, &project, force).await,
        Commands::Search { query, project, limit, kind } => {
            commands::search::run(&config, &query, &project, limit, kind.as_deref()).await
        }
        Commands::Context { query, project, max_tokens } => {
            commands::context::run(&config, &query, &project, max_tokens).await
        }
    }
}
