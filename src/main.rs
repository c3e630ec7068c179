use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use runnel::app::AppContext;
use runnel::cli::{commands, Cli, Commands};
use runnel::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the JSON records
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    let ctx = AppContext::new(cli.db, config)?;

    match cli.command {
        Commands::Feeds { urls } => {
            commands::feeds(&ctx, &urls).await?;
        }
        Commands::Entries { urls, since } => {
            commands::entries(&ctx, &urls, since.as_deref()).await?;
        }
        Commands::Update => {
            commands::update(&ctx).await?;
        }
        Commands::Flush => {
            commands::flush(&ctx)?;
        }
        Commands::Ranks { limit } => {
            commands::ranks(&ctx, limit)?;
        }
        Commands::List => {
            commands::list(&ctx)?;
        }
        Commands::Has { url } => {
            commands::has(&ctx, &url)?;
        }
        Commands::Remove { url } => {
            commands::remove(&ctx, &url)?;
        }
        Commands::ResetRanks => {
            commands::reset_ranks(&ctx)?;
        }
        Commands::Watch {
            interval,
            no_initial_update,
        } => {
            commands::watch(&ctx, &interval, no_initial_update).await?;
        }
    }

    Ok(())
}
