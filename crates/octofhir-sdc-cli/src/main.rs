mod cli;
mod commands;
mod config;
mod observability;
mod output;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};
use output::print_error;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let format = cli.format.unwrap_or_default();

    observability::init_tracing_with_level(cli.log_level.as_deref().unwrap_or("warn"));
    let config = config::load_config(cli.config.as_deref())?;
    if cli.log_level.is_none() {
        observability::apply_logging_level(&config.logging.level);
    }

    match &cli.command {
        Commands::Populate(args) => {
            commands::populate::populate(args, &config, format).await?;
        }
        Commands::Index(args) => {
            commands::index::index(&args.questionnaire, format)?;
        }
        Commands::Config => {
            output::print_json(&serde_json::to_value(&config)?);
        }
    }

    Ok(())
}
