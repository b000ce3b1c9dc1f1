use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use anti_truncation_proxy::{config, logging, server};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    match args.get_command() {
        cli::Commands::Serve => {
            let cfg = config::load_config()?;
            logging::init_tracing(&cfg.server);
            server::start_server(cfg).await?;
        }
        cli::Commands::Config { action } => match action {
            cli::ConfigCommands::Show => commands::config::show()?,
            cli::ConfigCommands::Validate => commands::config::validate()?,
        },
        cli::Commands::Version => {
            println!("anti-truncation-proxy v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
