//! GifFix command-line tool
//!
//! # Usage
//!
//! ```bash
//! giffix convert sticker.webp photo.heic -o fixed/
//! giffix convert downloads/ --report json
//! giffix detect sticker.webp
//! ```

use std::io::IsTerminal;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use giffix::adapters::{ConsoleProgressAdapter, NullProgress};
use giffix::app::DefaultAppContainer;
use giffix::cli::{commands, Cli, Commands};
use giffix::config_initialization::initialize_configuration_hierarchy;
use giffix::ports::ProgressPort;
use giffix::utils::logging::init_logging;

/// Main entry point for the GifFix CLI application
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let code = run(cli).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<i32> {
    let config = initialize_configuration_hierarchy(&cli.overrides())
        .context("Failed to load configuration")?;
    init_logging(&config.logging);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting GifFix");

    let progress: Arc<dyn ProgressPort> = match &cli.command {
        Commands::Convert(_) if std::io::stderr().is_terminal() => {
            Arc::new(ConsoleProgressAdapter::new())
        }
        Commands::Convert(_) => Arc::new(ConsoleProgressAdapter::hidden()),
        Commands::Detect(_) => Arc::new(NullProgress),
    };
    let container =
        DefaultAppContainer::new(&config, progress).context("Failed to initialize GifFix")?;

    let code = match &cli.command {
        Commands::Convert(args) => {
            info!("Executing convert command");
            commands::convert(&container, args).await?
        }
        Commands::Detect(args) => {
            info!("Executing detect command");
            commands::detect(&container, args).await?;
            0
        }
    };

    info!(code, "GifFix finished");
    Ok(code)
}
