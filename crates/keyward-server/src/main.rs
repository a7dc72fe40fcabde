use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use keyward_server::config::{LogFormat, ServerConfig, DEFAULT_CONFIG_PATH};
use keyward_server::{hash, telemetry};

/// Issues short-lived SSH user certificates
#[derive(Parser)]
#[command(name = "keyward-server")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "KEYWARD_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log format, overriding the configuration file
    #[arg(long, env = "KEYWARD_LOG_FORMAT", value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the API (default)
    Serve,

    /// Hash a password, optionally with a TOTP seed, for the local authenticator
    Hash(hash::HashArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Hash(args) => hash::execute(args),
        Commands::Serve => {
            let config = ServerConfig::load(&cli.config)
                .with_context(|| format!("failed to load {}", cli.config.display()))?;
            telemetry::init(&config.log_level, cli.log_format.unwrap_or(config.log_format));
            keyward_server::run(config).await
        }
    }
}
