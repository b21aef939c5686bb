// intellid - Intelligence definition serving pipeline
// Main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use intellid::cache::fingerprint;
use intellid::config::{default_config_path, load_config};
use intellid::server::ApiServer;

const DEFAULT_LOG_FILTER: &str = "intellid=info,tower_http=info";

#[derive(Parser)]
#[command(
    name = "intellid",
    version,
    about = "Serve intelligence definitions as HTTP endpoints backed by an LLM provider"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Config file (defaults to ~/.intellid/config.toml)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override server.bind_address
        #[arg(long)]
        bind: Option<String>,
    },
    /// Print the cache fingerprint of an input
    Fingerprint {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        definition: String,
        /// Input as a JSON document
        #[arg(long)]
        input: String,
    },
    /// Load and validate the configuration, then exit
    CheckConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, bind } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(bind) = bind {
                config.server.bind_address = bind;
                config.validate().context("Invalid --bind address")?;
            }
            ApiServer::from_config(&config)?.serve().await
        }
        Commands::Fingerprint {
            tenant,
            definition,
            input,
        } => {
            let input: serde_json::Value =
                serde_json::from_str(&input).context("--input is not valid JSON")?;
            println!("{}", fingerprint(&tenant, &definition, &input));
            Ok(())
        }
        Commands::CheckConfig { config } => {
            let path = config.clone().or_else(default_config_path);
            let loaded = load_config(config.as_deref())?;
            println!("✓ Configuration is valid");
            if let Some(path) = path.filter(|p| p.exists()) {
                println!("  file:      {}", path.display());
            }
            println!("  provider:  {}", loaded.provider.name());
            println!("  bind:      {}", loaded.server.bind_address);
            println!("  api keys:  {}", loaded.api_keys.len());
            println!(
                "  breaker:   {} failures / {}s cooldown",
                loaded.breaker.failure_threshold, loaded.breaker.cooldown_secs
            );
            Ok(())
        }
    }
}
