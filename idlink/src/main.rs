mod migrations;
mod server;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use idlink_core::{
    bootstrap::{init_database, init_services, load_config},
    logging,
};

use server::IdlinkServer;

/// OAuth2 login and identity reconciliation service
#[derive(Debug, Parser)]
#[command(name = "idlink", version, about)]
struct Cli {
    /// Path to the YAML configuration file (defaults to `IDLINK_CONFIG_PATH`, then ./config.yaml)
    #[arg(short, long)]
    config: Option<String>,

    /// Keep identities in memory instead of PostgreSQL (development only)
    #[arg(long)]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load and validate configuration
    let config = load_config(cli.config.as_deref())?;

    // 2. Initialize logging; the guard flushes file output on exit
    let _log_guard = logging::init_logging(&config.logging)?;
    info!("idlink server starting...");
    info!("HTTP address: {}", config.http_address());

    // 3. Database and migrations
    let pool = if cli.in_memory {
        warn!("Running with the in-memory identity store, accounts are lost on restart");
        None
    } else {
        let pool = init_database(&config.database).await?;
        migrations::run_migrations(&pool).await?;
        Some(pool)
    };

    // 4. Services
    let services = init_services(pool, &config)?;

    // 5. Serve until shutdown
    IdlinkServer::new(config, services).run().await
}
