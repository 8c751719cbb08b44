//! fdc-ingest - Survey ingestion service
//!
//! `serve` (default) runs the HTTP endpoint; `grant` registers an operator
//! and prints a fresh access token.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fdc_common::config::{RootFolderInitializer, RootFolderResolver};
use fdc_ingest::config::{IngestConfig, DATABASE_FILE, MODULE_NAME};
use fdc_ingest::{build_router, db, AppState};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for fdc-ingest
#[derive(Parser, Debug)]
#[command(name = "fdc-ingest")]
#[command(about = "Survey ingestion service")]
#[command(version)]
struct Args {
    /// Root folder holding the service database
    #[arg(long, env = "FDC_ROOT_FOLDER", global = true)]
    root_folder: Option<PathBuf>,

    /// Configuration file (defaults to <config dir>/fdc/fdc-ingest.toml)
    #[arg(long, env = "FDC_INGEST_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP endpoint
    Serve {
        /// Port to listen on (overrides the config file)
        #[arg(short, long, env = "FDC_INGEST_PORT")]
        port: Option<u16>,
    },

    /// Register an operator and print a new access token
    Grant {
        #[arg(long)]
        operator: String,

        #[arg(long)]
        organization: String,

        /// Campaign the operator may submit to (repeatable)
        #[arg(long = "campaign", required = true)]
        campaigns: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = IngestConfig::load(args.config.as_deref());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(config.logging.level.as_deref().unwrap_or("info"))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        "Starting fdc-ingest v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(args.root_folder.clone())
        .with_toml_root(config.root_folder.clone())
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer.ensure_directory_exists()?;

    let db_path = initializer.database_path(DATABASE_FILE);
    info!("Database path: {}", db_path.display());

    let pool = match fdc_common::db::open_database(&db_path).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to open database: {}", e);
            return Err(e.into());
        }
    };
    db::init_schema(&pool)
        .await
        .context("Failed to create ingestion schema")?;

    match args.command.unwrap_or(Command::Serve { port: None }) {
        Command::Grant {
            operator,
            organization,
            campaigns,
        } => {
            let token = db::operators::grant(&pool, &operator, &organization, &campaigns)
                .await
                .context("Failed to register operator")?;
            println!("{}", token);
        }
        Command::Serve { port } => {
            let mut config = config;
            if let Some(port) = port {
                config.port = port;
            }
            serve(pool, &config).await?;
        }
    }

    Ok(())
}

async fn serve(pool: sqlx::SqlitePool, config: &IngestConfig) -> Result<()> {
    let app = build_router(AppState::new(pool));

    let address = config.listen_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind to {}", address))?;
    info!("fdc-ingest listening on http://{}", address);
    info!("Health check: http://{}/health", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
