//! fdc-capture - Field survey capture CLI
//!
//! Device-side entry point: submit a completed draft, drain the offline
//! queue, show queue status, or stay resident and sync whenever the
//! ingestion endpoint becomes reachable.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fdc_capture::config::{CaptureConfig, DATABASE_FILE, MODULE_NAME};
use fdc_capture::connectivity::ReachabilityMonitor;
use fdc_capture::draft::SurveyDraft;
use fdc_capture::geolocation::{Coords, FixedPosition};
use fdc_capture::store::SqliteStore;
use fdc_capture::transport::HttpTransport;
use fdc_capture::wizard::WizardStep;
use fdc_capture::{
    CaptureError, CaptureSession, DrainStatus, SessionContext, SessionServices, SubmitOutcome,
};
use fdc_common::config::{RootFolderInitializer, RootFolderResolver};
use fdc_common::events::{EventBus, FdcEvent};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for fdc-capture
#[derive(Parser, Debug)]
#[command(name = "fdc-capture")]
#[command(about = "Field survey capture engine")]
#[command(version)]
struct Args {
    /// Root folder for the device database
    #[arg(long, env = "FDC_ROOT_FOLDER", global = true)]
    root_folder: Option<PathBuf>,

    /// Configuration file (defaults to <config dir>/fdc/fdc-capture.toml)
    #[arg(long, env = "FDC_CAPTURE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate and submit a completed draft (JSON)
    Submit {
        draft: PathBuf,

        /// Acknowledge the duplicate-submission warning
        #[arg(long)]
        confirm_duplicates: bool,

        /// Latitude to use when the draft has no location
        #[arg(long, requires = "lng")]
        lat: Option<f64>,

        #[arg(long, requires = "lat")]
        lng: Option<f64>,

        /// Accuracy in meters of --lat/--lng
        #[arg(long, default_value = "10")]
        accuracy: f64,
    },

    /// Send every queued submission once
    Drain,

    /// Show pending count, autosave age and recent submissions
    Status,

    /// Stay resident: drain whenever the endpoint becomes reachable
    Watch {
        /// Seconds between reachability probes
        #[arg(long, default_value = "15")]
        probe_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = CaptureConfig::load(args.config.as_deref());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(config.logging.level.as_deref().unwrap_or("info"))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        "Starting fdc-capture v{} [{}] built {} ({})",
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
    info!("Device database: {}", db_path.display());

    let pool = fdc_common::db::open_database(&db_path)
        .await
        .context("Failed to open device database")?;
    let store = Arc::new(
        SqliteStore::new(pool, config.storage.quota_bytes)
            .await
            .context("Failed to prepare local store")?,
    );
    let transport = Arc::new(
        HttpTransport::new(
            config.endpoint_url.clone(),
            config.access_token.clone(),
            config.http.timeout(),
        )
        .context("Failed to create HTTP client")?,
    );
    if config.access_token.is_empty() {
        warn!("No access_token configured; the endpoint will reject submissions");
    }

    let position = match &args.command {
        Command::Submit {
            lat: Some(latitude),
            lng: Some(longitude),
            accuracy,
            ..
        } => Some(Coords {
            latitude: *latitude,
            longitude: *longitude,
            accuracy_m: *accuracy,
        }),
        _ => None,
    };

    let events = EventBus::new(64);
    let mut session = CaptureSession::new(
        SessionContext::from_config(&config),
        &config,
        SessionServices {
            store,
            transport: transport.clone(),
            position: Arc::new(FixedPosition(position)),
            events: events.clone(),
        },
    );

    let result = match args.command {
        Command::Submit {
            draft,
            confirm_duplicates,
            ..
        } => submit(&mut session, &draft, confirm_duplicates).await,
        Command::Drain => drain(&session).await,
        Command::Status => status(&session).await,
        Command::Watch { probe_secs } => {
            watch(&mut session, transport, events, Duration::from_secs(probe_secs)).await
        }
    };

    session.teardown();
    result
}

async fn submit(session: &mut CaptureSession, path: &Path, confirm: bool) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read draft {}", path.display()))?;
    let draft: SurveyDraft = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse draft {}", path.display()))?;
    let needs_location = draft.ubicacion.is_none();

    session.resume_at(draft, WizardStep::Cierre)?;
    if needs_location {
        let state = session.capture_location().await?;
        info!(status = ?state.status, "Location capture finished");
    }

    match session.submit(confirm).await {
        Ok(SubmitOutcome::Sent) => info!("Response sent to the ingestion endpoint"),
        Ok(SubmitOutcome::Queued { pending }) => {
            info!(pending, "Response saved on this device; it will sync on reconnect")
        }
        Ok(SubmitOutcome::NeedsConfirmation { recent }) => bail!(
            "{} responses were submitted in the last minutes; rerun with --confirm-duplicates if this is not a duplicate",
            recent
        ),
        Ok(SubmitOutcome::Invalid(result)) => {
            for issue in &result.blocking_errors {
                warn!(field = issue.field, "{}", issue.message);
            }
            bail!("Draft has {} validation errors", result.blocking_errors.len());
        }
        Err(CaptureError::Capacity(message)) => bail!("Response NOT saved: {}", message),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn drain(session: &CaptureSession) -> Result<()> {
    match session.sync_engine().drain().await? {
        DrainStatus::Completed(outcome) => {
            for item in &outcome.errors {
                warn!(id = %item.id, "Not synced: {}", item.reason);
            }
            info!(
                synced = outcome.synced,
                failed = outcome.failed,
                "Drain finished"
            );
        }
        DrainStatus::AlreadyRunning => info!("A drain is already running"),
    }
    Ok(())
}

async fn status(session: &CaptureSession) -> Result<()> {
    let status = session.status().await?;
    let autosave = match status.autosave_saved_at {
        Some(saved_at) => format!(
            "{} min ago",
            fdc_common::time::age(saved_at, fdc_common::time::now()).num_minutes()
        ),
        None => "none".to_string(),
    };
    println!("Pending submissions: {}", status.pending);
    println!("Autosaved draft:     {}", autosave);
    println!("Recent submissions:  {}", status.recent_submissions);
    Ok(())
}

async fn watch(
    session: &mut CaptureSession,
    transport: Arc<HttpTransport>,
    events: EventBus,
    probe_period: Duration,
) -> Result<()> {
    if let Some(snapshot) = session.mount().await? {
        info!(step = ?snapshot.step, "An autosaved draft is waiting for recovery");
    }

    let mut monitor = ReachabilityMonitor::start(transport, events.clone(), probe_period);
    let mut rx = events.subscribe();
    info!("Watching for connectivity; press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = rx.recv() => match event {
                Ok(FdcEvent::SyncCompleted { synced, failed, pending, .. }) => {
                    info!(synced, failed, pending, "Sync finished");
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    monitor.stop();
    info!("Stopped watching");
    Ok(())
}
