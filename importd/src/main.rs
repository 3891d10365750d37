//! importd - Import job coordinator
//!
//! `importd serve` (default) runs the HTTP gateway and the built-in schedule
//! timer. The other subcommands act on the same database directly and exit.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use importd::models::schedule::{DAILY_SECS, WEEKLY_SECS};
use importd::models::{cadence_interval, ScheduleAction};
use importd::services::{
    Coordinator, FileSourceOpener, FsMaintenance, SqliteRecordSink, Validator,
};
use importd::store::{CoordinationStore, SqliteStore};
use importd::types::MaintenanceHooks;
use importd::{build_router, AppState};
use importd_common::api::auth::load_shared_secret;
use importd_common::config::{self, RootFolderInitializer, RootFolderResolver, TomlConfig};
use importd_common::events::EventBus;
use importd_common::SourceKind;
use sqlx::SqlitePool;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for importd
#[derive(Parser, Debug)]
#[command(name = "importd")]
#[command(about = "Import job coordinator")]
#[command(version)]
struct Args {
    /// Config file (default: IMPORTD_CONFIG, then ~/.config/importd/importd.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Root data folder holding the database and temp files
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP gateway and schedule timer (default)
    Serve {
        /// Port to listen on (overrides [server] port)
        #[arg(short, long, env = "IMPORTD_PORT")]
        port: Option<u16>,
    },
    /// Run one import in the foreground and wait for it to finish
    Run {
        /// Source to read from (default: the config's source kind)
        #[arg(short, long)]
        source: Option<SourceKind>,
    },
    /// Print lock, progress and historical counters
    Status,
    /// Evaluate one cadence now
    Tick {
        cadence_id: String,
    },
    /// Validate the stored import config, optionally probing a source
    Validate {
        #[arg(short, long)]
        source: Option<SourceKind>,
    },
    /// Force-release the run lock and clean up
    Reset {
        /// Required: confirms the reset
        #[arg(long)]
        confirm: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let toml_config = config::load_or_default(args.config.as_deref());

    let default_filter = format!(
        "importd={level},importd_common={level},tower_http=info",
        level = toml_config.logging.level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting importd v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let root_folder = RootFolderResolver::new(args.root.clone(), &toml_config).resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .with_context(|| format!("Failed to initialize root folder {}", initializer.root_folder().display()))?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let pool = importd::db::init_database_pool(&db_path)
        .await
        .context("Failed to open database")?;

    let event_bus = EventBus::new(100);
    let coordinator = match build_coordinator(&pool, &initializer, &toml_config, event_bus.clone()) {
        Ok(coordinator) => coordinator,
        Err(e) => {
            error!(error = %e, "Coordinator activation failed");
            return Err(e);
        }
    };

    match args.command.unwrap_or(Command::Serve { port: None }) {
        Command::Serve { port } => serve(pool, coordinator, event_bus, &toml_config, port).await,
        Command::Run { source } => run_once(&coordinator, source).await,
        Command::Status => print_status(&coordinator).await,
        Command::Tick { cadence_id } => {
            let outcome = coordinator.scheduler.on_tick(&cadence_id).await?;
            print_json(&outcome)
        }
        Command::Validate { source } => validate(&coordinator, source).await,
        Command::Reset { confirm } => {
            if !confirm {
                bail!("Refusing to reset without --confirm");
            }
            let report = coordinator.emergency_reset(true).await?;
            print_json(&report)
        }
    }
}

fn build_coordinator(
    pool: &SqlitePool,
    initializer: &RootFolderInitializer,
    toml_config: &TomlConfig,
    event_bus: EventBus,
) -> Result<Coordinator> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("importd/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let store: Arc<dyn CoordinationStore> = Arc::new(SqliteStore::new(
        pool.clone(),
        toml_config.coordinator.max_lock_wait_ms,
    ));
    let maintenance: Arc<dyn MaintenanceHooks> =
        Arc::new(FsMaintenance::new(initializer.temp_path(), store.clone()));

    let coordinator = Coordinator::builder()
        .db(pool.clone())
        .store(store)
        .validator(Validator::new(client.clone()))
        .sources(Arc::new(FileSourceOpener::new(client, initializer.temp_path())))
        .sink(Arc::new(SqliteRecordSink::new(pool.clone())))
        .maintenance(maintenance)
        .event_bus(event_bus)
        .data_dir(initializer.root_folder().to_path_buf())
        .stuck_threshold_secs(toml_config.coordinator.stuck_threshold_secs)
        .resource_minimums(
            toml_config.coordinator.min_free_disk_mb,
            toml_config.coordinator.min_available_memory_mb,
        )
        .fallback_config(toml_config.import.clone())
        .build()?;

    Ok(coordinator)
}

/// Register the cadences named in the config; existing entries keep their timing
async fn register_cadences(coordinator: &Coordinator, toml_config: &TomlConfig) -> Result<()> {
    let scheduler = &coordinator.scheduler;
    let settings = &toml_config.scheduler;

    if settings.maintenance {
        scheduler
            .ensure_scheduled("daily-maintenance", DAILY_SECS, ScheduleAction::Maintenance, None)
            .await?;
        scheduler
            .ensure_scheduled("weekly-maintenance", WEEKLY_SECS, ScheduleAction::Maintenance, None)
            .await?;
    }

    if let Some(name) = &settings.import_cadence {
        match cadence_interval(name) {
            Some(interval) => {
                scheduler
                    .ensure_scheduled(
                        &format!("{}-import", name.trim().to_ascii_lowercase()),
                        interval,
                        ScheduleAction::Import,
                        settings.import_source,
                    )
                    .await?;
            }
            None => warn!(cadence = %name, "Unknown import cadence in config, recurring import disabled"),
        }
    }

    Ok(())
}

async fn serve(
    pool: SqlitePool,
    coordinator: Coordinator,
    event_bus: EventBus,
    toml_config: &TomlConfig,
    port: Option<u16>,
) -> Result<()> {
    register_cadences(&coordinator, toml_config).await?;

    // A record left active by a previous process cannot have a live batch loop
    match coordinator.maintenance.cleanup_dead_processes().await {
        Ok(0) => {}
        Ok(n) => warn!(cleared = n, "Orphaned import run from a previous process marked failed"),
        Err(e) => warn!(error = %e, "Startup dead-process cleanup failed"),
    }

    let shared_secret = load_shared_secret(&pool)
        .await
        .context("Failed to load API shared secret")?;
    if shared_secret == 0 {
        info!("API authentication disabled (shared_secret = 0)");
    } else {
        info!("Loaded shared secret for API authentication");
    }

    let shutdown = CancellationToken::new();
    let tick_interval = toml_config.scheduler.tick_interval_secs;
    let timer = if tick_interval > 0 {
        let scheduler = coordinator.scheduler.clone();
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(tick_interval));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        scheduler.tick_all(Utc::now()).await;
                    }
                }
            }
            info!("Schedule timer stopped");
        }))
    } else {
        info!("Built-in schedule timer disabled; drive cadences via POST /schedule/tick");
        None
    };

    let state = AppState::new(
        pool,
        coordinator,
        event_bus,
        shared_secret,
        toml_config.auth.timestamp_window_ms,
    );
    let app = build_router(state);

    let host: std::net::IpAddr = toml_config
        .server
        .host
        .parse()
        .with_context(|| format!("Invalid server host: {}", toml_config.server.host))?;
    let addr = SocketAddr::new(host, port.unwrap_or(toml_config.server.port));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Some(timer) = timer {
        let _ = timer.await;
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn run_once(coordinator: &Coordinator, source: Option<SourceKind>) -> Result<()> {
    let config = coordinator.current_config().await?;
    let source_kind = source.unwrap_or(config.source_kind);

    let handle = coordinator
        .controller
        .start(source_kind, config, "cli")
        .await?;
    info!(session_id = %handle.session_id, "Import running; Ctrl+C requests cancellation");

    let session_id = handle.session_id;
    let controller = coordinator.controller.clone();
    let canceller = tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!(session_id = %session_id, "Interrupted, cancelling at next batch boundary");
            if let Err(e) = controller.cancel(session_id).await {
                warn!(error = %e, "Cancel request failed");
            }
        }
    });

    let result = handle.wait().await;
    canceller.abort();

    let progress = result?;
    print_json(&progress)
}

async fn print_status(coordinator: &Coordinator) -> Result<()> {
    let store = coordinator.controller.store();
    let status = serde_json::json!({
        "active_session": coordinator.controller.active_session().await?,
        "lock": store.read_lock().await?,
        "progress": store.read_progress().await?,
        "stats": store.read_stats().await?,
        "schedule": coordinator.scheduler.entries().await?,
    });
    print_json(&status)
}

async fn validate(coordinator: &Coordinator, source: Option<SourceKind>) -> Result<()> {
    let config = coordinator.current_config().await?;
    let report = match source {
        Some(kind) => coordinator.validator.validate_source(kind, &config).await,
        None => coordinator.validator.validate_config(&config).await,
    };
    print_json(&report)?;
    if !report.valid {
        bail!("Configuration is invalid");
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
