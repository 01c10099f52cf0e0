//! Cadenza Player daemon
//!
//! Headless playback orchestrator: SQLite-backed library and settings, the
//! simulated engine, log-only surfaces and router, and the HTTP/SSE control
//! surface.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use cadenza_common::config::{load_toml_config, resolve_config_path, CONFIG_ENV_VAR};
use cadenza_player::api::{self, AppContext};
use cadenza_player::config::RuntimeSettings;
use cadenza_player::engine::SimulatedEngine;
use cadenza_player::library::SqliteLibrary;
use cadenza_player::routing::LoggingRouter;
use cadenza_player::surfaces::{spawn_surface, LoggingSurface, SurfaceKind};
use cadenza_player::{db, Orchestrator, OrchestratorParts};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "cadenza-player")]
#[command(about = "Playback orchestrator daemon")]
#[command(version)]
struct Args {
    /// Bootstrap config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database file (overrides the config file)
    #[arg(short, long, env = "CADENZA_DATABASE")]
    database: Option<PathBuf>,

    /// HTTP port (overrides the config file)
    #[arg(short, long, env = "CADENZA_PORT")]
    port: Option<u16>,
}

fn init_tracing(level: &str, file: Option<&PathBuf>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("cadenza_player={level},tower_http=info").into());

    match file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref(), CONFIG_ENV_VAR);
    let config = load_toml_config(config_path.as_deref()).context("Failed to load config")?;
    init_tracing(&config.logging.level, config.logging.file.as_ref())?;

    let port = args.port.unwrap_or(config.port);
    let database = args
        .database
        .clone()
        .unwrap_or_else(|| config.database_path_or_default());

    info!("Starting Cadenza Player v{}", env!("CARGO_PKG_VERSION"));
    info!("Database: {}", database.display());

    let pool = db::open(&database)
        .await
        .context("Failed to open database")?;
    let settings = RuntimeSettings::load(&pool)
        .await
        .context("Failed to load runtime settings")?;
    let library = SqliteLibrary::load(pool.clone())
        .await
        .context("Failed to load library")?;
    info!("Library: {} tracks", library.len());

    let (engine, engine_events) = SimulatedEngine::new();

    let mut orchestrator = Orchestrator::start(OrchestratorParts {
        db: pool.clone(),
        settings,
        library: Arc::new(library),
        engine: Box::new(engine),
        engine_events,
        router: LoggingRouter,
        shuffle_seed: None,
    })
    .await;
    let handle = orchestrator.handle();

    for kind in [SurfaceKind::Notification, SurfaceKind::Widget, SurfaceKind::LockScreen] {
        spawn_surface(handle.surfaces(), LoggingSurface::new(kind));
    }

    let served = api::serve(port, AppContext { orchestrator: handle }, shutdown_signal()).await;

    orchestrator.shutdown().await;
    pool.close().await;

    served.context("HTTP server failed")?;
    info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
