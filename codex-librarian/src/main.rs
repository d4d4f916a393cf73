//! codex-librarian - comic library importer service
//!
//! Opens the database under the root folder, then runs the librarian daemon
//! with its notifier and nightly scheduler until shutdown. A `Restart` task
//! tears everything down and builds it again from a fresh config read.

use anyhow::{Context, Result};
use clap::Parser;
use codex_common::config::{
    default_config_path, load_toml_config, resolve_root_folder, RootFolder, TomlConfig, ROOT_FOLDER_ENV,
};
use codex_common::events::EventBus;
use codex_librarian::config::LibrarianConfig;
use codex_librarian::extractor::FilenameExtractor;
use codex_librarian::tasks::{JanitorTask, LibrarianTask};
use codex_librarian::workers::covers::CopyImageGenerator;
use codex_librarian::workers::librarian::{DaemonExit, LibrarianDaemon};
use codex_librarian::workers::notifier::Notifier;
use codex_librarian::workers::scheduler;
use codex_librarian::LibrarianState;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for codex-librarian
#[derive(Parser, Debug)]
#[command(name = "codex-librarian")]
#[command(about = "Comic library importer and maintenance daemon")]
#[command(version)]
struct Args {
    /// Root folder holding the database, cover cache and backups
    #[arg(short, long, env = ROOT_FOLDER_ENV)]
    root_folder: Option<PathBuf>,

    /// Path to codex.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Default log level (RUST_LOG overrides)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let toml_config = load_toml_config(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| toml_config.logging.level.clone());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("codex_librarian={level},codex_common={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting codex-librarian");

    let mut toml_config = toml_config;
    loop {
        match run_once(&args, &toml_config).await? {
            DaemonExit::Shutdown => break,
            DaemonExit::Restart => {
                info!("Restarting librarian");
                toml_config = match load_toml_config(&config_path) {
                    Ok(config) => config,
                    Err(e) => {
                        warn!(error = %e, "Could not reload config, keeping the previous one");
                        toml_config
                    }
                };
            }
        }
    }

    info!("codex-librarian stopped");
    Ok(())
}

/// Build every worker, run until the daemon exits, then stop the rest
async fn run_once(args: &Args, toml_config: &TomlConfig) -> Result<DaemonExit> {
    let root = RootFolder::new(resolve_root_folder(
        args.root_folder.as_deref(),
        ROOT_FOLDER_ENV,
        Some(toml_config),
    ));
    root.ensure_directory_exists()
        .context("Failed to create root folder")?;
    info!(root = %root.path().display(), "Root folder");

    let config = LibrarianConfig::from_toml(&root, toml_config)?;
    let db = codex_common::db::init_database(&root.database_path()).await?;
    let event_bus = EventBus::new(100);

    let notifier_debounce = config.notifier_debounce;
    let nightly_hour = config.nightly_hour;
    let (state, notifier_rx) = LibrarianState::new(db.clone(), event_bus.clone(), config);
    state.status.init_rows().await?;
    state.status.clear_all().await;

    let notifier = tokio::spawn(
        Notifier::new(notifier_rx, event_bus, notifier_debounce).run(state.shutdown.clone()),
    );
    let nightly = tokio::spawn(scheduler::run_nightly(
        state.queue.clone(),
        nightly_hour,
        state.shutdown.clone(),
    ));

    // Reattach anything a crash left dangling before new imports arrive
    state.enqueue(LibrarianTask::Janitor(JanitorTask::ClearStatus));
    state.enqueue(LibrarianTask::AdoptOrphanFolders);

    let daemon = LibrarianDaemon::new(
        state.clone(),
        Arc::new(FilenameExtractor),
        Arc::new(CopyImageGenerator),
    );

    let exit = tokio::select! {
        exit = daemon.run() => exit,
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            DaemonExit::Shutdown
        }
    };

    state.shutdown.cancel();
    state.queue.close();
    for (name, handle) in [("notifier", notifier), ("nightly", nightly)] {
        if let Err(e) = handle.await {
            warn!(worker = name, error = %e, "Worker did not stop cleanly");
        }
    }
    db.close().await;
    Ok(exit)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Could not listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
