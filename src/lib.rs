//! KubeFreezer: a cluster-level admission gate that denies workload
//! mutations during declared freeze windows, subject to a strictly
//! ordered set of bypass mechanisms.

pub mod admission;
pub mod api;
pub mod clock;
pub mod config;
pub mod cron;
pub mod daemon;
pub mod error;
pub mod exemption;
pub mod history;
pub mod policy;
pub mod schedule;
pub mod settings;

pub use error::{Error, Result};

use crate::clock::SystemClock;
use crate::config::source::FileConfigSource;
use crate::config::watcher::ConfigWatcher;
use crate::config::ConfigCache;
use crate::daemon::DaemonPaths;
use crate::exemption::ExemptionStore;
use crate::history::HistoryRecorder;
use crate::policy::PolicyEvaluator;
use crate::schedule::ScheduleEngine;
use crate::settings::Settings;
use std::sync::Arc;

/// Wire up every component and run until shutdown is requested, either
/// via the IPC socket (`kubefreezer stop`) or a process signal.
pub async fn run(settings: Settings, paths: DaemonPaths) -> anyhow::Result<()> {
    let clock = Arc::new(SystemClock);
    let config_cache = Arc::new(ConfigCache::default());
    let schedule_engine = Arc::new(ScheduleEngine::new());
    let exemption_store = Arc::new(ExemptionStore::new());
    let history = Arc::new(HistoryRecorder::new(settings.history_capacity));

    let source = Arc::new(FileConfigSource::new(
        settings.config_path.clone(),
        settings.schedules_path.clone(),
    ));
    let watcher = Arc::new(ConfigWatcher::new(
        source,
        config_cache.clone(),
        schedule_engine.clone(),
        history.clone(),
    ));

    // Mandatory initial load before traffic is accepted (spec.md §4.6).
    watcher.initial_load().await;

    let evaluator = Arc::new(PolicyEvaluator::new(
        clock,
        config_cache,
        schedule_engine,
        exemption_store,
        history,
    ));

    let app_state = Arc::new(api::AppState::new(evaluator));
    app_state.mark_ready();

    let (ipc_shutdown_rx, ipc_handle) = crate::daemon::start_ipc_server(&paths).await?;

    let bind_addr: std::net::SocketAddr = settings
        .bind_addr
        .parse()
        .map_err(|error| anyhow::anyhow!("invalid bind address {:?}: {error}", settings.bind_addr))?;
    let http_handle = api::server::serve(bind_addr, app_state, ipc_shutdown_rx.clone()).await?;

    let watcher_handle = tokio::spawn(async move {
        watcher.run().await;
    });

    let mut shutdown_rx = ipc_shutdown_rx;
    tokio::select! {
        _ = shutdown_rx.changed() => {
            tracing::info!("shutdown signal received");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("ctrl-c received, shutting down");
        }
    }

    watcher_handle.abort();
    http_handle.abort();
    ipc_handle.abort();
    crate::daemon::cleanup(&paths);

    Ok(())
}
