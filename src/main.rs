pub mod models {
    pub mod farm;
}

pub mod config;
pub mod db {
    pub mod models;
    pub mod postgres;
}
pub mod knowledge;
pub mod schema;
pub mod server;
pub mod store;
pub mod utils;
pub mod services {
    pub mod auto_control;
    pub mod diagnostics;
    pub mod health;
    pub mod ingest;
    pub mod voice;
}

use crate::config::{Config, StorageBackend};
use crate::db::postgres::PgStore;
use crate::server::AppState;
use crate::services::ingest::FarmService;
use crate::store::{CommandQueue, MemoryStore, TelemetryStore};
use log::{error, info, warn};
use std::sync::Arc;

fn build_service(cfg: &Config) -> Result<FarmService, String> {
    let (telemetry, commands): (Arc<dyn TelemetryStore>, Arc<dyn CommandQueue>) = match cfg.storage_backend {
        StorageBackend::Postgres => {
            let store = Arc::new(PgStore::connect(&cfg.database_url, cfg.db_pool_size, cfg.storage_timeout)?);
            info!("Connected to database");
            store.apply_migrations()?;
            (store.clone() as Arc<dyn TelemetryStore>, store as Arc<dyn CommandQueue>)
        }
        StorageBackend::Memory => {
            warn!("Using in-memory storage; readings and commands are lost on restart");
            let store = Arc::new(MemoryStore::new());
            (store.clone() as Arc<dyn TelemetryStore>, store as Arc<dyn CommandQueue>)
        }
    };
    Ok(FarmService::new(telemetry, commands, cfg.default_device_id.clone()))
}

pub fn run() -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (bind={}, backend={:?}, default_device={}, storage_timeout={}ms, db_pool_size={})",
        cfg.bind_addr,
        cfg.storage_backend,
        cfg.default_device_id,
        cfg.storage_timeout.as_millis(),
        cfg.db_pool_size
    );

    // 2) Storage, migrations and the orchestrator
    let service = build_service(&cfg)?;

    // 3) Serve until interrupted
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to start async runtime: {}", e))?;

    let state = AppState {
        service: Arc::new(service),
        storage_timeout: cfg.storage_timeout,
    };
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(cfg.bind_addr)
            .await
            .map_err(|e| format!("failed to bind {}: {}", cfg.bind_addr, e))?;
        info!("Listening on http://{}", cfg.bind_addr);
        axum::serve(listener, server::router(state))
            .with_graceful_shutdown(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Shutdown requested");
                }
            })
            .await
            .map_err(|e| format!("HTTP server failed: {}", e))
    })
}

fn main() {
    let loaded_env = match config::load_env_from_args(std::env::args_os().skip(1)) {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "farm-telemetry {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run() {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
