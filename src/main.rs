//! Egress Router - Entry Point
//!
//! Loads configuration, hydrates the router from storage and serves the API
//! until Ctrl+C or SIGTERM.

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use egress_router::api::{ApiServer, AppState};
use egress_router::config::{Config, LogConfig, StorageKind};
use egress_router::database::Database;
use egress_router::proxy::{HttpTransport, ProxyRouter, RouterStores};
use egress_router::repository::{
    MemoryStore, ProviderRepository, RoutingRuleRepository, SecretRepository,
};
use egress_router::services::{SessionSweepConfig, SessionSweepHandle, SessionSweepService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    init_tracing(&config.log);

    info!(
        storage = config.storage.as_str(),
        "Starting Egress Router v{}",
        env!("CARGO_PKG_VERSION")
    );

    let (db, stores) = match config.storage {
        StorageKind::Postgres => {
            let db = Database::connect(&config.database)
                .await
                .context("failed to connect to database")?;
            db.run_migrations().await?;

            let pool = db.pool().clone();
            let stores = RouterStores {
                providers: Arc::new(ProviderRepository::new(pool.clone())),
                rules: Arc::new(RoutingRuleRepository::new(pool.clone())),
                secrets: Arc::new(SecretRepository::new(pool)),
            };
            (Some(db), stores)
        }
        StorageKind::Memory => {
            warn!("Using in-memory storage; providers and rules are lost on restart");
            (None, RouterStores::shared(Arc::new(MemoryStore::new())))
        }
    };

    let transport = Arc::new(HttpTransport::new(config.router.user_agent.clone()));
    let router = Arc::new(ProxyRouter::new(stores, transport, &config.router)?);
    router.load().await?;

    let (shutdown_tx, _) = watch::channel(false);

    let sweep = if config.router.session_sweep_interval_secs > 0 {
        let (handle, sweep_shutdown) = SessionSweepHandle::new();
        let service = SessionSweepService::new(
            router.clone(),
            SessionSweepConfig {
                interval_secs: config.router.session_sweep_interval_secs,
            },
        );
        let task = tokio::spawn(async move {
            service.run(sweep_shutdown).await;
        });
        Some((handle, task))
    } else {
        info!("Session sweep disabled; expired sessions are dropped on lookup");
        None
    };

    let config = Arc::new(config);
    let api_server = ApiServer::new(AppState::new(config.clone(), router, db.clone()));
    let api_shutdown = shutdown_tx.subscribe();
    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run(api_shutdown).await {
            error!("API server error: {}", e);
        }
    });

    info!("API listening on {}", config.api_addr());

    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    if let Some((handle, task)) = sweep {
        handle.shutdown();
        let _ = task.await;
    }
    let _ = api_task.await;

    if let Some(db) = db {
        db.close().await;
    }

    info!("Egress Router stopped");
    Ok(())
}

/// `RUST_LOG` wins over `LOG_LEVEL` when set
fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("egress_router={},tower_http=info", log.level))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if log.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
