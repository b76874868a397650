//! API server using Axum
//!
//! Serves the operator configuration endpoints and the caller-facing
//! proxied request endpoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::{ApiServerConfig, Config};
use crate::database::Database;
use crate::error::{EgressError, Result};
use crate::proxy::ProxyRouter;

use super::middleware::{cors_layer, JwtAuth};
use super::routes;

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub router: Arc<ProxyRouter>,
    pub jwt_auth: JwtAuth,
    pub started_at: Instant,
    /// Present when state is persisted in PostgreSQL
    pub db: Option<Database>,
}

impl AppState {
    pub fn new(config: Arc<Config>, router: Arc<ProxyRouter>, db: Option<Database>) -> Self {
        let jwt_auth = JwtAuth::new(&config.api.jwt_secret);
        Self {
            config,
            router,
            jwt_auth,
            started_at: Instant::now(),
            db,
        }
    }
}

pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(state: AppState) -> Self {
        Self {
            config: state.config.api.clone(),
            state,
        }
    }

    fn build_router(&self) -> Router {
        let cors = cors_layer(&self.config.cors_origins);

        routes::create_router(self.state.clone())
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until `shutdown` changes
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| {
                EgressError::Configuration(format!(
                    "invalid API address {}:{}: {}",
                    self.config.host, self.config.port, e
                ))
            })?;

        let router = self.build_router();

        info!("API server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|e| EgressError::Internal(e.to_string()))?;

        info!("API server shut down");
        Ok(())
    }
}
