//! Health and status endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tracing::warn;

use crate::api::server::AppState;
use crate::config::StorageKind;

/// Liveness probe
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "egress-router"
        })),
    )
}

/// Readiness summary: storage reachability and router totals
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.router.get_stats();

    let (storage, database) = match (&state.config.storage, &state.db) {
        (StorageKind::Postgres, Some(db)) => {
            let database = match db.health_check().await {
                Ok(latency) => json!({
                    "status": "up",
                    "latency_ms": latency.as_millis() as u64,
                    "pool": db.pool_stats(),
                }),
                Err(e) => {
                    warn!("Database health check failed: {}", e);
                    json!({ "status": "down", "error": e.to_string() })
                }
            };
            ("postgres", Some(database))
        }
        (StorageKind::Postgres, None) => ("postgres", None),
        (StorageKind::Memory, _) => ("memory", None),
    };

    let healthy = database
        .as_ref()
        .map(|db| db["status"] == "up")
        .unwrap_or(true);
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if healthy { "ok" } else { "degraded" },
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_secs": state.started_at.elapsed().as_secs(),
            "storage": storage,
            "database": database,
            "providers": stats.total_providers,
            "enabled_providers": stats.enabled_providers,
            "routing_rules": stats.routing_rules,
            "active_sessions": stats.active_sessions,
        })),
    )
}
