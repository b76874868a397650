//! API route definitions

use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{delete, get, post, put};
use axum::Router;

use super::handlers;
use super::middleware::{require_auth, RequestLogging};
use super::server::AppState;

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check (no auth required)
        .route("/health", get(handlers::health::health_check))
        .route("/api/status", get(handlers::health::status))
        // Auth routes
        .route("/api/auth/login", post(handlers::auth::login))
        // Protected routes
        .nest("/api", protected_routes(&state))
        .layer(from_fn(RequestLogging::log_request))
        .with_state(state)
}

/// Routes that require a bearer token
fn protected_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        // Providers
        .route(
            "/providers",
            get(handlers::provider::list_providers).post(handlers::provider::create_provider),
        )
        .route(
            "/providers/:name",
            get(handlers::provider::get_provider)
                .put(handlers::provider::update_provider)
                .delete(handlers::provider::delete_provider),
        )
        .route(
            "/providers/:name/credentials",
            put(handlers::provider::set_credentials),
        )
        .route("/providers/:name/test", post(handlers::provider::test_provider))
        // Routing rules
        .route(
            "/routing-rules",
            get(handlers::routing::list_rules).post(handlers::routing::create_rule),
        )
        .route("/routing-rules/:id", delete(handlers::routing::delete_rule))
        // Stats
        .route("/stats", get(handlers::stats::get_stats))
        // Caller-facing proxied request
        .route("/request", post(handlers::request::proxy_request))
        .route_layer(from_fn_with_state(state.jwt_auth.clone(), require_auth))
}
