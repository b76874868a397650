//! Provider management handlers

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tracing::info;

use crate::api::middleware::AuthenticatedUser;
use crate::api::server::AppState;
use crate::error::EgressError;
use crate::models::{CreateProviderRequest, SetCredentialsRequest, UpdateProviderRequest};

/// List all providers (credentials never included)
pub async fn list_providers(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.router.list_providers())
}

pub async fn get_provider(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, EgressError> {
    Ok(Json(state.router.get_provider(&name)?))
}

pub async fn create_provider(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(req): Json<CreateProviderRequest>,
) -> Result<impl IntoResponse, EgressError> {
    let provider = state.router.add_provider(req).await?;
    info!(operator = %user.user_id, provider = %provider.provider.name, "Provider created");
    Ok((StatusCode::CREATED, Json(provider)))
}

pub async fn update_provider(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(name): Path<String>,
    Json(req): Json<UpdateProviderRequest>,
) -> Result<impl IntoResponse, EgressError> {
    let provider = state.router.update_provider(&name, req).await?;
    info!(operator = %user.user_id, provider = %name, "Provider updated");
    Ok(Json(provider))
}

/// Idempotent delete
pub async fn delete_provider(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, EgressError> {
    if state.router.remove_provider(&name).await? {
        info!(operator = %user.user_id, provider = %name, "Provider deleted");
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_credentials(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(name): Path<String>,
    Json(req): Json<SetCredentialsRequest>,
) -> Result<impl IntoResponse, EgressError> {
    state
        .router
        .set_credentials(&name, req.username, req.password)
        .await?;
    info!(operator = %user.user_id, provider = %name, "Provider credentials updated");
    Ok(StatusCode::NO_CONTENT)
}

/// Probe a provider through the echo endpoint
pub async fn test_provider(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, EgressError> {
    Ok(Json(state.router.test_provider(&name).await?))
}
