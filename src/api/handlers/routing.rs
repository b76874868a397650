//! Routing rule handlers

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tracing::info;
use uuid::Uuid;

use crate::api::middleware::AuthenticatedUser;
use crate::api::server::AppState;
use crate::error::EgressError;
use crate::models::CreateRoutingRuleRequest;

/// Rules in match precedence order
pub async fn list_rules(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.router.list_routing_rules())
}

pub async fn create_rule(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(req): Json<CreateRoutingRuleRequest>,
) -> Result<impl IntoResponse, EgressError> {
    let rule = state.router.add_routing_rule(req).await?;
    info!(operator = %user.user_id, id = %rule.id, "Routing rule created");
    Ok((StatusCode::CREATED, Json(rule)))
}

pub async fn delete_rule(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, EgressError> {
    state.router.remove_routing_rule(id).await?;
    info!(operator = %user.user_id, id = %id, "Routing rule deleted");
    Ok(StatusCode::NO_CONTENT)
}
