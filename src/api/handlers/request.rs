//! Caller-facing proxied request
//!
//! If the client disconnects, axum drops this future and with it the
//! in-flight attempt; no further candidates are tried.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::api::server::AppState;
use crate::error::EgressError;
use crate::models::ProxyRequest;

pub async fn proxy_request(
    State(state): State<AppState>,
    Json(req): Json<ProxyRequest>,
) -> Result<impl IntoResponse, EgressError> {
    let response = state.router.proxy_request(req, None).await?;
    Ok(Json(response))
}
