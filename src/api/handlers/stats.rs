//! Router statistics

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::api::server::AppState;

pub async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.router.get_stats())
}
