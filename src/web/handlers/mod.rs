pub mod auth;
pub mod projects;
pub mod records;
pub mod tables;

use super::{ApiResponse, AppState};
use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

pub async fn healthcheck(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    ApiResponse::ok(json!({
        "status": "ok",
        "backend": state.engine.backend_name(),
    }))
}
