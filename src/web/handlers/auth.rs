use crate::auth::Caller;
use crate::core::{AccountInfo, Session};
use crate::web::extract::ApiJson;
use crate::web::{ApiResponse, AppState, Result};
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

pub async fn register(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<LoginRequest>,
) -> Result<(StatusCode, Json<ApiResponse<AccountInfo>>)> {
    let account = state
        .engine
        .register(&request.email, &request.password)
        .await?;
    Ok(ApiResponse::created(account))
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<LoginRequest>,
) -> Result<Json<ApiResponse<Session>>> {
    let session = state.engine.login(&request.email, &request.password).await?;
    Ok(ApiResponse::ok(session))
}

pub async fn logout(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<ApiResponse<()>>> {
    state.engine.logout(&caller).await?;
    Ok(ApiResponse::empty())
}
