use crate::auth::{Caller, NewApiKey};
use crate::core::{ApiKey, Project, ProjectSettings};
use crate::projects::NewProject;
use crate::web::extract::{ApiJson, parse_id};
use crate::web::{ApiResponse, AppState, Result};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde_json::{Value, json};

pub async fn list_projects(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<ApiResponse<Vec<Project>>>> {
    Ok(ApiResponse::ok(state.engine.list_projects(&caller).await?))
}

pub async fn create_project(
    State(state): State<AppState>,
    caller: Caller,
    ApiJson(request): ApiJson<NewProject>,
) -> Result<(StatusCode, Json<ApiResponse<Project>>)> {
    let project = state.engine.create_project(&caller, request).await?;
    Ok(ApiResponse::created(project))
}

pub async fn get_project(
    State(state): State<AppState>,
    caller: Caller,
    Path(project): Path<String>,
) -> Result<Json<ApiResponse<Project>>> {
    let project_id = parse_id("Project", &project)?;
    Ok(ApiResponse::ok(
        state.engine.get_project(&caller, project_id).await?,
    ))
}

pub async fn delete_project(
    State(state): State<AppState>,
    caller: Caller,
    Path(project): Path<String>,
) -> Result<Json<ApiResponse<Value>>> {
    let project_id = parse_id("Project", &project)?;
    state.engine.delete_project(&caller, project_id).await?;
    Ok(ApiResponse::ok(json!({ "id": project_id })))
}

pub async fn update_settings(
    State(state): State<AppState>,
    caller: Caller,
    Path(project): Path<String>,
    ApiJson(settings): ApiJson<ProjectSettings>,
) -> Result<Json<ApiResponse<Project>>> {
    let project_id = parse_id("Project", &project)?;
    let project = state
        .engine
        .update_project_settings(&caller, project_id, settings)
        .await?;
    Ok(ApiResponse::ok(project))
}

pub async fn rotate_key(
    State(state): State<AppState>,
    caller: Caller,
    Path(project): Path<String>,
) -> Result<Json<ApiResponse<Project>>> {
    let project_id = parse_id("Project", &project)?;
    Ok(ApiResponse::ok(
        state.engine.rotate_project_key(&caller, project_id).await?,
    ))
}

pub async fn list_keys(
    State(state): State<AppState>,
    caller: Caller,
    Path(project): Path<String>,
) -> Result<Json<ApiResponse<Vec<ApiKey>>>> {
    let project_id = parse_id("Project", &project)?;
    Ok(ApiResponse::ok(
        state.engine.list_keys(&caller, project_id).await?,
    ))
}

pub async fn create_key(
    State(state): State<AppState>,
    caller: Caller,
    Path(project): Path<String>,
    ApiJson(request): ApiJson<NewApiKey>,
) -> Result<(StatusCode, Json<ApiResponse<ApiKey>>)> {
    let project_id = parse_id("Project", &project)?;
    let key = state.engine.create_key(&caller, project_id, request).await?;
    Ok(ApiResponse::created(key))
}

pub async fn deactivate_key(
    State(state): State<AppState>,
    caller: Caller,
    Path((project, key)): Path<(String, String)>,
) -> Result<Json<ApiResponse<ApiKey>>> {
    let project_id = parse_id("Project", &project)?;
    let key_id = parse_id("API key", &key)?;
    Ok(ApiResponse::ok(
        state
            .engine
            .deactivate_key(&caller, project_id, key_id)
            .await?,
    ))
}

pub async fn delete_key(
    State(state): State<AppState>,
    caller: Caller,
    Path((project, key)): Path<(String, String)>,
) -> Result<Json<ApiResponse<Value>>> {
    let project_id = parse_id("Project", &project)?;
    let key_id = parse_id("API key", &key)?;
    state.engine.delete_key(&caller, project_id, key_id).await?;
    Ok(ApiResponse::ok(json!({ "id": key_id })))
}
