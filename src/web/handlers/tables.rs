use crate::auth::Caller;
use crate::core::{ColumnInfo, ConsistencyReport, FieldDefinition, LogicalTable};
use crate::engine::NewTable;
use crate::web::extract::{ApiJson, parse_id};
use crate::web::{ApiResponse, AppState, Result};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ReplaceFields {
    pub fields: Vec<FieldDefinition>,
}

pub async fn list_tables(
    State(state): State<AppState>,
    caller: Caller,
    Path(project): Path<String>,
) -> Result<Json<ApiResponse<Vec<LogicalTable>>>> {
    let project_id = parse_id("Project", &project)?;
    Ok(ApiResponse::ok(
        state.engine.list_tables(&caller, project_id).await?,
    ))
}

pub async fn create_table(
    State(state): State<AppState>,
    caller: Caller,
    Path(project): Path<String>,
    ApiJson(request): ApiJson<NewTable>,
) -> Result<(StatusCode, Json<ApiResponse<LogicalTable>>)> {
    let project_id = parse_id("Project", &project)?;
    let table = state
        .engine
        .define_table(&caller, project_id, request)
        .await?;
    Ok(ApiResponse::created(table))
}

pub async fn get_table(
    State(state): State<AppState>,
    caller: Caller,
    Path((project, table)): Path<(String, String)>,
) -> Result<Json<ApiResponse<LogicalTable>>> {
    let project_id = parse_id("Project", &project)?;
    Ok(ApiResponse::ok(
        state.engine.get_table(&caller, project_id, &table).await?,
    ))
}

pub async fn delete_table(
    State(state): State<AppState>,
    caller: Caller,
    Path((project, table)): Path<(String, String)>,
) -> Result<Json<ApiResponse<LogicalTable>>> {
    let project_id = parse_id("Project", &project)?;
    let removed = state
        .engine
        .delete_table(&caller, project_id, &table)
        .await?;
    Ok(ApiResponse::ok(removed))
}

pub async fn add_field(
    State(state): State<AppState>,
    caller: Caller,
    Path((project, table)): Path<(String, String)>,
    ApiJson(field): ApiJson<FieldDefinition>,
) -> Result<(StatusCode, Json<ApiResponse<LogicalTable>>)> {
    let project_id = parse_id("Project", &project)?;
    let table = state
        .engine
        .add_field(&caller, project_id, &table, field)
        .await?;
    Ok(ApiResponse::created(table))
}

pub async fn replace_fields(
    State(state): State<AppState>,
    caller: Caller,
    Path((project, table)): Path<(String, String)>,
    ApiJson(request): ApiJson<ReplaceFields>,
) -> Result<Json<ApiResponse<LogicalTable>>> {
    let project_id = parse_id("Project", &project)?;
    let table = state
        .engine
        .replace_fields(&caller, project_id, &table, request.fields)
        .await?;
    Ok(ApiResponse::ok(table))
}

pub async fn remove_field(
    State(state): State<AppState>,
    caller: Caller,
    Path((project, table, field)): Path<(String, String, String)>,
) -> Result<Json<ApiResponse<LogicalTable>>> {
    let project_id = parse_id("Project", &project)?;
    let table = state
        .engine
        .remove_field(&caller, project_id, &table, &field)
        .await?;
    Ok(ApiResponse::ok(table))
}

pub async fn table_columns(
    State(state): State<AppState>,
    caller: Caller,
    Path((project, table)): Path<(String, String)>,
) -> Result<Json<ApiResponse<Vec<ColumnInfo>>>> {
    let project_id = parse_id("Project", &project)?;
    Ok(ApiResponse::ok(
        state
            .engine
            .table_columns(&caller, project_id, &table)
            .await?,
    ))
}

pub async fn verify_table(
    State(state): State<AppState>,
    caller: Caller,
    Path((project, table)): Path<(String, String)>,
) -> Result<Json<ApiResponse<ConsistencyReport>>> {
    let project_id = parse_id("Project", &project)?;
    Ok(ApiResponse::ok(
        state
            .engine
            .verify_table(&caller, project_id, &table)
            .await?,
    ))
}
