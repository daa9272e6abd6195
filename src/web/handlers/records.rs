use crate::auth::Caller;
use crate::core::{Record, RecordPage};
use crate::gateway::ListQuery;
use crate::web::extract::{ApiJson, ApiQuery, parse_id};
use crate::web::{ApiResponse, AppState, Result};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde_json::{Map, Value, json};

type Payload = Map<String, Value>;

pub async fn list_records(
    State(state): State<AppState>,
    caller: Caller,
    Path((project, table)): Path<(String, String)>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> Result<Json<ApiResponse<RecordPage>>> {
    let project_id = parse_id("Project", &project)?;
    let page = state
        .engine
        .list_records(&caller, project_id, &table, &query)
        .await?;
    Ok(ApiResponse::ok(page))
}

pub async fn create_record(
    State(state): State<AppState>,
    caller: Caller,
    Path((project, table)): Path<(String, String)>,
    ApiJson(payload): ApiJson<Payload>,
) -> Result<(StatusCode, Json<ApiResponse<Record>>)> {
    let project_id = parse_id("Project", &project)?;
    let record = state
        .engine
        .create_record(&caller, project_id, &table, &payload)
        .await?;
    Ok(ApiResponse::created(record))
}

pub async fn get_record(
    State(state): State<AppState>,
    caller: Caller,
    Path((project, table, record)): Path<(String, String, String)>,
) -> Result<Json<ApiResponse<Record>>> {
    let project_id = parse_id("Project", &project)?;
    let record_id = parse_id("Record", &record)?;
    Ok(ApiResponse::ok(
        state
            .engine
            .get_record(&caller, project_id, &table, record_id)
            .await?,
    ))
}

pub async fn update_record(
    State(state): State<AppState>,
    caller: Caller,
    Path((project, table, record)): Path<(String, String, String)>,
    ApiJson(payload): ApiJson<Payload>,
) -> Result<Json<ApiResponse<Record>>> {
    let project_id = parse_id("Project", &project)?;
    let record_id = parse_id("Record", &record)?;
    let record = state
        .engine
        .update_record(&caller, project_id, &table, record_id, &payload)
        .await?;
    Ok(ApiResponse::ok(record))
}

pub async fn delete_record(
    State(state): State<AppState>,
    caller: Caller,
    Path((project, table, record)): Path<(String, String, String)>,
) -> Result<Json<ApiResponse<Value>>> {
    let project_id = parse_id("Project", &project)?;
    let record_id = parse_id("Record", &record)?;
    let id = state
        .engine
        .delete_record(&caller, project_id, &table, record_id)
        .await?;
    Ok(ApiResponse::ok(json!({ "id": id })))
}
