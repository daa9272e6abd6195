use super::{AppState, WebError};
use crate::auth::{Caller, Credentials};
use crate::core::EngineError;
use axum::async_trait;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, Query, Request};
use axum::http::HeaderMap;
use axum::http::request::Parts;
use axum::Json;
use serde::de::DeserializeOwned;
use uuid::Uuid;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Reads `Authorization: Bearer <token>` and `X-API-Key: <key>`.
pub fn credentials_from_headers(headers: &HeaderMap) -> Credentials {
    let bearer = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            let (scheme, token) = v.trim().split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
        })
        .filter(|token| !token.is_empty())
        .map(str::to_string);
    let api_key = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string);
    Credentials { bearer, api_key }
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = WebError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, WebError> {
        let credentials = credentials_from_headers(&parts.headers);
        if credentials.is_empty() {
            return Err(EngineError::MissingCredentials.into());
        }
        Ok(state.engine.authenticate(&credentials).await?)
    }
}

/// JSON body whose rejections are reported through the envelope.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = WebError;

    async fn from_request(req: Request, state: &S) -> Result<Self, WebError> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(json_rejection(rejection)),
        }
    }
}

fn json_rejection(rejection: JsonRejection) -> WebError {
    EngineError::Validation(format!("Invalid request body: {}", rejection.body_text())).into()
}

/// Query string whose rejections are reported through the envelope.
pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = WebError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, WebError> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(Self(value)),
            Err(rejection) => Err(query_rejection(rejection)),
        }
    }
}

fn query_rejection(rejection: QueryRejection) -> WebError {
    EngineError::Validation(format!("Invalid query: {}", rejection.body_text())).into()
}

/// Path ids that do not parse cannot name an existing entity.
pub fn parse_id(kind: &str, raw: &str) -> Result<Uuid, WebError> {
    Uuid::parse_str(raw).map_err(|_| EngineError::NotFound(format!("{kind} '{raw}'")).into())
}
