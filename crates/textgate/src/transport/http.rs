// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers.
//!
//! Bodies are parsed by hand from raw bytes so that malformed input is
//! answered with the same error envelope as every other failure.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::engine::EngineStats;
use crate::error::{ApiError, ErrorCode};
use crate::orchestrator::{Access, FrequencyRequest, IssuedToken, ProcessRequest};
use crate::state::AppState;
use crate::stopwords::StopwordInput;
use crate::store::Token;
use crate::transport::auth::require;

type JsonObject = Map<String, Value>;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(flatten)]
    pub engine: EngineStats,
}

#[derive(Debug, Default, Deserialize)]
pub struct RootQuery {
    pub text: Option<String>,
    pub tasks: Option<String>,
    pub skip_tasks: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub stats: Vec<Token>,
}

#[derive(Debug, Serialize)]
pub struct TokenListResponse {
    pub user_id: i64,
    pub tokens: Vec<Token>,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /health`: `shutting_down` once shutdown has begun.
pub async fn health(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    let status = if s.shutdown.is_cancelled() { "shutting_down" } else { "running" };
    Json(HealthResponse { status: status.to_owned(), engine: s.orchestrator.engine_stats() })
}

/// `GET /`: API description, or text processing when `text` is given.
pub async fn root(
    State(s): State<Arc<AppState>>,
    headers: HeaderMap,
    query: Result<Query<RootQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query.map_err(|e| {
        ApiError::bad_request(format!("Invalid query string: {}", e.body_text()))
    })?;
    let Some(text) = query.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(Json(api_docs()));
    };

    let caller = require(&s, &headers, Access::User)?;
    let mut request = ProcessRequest::new(text);
    request.tasks = query.tasks.as_deref().map(split_list).unwrap_or_default();
    request.skip_tasks = query.skip_tasks.as_deref().map(split_list).unwrap_or_default();
    request.language = query.language.filter(|l| !l.trim().is_empty());

    s.orchestrator.process_text(&caller, request).await.map(Json)
}

/// `POST /tokenize`
pub async fn tokenize(
    State(s): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let caller = require(&s, &headers, Access::User)?;
    let body = parse_object(&body)?;

    let mut request = ProcessRequest::new(required_text(&body)?);
    request.tasks = task_list(&body, "tasks")?;
    request.skip_tasks = task_list(&body, "skip_tasks")?;
    request.language = optional_string(&body, "language")?;
    request.allow_duplicates = allow_duplicates(&body)?;
    request.stopword = StopwordInput::parse(body.get("stopword"))?;

    s.orchestrator.process_text(&caller, request).await.map(Json)
}

/// `POST /word-frequency`
pub async fn word_frequency(
    State(s): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let caller = require(&s, &headers, Access::User)?;
    let body = parse_object(&body)?;

    let mut request = FrequencyRequest::new(required_text(&body)?);
    request.max_words = match body.get("max_words") {
        None | Some(Value::Null) => None,
        Some(v) => Some(
            v.as_i64().ok_or_else(|| ApiError::bad_request("max_words must be a positive integer"))?,
        ),
    };
    request.stopword = StopwordInput::parse(body.get("stopword"))?;

    s.orchestrator.word_frequency(&caller, request).await.map(Json)
}

/// `POST /token/request`: issue a token for `user_id`.
pub async fn token_request(
    State(s): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IssuedToken>, ApiError> {
    require(&s, &headers, Access::Admin)?;
    let body = parse_object(&body)?;

    let user_id = required_user_id(&body)?;
    let is_admin = match body.get("is_admin") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => return Err(ApiError::bad_request("is_admin must be a boolean")),
    };
    s.orchestrator.issue_token(user_id, is_admin).map(Json)
}

/// `POST /token/delete`
pub async fn token_delete(
    State(s): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<MessageResponse>, ApiError> {
    require(&s, &headers, Access::Admin)?;
    let body = parse_object(&body)?;

    s.orchestrator.delete_token(&required_token(&body)?)?;
    Ok(Json(MessageResponse { message: "Token deleted successfully".to_owned() }))
}

/// `POST /token/invalidate`
pub async fn token_invalidate(
    State(s): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<MessageResponse>, ApiError> {
    require(&s, &headers, Access::Admin)?;
    let body = parse_object(&body)?;

    s.orchestrator.invalidate_token(&required_token(&body)?)?;
    Ok(Json(MessageResponse { message: "Token invalidated successfully".to_owned() }))
}

/// `POST /token/list`: every token issued to `user_id`, newest first.
pub async fn token_list(
    State(s): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TokenListResponse>, ApiError> {
    require(&s, &headers, Access::Admin)?;
    let body = parse_object(&body)?;

    let user_id = required_user_id(&body)?;
    let tokens = s.orchestrator.owner_tokens(user_id)?;
    Ok(Json(TokenListResponse { user_id, tokens }))
}

/// `GET /stats` and `POST /stats`
pub async fn stats(
    State(s): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<StatsResponse>, ApiError> {
    require(&s, &headers, Access::Admin)?;
    Ok(Json(StatsResponse { stats: s.orchestrator.usage_stats()? }))
}

/// Anything unrouted.
pub async fn not_found() -> ApiError {
    ApiError::new(ErrorCode::NotFound, "Invalid endpoint")
}

// -- Body parsing -------------------------------------------------------------

/// Parse a request body that must be a JSON object.
pub fn parse_object(body: &[u8]) -> Result<JsonObject, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::bad_request("Missing request body"));
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ApiError::bad_request("Request body must be a JSON object")),
        Err(_) => Err(ApiError::bad_request("Invalid JSON in request body")),
    }
}

fn required_text(body: &JsonObject) -> Result<String, ApiError> {
    match body.get("text") {
        Some(Value::String(text)) if !text.trim().is_empty() => Ok(text.clone()),
        _ => Err(ApiError::bad_request("Missing \"text\" parameter")),
    }
}

fn required_token(body: &JsonObject) -> Result<String, ApiError> {
    match body.get("token") {
        Some(Value::String(token)) if !token.trim().is_empty() => Ok(token.trim().to_owned()),
        _ => Err(ApiError::bad_request("Missing \"token\" parameter")),
    }
}

/// `user_id` as a positive integer; numeric strings are accepted.
fn required_user_id(body: &JsonObject) -> Result<i64, ApiError> {
    let id = match body.get("user_id") {
        None | Some(Value::Null) => {
            return Err(ApiError::bad_request("Missing \"user_id\" parameter"));
        }
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        Some(_) => None,
    };
    id.filter(|id| *id > 0)
        .ok_or_else(|| ApiError::bad_request("user_id must be a positive integer"))
}

fn optional_string(body: &JsonObject, key: &str) -> Result<Option<String>, ApiError> {
    match body.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ApiError::bad_request(format!("{key} must be a string"))),
    }
}

/// A task list given as an array of names or a comma-separated string.
fn task_list(body: &JsonObject, key: &str) -> Result<Vec<String>, ApiError> {
    let invalid = || ApiError::bad_request(format!("{key} must be a string or array of strings"));
    match body.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(split_list(s)),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str().map(|s| s.trim().to_owned()).ok_or_else(invalid))
            .filter(|item| !item.as_ref().is_ok_and(|s| s.is_empty()))
            .collect(),
        Some(_) => Err(invalid()),
    }
}

/// `allow_duplicates`, or its older spelling `can_duplicate`. Defaults to true.
fn allow_duplicates(body: &JsonObject) -> Result<bool, ApiError> {
    let value = body.get("allow_duplicates").or_else(|| body.get("can_duplicate"));
    match value {
        None | Some(Value::Null) => Ok(true),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(ApiError::bad_request("allow_duplicates must be a boolean")),
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',').map(str::trim).filter(|t| !t.is_empty()).map(str::to_owned).collect()
}

fn api_docs() -> Value {
    json!({
        "message": "textgate text-processing API",
        "endpoints": {
            "GET /": "API documentation, or process text given as query parameters",
            "GET /health": "Worker pool status",
            "POST /tokenize": "Tokenize text (supports stopword filtering)",
            "POST /word-frequency": "Word frequency count (supports stopword filtering)",
            "POST /token/request": "Issue a token for a user (admin only)",
            "POST /token/delete": "Delete a token (admin only)",
            "POST /token/invalidate": "Invalidate a token (admin only)",
            "POST /token/list": "List a user's tokens (admin only)",
            "GET|POST /stats": "Usage statistics (admin only)",
        },
        "parameters": {
            "text": "Text to process (required)",
            "tasks": "Tasks to run (optional)",
            "skip_tasks": "Tasks to skip (optional)",
            "language": "Language of the text (optional)",
            "allow_duplicates": "Keep repeated tokens (optional, default true)",
            "stopword": "Extra stopwords for this request (optional)",
            "max_words": "Word-frequency result limit (optional, default 100)",
        },
        "authentication": "Bearer token required in Authorization header",
    })
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
