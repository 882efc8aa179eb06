// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request orchestration: authenticate, validate, run on the task engine,
//! and map task outcomes to API results.
//!
//! Validation and authentication failures are answered before anything is
//! submitted, so they never occupy a worker.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Context;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use indexmap::{IndexMap, IndexSet};
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::engine::{EngineError, EngineStats, TaskEngine, TaskState};
use crate::error::{ApiError, ErrorCode};
use crate::model::{Model, ModelRequest, NER, POS, TOK};
use crate::stopwords::{StopwordInput, Stopwords};
use crate::store::{Token, TokenStore};

/// `max_words` used when a word-frequency request does not set one.
pub const DEFAULT_MAX_WORDS: i64 = 100;

/// Prefix of every issued token.
pub const TOKEN_PREFIX: &str = "tg_";

/// Owner id of the admin token configured at startup.
pub const ADMIN_OWNER_ID: i64 = 0;

/// Privilege an operation requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    User,
    Admin,
}

/// An authenticated token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub token: String,
    pub is_admin: bool,
}

/// Parameters of a text-processing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub text: String,
    pub tasks: Vec<String>,
    pub skip_tasks: Vec<String>,
    pub language: Option<String>,
    pub allow_duplicates: bool,
    pub stopword: StopwordInput,
}

impl ProcessRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tasks: Vec::new(),
            skip_tasks: Vec::new(),
            language: None,
            allow_duplicates: true,
            stopword: StopwordInput::None,
        }
    }
}

/// Parameters of a word-frequency request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrequencyRequest {
    pub text: String,
    pub max_words: Option<i64>,
    pub stopword: StopwordInput,
}

impl FrequencyRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), max_words: None, stopword: StopwordInput::None }
    }
}

/// Response body of a token issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub reissued: bool,
    pub message: String,
}

/// Ties the credential store, the task engine, and the model together.
pub struct Orchestrator {
    store: Arc<dyn TokenStore>,
    engine: Arc<TaskEngine>,
    model: Arc<dyn Model>,
    stopwords: Arc<Stopwords>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn TokenStore>,
        engine: Arc<TaskEngine>,
        model: Arc<dyn Model>,
        stopwords: Stopwords,
    ) -> Self {
        Self { store, engine, model, stopwords: Arc::new(stopwords) }
    }

    pub fn engine_stats(&self) -> EngineStats {
        self.engine.stats()
    }

    /// Insert the configured admin token unless it already exists.
    pub fn ensure_admin_token(&self, token: &str) -> anyhow::Result<()> {
        match self.store.token_info(token)? {
            Some(existing) if !existing.is_valid || !existing.is_admin => {
                tracing::warn!("configured admin token exists but is not a valid admin token");
            }
            Some(_) => tracing::debug!("admin token already present"),
            None => {
                anyhow::ensure!(
                    self.store.add_token(token, ADMIN_OWNER_ID, true),
                    "failed to insert admin token"
                );
                tracing::info!("admin token registered");
            }
        }
        Ok(())
    }

    /// Resolve a bearer token to a caller with at least `access`.
    pub fn authenticate(&self, bearer: Option<&str>, access: Access) -> Result<Caller, ApiError> {
        let denied = || match access {
            Access::User => ApiError::unauthorized("Invalid or missing Bearer token"),
            Access::Admin => ApiError::unauthorized("Admin privileges required"),
        };

        let token = bearer.map(str::trim).filter(|t| !t.is_empty()).ok_or_else(denied)?;
        let info = self.store.token_info(token).map_err(ApiError::storage)?;
        let Some(info) = info.filter(|t| t.is_valid) else {
            return Err(denied());
        };
        if access == Access::Admin && !info.is_admin {
            return Err(denied());
        }
        Ok(Caller { token: info.token, is_admin: info.is_admin })
    }

    /// Tokenize (and optionally tag) text on the task engine.
    pub async fn process_text(
        &self,
        caller: &Caller,
        request: ProcessRequest,
    ) -> Result<Value, ApiError> {
        require_text(&request.text)?;

        let store = Arc::clone(&self.store);
        let model = Arc::clone(&self.model);
        let stopwords = Arc::clone(&self.stopwords);
        let token = caller.token.clone();

        self.run(move || {
            let result = process(model.as_ref(), &stopwords, &request)
                .context("Processing failed")?;
            record_usage(store.as_ref(), &token, &request.text);
            Ok(Value::Object(result))
        })
        .await
    }

    /// Count non-stopword tokens, most frequent first.
    pub async fn word_frequency(
        &self,
        caller: &Caller,
        request: FrequencyRequest,
    ) -> Result<Value, ApiError> {
        require_text(&request.text)?;
        let max_words = request.max_words.unwrap_or(DEFAULT_MAX_WORDS);
        if max_words < 1 {
            return Err(ApiError::bad_request("max_words must be a positive integer"));
        }
        let max_words = usize::try_from(max_words).unwrap_or(usize::MAX);

        let store = Arc::clone(&self.store);
        let model = Arc::clone(&self.model);
        let stopwords = Arc::clone(&self.stopwords);
        let token = caller.token.clone();

        self.run(move || {
            let counts = frequencies(model.as_ref(), &stopwords, &request, max_words)
                .context("Word frequency calculation failed")?;
            record_usage(store.as_ref(), &token, &request.text);
            Ok(json!({ "word_frequency": counts }))
        })
        .await
    }

    /// Issue a fresh token for `owner_id`, invalidating any valid ones it holds.
    pub fn issue_token(&self, owner_id: i64, is_admin: bool) -> Result<IssuedToken, ApiError> {
        if owner_id < 1 {
            return Err(ApiError::bad_request("user_id must be a positive integer"));
        }

        let token = generate_token();
        let reissued = self.store.reissue(&token, owner_id, is_admin).map_err(|e| {
            tracing::warn!(owner_id, err = %e, "token issuance failed");
            ApiError::new(ErrorCode::StorageError, format!("Failed to issue token: {e}"))
        })?;

        tracing::info!(owner_id, reissued, is_admin, "token issued");
        Ok(IssuedToken { token, reissued, message: "Token issued successfully".to_owned() })
    }

    pub fn delete_token(&self, token: &str) -> Result<(), ApiError> {
        let token = require_token(token)?;
        if !self.store.delete_token(token) {
            return Err(ApiError::new(ErrorCode::Internal, "Failed to delete token"));
        }
        tracing::info!("token deleted");
        Ok(())
    }

    pub fn invalidate_token(&self, token: &str) -> Result<(), ApiError> {
        let token = require_token(token)?;
        if !self.store.invalidate_token(token) {
            return Err(ApiError::new(ErrorCode::NotFound, "Token not found"));
        }
        tracing::info!("token invalidated");
        Ok(())
    }

    /// Every token ever issued to `owner_id`, newest first.
    pub fn owner_tokens(&self, owner_id: i64) -> Result<Vec<Token>, ApiError> {
        self.store.list_tokens_for_owner(owner_id).map_err(ApiError::storage)
    }

    /// Usage counters of every token, busiest first.
    pub fn usage_stats(&self) -> Result<Vec<Token>, ApiError> {
        self.store.all_token_stats().map_err(ApiError::storage)
    }

    async fn run<F>(&self, work: F) -> Result<Value, ApiError>
    where
        F: FnOnce() -> anyhow::Result<Value> + Send + 'static,
    {
        let record = self.engine.submit_and_wait(work).await.map_err(engine_error)?;
        match record.state {
            TaskState::Completed { result } => Ok(result),
            TaskState::Timeout { .. } => Err(ApiError::new(
                ErrorCode::ProcessingTimeout,
                "Request timeout: Processing took too long",
            )),
            TaskState::Error { error } => {
                Err(ApiError::new(ErrorCode::ProcessingError, format!("Processing error: {error}")))
            }
            TaskState::Queued => {
                Err(ApiError::new(ErrorCode::Internal, "task returned without an outcome"))
            }
        }
    }
}

fn engine_error(err: EngineError) -> ApiError {
    match err {
        EngineError::Backpressure { .. } | EngineError::ShuttingDown => {
            tracing::warn!(err = %err, "rejecting request");
            ApiError::new(ErrorCode::Busy, format!("Server busy: {err}"))
        }
        EngineError::UnknownTask(_) => ApiError::new(ErrorCode::Internal, err.to_string()),
    }
}

fn require_text(text: &str) -> Result<(), ApiError> {
    if text.trim().is_empty() {
        return Err(ApiError::bad_request("Missing \"text\" parameter"));
    }
    Ok(())
}

fn require_token(token: &str) -> Result<&str, ApiError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(ApiError::bad_request("Missing \"token\" parameter"));
    }
    Ok(token)
}

/// `tg_` followed by 32 random bytes, base64url without padding.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    format!("{TOKEN_PREFIX}{}", URL_SAFE_NO_PAD.encode(bytes))
}

fn record_usage(store: &dyn TokenStore, token: &str, text: &str) {
    let chars = text.chars().count() as u64;
    if !store.record_usage(token, chars) {
        tracing::debug!(chars, "usage not recorded; token no longer valid");
    }
}

fn process(
    model: &dyn Model,
    stopwords: &Stopwords,
    request: &ProcessRequest,
) -> anyhow::Result<Map<String, Value>> {
    let tok_request = ModelRequest::new(request.text.as_str())
        .task(TOK)
        .skip(request.skip_tasks.iter().cloned())
        .language(request.language.clone());
    let tokens = filtered_tokens(model, &tok_request, stopwords, &request.stopword)?;

    let tasks: BTreeSet<&str> = request.tasks.iter().map(String::as_str).collect();
    let mut result = Map::new();

    if tasks.is_empty() || tasks.contains(TOK) {
        let tokens = if request.allow_duplicates {
            tokens
        } else {
            tokens.into_iter().collect::<IndexSet<_>>().into_iter().collect()
        };
        result.insert(TOK.to_owned(), Value::from(tokens));
    }

    for name in [POS, NER] {
        if !tasks.contains(name) {
            continue;
        }
        let mut outputs = model.invoke(
            &ModelRequest::new(request.text.as_str())
                .task(name)
                .language(request.language.clone()),
        )?;
        let output = outputs.remove(name).unwrap_or_else(|| Value::Array(Vec::new()));
        result.insert(name.to_owned(), output);
    }

    Ok(result)
}

#[derive(Debug, Serialize)]
struct WordCount {
    word: String,
    count: usize,
}

fn frequencies(
    model: &dyn Model,
    stopwords: &Stopwords,
    request: &FrequencyRequest,
    max_words: usize,
) -> anyhow::Result<Vec<WordCount>> {
    let tok_request = ModelRequest::new(request.text.as_str()).task(TOK);
    let tokens = filtered_tokens(model, &tok_request, stopwords, &request.stopword)?;

    let mut counts: IndexMap<String, usize> = IndexMap::new();
    for token in tokens {
        *counts.entry(token).or_default() += 1;
    }

    // Stable sort: equal counts keep first-seen order.
    let mut counts: Vec<WordCount> =
        counts.into_iter().map(|(word, count)| WordCount { word, count }).collect();
    counts.sort_by(|a, b| b.count.cmp(&a.count));
    counts.truncate(max_words);
    Ok(counts)
}

/// Run the tokenizer and drop base and per-request stopwords.
fn filtered_tokens(
    model: &dyn Model,
    request: &ModelRequest,
    stopwords: &Stopwords,
    extra: &StopwordInput,
) -> anyhow::Result<Vec<String>> {
    let outputs = model.invoke(request)?;
    let mut tokens = Vec::new();
    if let Some(value) = outputs.get(TOK) {
        flatten_tokens(value, &mut tokens)?;
    }

    let stop = stopwords.for_request(extra);
    tokens.retain(|t| !stop.contains(t));
    Ok(tokens)
}

/// Collect string tokens, flattening per-sentence nesting.
fn flatten_tokens(value: &Value, out: &mut Vec<String>) -> anyhow::Result<()> {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => {
            for item in items {
                flatten_tokens(item, out)?;
            }
        }
        other => anyhow::bail!("model returned a non-string token: {other}"),
    }
    Ok(())
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
