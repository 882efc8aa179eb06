// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: scripted models, a broken store, and a
//! harness wiring a real store and engine together.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::engine::{EngineConfig, TaskEngine};
use crate::model::{Model, ModelRequest, TaskOutputs, TOK};
use crate::orchestrator::{Access, Caller, Orchestrator};
use crate::state::AppState;
use crate::stopwords::Stopwords;
use crate::store::{SqliteTokenStore, StoreError, Token, TokenStore};

/// Admin token registered by [`Harness`].
pub const ADMIN_TOKEN: &str = "admin-test-token";

/// Model double: whitespace tokenizer with optional delay, failure, and
/// extra per-task outputs. Records every request it receives.
pub struct ScriptedModel {
    delay: Duration,
    failure: Option<String>,
    extra: TaskOutputs,
    calls: AtomicUsize,
    requests: Mutex<Vec<ModelRequest>>,
}

impl Default for ScriptedModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            failure: None,
            extra: TaskOutputs::new(),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fail(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Return `value` under `task` whenever that task is requested.
    pub fn output(mut self, task: &str, value: Value) -> Self {
        self.extra.insert(task.to_owned(), value);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().clone()
    }
}

impl Model for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn invoke(&self, request: &ModelRequest) -> anyhow::Result<TaskOutputs> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if let Some(ref message) = self.failure {
            anyhow::bail!("{message}");
        }

        let mut outputs = TaskOutputs::new();
        if request.wants(TOK) {
            let tokens: Vec<Value> = request.text.split_whitespace().map(Value::from).collect();
            outputs.insert(TOK.to_owned(), Value::Array(tokens));
        }
        for (task, value) in &self.extra {
            if request.wants(task) {
                outputs.insert(task.clone(), value.clone());
            }
        }
        Ok(outputs)
    }
}

/// Store whose reads fail and whose writes report false.
pub struct BrokenStore;

impl BrokenStore {
    fn err() -> StoreError {
        StoreError::new("disk I/O error")
    }
}

impl TokenStore for BrokenStore {
    fn add_token(&self, _token: &str, _owner_id: i64, _is_admin: bool) -> bool {
        false
    }
    fn is_valid_token(&self, _token: &str) -> Result<bool, StoreError> {
        Err(Self::err())
    }
    fn is_admin_token(&self, _token: &str) -> Result<bool, StoreError> {
        Err(Self::err())
    }
    fn token_info(&self, _token: &str) -> Result<Option<Token>, StoreError> {
        Err(Self::err())
    }
    fn invalidate_token(&self, _token: &str) -> bool {
        false
    }
    fn invalidate_all_for_owner(&self, _owner_id: i64) -> usize {
        0
    }
    fn reissue(&self, _token: &str, _owner_id: i64, _is_admin: bool) -> Result<bool, StoreError> {
        Err(Self::err())
    }
    fn record_usage(&self, _token: &str, _chars: u64) -> bool {
        false
    }
    fn list_tokens_for_owner(&self, _owner_id: i64) -> Result<Vec<Token>, StoreError> {
        Err(Self::err())
    }
    fn all_token_stats(&self) -> Result<Vec<Token>, StoreError> {
        Err(Self::err())
    }
    fn delete_token(&self, _token: &str) -> bool {
        false
    }
}

/// Engine settings for tests: two workers, five-second timeout, no retention.
pub fn test_engine_config() -> EngineConfig {
    EngineConfig {
        workers: 2,
        task_timeout: Duration::from_secs(5),
        queue_capacity: None,
        result_ttl: None,
    }
}

/// In-memory store, running engine, and orchestrator with [`ADMIN_TOKEN`]
/// registered. Must be built inside a tokio runtime.
pub struct Harness {
    pub store: Arc<SqliteTokenStore>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    pub fn new(model: Arc<dyn Model>) -> anyhow::Result<Self> {
        Self::with_engine(model, test_engine_config())
    }

    pub fn with_engine(model: Arc<dyn Model>, config: EngineConfig) -> anyhow::Result<Self> {
        let store = Arc::new(SqliteTokenStore::in_memory()?);
        let engine = TaskEngine::start(config);
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&store) as Arc<dyn TokenStore>,
            engine,
            model,
            Stopwords::base(),
        ));
        orchestrator.ensure_admin_token(ADMIN_TOKEN)?;
        Ok(Self { store, orchestrator })
    }

    /// Issue a token for `owner_id` and return it.
    pub fn issue(&self, owner_id: i64) -> anyhow::Result<String> {
        Ok(self.orchestrator.issue_token(owner_id, false)?.token)
    }

    /// Issue a token for `owner_id` and authenticate it as a user.
    pub fn user(&self, owner_id: i64) -> anyhow::Result<Caller> {
        let token = self.issue(owner_id)?;
        Ok(self.orchestrator.authenticate(Some(&token), Access::User)?)
    }

    pub fn app_state(&self) -> Arc<AppState> {
        Arc::new(AppState::new(Arc::clone(&self.orchestrator), CancellationToken::new()))
    }
}

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
