// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Model adapters.
//!
//! A model is a synchronous, possibly slow `invoke` call. Workers run it on
//! blocking threads. Adapters declare whether concurrent calls are safe;
//! [`shared`] wraps the ones that are not so they can still be handed to
//! every worker.

pub mod lexical;
pub mod remote;

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};

pub use lexical::LexicalModel;
pub use remote::RemoteModel;

/// Task name for tokenization.
pub const TOK: &str = "tok";
/// Task name for part-of-speech tagging.
pub const POS: &str = "pos";
/// Task name for named-entity recognition.
pub const NER: &str = "ner";

/// Per-task outputs keyed by task name.
pub type TaskOutputs = Map<String, Value>;

/// One model invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModelRequest {
    pub text: String,
    /// Tasks to run. Empty means every task the model supports.
    pub tasks: BTreeSet<String>,
    pub skip_tasks: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl ModelRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), ..Default::default() }
    }

    pub fn task(mut self, name: impl Into<String>) -> Self {
        self.tasks.insert(name.into());
        self
    }

    pub fn skip(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.skip_tasks.extend(names);
        self
    }

    pub fn language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    /// Whether `name` should be produced for this request.
    pub fn wants(&self, name: &str) -> bool {
        (self.tasks.is_empty() || self.tasks.contains(name)) && !self.skip_tasks.contains(name)
    }
}

/// Whether an adapter tolerates concurrent `invoke` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    Shared,
    Exclusive,
}

/// The text-processing resource behind the task engine.
pub trait Model: Send + Sync {
    fn name(&self) -> &str;

    fn concurrency(&self) -> Concurrency {
        Concurrency::Shared
    }

    fn invoke(&self, request: &ModelRequest) -> anyhow::Result<TaskOutputs>;
}

/// Runs every call of the wrapped model under one lock.
pub struct Serialized<M> {
    inner: M,
    lock: Mutex<()>,
}

impl<M> Serialized<M> {
    pub fn new(inner: M) -> Self {
        Self { inner, lock: Mutex::new(()) }
    }
}

impl<M: Model> Model for Serialized<M> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn concurrency(&self) -> Concurrency {
        Concurrency::Shared
    }

    fn invoke(&self, request: &ModelRequest) -> anyhow::Result<TaskOutputs> {
        let _guard = self.lock.lock();
        self.inner.invoke(request)
    }
}

/// Make `model` safe to share across workers.
pub fn shared<M: Model + 'static>(model: M) -> Arc<dyn Model> {
    match model.concurrency() {
        Concurrency::Shared => Arc::new(model),
        Concurrency::Exclusive => {
            tracing::debug!(model = model.name(), "serializing model calls");
            Arc::new(Serialized::new(model))
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
