// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Model served by another process over JSON/HTTP.

use std::time::Duration;

use serde_json::Value;
use tokio::runtime::Handle;

use super::{Concurrency, Model, ModelRequest, TaskOutputs};

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times; only the first call has effect.
pub fn ensure_crypto() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// POSTs each [`ModelRequest`] as JSON and expects a JSON object of task outputs.
///
/// Calls block the worker's thread on the runtime captured at construction,
/// so `invoke` must not be called from inside an async task.
pub struct RemoteModel {
    client: reqwest::Client,
    url: String,
    runtime: Handle,
    concurrency: Concurrency,
}

impl RemoteModel {
    /// Must be called from within a tokio runtime.
    pub fn new(url: impl Into<String>, timeout: Duration, exclusive: bool) -> anyhow::Result<Self> {
        ensure_crypto();
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let runtime = Handle::try_current()?;
        let concurrency = if exclusive { Concurrency::Exclusive } else { Concurrency::Shared };
        Ok(Self { client, url: url.into(), runtime, concurrency })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, request: &ModelRequest) -> anyhow::Result<TaskOutputs> {
        let resp = self.client.post(&self.url).json(request).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("model server returned {status}: {}", body.trim());
        }

        match resp.json::<Value>().await? {
            Value::Object(outputs) => Ok(outputs),
            other => anyhow::bail!("model server returned {} instead of an object", kind(&other)),
        }
    }
}

impl Model for RemoteModel {
    fn name(&self) -> &str {
        "remote"
    }

    fn concurrency(&self) -> Concurrency {
        self.concurrency
    }

    fn invoke(&self, request: &ModelRequest) -> anyhow::Result<TaskOutputs> {
        self.runtime.block_on(self.call(request))
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
#[path = "remote_tests.rs"]
mod tests;
