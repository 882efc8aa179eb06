// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::engine::EngineConfig;

/// Which model adapter serves requests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// Built-in regex tokenizer.
    #[default]
    Lexical,
    /// JSON-over-HTTP model server at `--model-url`.
    Remote,
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lexical => f.write_str("lexical"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

impl std::str::FromStr for ModelKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lexical" => Ok(Self::Lexical),
            "remote" => Ok(Self::Remote),
            other => anyhow::bail!("invalid model kind: {other}"),
        }
    }
}

/// Authenticated, metered text-processing server.
#[derive(Debug, Clone, Parser)]
#[command(name = "textgate", version, about)]
pub struct Config {
    /// Host address to bind to.
    #[arg(long, env = "TEXTGATE_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// HTTP port to listen on.
    #[arg(long, env = "TEXTGATE_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Admin bearer token, inserted into the store at startup.
    #[arg(long, env = "TEXTGATE_ADMIN_TOKEN")]
    pub admin_token: Option<String>,

    /// SQLite database path (`:memory:` for a throwaway store).
    #[arg(long, env = "TEXTGATE_DB_PATH", default_value = "tokens.db")]
    pub db_path: String,

    /// Number of task workers.
    #[arg(long, env = "TEXTGATE_WORKERS", default_value_t = 5)]
    pub workers: usize,

    /// Seconds a request waits for its task before timing out.
    #[arg(long, env = "TEXTGATE_TASK_TIMEOUT_SECS", default_value_t = 180)]
    pub task_timeout_secs: u64,

    /// Maximum number of tasks waiting for a worker. Unbounded if unset.
    #[arg(long, env = "TEXTGATE_QUEUE_CAPACITY")]
    pub queue_capacity: Option<usize>,

    /// Seconds finished task records are kept (0 keeps them forever).
    #[arg(long, env = "TEXTGATE_RESULT_TTL_SECS", default_value_t = 600)]
    pub result_ttl_secs: u64,

    /// Model adapter (lexical, remote).
    #[arg(long, env = "TEXTGATE_MODEL", default_value = "lexical")]
    pub model: String,

    /// Endpoint of the remote model server.
    #[arg(long, env = "TEXTGATE_MODEL_URL")]
    pub model_url: Option<String>,

    /// Per-call timeout for the remote model, in seconds.
    #[arg(long, env = "TEXTGATE_MODEL_TIMEOUT_SECS", default_value_t = 120)]
    pub model_timeout_secs: u64,

    /// Serialize calls into the model (one invocation at a time).
    #[arg(long, env = "TEXTGATE_MODEL_EXCLUSIVE")]
    pub model_exclusive: bool,

    /// Extra stopwords, one per line, added to the built-in list.
    #[arg(long, env = "TEXTGATE_STOPWORDS_FILE")]
    pub stopwords_file: Option<PathBuf>,

    /// Log format (json or text).
    #[arg(long, env = "TEXTGATE_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "TEXTGATE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers == 0 {
            anyhow::bail!("--workers must be at least 1");
        }
        if self.task_timeout_secs == 0 {
            anyhow::bail!("--task-timeout-secs must be at least 1");
        }
        if self.queue_capacity == Some(0) {
            anyhow::bail!("--queue-capacity must be at least 1 when set");
        }
        if self.admin_token.as_deref().is_some_and(|t| t.trim().is_empty()) {
            anyhow::bail!("--admin-token must not be empty");
        }
        if self.db_path.is_empty() {
            anyhow::bail!("--db-path must not be empty");
        }

        match self.model_kind()? {
            ModelKind::Remote if self.model_url.is_none() => {
                anyhow::bail!("--model remote requires --model-url");
            }
            ModelKind::Lexical if self.model_url.is_some() => {
                anyhow::bail!("--model-url is only used with --model remote");
            }
            _ => {}
        }

        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }

        Ok(())
    }

    /// Parse the model string into an enum.
    pub fn model_kind(&self) -> anyhow::Result<ModelKind> {
        self.model.parse()
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    /// Retention for finished task records; `None` when disabled.
    pub fn result_ttl(&self) -> Option<Duration> {
        (self.result_ttl_secs > 0).then(|| Duration::from_secs(self.result_ttl_secs))
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            workers: self.workers,
            task_timeout: self.task_timeout(),
            queue_capacity: self.queue_capacity,
            result_ttl: self.result_ttl(),
        }
    }

    /// Build a minimal `Config` for tests (port 0, in-memory store).
    #[doc(hidden)]
    pub fn test() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            admin_token: Some("admin-test-token".into()),
            db_path: ":memory:".into(),
            workers: 2,
            task_timeout_secs: 5,
            queue_capacity: None,
            result_ttl_secs: 0,
            model: "lexical".into(),
            model_url: None,
            model_timeout_secs: 5,
            model_exclusive: false,
            stopwords_file: None,
            log_format: "text".into(),
            log_level: "debug".into(),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
