// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Textgate: authenticated, metered access to a shared text-processing model
//! through a bounded worker pool.

pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod state;
pub mod stopwords;
pub mod store;
pub mod test_support;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, ModelKind};
use crate::engine::TaskEngine;
use crate::model::{LexicalModel, Model, RemoteModel};
use crate::orchestrator::Orchestrator;
use crate::state::AppState;
use crate::stopwords::Stopwords;
use crate::store::{SqliteTokenStore, TokenStore};
use crate::transport::build_router;

pub use crate::state::epoch_ms;

/// Build the model adapter selected by `config`.
pub fn build_model(config: &Config) -> anyhow::Result<Arc<dyn Model>> {
    let model = match config.model_kind()? {
        ModelKind::Lexical => model::shared(LexicalModel::new()?),
        ModelKind::Remote => {
            let url = config
                .model_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("--model remote requires --model-url"))?;
            let remote = RemoteModel::new(url, config.model_timeout(), config.model_exclusive)?;
            tracing::info!(
                url = remote.url(),
                exclusive = config.model_exclusive,
                "using remote model"
            );
            model::shared(remote)
        }
    };
    Ok(model)
}

/// Run the server until `shutdown` is cancelled, then drain the task engine.
pub async fn run(config: Config, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);

    let store: Arc<dyn TokenStore> = Arc::new(SqliteTokenStore::open(&config.db_path)?);
    let stopwords = match config.stopwords_file {
        Some(ref path) => Stopwords::with_file(path)?,
        None => Stopwords::base(),
    };
    let model = build_model(&config)?;
    let engine = TaskEngine::start(config.engine_config());

    let orchestrator =
        Arc::new(Orchestrator::new(store, Arc::clone(&engine), Arc::clone(&model), stopwords));
    match config.admin_token {
        Some(ref token) => orchestrator.ensure_admin_token(token)?,
        None => tracing::warn!("no --admin-token configured; admin endpoints will reject requests"),
    }

    let state = Arc::new(AppState::new(orchestrator, shutdown.clone()));
    let router = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(
        model = model.name(),
        workers = config.workers,
        db = %config.db_path,
        "textgate listening on {}",
        listener.local_addr()?
    );

    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    tracing::info!("draining task engine");
    engine.shutdown().await;
    Ok(())
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
