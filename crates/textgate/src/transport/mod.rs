// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transport.

pub mod auth;
pub mod http;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the axum `Router` with all routes.
///
/// Authentication happens per handler: which privilege a route needs, and
/// whether it needs one at all (`GET /` without `text`), depends on the request.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health and docs (no auth)
        .route("/health", get(http::health))
        .route("/", get(http::root))
        // Text processing
        .route("/tokenize", post(http::tokenize))
        .route("/word-frequency", post(http::word_frequency))
        // Token administration
        .route("/token/request", post(http::token_request))
        .route("/token/delete", post(http::token_delete))
        .route("/token/invalidate", post(http::token_invalidate))
        .route("/token/list", post(http::token_list))
        .route("/stats", get(http::stats).post(http::stats))
        .fallback(http::not_found)
        .method_not_allowed_fallback(http::not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
