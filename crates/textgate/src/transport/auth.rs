// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::{header, HeaderMap};

use crate::error::ApiError;
use crate::orchestrator::{Access, Caller};
use crate::state::AppState;

/// The token from an `Authorization: Bearer <token>` header, trimmed.
///
/// `None` when the header is absent, not valid UTF-8, or not a bearer credential.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

/// Authenticate the request's bearer token for `access`.
pub fn require(state: &AppState, headers: &HeaderMap, access: Access) -> Result<Caller, ApiError> {
    let caller = state.orchestrator.authenticate(bearer_token(headers), access);
    if let Err(ref e) = caller {
        tracing::debug!(?access, code = %e.code, "request rejected");
    }
    caller
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
