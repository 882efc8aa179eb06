// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential store: bearer tokens, their owners, and usage counters.
//!
//! Mutating operations report success as a boolean and log storage failures;
//! read operations return [`StoreError`] so callers can answer with a 5xx
//! instead of treating a broken database as "no such token".

pub mod sqlite;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use sqlite::SqliteTokenStore;

/// One credential row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub token: String,
    pub owner_id: i64,
    pub is_valid: bool,
    pub is_admin: bool,
    pub usage_count: u64,
    pub char_count: u64,
    pub created_at_ms: u64,
}

/// Storage-layer failure on a read path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Durable token storage shared by request handlers and workers.
///
/// Implementations must be safe for concurrent use and must apply counter
/// updates and invalidation as single atomic statements.
pub trait TokenStore: Send + Sync {
    /// Insert a new token. False if the token already exists or the insert failed.
    fn add_token(&self, token: &str, owner_id: i64, is_admin: bool) -> bool;

    fn is_valid_token(&self, token: &str) -> Result<bool, StoreError>;

    /// True only for tokens that are both valid and admin.
    fn is_admin_token(&self, token: &str) -> Result<bool, StoreError>;

    fn token_info(&self, token: &str) -> Result<Option<Token>, StoreError>;

    fn invalidate_token(&self, token: &str) -> bool;

    /// Invalidate every valid token held by `owner_id`, returning how many were invalidated.
    fn invalidate_all_for_owner(&self, owner_id: i64) -> usize;

    /// Invalidate the owner's valid tokens and insert `token` in one transaction.
    ///
    /// Returns whether any previously valid token was invalidated.
    fn reissue(&self, token: &str, owner_id: i64, is_admin: bool) -> Result<bool, StoreError>;

    /// Count one successful use of `token` covering `chars` characters.
    ///
    /// No-op returning false when the token is unknown or no longer valid.
    fn record_usage(&self, token: &str, chars: u64) -> bool;

    /// Tokens of one owner, newest first.
    fn list_tokens_for_owner(&self, owner_id: i64) -> Result<Vec<Token>, StoreError>;

    /// Every token, busiest first.
    fn all_token_stats(&self) -> Result<Vec<Token>, StoreError>;

    fn delete_token(&self, token: &str) -> bool;
}
