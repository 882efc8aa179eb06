// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SQLite-backed [`TokenStore`].

use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{StoreError, Token, TokenStore};
use crate::epoch_ms;

const TOKEN_COLUMNS: &str =
    "token, owner_id, is_valid, is_admin, usage_count, char_count, created_at_ms";

/// Token store on a single SQLite connection.
///
/// The connection mutex serializes writers; counter updates are still
/// expressed as single conditional statements so they stay atomic if the
/// database is shared with another process.
pub struct SqliteTokenStore {
    conn: Mutex<Connection>,
}

impl SqliteTokenStore {
    /// Open or create the tokens table in the given database path.
    /// Use `":memory:"` for tests.
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        if path != ":memory:" {
            let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
            tracing::debug!(path, mode = %mode, "opened token database");
        }
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tokens (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                token         TEXT UNIQUE NOT NULL,
                owner_id      INTEGER NOT NULL,
                created_at_ms INTEGER NOT NULL,
                is_valid      INTEGER NOT NULL DEFAULT 1,
                is_admin      INTEGER NOT NULL DEFAULT 0,
                usage_count   INTEGER NOT NULL DEFAULT 0,
                char_count    INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_tokens_owner ON tokens(owner_id);",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        Self::open(":memory:")
    }

    fn query_tokens(
        &self,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<Token>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let tokens = stmt.query_map(args, token_from_row)?.collect::<Result<Vec<_>, _>>()?;
        Ok(tokens)
    }

    fn query_flag(&self, sql: &str, token: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let found = conn.query_row(sql, [token], |_| Ok(())).optional()?;
        Ok(found.is_some())
    }

    /// Run a write statement, logging and swallowing storage failures.
    fn execute_logged(&self, op: &str, sql: &str, args: impl rusqlite::Params) -> usize {
        let conn = self.conn.lock();
        match conn.execute(sql, args) {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(op, err = %e, "token store write failed");
                0
            }
        }
    }
}

impl TokenStore for SqliteTokenStore {
    fn add_token(&self, token: &str, owner_id: i64, is_admin: bool) -> bool {
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO tokens (token, owner_id, is_admin, created_at_ms) VALUES (?1, ?2, ?3, ?4)",
            params![token, owner_id, is_admin, now_ms()],
        );
        match result {
            Ok(_) => true,
            Err(e) if is_constraint_violation(&e) => {
                tracing::debug!(owner_id, "token already exists");
                false
            }
            Err(e) => {
                tracing::warn!(op = "add_token", err = %e, "token store write failed");
                false
            }
        }
    }

    fn is_valid_token(&self, token: &str) -> Result<bool, StoreError> {
        self.query_flag("SELECT 1 FROM tokens WHERE token = ?1 AND is_valid = 1", token)
    }

    fn is_admin_token(&self, token: &str) -> Result<bool, StoreError> {
        self.query_flag(
            "SELECT 1 FROM tokens WHERE token = ?1 AND is_valid = 1 AND is_admin = 1",
            token,
        )
    }

    fn token_info(&self, token: &str) -> Result<Option<Token>, StoreError> {
        let conn = self.conn.lock();
        let found = conn
            .query_row(
                &format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE token = ?1"),
                [token],
                token_from_row,
            )
            .optional()?;
        Ok(found)
    }

    fn invalidate_token(&self, token: &str) -> bool {
        self.execute_logged(
            "invalidate_token",
            "UPDATE tokens SET is_valid = 0 WHERE token = ?1",
            [token],
        ) > 0
    }

    fn invalidate_all_for_owner(&self, owner_id: i64) -> usize {
        self.execute_logged(
            "invalidate_all_for_owner",
            "UPDATE tokens SET is_valid = 0 WHERE owner_id = ?1 AND is_valid = 1",
            [owner_id],
        )
    }

    fn reissue(&self, token: &str, owner_id: i64, is_admin: bool) -> Result<bool, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let invalidated = tx.execute(
            "UPDATE tokens SET is_valid = 0 WHERE owner_id = ?1 AND is_valid = 1",
            [owner_id],
        )?;
        tx.execute(
            "INSERT INTO tokens (token, owner_id, is_admin, created_at_ms) VALUES (?1, ?2, ?3, ?4)",
            params![token, owner_id, is_admin, now_ms()],
        )?;
        tx.commit()?;
        Ok(invalidated > 0)
    }

    fn record_usage(&self, token: &str, chars: u64) -> bool {
        let chars = i64::try_from(chars).unwrap_or(i64::MAX);
        self.execute_logged(
            "record_usage",
            "UPDATE tokens
             SET usage_count = usage_count + 1, char_count = char_count + ?1
             WHERE token = ?2 AND is_valid = 1",
            params![chars, token],
        ) > 0
    }

    fn list_tokens_for_owner(&self, owner_id: i64) -> Result<Vec<Token>, StoreError> {
        self.query_tokens(
            &format!(
                "SELECT {TOKEN_COLUMNS} FROM tokens WHERE owner_id = ?1
                 ORDER BY created_at_ms DESC, id DESC"
            ),
            [owner_id],
        )
    }

    fn all_token_stats(&self) -> Result<Vec<Token>, StoreError> {
        self.query_tokens(
            &format!("SELECT {TOKEN_COLUMNS} FROM tokens ORDER BY usage_count DESC, id ASC"),
            [],
        )
    }

    fn delete_token(&self, token: &str) -> bool {
        self.execute_logged("delete_token", "DELETE FROM tokens WHERE token = ?1", [token]) > 0
    }
}

fn token_from_row(row: &Row<'_>) -> rusqlite::Result<Token> {
    Ok(Token {
        token: row.get(0)?,
        owner_id: row.get(1)?,
        is_valid: row.get(2)?,
        is_admin: row.get(3)?,
        usage_count: non_negative(row.get(4)?),
        char_count: non_negative(row.get(5)?),
        created_at_ms: non_negative(row.get(6)?),
    })
}

fn non_negative(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn now_ms() -> i64 {
    i64::try_from(epoch_ms()).unwrap_or(i64::MAX)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
#[path = "sqlite_tests.rs"]
mod tests;
