// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Built-in regex tokenizer.

use regex::Regex;
use serde_json::Value;

use super::{Model, ModelRequest, TaskOutputs, POS, TOK};

/// One Han character, a run of other letters/digits, or one other visible character.
const TOKEN_PATTERN: &str = r"\p{Han}|[\p{L}\p{M}\p{N}&&[^\p{Han}]]+|[^\s\p{L}\p{M}\p{N}]";

/// Coarse character-class tags produced for `pos`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Han,
    Alpha,
    Num,
    Punct,
}

impl Tag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Han => "HAN",
            Self::Alpha => "ALPHA",
            Self::Num => "NUM",
            Self::Punct => "PUNCT",
        }
    }

    fn of(token: &str, han: &Regex) -> Self {
        if han.is_match(token) {
            Self::Han
        } else if token.chars().all(char::is_numeric) {
            Self::Num
        } else if token.chars().any(char::is_alphanumeric) {
            Self::Alpha
        } else {
            Self::Punct
        }
    }
}

/// Tokenizer that needs no external model. Safe to call concurrently.
pub struct LexicalModel {
    token: Regex,
    han: Regex,
}

impl LexicalModel {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self { token: Regex::new(TOKEN_PATTERN)?, han: Regex::new(r"^\p{Han}$")? })
    }

    pub fn tokenize<'a>(&self, text: &'a str) -> Vec<&'a str> {
        self.token.find_iter(text).map(|m| m.as_str()).collect()
    }

    pub fn tag(&self, token: &str) -> Tag {
        Tag::of(token, &self.han)
    }
}

impl Model for LexicalModel {
    fn name(&self) -> &str {
        "lexical"
    }

    fn invoke(&self, request: &ModelRequest) -> anyhow::Result<TaskOutputs> {
        let tokens = self.tokenize(&request.text);
        let mut outputs = TaskOutputs::new();

        if request.wants(TOK) {
            outputs.insert(
                TOK.to_owned(),
                Value::Array(tokens.iter().map(|t| Value::from(*t)).collect()),
            );
        }
        if request.wants(POS) {
            outputs.insert(
                POS.to_owned(),
                Value::Array(tokens.iter().map(|t| Value::from(self.tag(t).as_str())).collect()),
            );
        }
        Ok(outputs)
    }
}

#[cfg(test)]
#[path = "lexical_tests.rs"]
mod tests;
