// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stopword lists.
//!
//! The base list is built once at startup. Requests may add words of their
//! own; those only ever land in a per-request copy.

use std::collections::HashSet;
use std::path::Path;

use serde_json::Value;

use crate::error::ApiError;

const ENGLISH: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "few", "for",
    "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers", "herself",
    "him", "himself", "his", "how", "i", "if", "in", "into", "is", "it", "its", "itself", "just",
    "me", "more", "most", "my", "myself", "no", "nor", "not", "now", "of", "off", "on", "once",
    "only", "or", "other", "our", "ours", "ourselves", "out", "over", "own", "same", "she",
    "should", "so", "some", "such", "than", "that", "the", "their", "theirs", "them",
    "themselves", "then", "there", "these", "they", "this", "those", "through", "to", "too",
    "under", "until", "up", "very", "was", "we", "were", "what", "when", "where", "which",
    "while", "who", "whom", "why", "will", "with", "would", "you", "your", "yours", "yourself",
    "yourselves",
];

const CHINESE: &[&str] = &[
    "的", "了", "在", "是", "我", "有", "和", "就", "不", "人", "都", "一", "一个", "上", "也",
    "很", "到", "说", "要", "去", "你", "会", "着", "没有", "看", "好", "自己", "这", "那", "他",
    "她", "它", "们", "我们", "你们", "他们", "之", "与", "及", "其", "而", "或", "被", "把",
    "给", "从", "向", "对", "于", "以", "为", "所", "因为", "所以", "但是", "如果", "虽然",
    "这个", "那个", "什么", "怎么", "吗", "呢", "吧", "啊", "哦", "嗯", "呀", "么", "地", "得",
];

const PUNCTUATION: &[&str] = &[
    ",", ".", "!", "?", ";", ":", "'", "\"", "(", ")", "[", "]", "{", "}", "-", "_", "/", "\\",
    "…", "，", "。", "！", "？", "；", "：", "、", "“", "”", "‘", "’", "（", "）", "【", "】", "《",
    "》", "—", "·",
];

/// Immutable base stopword list.
#[derive(Debug, Clone)]
pub struct Stopwords {
    words: HashSet<String>,
}

impl Stopwords {
    /// Built-in English and Chinese function words plus common punctuation.
    pub fn base() -> Self {
        let words = ENGLISH.iter().chain(CHINESE).chain(PUNCTUATION).map(|w| (*w).to_owned());
        Self { words: words.collect() }
    }

    /// The base list extended with the words in `path`.
    ///
    /// One word per line; blank lines and lines starting with `#` are ignored.
    pub fn with_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut stopwords = Self::base();
        let before = stopwords.len();
        stopwords.words.extend(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_owned),
        );
        tracing::debug!(path = %path.display(), added = stopwords.len() - before, "loaded stopwords");
        Ok(stopwords)
    }

    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(word)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// View of the base list plus whatever the request supplied.
    pub fn for_request<'a>(&'a self, input: &'a StopwordInput) -> RequestStopwords<'a> {
        RequestStopwords { base: self, extra: input.words().iter().map(String::as_str).collect() }
    }
}

/// Stopwords for one request. Borrows the base list instead of copying it.
pub struct RequestStopwords<'a> {
    base: &'a Stopwords,
    extra: HashSet<&'a str>,
}

impl RequestStopwords<'_> {
    pub fn contains(&self, word: &str) -> bool {
        self.base.contains(word) || self.extra.contains(word)
    }
}

/// The `stopword` request parameter: nothing, one word, or a list of words.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StopwordInput {
    #[default]
    None,
    One(String),
    Many(Vec<String>),
}

impl StopwordInput {
    /// Parse the raw JSON value. `None` and `null` both mean no extra words.
    pub fn parse(value: Option<&Value>) -> Result<Self, ApiError> {
        let invalid = || ApiError::bad_request("stopword must be a string or array of strings");
        match value {
            None | Some(Value::Null) => Ok(Self::None),
            Some(Value::String(word)) => Ok(Self::One(word.clone())),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| item.as_str().map(str::to_owned).ok_or_else(invalid))
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Many),
            Some(_) => Err(invalid()),
        }
    }

    pub fn words(&self) -> &[String] {
        match self {
            Self::None => &[],
            Self::One(word) => std::slice::from_ref(word),
            Self::Many(words) => words,
        }
    }
}

#[cfg(test)]
#[path = "stopwords_tests.rs"]
mod tests;
