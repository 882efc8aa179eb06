// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::{Duration, Instant};

use serde_json::json;

use super::*;
use crate::engine::EngineConfig;
use crate::model::LexicalModel;
use crate::test_support::{test_engine_config, BrokenStore, Harness, ScriptedModel, ADMIN_TOKEN};

fn scripted() -> Arc<ScriptedModel> {
    Arc::new(ScriptedModel::new())
}

fn harness(model: &Arc<ScriptedModel>) -> anyhow::Result<Harness> {
    Harness::new(Arc::clone(model) as Arc<dyn Model>)
}

fn usage(h: &Harness, token: &str) -> anyhow::Result<(u64, u64)> {
    let info = h.store.token_info(token)?.ok_or_else(|| anyhow::anyhow!("row missing"))?;
    Ok((info.usage_count, info.char_count))
}

async fn wait_for_usage(h: &Harness, token: &str, expected: (u64, u64)) -> anyhow::Result<()> {
    let deadline = Instant::now() + Duration::from_secs(5);
    while usage(h, token)? != expected {
        anyhow::ensure!(Instant::now() < deadline, "usage never reached {expected:?}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

// -- authenticate --

#[tokio::test]
async fn authenticate_rejects_missing_and_unknown_tokens() -> anyhow::Result<()> {
    let h = harness(&scripted())?;
    for bearer in [None, Some(""), Some("   "), Some("nope")] {
        let err = h.orchestrator.authenticate(bearer, Access::User).err();
        assert_eq!(
            err,
            Some(ApiError::new(
                ErrorCode::Unauthorized,
                "Unauthorized: Invalid or missing Bearer token"
            )),
            "bearer {bearer:?}"
        );
    }
    Ok(())
}

#[tokio::test]
async fn authenticate_user_and_admin() -> anyhow::Result<()> {
    let h = harness(&scripted())?;
    let token = h.issue(7)?;

    let caller = h.orchestrator.authenticate(Some(&format!(" {token} ")), Access::User)?;
    assert_eq!(caller, Caller { token: token.clone(), is_admin: false });

    let err = h.orchestrator.authenticate(Some(&token), Access::Admin).err();
    assert_eq!(
        err.map(|e| e.message),
        Some("Unauthorized: Admin privileges required".to_owned())
    );

    let admin = h.orchestrator.authenticate(Some(ADMIN_TOKEN), Access::Admin)?;
    assert!(admin.is_admin);
    // Admin tokens are also valid user tokens.
    h.orchestrator.authenticate(Some(ADMIN_TOKEN), Access::User)?;
    Ok(())
}

#[tokio::test]
async fn invalidated_token_is_rejected() -> anyhow::Result<()> {
    let h = harness(&scripted())?;
    let token = h.issue(7)?;
    h.orchestrator.invalidate_token(&token)?;

    let err = h.orchestrator.authenticate(Some(&token), Access::User).err();
    assert_eq!(err.map(|e| e.code), Some(ErrorCode::Unauthorized));
    Ok(())
}

#[tokio::test]
async fn storage_failure_is_not_unauthorized() -> anyhow::Result<()> {
    let orchestrator = Orchestrator::new(
        Arc::new(BrokenStore),
        TaskEngine::start(test_engine_config()),
        scripted(),
        Stopwords::base(),
    );
    let err = orchestrator.authenticate(Some("anything"), Access::User).err();
    assert_eq!(err.as_ref().map(|e| e.code), Some(ErrorCode::StorageError));
    assert!(err.is_some_and(|e| e.message.contains("disk I/O error")));

    crate::assert_err_contains!(orchestrator.usage_stats(), "Database error");
    crate::assert_err_contains!(orchestrator.owner_tokens(1), "Database error");
    crate::assert_err_contains!(orchestrator.issue_token(1, false), "Failed to issue token");
    assert!(orchestrator.ensure_admin_token("root").is_err());
    Ok(())
}

// -- process_text --

#[tokio::test]
async fn process_filters_stopwords_and_records_usage() -> anyhow::Result<()> {
    let model = scripted();
    let h = harness(&model)?;
    let caller = h.user(1)?;

    let text = "the apple and the banana apple";
    let result = h.orchestrator.process_text(&caller, ProcessRequest::new(text)).await?;

    assert_eq!(result, json!({ "tok": ["apple", "banana", "apple"] }));
    assert_eq!(usage(&h, &caller.token)?, (1, text.chars().count() as u64));
    Ok(())
}

#[tokio::test]
async fn process_counts_characters_not_bytes() -> anyhow::Result<()> {
    let h = harness(&scripted())?;
    let caller = h.user(1)?;

    h.orchestrator.process_text(&caller, ProcessRequest::new("北京 欢迎 你")).await?;
    assert_eq!(usage(&h, &caller.token)?, (1, 7));
    Ok(())
}

#[tokio::test]
async fn process_deduplicates_keeping_first_occurrence() -> anyhow::Result<()> {
    let h = harness(&scripted())?;
    let caller = h.user(1)?;

    let mut request = ProcessRequest::new("pear apple pear kiwi apple");
    request.allow_duplicates = false;
    let result = h.orchestrator.process_text(&caller, request).await?;
    assert_eq!(result["tok"], json!(["pear", "apple", "kiwi"]));
    Ok(())
}

#[tokio::test]
async fn request_stopwords_extend_base_for_that_request_only() -> anyhow::Result<()> {
    let h = harness(&scripted())?;
    let caller = h.user(1)?;

    let mut request = ProcessRequest::new("red green blue");
    request.stopword = StopwordInput::One("green".into());
    let result = h.orchestrator.process_text(&caller, request).await?;
    assert_eq!(result["tok"], json!(["red", "blue"]));

    let mut request = ProcessRequest::new("red green blue");
    request.stopword = StopwordInput::Many(vec!["red".into(), "blue".into()]);
    let result = h.orchestrator.process_text(&caller, request).await?;
    assert_eq!(result["tok"], json!(["green"]));

    let result =
        h.orchestrator.process_text(&caller, ProcessRequest::new("red green blue")).await?;
    assert_eq!(result["tok"], json!(["red", "green", "blue"]));
    Ok(())
}

#[tokio::test]
async fn extra_tasks_run_as_separate_calls() -> anyhow::Result<()> {
    let model = Arc::new(ScriptedModel::new().output(POS, json!(["NN", "VV"])));
    let h = harness(&model)?;
    let caller = h.user(1)?;

    let mut request = ProcessRequest::new("cats sleep");
    request.tasks = vec![TOK.into(), POS.into(), NER.into()];
    request.skip_tasks = vec!["dep".into()];
    request.language = Some("en".into());
    let result = h.orchestrator.process_text(&caller, request).await?;

    assert_eq!(
        result,
        json!({ "tok": ["cats", "sleep"], "pos": ["NN", "VV"], "ner": [] })
    );

    let requests = model.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].tasks.iter().collect::<Vec<_>>(), vec![TOK]);
    assert!(requests[0].skip_tasks.contains("dep"));
    assert_eq!(requests[0].language.as_deref(), Some("en"));
    assert!(requests[1].skip_tasks.is_empty());
    assert!(requests[1].tasks.contains(POS));
    assert!(requests[2].tasks.contains(NER));
    Ok(())
}

#[tokio::test]
async fn tok_omitted_when_other_tasks_requested() -> anyhow::Result<()> {
    let model = Arc::new(ScriptedModel::new().output(POS, json!(["NN"])));
    let h = harness(&model)?;
    let caller = h.user(1)?;

    let mut request = ProcessRequest::new("cats");
    request.tasks = vec![POS.into()];
    let result = h.orchestrator.process_text(&caller, request).await?;
    assert_eq!(result, json!({ "pos": ["NN"] }));
    Ok(())
}

#[tokio::test]
async fn lexical_model_end_to_end() -> anyhow::Result<()> {
    let h = Harness::new(Arc::new(LexicalModel::new()?))?;
    let caller = h.user(3)?;

    let mut request = ProcessRequest::new("我爱北京，Beijing!");
    request.tasks = vec![TOK.into(), POS.into()];
    let result = h.orchestrator.process_text(&caller, request).await?;

    // "我" and the punctuation are base stopwords; pos tags the unfiltered tokens.
    assert_eq!(result["tok"], json!(["爱", "北", "京", "Beijing"]));
    assert_eq!(result["pos"], json!(["HAN", "HAN", "HAN", "HAN", "PUNCT", "ALPHA", "PUNCT"]));
    Ok(())
}

#[tokio::test]
async fn blank_text_is_rejected_before_submission() -> anyhow::Result<()> {
    let model = scripted();
    let h = harness(&model)?;
    let caller = h.user(1)?;

    let err = h.orchestrator.process_text(&caller, ProcessRequest::new("  ")).await.err();
    assert_eq!(err, Some(ApiError::bad_request("Missing \"text\" parameter")));
    assert_eq!(model.calls(), 0);
    assert_eq!(h.orchestrator.engine_stats().tracked, 0);
    assert_eq!(usage(&h, &caller.token)?, (0, 0));
    Ok(())
}

#[tokio::test]
async fn model_failure_is_processing_error() -> anyhow::Result<()> {
    let model = Arc::new(ScriptedModel::new().fail("model exploded"));
    let h = harness(&model)?;
    let caller = h.user(1)?;

    let err = h
        .orchestrator
        .process_text(&caller, ProcessRequest::new("boom"))
        .await
        .err()
        .ok_or_else(|| anyhow::anyhow!("expected failure"))?;
    assert_eq!(err.code, ErrorCode::ProcessingError);
    assert!(err.message.starts_with("Processing error: "), "{}", err.message);
    assert!(err.message.contains("model exploded"), "{}", err.message);
    assert_eq!(usage(&h, &caller.token)?, (0, 0));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_model_times_out() -> anyhow::Result<()> {
    let model = Arc::new(ScriptedModel::new().delay(Duration::from_millis(600)));
    let config = EngineConfig { task_timeout: Duration::from_millis(150), ..test_engine_config() };
    let h = Harness::with_engine(Arc::clone(&model) as Arc<dyn Model>, config)?;
    let caller = h.user(1)?;

    let started = Instant::now();
    let err = h.orchestrator.process_text(&caller, ProcessRequest::new("slow words")).await.err();
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(
        err,
        Some(ApiError::new(
            ErrorCode::ProcessingTimeout,
            "Request timeout: Processing took too long"
        ))
    );

    // The model call still runs to completion and is metered.
    wait_for_usage(&h, &caller.token, (1, 10)).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn usage_not_recorded_when_revoked_mid_flight() -> anyhow::Result<()> {
    let model = Arc::new(ScriptedModel::new().delay(Duration::from_millis(200)));
    let h = harness(&model)?;
    let caller = h.user(1)?;

    let orchestrator = Arc::clone(&h.orchestrator);
    let in_flight = {
        let caller = caller.clone();
        tokio::spawn(async move {
            orchestrator.process_text(&caller, ProcessRequest::new("late words")).await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.orchestrator.invalidate_token(&caller.token)?;

    let result = in_flight.await??;
    assert_eq!(result["tok"], json!(["late", "words"]));
    assert_eq!(usage(&h, &caller.token)?, (0, 0));
    Ok(())
}

#[tokio::test]
async fn full_queue_is_busy() -> anyhow::Result<()> {
    let model = Arc::new(ScriptedModel::new().delay(Duration::from_millis(300)));
    let config = EngineConfig { workers: 1, queue_capacity: Some(1), ..test_engine_config() };
    let h = Harness::with_engine(Arc::clone(&model) as Arc<dyn Model>, config)?;
    let caller = h.user(1)?;

    let mut pending = Vec::new();
    for _ in 0..2 {
        let orchestrator = Arc::clone(&h.orchestrator);
        let caller = caller.clone();
        pending.push(tokio::spawn(async move {
            orchestrator.process_text(&caller, ProcessRequest::new("hold the worker")).await
        }));
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let err = h.orchestrator.process_text(&caller, ProcessRequest::new("one more")).await.err();
    assert_eq!(err.map(|e| e.code), Some(ErrorCode::Busy));

    for task in pending {
        task.await??;
    }
    Ok(())
}

// -- word_frequency --

#[tokio::test]
async fn word_frequency_single_word_five_times() -> anyhow::Result<()> {
    let h = harness(&scripted())?;
    let caller = h.user(1)?;

    let mut request = FrequencyRequest::new("go go go go go");
    request.max_words = Some(1);
    let result = h.orchestrator.word_frequency(&caller, request).await?;

    assert_eq!(result, json!({ "word_frequency": [{ "word": "go", "count": 5 }] }));
    assert_eq!(usage(&h, &caller.token)?, (1, 14));
    Ok(())
}

#[tokio::test]
async fn word_frequency_orders_by_count_then_first_seen() -> anyhow::Result<()> {
    let h = harness(&scripted())?;
    let caller = h.user(1)?;

    let request = FrequencyRequest::new("kiwi pear the apple pear kiwi fig apple pear");
    let result = h.orchestrator.word_frequency(&caller, request).await?;

    assert_eq!(
        result["word_frequency"],
        json!([
            { "word": "pear", "count": 3 },
            { "word": "kiwi", "count": 2 },
            { "word": "apple", "count": 2 },
            { "word": "fig", "count": 1 },
        ])
    );
    Ok(())
}

#[tokio::test]
async fn word_frequency_applies_request_stopwords() -> anyhow::Result<()> {
    let h = harness(&scripted())?;
    let caller = h.user(1)?;

    let mut request = FrequencyRequest::new("a b b c");
    request.stopword = StopwordInput::One("b".into());
    let result = h.orchestrator.word_frequency(&caller, request).await?;
    // "a" is a base stopword.
    assert_eq!(result["word_frequency"], json!([{ "word": "c", "count": 1 }]));
    Ok(())
}

#[tokio::test]
async fn word_frequency_rejects_non_positive_max_words() -> anyhow::Result<()> {
    let model = scripted();
    let h = harness(&model)?;
    let caller = h.user(1)?;

    for max_words in [0, -3] {
        let mut request = FrequencyRequest::new("words here");
        request.max_words = Some(max_words);
        let err = h.orchestrator.word_frequency(&caller, request).await.err();
        assert_eq!(err, Some(ApiError::bad_request("max_words must be a positive integer")));
    }
    assert_eq!(model.calls(), 0);
    Ok(())
}

// -- token administration --

#[tokio::test]
async fn owner_42_reissue_scenario() -> anyhow::Result<()> {
    let h = harness(&scripted())?;

    let first = h.orchestrator.issue_token(42, false)?;
    assert!(!first.reissued);
    assert_eq!(first.message, "Token issued successfully");

    let second = h.orchestrator.issue_token(42, false)?;
    assert!(second.reissued);
    assert_ne!(first.token, second.token);

    assert!(!h.store.is_valid_token(&first.token)?);
    assert!(h.store.is_valid_token(&second.token)?);

    let history = h.orchestrator.owner_tokens(42)?;
    let tokens: Vec<&str> = history.iter().map(|t| t.token.as_str()).collect();
    assert_eq!(tokens, vec![second.token.as_str(), first.token.as_str()]);
    Ok(())
}

#[tokio::test]
async fn issued_admin_token_grants_admin_access() -> anyhow::Result<()> {
    let h = harness(&scripted())?;
    let issued = h.orchestrator.issue_token(9, true)?;
    let caller = h.orchestrator.authenticate(Some(&issued.token), Access::Admin)?;
    assert!(caller.is_admin);
    Ok(())
}

#[tokio::test]
async fn issue_rejects_non_positive_owner() -> anyhow::Result<()> {
    let h = harness(&scripted())?;
    crate::assert_err_contains!(h.orchestrator.issue_token(0, false), "user_id");
    crate::assert_err_contains!(h.orchestrator.issue_token(-5, false), "user_id");
    Ok(())
}

#[test]
fn generated_tokens_are_prefixed_and_url_safe() {
    let a = generate_token();
    let b = generate_token();
    assert_ne!(a, b);
    assert!(a.starts_with(TOKEN_PREFIX));
    // 32 bytes -> 43 base64 characters without padding.
    assert_eq!(a.len(), TOKEN_PREFIX.len() + 43);
    assert!(a[TOKEN_PREFIX.len()..]
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
}

#[tokio::test]
async fn delete_and_invalidate() -> anyhow::Result<()> {
    let h = harness(&scripted())?;
    let token = h.issue(5)?;

    h.orchestrator.invalidate_token(&token)?;
    assert!(!h.store.is_valid_token(&token)?);

    h.orchestrator.delete_token(&token)?;
    assert!(h.store.token_info(&token)?.is_none());

    let err = h.orchestrator.delete_token(&token).err();
    assert_eq!(err, Some(ApiError::new(ErrorCode::Internal, "Failed to delete token")));
    let err = h.orchestrator.invalidate_token(&token).err();
    assert_eq!(err.map(|e| e.code), Some(ErrorCode::NotFound));
    let err = h.orchestrator.delete_token(" ").err();
    assert_eq!(err, Some(ApiError::bad_request("Missing \"token\" parameter")));
    Ok(())
}

#[tokio::test]
async fn usage_stats_busiest_first() -> anyhow::Result<()> {
    let h = harness(&scripted())?;
    let quiet = h.user(1)?;
    let busy = h.user(2)?;

    h.orchestrator.process_text(&busy, ProcessRequest::new("one")).await?;
    h.orchestrator.process_text(&busy, ProcessRequest::new("two")).await?;
    h.orchestrator.process_text(&quiet, ProcessRequest::new("three")).await?;

    let stats = h.orchestrator.usage_stats()?;
    assert_eq!(stats[0].token, busy.token);
    assert_eq!(stats[0].usage_count, 2);
    assert_eq!(stats[1].token, quiet.token);
    Ok(())
}

#[tokio::test]
async fn ensure_admin_token_is_idempotent() -> anyhow::Result<()> {
    let h = harness(&scripted())?;
    h.orchestrator.ensure_admin_token(ADMIN_TOKEN)?;
    let admins: Vec<Token> = h.orchestrator.owner_tokens(ADMIN_OWNER_ID)?;
    assert_eq!(admins.len(), 1);
    assert!(admins[0].is_admin);
    Ok(())
}
