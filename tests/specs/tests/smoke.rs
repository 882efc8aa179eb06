// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `textgate` binary with the
//! built-in lexical model.

use std::time::Duration;

use serde_json::json;

use textgate_specs::{run_to_exit, TextgateProcess, ADMIN_TOKEN};

const TIMEOUT: Duration = Duration::from_secs(10);

async fn issue(server: &TextgateProcess, user_id: i64) -> anyhow::Result<String> {
    let (status, body) =
        server.post("/token/request", Some(ADMIN_TOKEN), &json!({ "user_id": user_id })).await?;
    anyhow::ensure!(status == 200, "token request failed: {status} {body}");
    body["token"].as_str().map(str::to_owned).ok_or_else(|| anyhow::anyhow!("no token in {body}"))
}

// -- Health -------------------------------------------------------------------

#[tokio::test]
async fn health_reports_workers() -> anyhow::Result<()> {
    let server = TextgateProcess::start(&[])?;
    server.wait_healthy(TIMEOUT).await?;

    let resp: serde_json::Value =
        reqwest::get(format!("{}/health", server.base_url())).await?.json().await?;
    assert_eq!(resp["status"], "running");
    assert_eq!(resp["workers"], 2);

    Ok(())
}

// -- Text processing ----------------------------------------------------------

#[tokio::test]
async fn tokenize_mixed_script() -> anyhow::Result<()> {
    let server = TextgateProcess::start(&[])?;
    server.wait_healthy(TIMEOUT).await?;
    let token = issue(&server, 7).await?;

    let (status, body) =
        server.post("/tokenize", Some(&token), &json!({ "text": "我爱北京 hello, world" })).await?;
    assert_eq!(status, 200, "body: {body}");
    assert_eq!(body["tok"], json!(["爱", "北", "京", "hello", "world"]));

    let (status, body) = server
        .post("/tokenize", Some(&token), &json!({ "text": "北京 2026", "tasks": ["pos"] }))
        .await?;
    assert_eq!(status, 200, "body: {body}");
    assert!(body.get("tok").is_none());
    assert_eq!(body["pos"], json!(["HAN", "HAN", "NUM"]));

    Ok(())
}

#[tokio::test]
async fn word_frequency_end_to_end() -> anyhow::Result<()> {
    let server = TextgateProcess::start(&[])?;
    server.wait_healthy(TIMEOUT).await?;
    let token = issue(&server, 8).await?;

    let (status, body) = server
        .post("/word-frequency", Some(&token), &json!({ "text": "rust rust go rust go zig" }))
        .await?;
    assert_eq!(status, 200, "body: {body}");
    assert_eq!(
        body["word_frequency"],
        json!([
            { "word": "rust", "count": 3 },
            { "word": "go", "count": 2 },
            { "word": "zig", "count": 1 },
        ])
    );

    Ok(())
}

// -- Tokens -------------------------------------------------------------------

#[tokio::test]
async fn reissue_revokes_previous_token() -> anyhow::Result<()> {
    let server = TextgateProcess::start(&[])?;
    server.wait_healthy(TIMEOUT).await?;

    let old = issue(&server, 42).await?;
    let new = issue(&server, 42).await?;
    assert_ne!(old, new);

    let (status, _) = server.post("/tokenize", Some(&old), &json!({ "text": "hi" })).await?;
    assert_eq!(status, 401);
    let (status, _) = server.post("/tokenize", Some(&new), &json!({ "text": "hi" })).await?;
    assert_eq!(status, 200);

    let (status, body) = server.post("/stats", Some(ADMIN_TOKEN), &json!({})).await?;
    assert_eq!(status, 200, "body: {body}");
    let busiest = &body["stats"][0];
    assert_eq!(busiest["token"], new.as_str());
    assert_eq!(busiest["usage_count"], 1);
    assert_eq!(busiest["char_count"], 2);

    Ok(())
}

#[tokio::test]
async fn unknown_endpoint_envelope() -> anyhow::Result<()> {
    let server = TextgateProcess::start(&[])?;
    server.wait_healthy(TIMEOUT).await?;

    let (status, body) = server.post("/nope", None, &json!({})).await?;
    assert_eq!(status, 404);
    assert_eq!(body, json!({ "error": { "code": "NOT_FOUND", "message": "Invalid endpoint" } }));

    Ok(())
}

// -- Startup ------------------------------------------------------------------

#[test]
fn invalid_config_exits_2() -> anyhow::Result<()> {
    assert_eq!(run_to_exit(&["--workers", "0"])?, Some(2));
    assert_eq!(run_to_exit(&["--model", "remote"])?, Some(2));
    Ok(())
}
