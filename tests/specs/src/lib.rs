// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `textgate` binary as a subprocess and exercises it over HTTP.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

pub use textgate::model::remote::ensure_crypto;

/// Admin token every spawned process is started with.
pub const ADMIN_TOKEN: &str = "spec-admin-token";

/// Resolve the path to the compiled `textgate` binary.
pub fn textgate_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("textgate")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Run the binary with `args` to completion and return its exit code.
pub fn run_to_exit(args: &[&str]) -> anyhow::Result<Option<i32>> {
    let binary = textgate_binary();
    anyhow::ensure!(binary.exists(), "textgate binary not found at {}", binary.display());
    let status = Command::new(&binary)
        .args(args)
        .env_clear()
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    Ok(status.code())
}

/// A running `textgate` process that is killed on drop.
pub struct TextgateProcess {
    child: Child,
    port: u16,
    _db_dir: tempfile::TempDir,
}

impl TextgateProcess {
    /// Spawn textgate on a free port with a throwaway database.
    pub fn start(extra: &[&str]) -> anyhow::Result<Self> {
        ensure_crypto();
        let binary = textgate_binary();
        anyhow::ensure!(binary.exists(), "textgate binary not found at {}", binary.display());

        let port = free_port()?;
        let db_dir = tempfile::tempdir()?;
        let db_path = db_dir.path().join("tokens.db");

        let mut args: Vec<String> = vec![
            "--host".into(),
            "127.0.0.1".into(),
            "--port".into(),
            port.to_string(),
            "--db-path".into(),
            db_path.to_string_lossy().into_owned(),
            "--admin-token".into(),
            ADMIN_TOKEN.into(),
            "--workers".into(),
            "2".into(),
            "--log-level".into(),
            "warn".into(),
        ];
        args.extend(extra.iter().map(|s| s.to_string()));

        let child = Command::new(&binary)
            .args(&args)
            .env_clear()
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(Self { child, port, _db_dir: db_dir })
    }

    /// Base URL for HTTP requests.
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Poll `/health` until responsive.
    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let client = reqwest::Client::new();
        let url = format!("{}/health", self.base_url());
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("textgate did not become healthy within {timeout:?}");
            }
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// POST `body` to `path` with an optional bearer token.
    pub async fn post(
        &self,
        path: &str,
        token: Option<&str>,
        body: &serde_json::Value,
    ) -> anyhow::Result<(u16, serde_json::Value)> {
        let mut req = reqwest::Client::new().post(format!("{}{path}", self.base_url())).json(body);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        let status = resp.status().as_u16();
        Ok((status, resp.json().await?))
    }
}

impl Drop for TextgateProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
