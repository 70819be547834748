use std::process::{Child, Command, Stdio};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde_json::Value;

static SERVER: OnceLock<TestServer> = OnceLock::new();

pub struct TestServer {
    pub base_url: String,
    child: Child,
}

impl TestServer {
    /// Spawn the already-built binary against the in-process memory backend.
    /// Assumes debug profile; adjust if you run tests with --release.
    fn spawn(extra_env: &[(&str, &str)]) -> Result<Self> {
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let base_url = format!("http://127.0.0.1:{}", port);

        let mut cmd = Command::new("target/debug/firegate-api");
        cmd.env("PORT", port.to_string())
            .env("FIREGATE_BACKEND", "memory")
            .env("APP_ENV", "development")
            .env("API_ENABLE_RATE_LIMITING", "false")
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        for (key, value) in extra_env {
            cmd.env(key, value);
        }

        let child = cmd.spawn().context("failed to spawn server binary")?;
        Ok(Self { base_url, child })
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let client = reqwest::Client::new();
        let deadline = Instant::now() + timeout;
        loop {
            if Instant::now() > deadline {
                break;
            }
            let url = format!("{}/", self.base_url);
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status() == StatusCode::OK {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        anyhow::bail!(
            "server did not become ready on {} within {:?}",
            self.base_url,
            timeout
        )
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
    }
}

/// Shared server for the default configuration; spawned once per test binary.
#[allow(dead_code)]
pub async fn ensure_server() -> Result<&'static TestServer> {
    let server =
        SERVER.get_or_init(|| TestServer::spawn(&[]).expect("failed to spawn server binary"));
    server.wait_ready(Duration::from_secs(10)).await?;
    Ok(server)
}

/// Dedicated server with custom environment, for tests that need their own
/// configuration (rate limiting and the like).
#[allow(dead_code)]
pub async fn spawn_server(extra_env: &[(&str, &str)]) -> Result<TestServer> {
    let server = TestServer::spawn(extra_env)?;
    server.wait_ready(Duration::from_secs(10)).await?;
    Ok(server)
}

/// Mint a memory-backend sign-in token for `uid`, optionally carrying
/// claims that the role and permission gates will read back.
#[allow(dead_code)]
pub async fn mint_token(server: &TestServer, uid: &str, claims: Option<Value>) -> Result<String> {
    let client = reqwest::Client::new();
    let mut body = serde_json::json!({ "uid": uid });
    if let Some(claims) = claims {
        body["additionalClaims"] = claims;
    }
    let resp = client
        .post(server.url("/api/firebase/auth/custom-token"))
        .json(&body)
        .send()
        .await?;
    anyhow::ensure!(
        resp.status() == StatusCode::OK,
        "custom-token failed: {}",
        resp.status()
    );
    let body: Value = resp.json().await?;
    body["data"]["token"]
        .as_str()
        .map(str::to_string)
        .context("no token in response")
}
