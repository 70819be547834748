mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::{json, Value};

#[tokio::test]
async fn sixth_request_in_the_window_is_429_with_retry_after() -> Result<()> {
    let server = common::spawn_server(&[
        ("API_ENABLE_RATE_LIMITING", "true"),
        ("API_RATE_LIMIT_REQUESTS", "5"),
        ("API_RATE_LIMIT_WINDOW_SECS", "60"),
    ])
    .await?;
    let client = reqwest::Client::new();

    // Readiness probing already consumed part of the budget; count what is
    // left until the limiter trips instead of assuming a fresh window
    let mut admitted = 0;
    let mut limited: Option<Value> = None;
    for _ in 0..10 {
        let resp = client.get(server.url("/api")).send().await?;
        match resp.status() {
            StatusCode::OK => admitted += 1,
            StatusCode::TOO_MANY_REQUESTS => {
                limited = Some(resp.json().await?);
                break;
            }
            other => anyhow::bail!("unexpected status {}", other),
        }
    }

    let body = limited.expect("limiter never tripped");
    assert!(admitted <= 5, "admitted {} requests past the limit", admitted);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"]["type"], json!("RATE_LIMIT_ERROR"));
    assert_eq!(body["error"]["code"], json!("RATE_LIMITED"));
    let retry_after = body["error"]["retryAfter"].as_u64().unwrap();
    assert!(retry_after >= 1 && retry_after <= 60);
    Ok(())
}

#[tokio::test]
async fn verified_callers_are_limited_independently_of_anonymous_traffic() -> Result<()> {
    let server = common::spawn_server(&[
        ("API_ENABLE_RATE_LIMITING", "true"),
        ("API_RATE_LIMIT_REQUESTS", "5"),
        ("API_RATE_LIMIT_WINDOW_SECS", "60"),
    ])
    .await?;
    let client = reqwest::Client::new();

    let token = common::mint_token(&server, "limited-user", None).await?;

    // Exhaust the verified caller's budget on an authed route
    let mut last_status = StatusCode::OK;
    for _ in 0..7 {
        let resp = client
            .get(server.url("/api/firebase/auth/profile"))
            .bearer_auth(&token)
            .send()
            .await?;
        last_status = resp.status();
    }
    assert_eq!(last_status, StatusCode::TOO_MANY_REQUESTS);

    // A different identity still gets through: the key is per caller
    let other = common::mint_token(&server, "other-user", None).await?;
    let resp = client
        .get(server.url("/api/firebase/auth/profile"))
        .bearer_auth(&other)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    Ok(())
}
