mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::{json, Value};

async fn auth_token(server: &common::TestServer) -> Result<String> {
    common::mint_token(server, "rt-user", None).await
}

#[tokio::test]
async fn point_write_read_merge_and_delete() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let token = auth_token(server).await?;

    let resp = client
        .put(server.url("/api/firebase/realtime/data/rooms/lobby"))
        .bearer_auth(&token)
        .json(&json!({ "topic": "hello", "count": 1 }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);

    // Shallow merge keeps siblings
    let resp = client
        .patch(server.url("/api/firebase/realtime/data/rooms/lobby"))
        .bearer_auth(&token)
        .json(&json!({ "count": 2 }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = client
        .get(server.url("/api/firebase/realtime/data/rooms/lobby"))
        .bearer_auth(&token)
        .send()
        .await?;
    let body: Value = resp.json().await?;
    assert_eq!(body["data"]["topic"], json!("hello"));
    assert_eq!(body["data"]["count"], json!(2));
    assert!(body["timing"]["ms"].is_u64());

    let resp = client
        .delete(server.url("/api/firebase/realtime/data/rooms/lobby"))
        .bearer_auth(&token)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = client
        .get(server.url("/api/firebase/realtime/data/rooms/lobby"))
        .bearer_auth(&token)
        .send()
        .await?;
    let body: Value = resp.json().await?;
    assert_eq!(body["data"], Value::Null);
    Ok(())
}

#[tokio::test]
async fn query_orders_by_child_and_limits() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let token = auth_token(server).await?;

    for (name, priority) in [("a", 3), ("b", 1), ("c", 2)] {
        client
            .put(server.url(&format!("/api/firebase/realtime/data/tasks/{}", name)))
            .bearer_auth(&token)
            .json(&json!({ "priority": priority }))
            .send()
            .await?;
    }

    let resp = client
        .post(server.url("/api/firebase/realtime/query/tasks"))
        .bearer_auth(&token)
        .json(&json!({ "order_by": "child", "child": "priority", "limit_to_first": 2 }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = resp.json().await?;
    let result = body["data"].as_object().unwrap();
    assert_eq!(result.len(), 2);
    assert!(result.contains_key("b") && result.contains_key("c"));
    Ok(())
}

#[tokio::test]
async fn transaction_increments_atomically() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let token = auth_token(server).await?;

    client
        .put(server.url("/api/firebase/realtime/data/counters/hits"))
        .bearer_auth(&token)
        .json(&json!(5))
        .send()
        .await?;

    let resp = client
        .post(server.url("/api/firebase/realtime/transaction/counters/hits"))
        .bearer_auth(&token)
        .json(&json!({ "increment": 3 }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = resp.json().await?;
    assert_eq!(body["data"].as_f64(), Some(8.0));
    Ok(())
}

#[tokio::test]
async fn compare_and_swap_rejects_a_stale_precondition() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let token = auth_token(server).await?;

    client
        .put(server.url("/api/firebase/realtime/data/locks/seat"))
        .bearer_auth(&token)
        .json(&json!("free"))
        .send()
        .await?;

    // Wrong expectation: the write must not land
    let resp = client
        .post(server.url("/api/firebase/realtime/transaction/locks/seat"))
        .bearer_auth(&token)
        .json(&json!({ "value": "taken", "expected": "reserved" }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client
        .get(server.url("/api/firebase/realtime/data/locks/seat"))
        .bearer_auth(&token)
        .send()
        .await?;
    let body: Value = resp.json().await?;
    assert_eq!(body["data"], json!("free"));

    // Matching expectation commits
    let resp = client
        .post(server.url("/api/firebase/realtime/transaction/locks/seat"))
        .bearer_auth(&token)
        .json(&json!({ "value": "taken", "expected": "free" }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await?;
    assert_eq!(body["data"], json!("taken"));
    Ok(())
}

#[tokio::test]
async fn invalid_path_characters_are_rejected() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let token = auth_token(server).await?;

    let resp = client
        .get(server.url("/api/firebase/realtime/data/rooms/bad%24key"))
        .bearer_auth(&token)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await?;
    assert_eq!(body["error"]["type"], json!("VALIDATION_ERROR"));
    Ok(())
}
