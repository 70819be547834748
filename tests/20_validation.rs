mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::{json, Value};

#[tokio::test]
async fn missing_required_field_reports_field_errors() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let token = common::mint_token(server, "val-user", None).await?;

    // Document create requires a `data` object
    let resp = client
        .post(server.url("/api/firebase/firestore/collections/notes/documents"))
        .bearer_auth(&token)
        .json(&json!({ "id": "n1" }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body: Value = resp.json().await?;
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"]["type"], json!("VALIDATION_ERROR"));
    let field_errors = body["error"]["field_errors"].as_array().unwrap();
    assert!(field_errors.iter().any(|e| e["field"] == json!("data")));
    Ok(())
}

#[tokio::test]
async fn wrong_type_reports_the_offending_field() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();

    let resp = client
        .post(server.url("/api/firebase/auth/verify-token"))
        .json(&json!({ "idToken": 12345 }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body: Value = resp.json().await?;
    let field_errors = body["error"]["field_errors"].as_array().unwrap();
    assert_eq!(field_errors[0]["field"], json!("idToken"));
    assert_eq!(field_errors[0]["rule"], json!("type"));
    Ok(())
}

#[tokio::test]
async fn string_payloads_are_sanitized_before_storage() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let token = common::mint_token(server, "san-user", None).await?;

    let resp = client
        .post(server.url("/api/firebase/firestore/collections/sanitized/documents"))
        .bearer_auth(&token)
        .json(&json!({
            "id": "s1",
            "data": {
                "title": "<script>alert(1)</script>",
                "link": "javascript:alert(1)",
                "bad.key": "x",
            }
        }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let body: Value = resp.json().await?;
    let data = &body["data"]["data"];
    let title = data["title"].as_str().unwrap();
    assert!(!title.contains('<') && !title.contains('>'));
    let link = data["link"].as_str().unwrap();
    assert!(!link.to_lowercase().starts_with("javascript:"));
    // Path-separator characters in keys are rewritten, not dropped
    assert_eq!(data["bad_key"], json!("x"));
    Ok(())
}

#[tokio::test]
async fn unknown_fields_are_stripped() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();

    let token = common::mint_token(server, "strip-user", None).await?;
    let resp = client
        .post(server.url("/api/firebase/auth/verify-token"))
        .json(&json!({ "idToken": token, "rogue": "field" }))
        .send()
        .await?;
    // The rogue field is stripped by the schema, not rejected
    assert_eq!(resp.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn invalid_path_parameters_are_rejected() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let token = common::mint_token(server, "path-user", None).await?;

    let resp = client
        .post(server.url("/api/firebase/firestore/collections/bad%24name/documents"))
        .bearer_auth(&token)
        .json(&json!({ "data": { "x": 1 } }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body: Value = resp.json().await?;
    assert_eq!(body["error"]["type"], json!("VALIDATION_ERROR"));
    Ok(())
}
