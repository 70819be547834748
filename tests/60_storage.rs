mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::{json, Value};

#[tokio::test]
async fn upload_download_round_trip_with_metadata() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let token = common::mint_token(server, "file-user", None).await?;

    let payload = b"hello blob".to_vec();
    let resp = client
        .post(server.url("/api/firebase/storage/upload?path=docs/hello.txt"))
        .bearer_auth(&token)
        .header("content-type", "text/plain")
        .body(payload.clone())
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let body: Value = resp.json().await?;
    assert_eq!(body["data"]["file"]["size"], json!(payload.len()));
    assert!(body["data"]["transfer"]["bytes_per_sec"].is_u64());

    let resp = client
        .get(server.url("/api/firebase/storage/metadata/docs/hello.txt"))
        .bearer_auth(&token)
        .send()
        .await?;
    let body: Value = resp.json().await?;
    assert_eq!(body["data"]["content_type"], json!("text/plain"));
    assert!(body["data"]["sha256"].is_string());

    let resp = client
        .get(server.url("/api/firebase/storage/files/docs/hello.txt"))
        .bearer_auth(&token)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.bytes().await?.to_vec(), payload);
    Ok(())
}

#[tokio::test]
async fn signed_url_is_time_boxed() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let token = common::mint_token(server, "sign-user", None).await?;

    client
        .post(server.url("/api/firebase/storage/upload?path=signed/file.bin"))
        .bearer_auth(&token)
        .body(vec![1u8, 2, 3])
        .send()
        .await?;

    let resp = client
        .get(server.url("/api/firebase/storage/signed-url/signed/file.bin?expires=120"))
        .bearer_auth(&token)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = resp.json().await?;
    let url = body["data"]["url"].as_str().unwrap();
    assert!(url.contains("Expires="));
    assert_eq!(body["data"]["expiresInSecs"], json!(120));
    Ok(())
}

#[tokio::test]
async fn list_is_prefix_scoped() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let token = common::mint_token(server, "list-user", None).await?;

    for name in ["scoped/a.txt", "scoped/b.txt", "elsewhere/c.txt"] {
        client
            .post(server.url(&format!("/api/firebase/storage/upload?path={}", name)))
            .bearer_auth(&token)
            .body(vec![0u8])
            .send()
            .await?;
    }

    let resp = client
        .get(server.url("/api/firebase/storage/list?prefix=scoped/"))
        .bearer_auth(&token)
        .send()
        .await?;
    let body: Value = resp.json().await?;
    let paths: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["path"].as_str().unwrap())
        .collect();
    assert_eq!(paths, vec!["scoped/a.txt", "scoped/b.txt"]);
    Ok(())
}

#[tokio::test]
async fn delete_then_download_is_404() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let token = common::mint_token(server, "del-user", None).await?;

    client
        .post(server.url("/api/firebase/storage/upload?path=temp/gone.txt"))
        .bearer_auth(&token)
        .body(vec![9u8])
        .send()
        .await?;

    let resp = client
        .delete(server.url("/api/firebase/storage/files/temp/gone.txt"))
        .bearer_auth(&token)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = client
        .get(server.url("/api/firebase/storage/files/temp/gone.txt"))
        .bearer_auth(&token)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn ownership_gate_fences_the_user_area() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let owner = common::mint_token(server, "owner-1", None).await?;
    let intruder = common::mint_token(server, "intruder-1", None).await?;

    let resp = client
        .put(server.url("/api/firebase/storage/users/owner-1/files/notes.txt"))
        .bearer_auth(&owner)
        .body(b"mine".to_vec())
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::CREATED);

    // Someone else's uid in the path is a 403, not a 404
    let resp = client
        .get(server.url("/api/firebase/storage/users/owner-1/files/notes.txt"))
        .bearer_auth(&intruder)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = resp.json().await?;
    assert_eq!(body["error"]["code"], json!("OWNERSHIP_REQUIRED"));

    let resp = client
        .get(server.url("/api/firebase/storage/users/owner-1/files/notes.txt"))
        .bearer_auth(&owner)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.bytes().await?.to_vec(), b"mine".to_vec());
    Ok(())
}
