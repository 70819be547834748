mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::{json, Value};

async fn auth_token(server: &common::TestServer) -> Result<String> {
    common::mint_token(server, "doc-user", None).await
}

#[tokio::test]
async fn create_stamps_system_fields_and_round_trips() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let token = auth_token(server).await?;

    let resp = client
        .post(server.url("/api/firebase/firestore/collections/articles/documents"))
        .bearer_auth(&token)
        .json(&json!({ "id": "a1", "data": { "title": "hello", "views": 1 } }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let body: Value = resp.json().await?;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["id"], json!("a1"));
    assert_eq!(body["data"]["data"]["title"], json!("hello"));
    assert!(body["data"]["data"]["createdAt"].is_string());
    assert!(body["data"]["data"]["updatedAt"].is_string());
    assert_eq!(body["data"]["data"]["createdBy"], json!("doc-user"));

    let resp = client
        .get(server.url("/api/firebase/firestore/collections/articles/documents/a1"))
        .bearer_auth(&token)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await?;
    assert_eq!(body["data"]["data"]["views"], json!(1));
    Ok(())
}

#[tokio::test]
async fn merge_update_keeps_untouched_fields() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let token = auth_token(server).await?;

    client
        .post(server.url("/api/firebase/firestore/collections/merge-test/documents"))
        .bearer_auth(&token)
        .json(&json!({ "id": "m1", "data": { "keep": "yes", "change": "old" } }))
        .send()
        .await?;

    let resp = client
        .put(server.url("/api/firebase/firestore/collections/merge-test/documents/m1"))
        .bearer_auth(&token)
        .json(&json!({ "data": { "change": "new" }, "merge": true }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = resp.json().await?;
    assert_eq!(body["data"]["data"]["keep"], json!("yes"));
    assert_eq!(body["data"]["data"]["change"], json!("new"));
    Ok(())
}

#[tokio::test]
async fn soft_delete_hides_the_document_and_repeats_as_404() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let token = auth_token(server).await?;

    client
        .post(server.url("/api/firebase/firestore/collections/soft/documents"))
        .bearer_auth(&token)
        .json(&json!({ "id": "s1", "data": { "x": 1 } }))
        .send()
        .await?;

    let resp = client
        .delete(server.url("/api/firebase/firestore/collections/soft/documents/s1"))
        .bearer_auth(&token)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);

    // Reads and repeated deletes now see an absent document
    let resp = client
        .get(server.url("/api/firebase/firestore/collections/soft/documents/s1"))
        .bearer_auth(&token)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = resp.json().await?;
    assert_eq!(body["error"]["type"], json!("RESOURCE_ERROR"));

    let resp = client
        .delete(server.url("/api/firebase/firestore/collections/soft/documents/s1"))
        .bearer_auth(&token)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn hard_delete_removes_the_document() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let token = auth_token(server).await?;

    client
        .post(server.url("/api/firebase/firestore/collections/hard/documents"))
        .bearer_auth(&token)
        .json(&json!({ "id": "h1", "data": { "x": 1 } }))
        .send()
        .await?;

    let resp = client
        .delete(server.url("/api/firebase/firestore/collections/hard/documents/h1?hard=true"))
        .bearer_auth(&token)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = client
        .delete(server.url("/api/firebase/firestore/collections/hard/documents/h1?hard=true"))
        .bearer_auth(&token)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn query_filters_and_orders() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let token = auth_token(server).await?;

    for (id, score) in [("q1", 10), ("q2", 30), ("q3", 20)] {
        client
            .post(server.url("/api/firebase/firestore/collections/scores/documents"))
            .bearer_auth(&token)
            .json(&json!({ "id": id, "data": { "score": score } }))
            .send()
            .await?;
    }

    let resp = client
        .post(server.url("/api/firebase/firestore/collections/scores/query"))
        .bearer_auth(&token)
        .json(&json!({
            "filters": [{ "field": "score", "op": "gte", "value": 15 }],
            "order_by": { "field": "score", "direction": "desc" },
        }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = resp.json().await?;
    let docs = body["data"].as_array().unwrap();
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0]["id"], json!("q2"));
    assert_eq!(docs[1]["id"], json!("q3"));
    Ok(())
}

#[tokio::test]
async fn prefix_search_matches_only_the_prefix() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let token = auth_token(server).await?;

    for (id, name) in [("p1", "apple"), ("p2", "apricot"), ("p3", "banana")] {
        client
            .post(server.url("/api/firebase/firestore/collections/fruit/documents"))
            .bearer_auth(&token)
            .json(&json!({ "id": id, "data": { "name": name } }))
            .send()
            .await?;
    }

    let resp = client
        .get(server.url("/api/firebase/firestore/collections/fruit/search?field=name&prefix=ap"))
        .bearer_auth(&token)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = resp.json().await?;
    let names: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["data"]["name"].as_str().unwrap())
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"apple") && names.contains(&"apricot"));
    Ok(())
}

#[tokio::test]
async fn array_union_is_idempotent_and_increment_accumulates() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let token = auth_token(server).await?;

    client
        .post(server.url("/api/firebase/firestore/collections/mutate/documents"))
        .bearer_auth(&token)
        .json(&json!({ "id": "m1", "data": { "tags": ["a"], "count": 1 } }))
        .send()
        .await?;

    for _ in 0..2 {
        let resp = client
            .post(server.url(
                "/api/firebase/firestore/collections/mutate/documents/m1/array-union",
            ))
            .bearer_auth(&token)
            .json(&json!({ "field": "tags", "values": ["b"] }))
            .send()
            .await?;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let resp = client
        .post(server.url("/api/firebase/firestore/collections/mutate/documents/m1/increment"))
        .bearer_auth(&token)
        .json(&json!({ "field": "count", "by": 4 }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = client
        .get(server.url("/api/firebase/firestore/collections/mutate/documents/m1"))
        .bearer_auth(&token)
        .send()
        .await?;
    let body: Value = resp.json().await?;
    assert_eq!(body["data"]["data"]["tags"], json!(["a", "b"]));
    assert_eq!(body["data"]["data"]["count"], json!(5));
    Ok(())
}

#[tokio::test]
async fn batch_reports_per_operation_outcomes() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();
    let token = auth_token(server).await?;

    let resp = client
        .post(server.url("/api/firebase/firestore/batch"))
        .bearer_auth(&token)
        .json(&json!({
            "collection": "batched",
            "operations": [
                { "op": "create", "id": "b1", "data": { "n": 1 } },
                { "op": "create", "id": "b2", "data": { "n": 2 } },
                { "op": "delete", "id": "no-such-doc" },
            ]
        }))
        .send()
        .await?;
    // Batch always answers 200; the envelope carries the summary
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = resp.json().await?;
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["meta"]["summary"]["total"], json!(3));
    assert_eq!(body["meta"]["summary"]["successful"], json!(2));
    assert_eq!(body["meta"]["summary"]["failed"], json!(1));

    let outcomes = body["data"].as_array().unwrap();
    assert_eq!(outcomes[0]["success"], json!(true));
    assert_eq!(outcomes[2]["success"], json!(false));
    assert!(outcomes[2]["error"].is_string());
    Ok(())
}
