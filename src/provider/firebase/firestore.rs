//! Document capability over the Firestore REST API.
//!
//! Handles the JSON <-> Firestore typed-value translation, structured
//! queries, and commit-based field transforms.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::{map_http_error, FirebaseClient};
use crate::provider::{
    DocumentQuery, DocumentStore, FieldMutation, FilterOp, ProviderError, SortDirection,
    StoredDocument,
};

const FIRESTORE_BASE: &str = "https://firestore.googleapis.com/v1";

pub struct Firestore {
    client: Arc<FirebaseClient>,
}

impl Firestore {
    pub fn new(client: Arc<FirebaseClient>) -> Self {
        Self { client }
    }

    fn parent(&self) -> String {
        format!(
            "projects/{}/databases/(default)/documents",
            self.client.project_id
        )
    }

    fn doc_name(&self, collection: &str, id: &str) -> String {
        format!("{}/{}/{}", self.parent(), collection, id)
    }

    async fn request(
        &self,
        method: reqwest::Method,
        url: String,
        body: Option<Value>,
        context: &str,
    ) -> Result<Value, ProviderError> {
        let token = self.client.access_token().await?;
        let mut request = self.client.http.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(map_http_error(status, &text, context));
        }
        if text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| ProviderError::Unavailable(e.to_string()))
    }
}

/// JSON value -> Firestore typed value
fn to_fs_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                json!({ "integerValue": i.to_string() })
            } else {
                json!({ "doubleValue": n.as_f64() })
            }
        }
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(to_fs_value).collect::<Vec<_>>() }
        }),
        Value::Object(map) => json!({
            "mapValue": { "fields": map.iter()
                .map(|(k, v)| (k.clone(), to_fs_value(v)))
                .collect::<Map<String, Value>>() }
        }),
    }
}

/// Firestore typed value -> JSON value
fn from_fs_value(value: &Value) -> Value {
    let obj = match value.as_object() {
        Some(o) => o,
        None => return Value::Null,
    };
    if obj.contains_key("nullValue") {
        return Value::Null;
    }
    if let Some(b) = obj.get("booleanValue") {
        return b.clone();
    }
    if let Some(i) = obj.get("integerValue").and_then(|v| v.as_str()) {
        return i.parse::<i64>().map(Value::from).unwrap_or(Value::Null);
    }
    if let Some(d) = obj.get("doubleValue") {
        return d.clone();
    }
    if let Some(s) = obj.get("stringValue") {
        return s.clone();
    }
    if let Some(t) = obj.get("timestampValue") {
        return t.clone();
    }
    if let Some(arr) = obj.get("arrayValue") {
        return Value::Array(
            arr.get("values")
                .and_then(|v| v.as_array())
                .map(|items| items.iter().map(from_fs_value).collect())
                .unwrap_or_default(),
        );
    }
    if let Some(m) = obj.get("mapValue") {
        return Value::Object(
            m.get("fields")
                .and_then(|f| f.as_object())
                .map(|fields| {
                    fields
                        .iter()
                        .map(|(k, v)| (k.clone(), from_fs_value(v)))
                        .collect()
                })
                .unwrap_or_default(),
        );
    }
    Value::Null
}

fn fields_to_fs(data: &Map<String, Value>) -> Value {
    Value::Object(
        data.iter()
            .map(|(k, v)| (k.clone(), to_fs_value(v)))
            .collect(),
    )
}

fn document_from_api(doc: &Value) -> Option<StoredDocument> {
    let name = doc.get("name")?.as_str()?;
    let id = name.rsplit('/').next()?.to_string();
    let data = doc
        .get("fields")
        .and_then(|f| f.as_object())
        .map(|fields| {
            fields
                .iter()
                .map(|(k, v)| (k.clone(), from_fs_value(v)))
                .collect()
        })
        .unwrap_or_default();
    Some(StoredDocument { id, data })
}

fn filter_op_name(op: FilterOp) -> &'static str {
    match op {
        FilterOp::Eq => "EQUAL",
        FilterOp::Ne => "NOT_EQUAL",
        FilterOp::Gt => "GREATER_THAN",
        FilterOp::Gte => "GREATER_THAN_OR_EQUAL",
        FilterOp::Lt => "LESS_THAN",
        FilterOp::Lte => "LESS_THAN_OR_EQUAL",
        FilterOp::In => "IN",
        FilterOp::ArrayContains => "ARRAY_CONTAINS",
    }
}

fn structured_query(collection: &str, query: &DocumentQuery) -> Value {
    let mut sq = json!({
        "from": [{ "collectionId": collection }],
    });

    if !query.filters.is_empty() {
        let filters: Vec<Value> = query
            .filters
            .iter()
            .map(|f| {
                json!({
                    "fieldFilter": {
                        "field": { "fieldPath": f.field },
                        "op": filter_op_name(f.op),
                        "value": to_fs_value(&f.value),
                    }
                })
            })
            .collect();
        sq["where"] = json!({
            "compositeFilter": { "op": "AND", "filters": filters }
        });
    }

    if let Some(order) = &query.order_by {
        sq["orderBy"] = json!([{
            "field": { "fieldPath": order.field },
            "direction": match order.direction {
                SortDirection::Asc => "ASCENDING",
                SortDirection::Desc => "DESCENDING",
            },
        }]);
    }

    if let Some(limit) = query.limit {
        sq["limit"] = json!(limit);
    }
    if let Some(offset) = query.offset {
        sq["offset"] = json!(offset);
    }

    sq
}

/// One commit write carrying literal `Set` fields and field transforms
/// together. A transform-only mutation stays a bare `transform` write.
fn mutation_write(doc_name: &str, mutations: &[FieldMutation]) -> Value {
    let mut set_fields = Map::new();
    let mut transforms: Vec<Value> = Vec::new();

    for mutation in mutations {
        match mutation {
            FieldMutation::Set { field, value } => {
                set_fields.insert(field.clone(), to_fs_value(value));
            }
            FieldMutation::ArrayUnion { field, values } => transforms.push(json!({
                "fieldPath": field,
                "appendMissingElements": {
                    "values": values.iter().map(to_fs_value).collect::<Vec<_>>()
                },
            })),
            FieldMutation::ArrayRemove { field, values } => transforms.push(json!({
                "fieldPath": field,
                "removeAllFromArray": {
                    "values": values.iter().map(to_fs_value).collect::<Vec<_>>()
                },
            })),
            FieldMutation::Increment { field, by } => {
                let value = if by.fract() == 0.0 {
                    json!({ "integerValue": (*by as i64).to_string() })
                } else {
                    json!({ "doubleValue": by })
                };
                transforms.push(json!({ "fieldPath": field, "increment": value }));
            }
        }
    }

    if set_fields.is_empty() {
        return json!({
            "transform": {
                "document": doc_name,
                "fieldTransforms": transforms,
            },
            "currentDocument": { "exists": true },
        });
    }

    let mask: Vec<String> = set_fields.keys().cloned().collect();
    let mut write = json!({
        "update": { "name": doc_name, "fields": Value::Object(set_fields) },
        "updateMask": { "fieldPaths": mask },
        "currentDocument": { "exists": true },
    });
    if !transforms.is_empty() {
        write["updateTransforms"] = json!(transforms);
    }
    write
}

#[async_trait]
impl DocumentStore for Firestore {
    async fn create(
        &self,
        collection: &str,
        id: Option<&str>,
        data: Map<String, Value>,
    ) -> Result<StoredDocument, ProviderError> {
        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let url = format!(
            "{}/{}/{}?documentId={}",
            FIRESTORE_BASE,
            self.parent(),
            collection,
            id
        );
        let body = json!({ "fields": fields_to_fs(&data) });
        let created = self
            .request(
                reqwest::Method::POST,
                url,
                Some(body),
                &format!("{}/{}", collection, id),
            )
            .await?;
        document_from_api(&created)
            .ok_or_else(|| ProviderError::Unavailable("malformed create response".into()))
    }

    async fn get(&self, collection: &str, id: &str) -> Result<StoredDocument, ProviderError> {
        let url = format!("{}/{}", FIRESTORE_BASE, self.doc_name(collection, id));
        let doc = self
            .request(
                reqwest::Method::GET,
                url,
                None,
                &format!("{}/{}", collection, id),
            )
            .await?;
        document_from_api(&doc)
            .ok_or_else(|| ProviderError::NotFound(format!("{}/{}", collection, id)))
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        data: Map<String, Value>,
        merge: bool,
    ) -> Result<StoredDocument, ProviderError> {
        let mut url = format!(
            "{}/{}?currentDocument.exists=true",
            FIRESTORE_BASE,
            self.doc_name(collection, id)
        );
        if merge {
            // Restrict the write to the supplied fields
            for field in data.keys() {
                url.push_str(&format!("&updateMask.fieldPaths={}", field));
            }
        }
        let body = json!({ "fields": fields_to_fs(&data) });
        let updated = self
            .request(
                reqwest::Method::PATCH,
                url,
                Some(body),
                &format!("{}/{}", collection, id),
            )
            .await?;
        document_from_api(&updated)
            .ok_or_else(|| ProviderError::Unavailable("malformed update response".into()))
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), ProviderError> {
        let url = format!(
            "{}/{}?currentDocument.exists=true",
            FIRESTORE_BASE,
            self.doc_name(collection, id)
        );
        self.request(
            reqwest::Method::DELETE,
            url,
            None,
            &format!("{}/{}", collection, id),
        )
        .await?;
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        query: &DocumentQuery,
    ) -> Result<Vec<StoredDocument>, ProviderError> {
        let url = format!("{}/{}:runQuery", FIRESTORE_BASE, self.parent());
        let body = json!({ "structuredQuery": structured_query(collection, query) });
        let results = self
            .request(reqwest::Method::POST, url, Some(body), collection)
            .await?;

        let documents = results
            .as_array()
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| row.get("document"))
                    .filter_map(document_from_api)
                    .collect()
            })
            .unwrap_or_default();
        Ok(documents)
    }

    async fn mutate(
        &self,
        collection: &str,
        id: &str,
        mutations: Vec<FieldMutation>,
    ) -> Result<StoredDocument, ProviderError> {
        let url = format!("{}/{}:commit", FIRESTORE_BASE, self.parent());
        let body = json!({
            "writes": [mutation_write(&self.doc_name(collection, id), &mutations)]
        });
        self.request(
            reqwest::Method::POST,
            url,
            Some(body),
            &format!("{}/{}", collection, id),
        )
        .await?;

        self.get(collection, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_translation_round_trips() {
        let original = json!({
            "name": "x",
            "count": 3,
            "ratio": 0.5,
            "flag": true,
            "none": null,
            "tags": ["a", "b"],
            "nested": { "deep": 1 },
        });
        let fs = to_fs_value(&original);
        assert_eq!(from_fs_value(&fs), original);
    }

    #[test]
    fn mutation_write_folds_set_fields_into_one_commit() {
        let write = mutation_write(
            "projects/p/databases/(default)/documents/posts/p1",
            &[
                FieldMutation::Increment { field: "count".into(), by: 2.0 },
                FieldMutation::Set { field: "updatedBy".into(), value: json!("editor") },
            ],
        );
        assert_eq!(write["update"]["fields"]["updatedBy"], json!({ "stringValue": "editor" }));
        assert_eq!(write["updateMask"]["fieldPaths"], json!(["updatedBy"]));
        assert_eq!(write["updateTransforms"][0]["fieldPath"], json!("count"));
        assert_eq!(write["currentDocument"]["exists"], json!(true));
    }

    #[test]
    fn mutation_write_without_set_fields_is_transform_only() {
        let write = mutation_write(
            "projects/p/databases/(default)/documents/posts/p1",
            &[FieldMutation::ArrayUnion { field: "tags".into(), values: vec![json!("a")] }],
        );
        assert!(write.get("update").is_none());
        assert_eq!(
            write["transform"]["fieldTransforms"][0]["fieldPath"],
            json!("tags")
        );
    }

    #[test]
    fn structured_query_includes_filters_and_order() {
        let query = DocumentQuery {
            filters: vec![crate::provider::FieldFilter {
                field: "age".into(),
                op: FilterOp::Gte,
                value: json!(21),
            }],
            order_by: Some(crate::provider::OrderBy {
                field: "age".into(),
                direction: SortDirection::Desc,
            }),
            limit: Some(10),
            offset: Some(5),
        };
        let sq = structured_query("people", &query);
        assert_eq!(sq["from"][0]["collectionId"], json!("people"));
        assert_eq!(
            sq["where"]["compositeFilter"]["filters"][0]["fieldFilter"]["op"],
            json!("GREATER_THAN_OR_EQUAL")
        );
        assert_eq!(sq["orderBy"][0]["direction"], json!("DESCENDING"));
        assert_eq!(sq["limit"], json!(10));
    }
}
