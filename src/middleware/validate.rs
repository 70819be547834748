//! Declarative request validation.
//!
//! A [`Schema`] describes one request shape: accepted fields, their kinds,
//! bounds, and defaults. Validation coerces declared types, applies
//! defaults, strips unknown fields, and reports one [`FieldError`] per
//! offending field. Schemas are defined once as statics and looked up by
//! route; they are never mutated at runtime. Fields a schema does not
//! declare are stripped but never rewritten.

use axum::{
    body::Body,
    extract::{RawPathParams, Request},
    middleware::Next,
    response::Response,
};
use serde_json::{json, Map, Value};

use crate::error::{ApiError, FieldError};

use super::sanitize::sanitize_value;

// Mirrors the platform's document size ceiling closely enough for a guard
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Coerced, sanitized request body, attached for handlers to consume.
#[derive(Clone, Debug)]
pub struct ValidatedBody(pub Map<String, Value>);

/// Coerced query parameters.
#[derive(Clone, Debug)]
pub struct ValidatedQuery(pub Map<String, Value>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringPattern {
    /// Letters, digits, `_` and `-`
    Identifier,
    Email,
}

#[derive(Debug, Clone)]
pub enum FieldKind {
    String {
        min_len: Option<usize>,
        max_len: Option<usize>,
        pattern: Option<StringPattern>,
    },
    Integer {
        min: Option<i64>,
        max: Option<i64>,
    },
    Number,
    Boolean,
    Array {
        max_items: Option<usize>,
    },
    Object,
    /// Accept as-is; the field is passed through without coercion
    Any,
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub default: Option<Value>,
}

impl Field {
    pub fn string(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::String { min_len: None, max_len: None, pattern: None },
            required: false,
            default: None,
        }
    }

    pub fn identifier(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::String {
                min_len: Some(1),
                max_len: Some(128),
                pattern: Some(StringPattern::Identifier),
            },
            required: false,
            default: None,
        }
    }

    pub fn email(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::String {
                min_len: Some(3),
                max_len: Some(320),
                pattern: Some(StringPattern::Email),
            },
            required: false,
            default: None,
        }
    }

    pub fn integer(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Integer { min: None, max: None },
            required: false,
            default: None,
        }
    }

    pub fn number(name: &'static str) -> Self {
        Self { name, kind: FieldKind::Number, required: false, default: None }
    }

    pub fn boolean(name: &'static str) -> Self {
        Self { name, kind: FieldKind::Boolean, required: false, default: None }
    }

    pub fn array(name: &'static str) -> Self {
        Self { name, kind: FieldKind::Array { max_items: None }, required: false, default: None }
    }

    pub fn object(name: &'static str) -> Self {
        Self { name, kind: FieldKind::Object, required: false, default: None }
    }

    pub fn any(name: &'static str) -> Self {
        Self { name, kind: FieldKind::Any, required: false, default: None }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn min_len(mut self, n: usize) -> Self {
        if let FieldKind::String { min_len, .. } = &mut self.kind {
            *min_len = Some(n);
        }
        self
    }

    pub fn max_len(mut self, n: usize) -> Self {
        if let FieldKind::String { max_len, .. } = &mut self.kind {
            *max_len = Some(n);
        }
        self
    }

    pub fn min(mut self, n: i64) -> Self {
        if let FieldKind::Integer { min, .. } = &mut self.kind {
            *min = Some(n);
        }
        self
    }

    pub fn max(mut self, n: i64) -> Self {
        if let FieldKind::Integer { max, .. } = &mut self.kind {
            *max = Some(n);
        }
        self
    }

    pub fn max_items(mut self, n: usize) -> Self {
        if let FieldKind::Array { max_items } = &mut self.kind {
            *max_items = Some(n);
        }
        self
    }
}

#[derive(Debug, Clone)]
pub struct Schema {
    pub name: &'static str,
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(name: &'static str) -> Self {
        Self { name, fields: Vec::new() }
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Validate and coerce one request part. Unknown fields are stripped,
    /// defaults applied, declared types coerced. Returns the coerced map or
    /// every field failure found.
    pub fn validate(&self, input: Map<String, Value>) -> Result<Map<String, Value>, Vec<FieldError>> {
        let mut output = Map::new();
        let mut errors = Vec::new();

        for field in &self.fields {
            match input.get(field.name) {
                None | Some(Value::Null) => {
                    if let Some(default) = &field.default {
                        output.insert(field.name.to_string(), default.clone());
                    } else if field.required {
                        errors.push(FieldError::new(field.name, "This field is required", "required"));
                    }
                }
                Some(value) => match coerce(field, value) {
                    Ok(coerced) => {
                        output.insert(field.name.to_string(), coerced);
                    }
                    Err(error) => errors.push(error),
                },
            }
        }

        if errors.is_empty() {
            Ok(output)
        } else {
            Err(errors)
        }
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn is_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !s.chars().any(char::is_whitespace)
}

fn coerce(field: &Field, value: &Value) -> Result<Value, FieldError> {
    let fail = |message: &str, rule: &'static str| {
        Err(FieldError::new(field.name, message, rule).with_value(value.clone()))
    };

    match &field.kind {
        FieldKind::Any => Ok(value.clone()),

        FieldKind::String { min_len, max_len, pattern } => {
            let s = match value.as_str() {
                Some(s) => s.to_string(),
                None => return fail("Must be a string", "type"),
            };
            if let Some(min) = min_len {
                if s.chars().count() < *min {
                    return fail(&format!("Must be at least {} characters", min), "min_len");
                }
            }
            if let Some(max) = max_len {
                if s.chars().count() > *max {
                    return fail(&format!("Must be at most {} characters", max), "max_len");
                }
            }
            match pattern {
                Some(StringPattern::Identifier) if !is_identifier(&s) => {
                    fail("Only letters, digits, '_' and '-' are allowed", "pattern")
                }
                Some(StringPattern::Email) if !is_email(&s) => {
                    fail("Must be a valid email address", "pattern")
                }
                _ => Ok(Value::String(s)),
            }
        }

        FieldKind::Integer { min, max } => {
            let n = match value {
                Value::Number(n) => match n.as_i64() {
                    Some(i) => i,
                    None => return fail("Must be an integer", "type"),
                },
                // Query parameters arrive as strings
                Value::String(s) => match s.parse::<i64>() {
                    Ok(i) => i,
                    Err(_) => return fail("Must be an integer", "type"),
                },
                _ => return fail("Must be an integer", "type"),
            };
            if let Some(min) = min {
                if n < *min {
                    return fail(&format!("Must be at least {}", min), "min");
                }
            }
            if let Some(max) = max {
                if n > *max {
                    return fail(&format!("Must be at most {}", max), "max");
                }
            }
            Ok(json!(n))
        }

        FieldKind::Number => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => match s.parse::<f64>() {
                Ok(f) => Ok(json!(f)),
                Err(_) => fail("Must be a number", "type"),
            },
            _ => fail("Must be a number", "type"),
        },

        FieldKind::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) if s == "true" => Ok(json!(true)),
            Value::String(s) if s == "false" => Ok(json!(false)),
            _ => fail("Must be a boolean", "type"),
        },

        FieldKind::Array { max_items } => {
            let arr = match value.as_array() {
                Some(a) => a,
                None => return fail("Must be an array", "type"),
            };
            if let Some(max) = max_items {
                if arr.len() > *max {
                    return fail(&format!("Must have at most {} items", max), "max_items");
                }
            }
            Ok(value.clone())
        }

        FieldKind::Object => {
            if value.is_object() {
                Ok(value.clone())
            } else {
                fail("Must be an object", "type")
            }
        }
    }
}

/// Shared pagination parameters, declared once and reused by list routes.
pub fn pagination_fields() -> Vec<Field> {
    vec![
        Field::integer("page").min(1).max(1_000_000).default_value(json!(1)),
        Field::integer("limit").min(1).max(100).default_value(json!(20)),
    ]
}

fn validation_error(schema: &Schema, errors: Vec<FieldError>) -> ApiError {
    tracing::info!(
        schema = schema.name,
        failures = errors.len(),
        "request validation failed"
    );
    ApiError::validation_fields("Request validation failed", errors)
}

/// Middleware: buffer and sanitize the JSON body, validate it against
/// `schema`, and attach the coerced map as [`ValidatedBody`].
pub async fn validate_body(
    schema: &'static Schema,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // Bodyless methods share routes with body-carrying ones; only the
    // latter are validated
    let method = request.method();
    if method == axum::http::Method::GET
        || method == axum::http::Method::HEAD
        || method == axum::http::Method::DELETE
    {
        return Ok(next.run(request).await);
    }

    let (mut parts, body) = request.into_parts();

    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| ApiError::validation("Request body too large or unreadable"))?;

    let raw: Value = if bytes.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::validation(format!("Invalid JSON body: {}", e)))?
    };

    let sanitized = match sanitize_value(raw) {
        Value::Object(map) => map,
        _ => return Err(ApiError::validation("Request body must be a JSON object")),
    };

    let coerced = schema
        .validate(sanitized)
        .map_err(|errors| validation_error(schema, errors))?;

    parts.extensions.insert(ValidatedBody(coerced.clone()));
    let replacement = Body::from(serde_json::to_vec(&Value::Object(coerced)).unwrap_or_default());
    Ok(next.run(Request::from_parts(parts, replacement)).await)
}

/// Middleware: sanitize and validate query parameters against `schema`,
/// attaching the coerced map as [`ValidatedQuery`].
pub async fn validate_query(
    schema: &'static Schema,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let raw: Map<String, Value> = request
        .uri()
        .query()
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
                .collect()
        })
        .unwrap_or_default();

    let sanitized = match sanitize_value(Value::Object(raw)) {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    let coerced = schema
        .validate(sanitized)
        .map_err(|errors| validation_error(schema, errors))?;

    request.extensions_mut().insert(ValidatedQuery(coerced));
    Ok(next.run(request).await)
}

/// Middleware: validate declared path parameters as identifiers.
pub async fn validate_params(
    names: &'static [&'static str],
    params: RawPathParams,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let mut errors = Vec::new();
    for (name, value) in params.iter() {
        if names.contains(&name) && !is_identifier(value) {
            errors.push(
                FieldError::new(name, "Only letters, digits, '_' and '-' are allowed", "pattern")
                    .with_value(Value::String(value.to_string())),
            );
        }
    }
    if !errors.is_empty() {
        return Err(ApiError::validation_fields("Invalid path parameters", errors));
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new("test")
            .field(Field::string("name").required().min_len(1).max_len(10))
            .field(Field::integer("age").min(0).max(150))
            .field(Field::boolean("active").default_value(json!(true)))
            .field(Field::email("email"))
    }

    fn obj(s: &str) -> Map<String, Value> {
        serde_json::from_str(s).unwrap()
    }

    #[test]
    fn applies_defaults_and_strips_unknown() {
        let out = schema().validate(obj(r#"{"name": "x", "junk": 1}"#)).unwrap();
        assert_eq!(out.get("active"), Some(&json!(true)));
        assert!(out.get("junk").is_none());
    }

    #[test]
    fn missing_required_field_is_reported() {
        let errors = schema().validate(obj("{}")).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "name");
        assert_eq!(errors[0].rule, "required");
    }

    #[test]
    fn coerces_string_integers() {
        let out = schema()
            .validate(obj(r#"{"name": "x", "age": "42"}"#))
            .unwrap();
        assert_eq!(out.get("age"), Some(&json!(42)));
    }

    #[test]
    fn one_error_per_offending_field() {
        let errors = schema()
            .validate(obj(r#"{"name": "", "age": 200, "email": "nope"}"#))
            .unwrap_err();
        assert_eq!(errors.len(), 3);
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"name"));
        assert!(fields.contains(&"age"));
        assert!(fields.contains(&"email"));
    }

    #[test]
    fn email_pattern_accepts_plausible_addresses() {
        assert!(is_email("a@b.co"));
        assert!(is_email("first.last@sub.example.com"));
        assert!(!is_email("nope"));
        assert!(!is_email("a@b"));
        assert!(!is_email("a b@c.d"));
    }

    #[test]
    fn identifier_pattern_rejects_separators() {
        assert!(is_identifier("users_2024-q1"));
        assert!(!is_identifier("users/all"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn pagination_caps_the_page_number() {
        let mut schema = Schema::new("list");
        for field in pagination_fields() {
            schema = schema.field(field);
        }

        let errors = schema.validate(obj(r#"{"page": 50000000}"#)).unwrap_err();
        assert_eq!(errors[0].field, "page");
        assert_eq!(errors[0].rule, "max");

        let out = schema.validate(obj("{}")).unwrap();
        assert_eq!(out.get("page"), Some(&json!(1)));
    }

    #[test]
    fn bounded_arrays_are_enforced() {
        let schema = Schema::new("filters").field(Field::array("filters").max_items(2));
        let errors = schema
            .validate(obj(r#"{"filters": [1, 2, 3]}"#))
            .unwrap_err();
        assert_eq!(errors[0].rule, "max_items");
    }
}
