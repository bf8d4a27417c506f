//! REST-backed on-demand loaders.
//!
//! A [`RestLoader`] is composed from three parts rather than subclassed per
//! backend:
//!
//! - a [`PathTemplate`] such as `/api/v1/issues/{id}/details`, filled from the
//!   owning record's own fields;
//! - an optional unwrap key naming the response property that holds the
//!   payload (`"data"`, `"items"`, ...);
//! - zero or more [`RequestCustomizer`]s that add query parameters before the
//!   call is issued (field selection, backend-specific flags).

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use pagewise::{JsonMap, LoadFailure, OnDemandLoader, Value};
use tracing::debug;

use crate::connection::{Connection, QueryParams};

// ---------------------------------------------------------------------------
// PathTemplate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Literal(String),
    Field(String),
}

/// A request path with `{field}` placeholders.
///
/// Placeholders may use dotted paths (`{project.id}`) to reach into nested
/// maps. Substituted values are percent-encoded. An unclosed `{` is kept as
/// literal text.
#[derive(Debug, Clone, PartialEq)]
pub struct PathTemplate {
    source: String,
    parts: Vec<Part>,
}

impl PathTemplate {
    pub fn parse(source: &str) -> Self {
        let mut parts = Vec::new();
        let mut rest = source;
        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}').map(|c| open + c) else {
                break;
            };
            if open > 0 {
                parts.push(Part::Literal(rest[..open].to_string()));
            }
            parts.push(Part::Field(rest[open + 1..close].trim().to_string()));
            rest = &rest[close + 1..];
        }
        if !rest.is_empty() {
            parts.push(Part::Literal(rest.to_string()));
        }
        Self {
            source: source.to_string(),
            parts,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Names of the fields this template reads.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|p| match p {
            Part::Field(f) => Some(f.as_str()),
            Part::Literal(_) => None,
        })
    }

    /// Substitute every placeholder from `owner`.
    ///
    /// Only materialized scalar fields can be substituted; a missing,
    /// null, structured or still-unloaded field is a
    /// [`LoadFailure::Template`].
    pub fn render(&self, owner: &JsonMap) -> Result<String, LoadFailure> {
        let mut out = String::with_capacity(self.source.len());
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Field(field) => {
                    let text = owner
                        .raw_path(field)
                        .and_then(Value::scalar_text)
                        .ok_or_else(|| LoadFailure::Template {
                            template: self.source.clone(),
                            field: field.clone(),
                        })?;
                    out.push_str(&urlencoding::encode(&text));
                }
            }
        }
        Ok(out)
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

// ---------------------------------------------------------------------------
// RequestCustomizer
// ---------------------------------------------------------------------------

/// Hook that adjusts the query parameters of an on-demand request.
pub trait RequestCustomizer: Send + Sync {
    fn customize(&self, owner: &JsonMap, params: &mut QueryParams);
}

/// Adds a comma-joined field-selection parameter, e.g. `fields=id,name`.
#[derive(Debug, Clone)]
pub struct FieldSelection {
    param: String,
    fields: Vec<String>,
}

impl FieldSelection {
    pub fn new(
        param: impl Into<String>,
        fields: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            param: param.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl RequestCustomizer for FieldSelection {
    fn customize(&self, _owner: &JsonMap, params: &mut QueryParams) {
        if !self.fields.is_empty() {
            params.push((self.param.clone(), self.fields.join(",")));
        }
    }
}

/// Adds a fixed set of parameters to every request.
#[derive(Debug, Clone, Default)]
pub struct StaticParams(pub QueryParams);

impl RequestCustomizer for StaticParams {
    fn customize(&self, _owner: &JsonMap, params: &mut QueryParams) {
        params.extend(self.0.iter().cloned());
    }
}

// ---------------------------------------------------------------------------
// RestLoader
// ---------------------------------------------------------------------------

/// A fully prepared on-demand request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoadRequest {
    pub path: String,
    pub params: QueryParams,
}

/// Loads a field by issuing one GET against the backend.
#[derive(Clone)]
pub struct RestLoader {
    connection: Arc<dyn Connection>,
    template: PathTemplate,
    unwrap_key: Option<String>,
    customizers: Vec<Arc<dyn RequestCustomizer>>,
}

impl RestLoader {
    /// Create a loader.
    ///
    /// `unwrap_key` names the response property holding the payload; `None`
    /// substitutes the whole response body.
    pub fn new(connection: Arc<dyn Connection>, template: &str, unwrap_key: Option<&str>) -> Self {
        Self {
            connection,
            template: PathTemplate::parse(template),
            unwrap_key: unwrap_key.map(str::to_string),
            customizers: Vec::new(),
        }
    }

    pub fn with_customizer(mut self, customizer: impl RequestCustomizer + 'static) -> Self {
        self.customizers.push(Arc::new(customizer));
        self
    }

    pub fn with_param(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_customizer(StaticParams(vec![(key.into(), value.into())]))
    }

    pub fn template(&self) -> &PathTemplate {
        &self.template
    }

    pub fn unwrap_key(&self) -> Option<&str> {
        self.unwrap_key.as_deref()
    }

    /// Build the request this loader would issue for `owner`.
    pub fn request_for(&self, owner: &JsonMap) -> Result<LoadRequest, LoadFailure> {
        let path = self.template.render(owner)?;
        let mut params = QueryParams::new();
        for customizer in &self.customizers {
            customizer.customize(owner, &mut params);
        }
        Ok(LoadRequest { path, params })
    }

    /// Issue `request` and unwrap the payload.
    pub async fn fetch(&self, request: &LoadRequest) -> Result<Value, LoadFailure> {
        debug!(path = %request.path, "loading on-demand field");
        let mut body = self.connection.get(&request.path, &request.params).await?;
        let payload = match &self.unwrap_key {
            None => body,
            Some(key) => body
                .as_object_mut()
                .and_then(|obj| obj.remove(key))
                .ok_or_else(|| LoadFailure::MissingPayload(key.clone()))?,
        };
        Ok(Value::from(payload))
    }
}

#[async_trait]
impl OnDemandLoader for RestLoader {
    async fn load(&self, owner: &JsonMap) -> Result<Value, LoadFailure> {
        let request = self.request_for(owner)?;
        self.fetch(&request).await
    }

    fn describe(&self) -> String {
        format!("GET {}", self.template)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::testing::{record, StubConnection};

    #[test]
    fn template_parses_literals_and_fields() {
        let t = PathTemplate::parse("/api/v1/projectVersions/{project.id}/issues/{ id }");
        let fields: Vec<_> = t.fields().collect();
        assert_eq!(fields, ["project.id", "id"]);
        assert_eq!(t.to_string(), "/api/v1/projectVersions/{project.id}/issues/{ id }");
    }

    #[test]
    fn template_renders_and_encodes() {
        let t = PathTemplate::parse("/apps/{project.id}/issues/{name}");
        let owner = record(json!({"project": {"id": 12}, "name": "a b/c"}));
        assert_eq!(t.render(&owner).unwrap(), "/apps/12/issues/a%20b%2Fc");
    }

    #[test]
    fn template_keeps_unclosed_brace_literal() {
        let t = PathTemplate::parse("/odd/{id");
        assert_eq!(t.fields().count(), 0);
        assert_eq!(t.render(&JsonMap::new()).unwrap(), "/odd/{id");
    }

    #[test]
    fn template_missing_field_is_an_error() {
        let t = PathTemplate::parse("/issues/{id}/details");
        let owner = record(json!({"id": null}));
        assert_eq!(
            t.render(&owner).unwrap_err(),
            LoadFailure::Template {
                template: "/issues/{id}/details".into(),
                field: "id".into(),
            }
        );
    }

    #[tokio::test]
    async fn load_substitutes_customizes_and_unwraps() {
        let conn = Arc::new(StubConnection::new());
        conn.respond("/issues/7/details", json!({"data": {"brief": "xss"}, "count": 1}));

        let loader = RestLoader::new(conn.clone(), "/issues/{id}/details", Some("data"))
            .with_customizer(FieldSelection::new("fields", ["brief", "recommendation"]))
            .with_param("embed", "none");

        let value = loader.load(&record(json!({"id": 7}))).await.unwrap();
        assert_eq!(value.to_json(), json!({"brief": "xss"}));

        let calls = conn.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].1,
            vec![
                ("fields".to_string(), "brief,recommendation".to_string()),
                ("embed".to_string(), "none".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn load_without_unwrap_key_returns_whole_body() {
        let conn = Arc::new(StubConnection::new());
        conn.respond("/lookup/1", json!([1, 2]));
        let loader = RestLoader::new(conn, "/lookup/{id}", None);
        let value = loader.load(&record(json!({"id": 1}))).await.unwrap();
        assert_eq!(value.to_json(), json!([1, 2]));
    }

    #[tokio::test]
    async fn missing_payload_is_reported() {
        let conn = Arc::new(StubConnection::new());
        conn.respond("/issues/7/details", json!({"items": []}));
        let loader = RestLoader::new(conn, "/issues/{id}/details", Some("data"));
        let err = loader.load(&record(json!({"id": 7}))).await.unwrap_err();
        assert_eq!(err, LoadFailure::MissingPayload("data".into()));
    }

    #[tokio::test]
    async fn null_payload_is_a_value_not_an_error() {
        let conn = Arc::new(StubConnection::new());
        conn.respond("/issues/7/details", json!({"data": null}));
        let loader = RestLoader::new(conn, "/issues/{id}/details", Some("data"));
        let value = loader.load(&record(json!({"id": 7}))).await.unwrap();
        assert!(value.is_null());
    }

    #[tokio::test]
    async fn backend_failures_propagate() {
        let conn = Arc::new(StubConnection::new());
        let loader = RestLoader::new(conn, "/issues/{id}/details", Some("data"));
        // StubConnection answers unknown paths with 404.
        let err = loader.load(&record(json!({"id": 7}))).await.unwrap_err();
        assert_eq!(err, LoadFailure::Status(404));
    }
}
