//! The structured value model: [`Value`] and [`JsonMap`].
//!
//! A [`JsonMap`] represents one decoded JSON object. It keeps the key order of
//! the document it came from and may hold [`Value::OnDemand`] placeholders
//! whose content is fetched the first time the entry is read.
//!
//! # Reading fields
//!
//! | Method | Resolves placeholders | Converts |
//! |--------|----------------------|----------|
//! | [`JsonMap::raw`] | no | no |
//! | [`JsonMap::resolve`] | yes | no |
//! | [`JsonMap::resolve_path`] | yes, along the whole path | no |
//! | [`JsonMap::get`] / [`JsonMap::get_path`] | yes | yes, via [`FromValue`] |
//! | [`JsonMap::get_enum`] | yes | yes, via [`FromStr`] |
//!
//! Absent keys, absent path segments and JSON `null` all read as `Ok(None)`.

use std::str::FromStr;
use std::sync::Arc;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::convert::FromValue;
use crate::error::{ConversionError, FieldError, LoadError};
use crate::loader::{OnDemand, OnDemandLoader};

/// One JSON-derived value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Map(JsonMap),
    List(Vec<Value>),
    /// A field that has not been fetched yet.
    OnDemand(OnDemand),
}

impl Value {
    /// Short name of the variant, as used in [`ConversionError::actual`].
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Map(_) => "map",
            Value::List(_) => "list",
            Value::OnDemand(_) => "on-demand",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&JsonMap> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut JsonMap> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Text form of a scalar, used for template substitution and equality
    /// filters. Maps, lists, nulls and placeholders have none.
    pub fn scalar_text(&self) -> Option<String> {
        match self {
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// Convert back to plain JSON. Unresolved placeholders are dropped from
    /// maps and become `null` inside lists.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null | Value::OnDemand(_) => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Value::Number(n.clone()),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Map(m) => m.to_json(),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Map(JsonMap::from(map)),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n.into())
    }
}

impl From<JsonMap> for Value {
    fn from(m: JsonMap) -> Self {
        Value::Map(m)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null | Value::OnDemand(_) => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => n.serialize(serializer),
            Value::String(s) => serializer.serialize_str(s),
            Value::Map(m) => m.serialize(serializer),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// JsonMap
// ---------------------------------------------------------------------------

/// An ordered string-keyed map representing one JSON object.
///
/// Records are small, so entries live in a `Vec` and lookups are linear;
/// this keeps document order without an extra index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonMap {
    entries: Vec<(String, Value)>,
}

impl JsonMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys currently present, in document order. Placeholder keys are
    /// listed but not resolved.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// The stored value without resolving placeholders.
    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.position(key).map(|i| &self.entries[i].1)
    }

    pub fn raw_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.position(key).map(|i| &mut self.entries[i].1)
    }

    /// Insert or replace `key`, returning the previous value. New keys are
    /// appended; replaced keys keep their position.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.position(&key) {
            Some(i) => Some(std::mem::replace(&mut self.entries[i].1, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.position(key).map(|i| self.entries.remove(i).1)
    }

    /// Attach an on-demand placeholder under `key`, replacing any existing
    /// entry.
    pub fn insert_on_demand(&mut self, key: impl Into<String>, loader: Arc<dyn OnDemandLoader>) {
        self.set(key, Value::OnDemand(OnDemand::new(loader)));
    }

    /// Follow a dotted path through materialized values only. Never loads;
    /// a placeholder along the way ends the walk with `None`.
    pub fn raw_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.raw(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Map(map) => map.raw(segment)?,
                Value::List(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// `true` if `key` holds a placeholder that has not been resolved yet.
    pub fn is_on_demand(&self, key: &str) -> bool {
        matches!(self.raw(key), Some(Value::OnDemand(_)))
    }

    /// The `id` field as text, used to attribute load failures to a record.
    pub fn record_id(&self) -> Option<String> {
        self.raw("id").and_then(Value::scalar_text)
    }

    /// Read `key`, loading it first if it holds a placeholder.
    ///
    /// The loaded value replaces the placeholder, so later reads of the same
    /// map never call the loader again.
    pub async fn resolve(&mut self, key: &str) -> Result<Option<&mut Value>, LoadError> {
        let loader = match self.raw(key) {
            None => return Ok(None),
            Some(Value::OnDemand(placeholder)) => Some(placeholder.loader()),
            Some(_) => None,
        };

        if let Some(loader) = loader {
            let loaded = loader.load(self).await.map_err(|reason| LoadError {
                key: key.to_string(),
                record: self.record_id(),
                reason,
            })?;
            self.set(key, loaded);
        }

        Ok(self.raw_mut(key))
    }

    /// Follow a dotted path (`"a.b.0.c"`) through nested maps and lists,
    /// resolving placeholders along the way.
    ///
    /// Numeric segments index into lists. Any segment that does not exist, or
    /// that tries to descend into a scalar, ends the walk with `Ok(None)`.
    pub async fn resolve_path(&mut self, path: &str) -> Result<Option<&mut Value>, LoadError> {
        let mut segments = path.split('.');
        let Some(first) = segments.next() else {
            return Ok(None);
        };

        let mut current = match self.resolve(first).await? {
            Some(v) => v,
            None => return Ok(None),
        };

        for segment in segments {
            current = match current {
                Value::Map(map) => match map.resolve(segment).await? {
                    Some(v) => v,
                    None => return Ok(None),
                },
                Value::List(items) => {
                    match segment.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                        Some(v) => v,
                        None => return Ok(None),
                    }
                }
                _ => return Ok(None),
            };
        }

        Ok(Some(current))
    }

    /// Typed read of a top-level key.
    pub async fn get<T: FromValue>(&mut self, key: &str) -> Result<Option<T>, FieldError> {
        let value = self.resolve(key).await?;
        convert(value.as_deref(), key)
    }

    /// Typed read of a dotted path.
    pub async fn get_path<T: FromValue>(&mut self, path: &str) -> Result<Option<T>, FieldError> {
        let value = self.resolve_path(path).await?;
        convert(value.as_deref(), path)
    }

    /// Read a string field and parse it into an enum (or any `FromStr` type).
    pub async fn get_enum<E>(&mut self, path: &str) -> Result<Option<E>, FieldError>
    where
        E: FromStr,
        E::Err: std::fmt::Display,
    {
        let Some(text) = self.get_path::<String>(path).await? else {
            return Ok(None);
        };
        text.parse::<E>().map(Some).map_err(|e| {
            ConversionError::new(path, std::any::type_name::<E>(), "string")
                .with_detail(e.to_string())
                .into()
        })
    }

    /// Plain JSON copy of the materialized entries.
    pub fn to_json(&self) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        for (k, v) in &self.entries {
            if !matches!(v, Value::OnDemand(_)) {
                out.insert(k.clone(), v.to_json());
            }
        }
        serde_json::Value::Object(out)
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }
}

fn convert<T: FromValue>(value: Option<&Value>, path: &str) -> Result<Option<T>, FieldError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => T::from_value(v, path).map(Some).map_err(FieldError::from),
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for JsonMap {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            entries: map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
        }
    }
}

impl FromIterator<(String, Value)> for JsonMap {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut map = JsonMap::new();
        for (k, v) in iter {
            map.set(k, v);
        }
        map
    }
}

/// Serializes materialized entries only; unresolved placeholders are skipped
/// so that serialization never triggers a load.
impl Serialize for JsonMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let materialized: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, v)| !matches!(v, Value::OnDemand(_)))
            .collect();
        let mut map = serializer.serialize_map(Some(materialized.len()))?;
        for (k, v) in materialized {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use crate::error::LoadFailure;

    fn map(json: serde_json::Value) -> JsonMap {
        match json {
            serde_json::Value::Object(m) => JsonMap::from(m),
            other => panic!("expected an object, got {other}"),
        }
    }

    /// Returns `{"loaded_for": <owner id>}` and counts its calls.
    #[derive(Default)]
    struct CountingLoader {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OnDemandLoader for CountingLoader {
        async fn load(&self, owner: &JsonMap) -> Result<Value, LoadFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut out = JsonMap::new();
            out.set("loaded_for", owner.record_id().unwrap_or_default());
            Ok(Value::Map(out))
        }
    }

    struct FailingLoader;

    #[async_trait]
    impl OnDemandLoader for FailingLoader {
        async fn load(&self, _owner: &JsonMap) -> Result<Value, LoadFailure> {
            Err(LoadFailure::Status(500))
        }
    }

    #[test]
    fn preserves_document_order() {
        let m = map(json!({"zeta": 1, "alpha": 2, "mid": 3}));
        let keys: Vec<_> = m.keys().collect();
        assert_eq!(keys, ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn set_replaces_in_place_and_appends_new_keys() {
        let mut m = map(json!({"a": 1, "b": 2}));
        assert_eq!(m.set("a", "x"), Some(Value::from(1i64)));
        assert_eq!(m.set("c", true), None);
        let keys: Vec<_> = m.keys().collect();
        assert_eq!(keys, ["a", "b", "c"]);
        assert_eq!(m.raw("a"), Some(&Value::from("x")));
    }

    #[tokio::test]
    async fn get_typed_values() {
        let mut m = map(json!({"name": "app", "count": 7, "open": true, "gone": null}));
        assert_eq!(m.get::<String>("name").await.unwrap().as_deref(), Some("app"));
        assert_eq!(m.get::<i64>("count").await.unwrap(), Some(7));
        assert_eq!(m.get::<bool>("open").await.unwrap(), Some(true));
        assert_eq!(m.get::<String>("gone").await.unwrap(), None);
        assert_eq!(m.get::<String>("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_wrong_type_is_conversion_error() {
        let mut m = map(json!({"count": {"nested": 1}}));
        let err = m.get::<i64>("count").await.unwrap_err();
        match err {
            FieldError::Conversion(e) => {
                assert_eq!(e.path, "count");
                assert_eq!(e.expected, "integer");
                assert_eq!(e.actual, "map");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn get_path_traverses_maps_and_lists() {
        let mut m = map(json!({
            "project": {"version": {"name": "1.0"}},
            "tags": [{"label": "a"}, {"label": "b"}]
        }));
        assert_eq!(
            m.get_path::<String>("project.version.name").await.unwrap().as_deref(),
            Some("1.0")
        );
        assert_eq!(
            m.get_path::<String>("tags.1.label").await.unwrap().as_deref(),
            Some("b")
        );
    }

    #[tokio::test]
    async fn get_path_missing_segments_are_none() {
        let mut m = map(json!({"project": {"name": "x"}, "tags": [1, 2]}));
        assert_eq!(m.get_path::<String>("project.version.name").await.unwrap(), None);
        assert_eq!(m.get_path::<String>("nothing.here").await.unwrap(), None);
        assert_eq!(m.get_path::<String>("project.name.deeper").await.unwrap(), None);
        assert_eq!(m.get_path::<i64>("tags.9").await.unwrap(), None);
        assert_eq!(m.get_path::<i64>("tags.first").await.unwrap(), None);
    }

    #[test]
    fn raw_path_never_loads() {
        let mut m = map(json!({"project": {"id": 5}, "list": [{"x": "y"}]}));
        m.insert_on_demand("details", Arc::new(FailingLoader));
        assert_eq!(m.raw_path("project.id"), Some(&Value::from(5i64)));
        assert_eq!(m.raw_path("list.0.x"), Some(&Value::from("y")));
        assert_eq!(m.raw_path("details.anything"), None);
        assert_eq!(m.raw_path("project.missing"), None);
    }

    #[tokio::test]
    async fn on_demand_resolves_once_and_memoizes() {
        let loader = Arc::new(CountingLoader::default());
        let mut m = map(json!({"id": "17"}));
        m.insert_on_demand("details", loader.clone());
        assert!(m.is_on_demand("details"));

        for _ in 0..3 {
            let v = m.get_path::<String>("details.loaded_for").await.unwrap();
            assert_eq!(v.as_deref(), Some("17"));
        }
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
        assert!(!m.is_on_demand("details"));
    }

    #[tokio::test]
    async fn keys_do_not_force_resolution() {
        let loader = Arc::new(CountingLoader::default());
        let mut m = map(json!({"id": 1}));
        m.insert_on_demand("details", loader.clone());
        let keys: Vec<_> = m.keys().collect();
        assert_eq!(keys, ["id", "details"]);
        assert_eq!(loader.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn clones_memoize_independently() {
        let loader = Arc::new(CountingLoader::default());
        let mut a = map(json!({"id": 1}));
        a.insert_on_demand("details", loader.clone());
        let mut b = a.clone();
        a.resolve("details").await.unwrap();
        b.resolve("details").await.unwrap();
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn load_failure_is_attributed_to_key_and_record() {
        let mut m = map(json!({"id": 99}));
        m.insert_on_demand("details", Arc::new(FailingLoader));
        let err = m.get::<JsonMap>("details").await.unwrap_err();
        assert_eq!(
            err,
            FieldError::Load(LoadError {
                key: "details".into(),
                record: Some("99".into()),
                reason: LoadFailure::Status(500),
            })
        );
        // The placeholder stays so a later read can retry.
        assert!(m.is_on_demand("details"));
    }

    #[derive(Debug, PartialEq)]
    enum Severity {
        Low,
        High,
    }

    impl FromStr for Severity {
        type Err = String;
        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s {
                "low" => Ok(Severity::Low),
                "high" => Ok(Severity::High),
                _ => Err(format!("unknown severity {s:?}")),
            }
        }
    }

    #[tokio::test]
    async fn get_enum_parses_and_reports_failures() {
        let mut m = map(json!({"sev": "high", "bad": "urgent", "low": "low"}));
        assert_eq!(m.get_enum::<Severity>("sev").await.unwrap(), Some(Severity::High));
        assert_eq!(m.get_enum::<Severity>("low").await.unwrap(), Some(Severity::Low));
        let err = m.get_enum::<Severity>("bad").await.unwrap_err();
        assert!(err.to_string().contains("unknown severity"));
    }

    #[test]
    fn serialization_skips_unresolved_placeholders() {
        let mut m = map(json!({"id": 1, "name": "x"}));
        m.insert_on_demand("details", Arc::new(FailingLoader));
        let text = serde_json::to_string(&m).unwrap();
        assert_eq!(text, r#"{"id":1,"name":"x"}"#);
        assert_eq!(m.to_json(), json!({"id": 1, "name": "x"}));
    }
}
