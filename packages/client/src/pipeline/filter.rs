//! Filters: a predicate plus a match mode.
//!
//! A [`Predicate`] answers "does this record match?". A [`Filter`] decides
//! what a match means: with [`MatchMode::Include`] matching records are kept,
//! with [`MatchMode::Exclude`] they are dropped. Composites ([`AllOf`],
//! [`AnyOf`]) combine raw matches before the mode is applied.

use std::sync::Arc;

use async_trait::async_trait;
use pagewise::{FieldError, JsonMap, OnDemandLoader, Value};
use regex::Regex;

use crate::query::QueryConfig;

// ---------------------------------------------------------------------------
// MatchMode
// ---------------------------------------------------------------------------

/// How a filter interprets its predicate's raw match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    /// Keep records for which the predicate is true.
    #[default]
    Include,
    /// Keep records for which the predicate is false.
    Exclude,
}

impl MatchMode {
    /// Turn a raw match into an accept/reject decision.
    pub fn accepts(self, raw_match: bool) -> bool {
        match self {
            MatchMode::Include => raw_match,
            MatchMode::Exclude => !raw_match,
        }
    }
}

impl std::str::FromStr for MatchMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "include" => Ok(MatchMode::Include),
            "exclude" => Ok(MatchMode::Exclude),
            _ => Err(format!(
                "unknown match mode {s:?}; expected one of: include, exclude"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Predicate
// ---------------------------------------------------------------------------

/// The test a filter applies to each record.
///
/// Reading fields may load on-demand values, so evaluation is async and can
/// fail with a [`FieldError`].
#[async_trait]
pub trait Predicate: Send + Sync {
    async fn is_matching(&self, record: &mut JsonMap) -> Result<bool, FieldError>;

    /// Register what this predicate needs from the query (on-demand fields,
    /// server-side narrowing). Called once, before the first page is fetched.
    fn configure_query(&self, _config: &mut QueryConfig) {}
}

/// Matches when every sub-predicate matches. Stops at the first miss.
pub struct AllOf(pub Vec<Box<dyn Predicate>>);

#[async_trait]
impl Predicate for AllOf {
    async fn is_matching(&self, record: &mut JsonMap) -> Result<bool, FieldError> {
        for p in &self.0 {
            if !p.is_matching(record).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn configure_query(&self, config: &mut QueryConfig) {
        for p in &self.0 {
            p.configure_query(config);
        }
    }
}

/// Matches when any sub-predicate matches. Stops at the first hit.
pub struct AnyOf(pub Vec<Box<dyn Predicate>>);

#[async_trait]
impl Predicate for AnyOf {
    async fn is_matching(&self, record: &mut JsonMap) -> Result<bool, FieldError> {
        for p in &self.0 {
            if p.is_matching(record).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn configure_query(&self, config: &mut QueryConfig) {
        for p in &self.0 {
            p.configure_query(config);
        }
    }
}

/// Matches when the value at `path` is one of `values`.
///
/// Scalars are compared by their text form. When the path holds a list, any
/// element may match.
#[derive(Debug, Clone)]
pub struct FieldEquals {
    path: String,
    values: Vec<String>,
}

impl FieldEquals {
    pub fn new(
        path: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            path: path.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    fn hit(&self, value: &Value) -> bool {
        match value {
            Value::List(items) => items.iter().any(|item| self.hit(item)),
            other => other
                .scalar_text()
                .is_some_and(|text| self.values.iter().any(|v| *v == text)),
        }
    }
}

#[async_trait]
impl Predicate for FieldEquals {
    async fn is_matching(&self, record: &mut JsonMap) -> Result<bool, FieldError> {
        Ok(record
            .resolve_path(&self.path)
            .await?
            .is_some_and(|v| self.hit(v)))
    }
}

/// Matches when the string at `path` matches a regular expression.
#[derive(Debug, Clone)]
pub struct FieldMatches {
    path: String,
    pattern: Regex,
}

impl FieldMatches {
    pub fn new(path: impl Into<String>, pattern: Regex) -> Self {
        Self {
            path: path.into(),
            pattern,
        }
    }
}

#[async_trait]
impl Predicate for FieldMatches {
    async fn is_matching(&self, record: &mut JsonMap) -> Result<bool, FieldError> {
        let text = record.get_path::<String>(&self.path).await?;
        Ok(text.is_some_and(|t| self.pattern.is_match(&t)))
    }
}

/// Matches when `path` exists and is not null.
#[derive(Debug, Clone)]
pub struct FieldPresent(pub String);

#[async_trait]
impl Predicate for FieldPresent {
    async fn is_matching(&self, record: &mut JsonMap) -> Result<bool, FieldError> {
        Ok(record
            .resolve_path(&self.0)
            .await?
            .is_some_and(|v| !v.is_null()))
    }
}

/// A predicate over already-materialized fields, given as a closure.
pub struct FnPredicate<F>(pub F);

#[async_trait]
impl<F> Predicate for FnPredicate<F>
where
    F: Fn(&JsonMap) -> bool + Send + Sync,
{
    async fn is_matching(&self, record: &mut JsonMap) -> Result<bool, FieldError> {
        Ok((self.0)(&*record))
    }
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// A pipeline stage that decides whether a record continues downstream.
///
/// Besides its predicate, a filter can declare what it needs from the query:
/// on-demand fields to attach to every record, extra query parameters for
/// server-side narrowing, and embed requests so the backend inlines related
/// data in the listing itself.
pub struct Filter {
    predicate: Box<dyn Predicate>,
    mode: MatchMode,
    on_demand: Vec<(String, Arc<dyn OnDemandLoader>)>,
    params: Vec<(String, String)>,
    embeds: Vec<String>,
}

impl Filter {
    pub fn new(predicate: impl Predicate + 'static, mode: MatchMode) -> Self {
        Self {
            predicate: Box::new(predicate),
            mode,
            on_demand: Vec::new(),
            params: Vec::new(),
            embeds: Vec::new(),
        }
    }

    /// Keep records matching `predicate`.
    pub fn include(predicate: impl Predicate + 'static) -> Self {
        Self::new(predicate, MatchMode::Include)
    }

    /// Drop records matching `predicate`.
    pub fn exclude(predicate: impl Predicate + 'static) -> Self {
        Self::new(predicate, MatchMode::Exclude)
    }

    /// Require `key` to be attached to every record as an on-demand field.
    pub fn with_on_demand(
        mut self,
        key: impl Into<String>,
        loader: Arc<dyn OnDemandLoader>,
    ) -> Self {
        self.on_demand.push((key.into(), loader));
        self
    }

    /// Ask the backend to narrow results server-side.
    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Ask the backend to embed `name` in every listed record.
    pub fn with_embed(mut self, name: impl Into<String>) -> Self {
        self.embeds.push(name.into());
        self
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    /// The predicate's raw match, before the mode is applied.
    pub async fn raw_match(&self, record: &mut JsonMap) -> Result<bool, FieldError> {
        self.predicate.is_matching(record).await
    }

    /// Whether `record` should continue downstream.
    pub async fn accepts(&self, record: &mut JsonMap) -> Result<bool, FieldError> {
        let raw = self.raw_match(record).await?;
        Ok(self.mode.accepts(raw))
    }

    pub fn configure_query(&self, config: &mut QueryConfig) {
        self.predicate.configure_query(config);
        for (key, loader) in &self.on_demand {
            config.add_on_demand(key.clone(), Arc::clone(loader));
        }
        for (key, value) in &self.params {
            config.add_param(key.clone(), value.clone());
        }
        for name in &self.embeds {
            config.add_embed(name.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
