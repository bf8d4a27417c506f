//! Enrichers: stages that add or derive data on a record.
//!
//! An enricher never removes a record. It may read on-demand fields (and so
//! trigger loads) while deriving its value.

use std::sync::Arc;

use async_trait::async_trait;
use pagewise::{FieldError, JsonMap, OnDemandLoader, Value};

use crate::query::QueryConfig;

#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(&self, record: &mut JsonMap) -> Result<(), FieldError>;

    /// Register what this enricher needs from the query. Called once, before
    /// the first page is fetched.
    fn configure_query(&self, _config: &mut QueryConfig) {}
}

/// Copies the value at a dotted path to a top-level key.
///
/// A missing source writes `null`, so the target key is always present
/// afterwards.
#[derive(Debug, Clone)]
pub struct CopyField {
    from: String,
    to: String,
}

impl CopyField {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

#[async_trait]
impl Enricher for CopyField {
    async fn enrich(&self, record: &mut JsonMap) -> Result<(), FieldError> {
        let value = record
            .resolve_path(&self.from)
            .await?
            .map(|v| v.clone())
            .unwrap_or(Value::Null);
        record.set(self.to.clone(), value);
        Ok(())
    }
}

/// Sets `key` to a value computed from the record's materialized fields.
pub struct FnEnricher<F> {
    key: String,
    derive: F,
}

impl<F> FnEnricher<F>
where
    F: Fn(&JsonMap) -> Result<Value, FieldError> + Send + Sync,
{
    pub fn new(key: impl Into<String>, derive: F) -> Self {
        Self {
            key: key.into(),
            derive,
        }
    }
}

#[async_trait]
impl<F> Enricher for FnEnricher<F>
where
    F: Fn(&JsonMap) -> Result<Value, FieldError> + Send + Sync,
{
    async fn enrich(&self, record: &mut JsonMap) -> Result<(), FieldError> {
        let value = (self.derive)(&*record)?;
        record.set(self.key.clone(), value);
        Ok(())
    }
}

/// Forces on-demand keys to load, so that downstream processors see
/// materialized values.
///
/// Keys registered through [`ResolveFields::with_on_demand`] are also
/// attached to every record by the query.
#[derive(Default)]
pub struct ResolveFields {
    keys: Vec<String>,
    on_demand: Vec<(String, Arc<dyn OnDemandLoader>)>,
}

impl ResolveFields {
    pub fn new(keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            on_demand: Vec::new(),
        }
    }

    /// Attach `key` as an on-demand field and resolve it on every record.
    pub fn with_on_demand(
        mut self,
        key: impl Into<String>,
        loader: Arc<dyn OnDemandLoader>,
    ) -> Self {
        let key = key.into();
        if !self.keys.contains(&key) {
            self.keys.push(key.clone());
        }
        self.on_demand.push((key, loader));
        self
    }
}

#[async_trait]
impl Enricher for ResolveFields {
    async fn enrich(&self, record: &mut JsonMap) -> Result<(), FieldError> {
        for key in &self.keys {
            record.resolve(key).await?;
        }
        Ok(())
    }

    fn configure_query(&self, config: &mut QueryConfig) {
        for (key, loader) in &self.on_demand {
            config.add_on_demand(key.clone(), Arc::clone(loader));
        }
    }
}
