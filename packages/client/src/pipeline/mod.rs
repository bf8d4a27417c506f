//! The pre-processor pipeline applied to every record before dispatch.
//!
//! A [`Pipeline`] is an ordered list of [`Stage`]s. For each record the stages
//! run in registration order; the first filter that rejects the record ends
//! the chain, so enrichers registered after it never see it.
//!
//! # Two phases
//!
//! 1. **Attach.** [`Pipeline::attach`] offers the query's mutable
//!    [`QueryConfig`] to every stage once, before any page is requested.
//!    Stages register on-demand fields and server-side narrowing here.
//! 2. **Process.** [`Pipeline::process`] runs per record while paging. The
//!    configuration is frozen by then.

mod enrich;
mod filter;

pub use enrich::{CopyField, Enricher, FnEnricher, ResolveFields};
pub use filter::{
    AllOf, AnyOf, FieldEquals, FieldMatches, FieldPresent, Filter, FnPredicate, MatchMode,
    Predicate,
};

use pagewise::{FieldError, JsonMap};

use crate::query::QueryConfig;

/// One pipeline step.
pub enum Stage {
    Filter(Filter),
    Enrich(Box<dyn Enricher>),
}

/// What the pipeline decided for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accepted,
    /// Rejected by the stage at this index.
    Rejected(usize),
}

/// An ordered chain of filters and enrichers.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.stages.push(Stage::Filter(filter));
        self
    }

    pub fn enrich(mut self, enricher: impl Enricher + 'static) -> Self {
        self.stages.push(Stage::Enrich(Box::new(enricher)));
        self
    }

    pub fn push(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Let every stage register its requirements on `config`.
    pub fn attach(&self, config: &mut QueryConfig) {
        for stage in &self.stages {
            match stage {
                Stage::Filter(f) => f.configure_query(config),
                Stage::Enrich(e) => e.configure_query(config),
            }
        }
    }

    /// Run the stages over `record` in order.
    pub async fn process(&self, record: &mut JsonMap) -> Result<Outcome, FieldError> {
        for (index, stage) in self.stages.iter().enumerate() {
            match stage {
                Stage::Filter(f) => {
                    if !f.accepts(record).await? {
                        return Ok(Outcome::Rejected(index));
                    }
                }
                Stage::Enrich(e) => e.enrich(record).await?,
            }
        }
        Ok(Outcome::Accepted)
    }
}
