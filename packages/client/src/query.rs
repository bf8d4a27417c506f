//! The paging query engine.
//!
//! A [`Query`] walks a paginated collection endpoint page by page and hands
//! every record that survives the [`Pipeline`] to a [`Processor`]:
//!
//! ```text
//! Init -> FetchingPage -> Decoding -> Dispatching -> FetchingPage ... -> Done
//!              |              |             |
//!              +--------------+-------------+--> Error
//! ```
//!
//! Pages are fetched strictly one after another and records are dispatched in
//! page order, then in order within the page. There is no prefetch and no
//! retry: the first transport or decode failure ends the run with a
//! [`QueryError`] that reports how many records were already dispatched.
//!
//! The run stops when the pager reports the last page, when a page is empty,
//! or when `max_records` records have been dispatched (possibly mid-page).

use std::sync::Arc;

use pagewise::{FieldError, JsonMap, OnDemandLoader};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionError, QueryParams};
use crate::error::{DecodeError, QueryError, QueryErrorKind, QueryState};
use crate::paging::{OffsetPager, Page, Pager, PagingState};
use crate::pipeline::{Enricher, Filter, Outcome, Pipeline, Stage};
use crate::processor::{CollectProcessor, Processor};

pub const DEFAULT_PAGE_SIZE: u64 = 50;
pub const DEFAULT_EMBED_PARAM: &str = "embed";

// ---------------------------------------------------------------------------
// QueryConfig
// ---------------------------------------------------------------------------

/// An on-demand field attached to every record of a query.
#[derive(Clone)]
pub struct OnDemandField {
    pub key: String,
    pub loader: Arc<dyn OnDemandLoader>,
}

/// The request-side configuration of a query.
///
/// Pipeline stages may extend it while the query is being built; once
/// [`QueryBuilder::build`] returns, it no longer changes.
#[derive(Clone)]
pub struct QueryConfig {
    path: String,
    page_size: u64,
    max_records: Option<u64>,
    params: QueryParams,
    embed_param: String,
    embeds: Vec<String>,
    on_demand: Vec<OnDemandField>,
}

impl QueryConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            page_size: DEFAULT_PAGE_SIZE,
            max_records: None,
            params: Vec::new(),
            embed_param: DEFAULT_EMBED_PARAM.to_string(),
            embeds: Vec::new(),
            on_demand: Vec::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn max_records(&self) -> Option<u64> {
        self.max_records
    }

    /// Add a static query parameter. Adding the same pair twice is a no-op.
    pub fn add_param(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let pair = (key.into(), value.into());
        if !self.params.contains(&pair) {
            self.params.push(pair);
        }
    }

    /// Ask the backend to embed `name` in listed records.
    pub fn add_embed(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.embeds.contains(&name) {
            self.embeds.push(name);
        }
    }

    /// Attach `key` as an on-demand field of every record. The first
    /// registration of a key wins.
    pub fn add_on_demand(&mut self, key: impl Into<String>, loader: Arc<dyn OnDemandLoader>) {
        let key = key.into();
        if self.on_demand.iter().any(|f| f.key == key) {
            debug!(%key, "on-demand field already registered");
            return;
        }
        self.on_demand.push(OnDemandField { key, loader });
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn embeds(&self) -> &[String] {
        &self.embeds
    }

    pub fn on_demand_fields(&self) -> &[OnDemandField] {
        &self.on_demand
    }

    pub fn on_demand_keys(&self) -> impl Iterator<Item = &str> {
        self.on_demand.iter().map(|f| f.key.as_str())
    }

    /// Parameters sent with every page request, before the pager's own.
    pub fn request_params(&self) -> QueryParams {
        let mut params = self.params.clone();
        if !self.embeds.is_empty() {
            params.push((self.embed_param.clone(), self.embeds.join(",")));
        }
        params
    }

    /// Attach every registered on-demand field the record does not already
    /// carry. A key the backend embedded is left alone.
    fn attach_on_demand(&self, record: &mut JsonMap) {
        for field in &self.on_demand {
            if !record.contains_key(&field.key) {
                record.insert_on_demand(field.key.clone(), Arc::clone(&field.loader));
            }
        }
    }
}

/// What to do when a pipeline stage cannot read a record's field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldErrorPolicy {
    /// Stop the run with a [`QueryErrorKind::Field`] error.
    #[default]
    Fail,
    /// Drop the record, log a warning, and count it in
    /// [`RunSummary::skipped`].
    SkipRecord,
}

// ---------------------------------------------------------------------------
// QueryBuilder
// ---------------------------------------------------------------------------

pub struct QueryBuilder {
    connection: Arc<dyn Connection>,
    config: QueryConfig,
    pipeline: Pipeline,
    pager: Box<dyn Pager>,
    policy: FieldErrorPolicy,
}

impl QueryBuilder {
    /// Records per page; values below 1 are raised to 1.
    pub fn page_size(mut self, size: u64) -> Self {
        self.config.page_size = size.max(1);
        self
    }

    /// Stop after this many records have been dispatched.
    pub fn max_records(mut self, max: Option<u64>) -> Self {
        self.config.max_records = max;
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.add_param(key, value);
        self
    }

    /// Name of the parameter carrying embed requests (default `embed`).
    pub fn embed_param(mut self, name: impl Into<String>) -> Self {
        self.config.embed_param = name.into();
        self
    }

    pub fn embed(mut self, name: impl Into<String>) -> Self {
        self.config.add_embed(name);
        self
    }

    pub fn on_demand(mut self, key: impl Into<String>, loader: Arc<dyn OnDemandLoader>) -> Self {
        self.config.add_on_demand(key, loader);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.pipeline.push(Stage::Filter(filter));
        self
    }

    pub fn enrich(mut self, enricher: impl Enricher + 'static) -> Self {
        self.pipeline.push(Stage::Enrich(Box::new(enricher)));
        self
    }

    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn pager(self, pager: impl Pager + 'static) -> Self {
        self.boxed_pager(Box::new(pager))
    }

    pub fn boxed_pager(mut self, pager: Box<dyn Pager>) -> Self {
        self.pager = pager;
        self
    }

    pub fn on_field_error(mut self, policy: FieldErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Attach the pipeline to the configuration and freeze both.
    pub fn build(mut self) -> Query {
        self.pipeline.attach(&mut self.config);
        debug!(
            path = %self.config.path,
            stages = self.pipeline.len(),
            on_demand = self.config.on_demand.len(),
            embeds = self.config.embeds.len(),
            "query built"
        );
        Query {
            connection: self.connection,
            config: self.config,
            pipeline: self.pipeline,
            pager: self.pager,
            policy: self.policy,
        }
    }
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// Counters for a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub pages: u64,
    pub fetched: u64,
    pub dispatched: u64,
    pub rejected: u64,
    pub skipped: u64,
}

enum Phase {
    Init,
    FetchingPage,
    Decoding(serde_json::Value),
    Dispatching(Page),
    Done,
}

impl Phase {
    fn state(&self) -> QueryState {
        match self {
            Self::Init => QueryState::Init,
            Self::FetchingPage => QueryState::FetchingPage,
            Self::Decoding(_) => QueryState::Decoding,
            Self::Dispatching(_) => QueryState::Dispatching,
            Self::Done => QueryState::Done,
        }
    }
}

pub struct Query {
    connection: Arc<dyn Connection>,
    config: QueryConfig,
    pipeline: Pipeline,
    pager: Box<dyn Pager>,
    policy: FieldErrorPolicy,
}

impl Query {
    pub fn builder(connection: Arc<dyn Connection>, path: impl Into<String>) -> QueryBuilder {
        QueryBuilder {
            connection,
            config: QueryConfig::new(path),
            pipeline: Pipeline::new(),
            pager: Box::new(OffsetPager::new()),
            policy: FieldErrorPolicy::default(),
        }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Page through the collection, dispatching accepted records to
    /// `processor`.
    pub async fn run<P>(&self, processor: &mut P) -> Result<RunSummary, QueryError>
    where
        P: Processor + ?Sized,
    {
        let mut state = PagingState::new(self.config.page_size);
        let mut summary = RunSummary::default();
        let mut phase = Phase::Init;

        loop {
            debug!(
                path = %self.config.path,
                page = state.page_index,
                state = %phase.state(),
                "query state"
            );
            phase = match phase {
                Phase::Init if self.cap_reached(&state) => Phase::Done,
                Phase::Init => Phase::FetchingPage,

                Phase::FetchingPage => {
                    let mut params = self.config.request_params();
                    params.extend(self.pager.page_params(&state));
                    let body = match self.connection.get(&self.config.path, &params).await {
                        Ok(body) => body,
                        Err(ConnectionError::Decode(msg)) => {
                            let kind = QueryErrorKind::Decode(DecodeError::Body(msg));
                            return Err(self.fail(&state, QueryState::Decoding, kind));
                        }
                        Err(e) => return Err(self.fail(&state, QueryState::FetchingPage, e.into())),
                    };
                    summary.pages += 1;
                    Phase::Decoding(body)
                }

                Phase::Decoding(body) => {
                    let page = self
                        .pager
                        .decode(body, &state)
                        .map_err(|e| self.fail(&state, QueryState::Decoding, e.into()))?;
                    state.fetched += page.records.len() as u64;
                    summary.fetched = state.fetched;
                    if page.total.is_some() {
                        state.total = page.total;
                    }
                    Phase::Dispatching(page)
                }

                Phase::Dispatching(page) => {
                    let Page {
                        records,
                        next_cursor,
                        last,
                        ..
                    } = page;
                    let count = records.len() as u64;

                    for (index, mut record) in records.into_iter().enumerate() {
                        if self.cap_reached(&state) {
                            break;
                        }
                        self.config.attach_on_demand(&mut record);
                        match self.pipeline.process(&mut record).await {
                            Ok(Outcome::Accepted) => {
                                processor.process(record).await.map_err(|e| {
                                    let kind = QueryErrorKind::Processor(e);
                                    self.fail(&state, QueryState::Dispatching, kind)
                                })?;
                                state.dispatched += 1;
                            }
                            Ok(Outcome::Rejected(stage)) => {
                                summary.rejected += 1;
                                debug!(index, stage, "record rejected");
                            }
                            Err(source) => {
                                self.field_error(&state, &mut summary, index, &record, source)?
                            }
                        }
                    }

                    state.page_index += 1;
                    state.offset += count;
                    state.cursor = next_cursor;
                    if last || count == 0 || self.cap_reached(&state) {
                        Phase::Done
                    } else {
                        Phase::FetchingPage
                    }
                }

                Phase::Done => break,
            };
        }

        summary.dispatched = state.dispatched;
        info!(
            path = %self.config.path,
            pages = summary.pages,
            fetched = summary.fetched,
            dispatched = summary.dispatched,
            rejected = summary.rejected,
            skipped = summary.skipped,
            "query complete"
        );
        Ok(summary)
    }

    /// Run the query and keep every accepted record.
    pub async fn collect(&self) -> Result<Vec<JsonMap>, QueryError> {
        let mut sink = CollectProcessor::new();
        self.run(&mut sink).await?;
        Ok(sink.into_records())
    }

    fn cap_reached(&self, state: &PagingState) -> bool {
        self.config
            .max_records
            .is_some_and(|max| state.dispatched >= max)
    }

    fn field_error(
        &self,
        state: &PagingState,
        summary: &mut RunSummary,
        index: usize,
        record: &JsonMap,
        source: FieldError,
    ) -> Result<(), QueryError> {
        let id = record.record_id();
        match self.policy {
            FieldErrorPolicy::Fail => Err(self.fail(
                state,
                QueryState::Dispatching,
                QueryErrorKind::Field {
                    index,
                    record: id,
                    source,
                },
            )),
            FieldErrorPolicy::SkipRecord => {
                warn!(
                    path = %self.config.path,
                    page = state.page_index,
                    index,
                    record = id.as_deref().unwrap_or("<no id>"),
                    error = %source,
                    "skipping record"
                );
                summary.skipped += 1;
                Ok(())
            }
        }
    }

    fn fail(&self, state: &PagingState, at: QueryState, kind: QueryErrorKind) -> QueryError {
        debug!(
            path = %self.config.path,
            page = state.page_index,
            from = %at,
            state = %QueryState::Error,
            "query state"
        );
        QueryError {
            path: self.config.path.clone(),
            page: state.page_index,
            dispatched: state.dispatched,
            state: at,
            kind,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
