//! # pagewise-client
//!
//! Paging queries over semi-structured JSON REST APIs.
//!
//! This crate drives a [`Query`] across a paginated collection endpoint,
//! runs every record through a [`Pipeline`] of filters and enrichers, and
//! hands the survivors to a [`Processor`]. Fields that are expensive to fetch
//! are attached to records as on-demand placeholders backed by a
//! [`RestLoader`], and only loaded when a stage or processor reads them.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`connection`] | [`Connection`] trait and the reqwest-based [`HttpConnection`] |
//! | [`loader`] | [`RestLoader`]: path template, unwrap key, request customizers |
//! | [`cache`] | [`BoundedCache`] and [`CachedLoader`] for repeated lookups |
//! | [`pipeline`] | Filters, predicates and enrichers |
//! | [`paging`] | Offset, cursor and page-number pagers |
//! | [`query`] | [`QueryBuilder`], [`Query`] and the paging state machine |
//! | [`processor`] | Record sinks |
//! | [`error`] | [`QueryError`] and [`DecodeError`] |
//! | [`config`] | [`ClientConfig`] from `PAGEWISE_*` environment variables |
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pagewise_client::pipeline::{FieldEquals, Filter};
//! use pagewise_client::{ClientConfig, CollectProcessor, RestLoader};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::from_env();
//! let conn = Arc::new(config.http_connection()?);
//!
//! let details = Arc::new(RestLoader::new(
//!     conn.clone(),
//!     "/api/v1/issues/{id}/details",
//!     Some("data"),
//! ));
//! let query = config
//!     .query(conn, "/api/v1/projectVersions/3/issues")
//!     .filter(
//!         Filter::exclude(FieldEquals::new("details.state", ["suppressed"]))
//!             .with_on_demand("details", details),
//!     )
//!     .build();
//!
//! let mut sink = CollectProcessor::new();
//! let summary = query.run(&mut sink).await?;
//! println!("{} of {} issues kept", summary.dispatched, summary.fetched);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod loader;
pub mod paging;
pub mod pipeline;
pub mod processor;
pub mod query;

#[cfg(test)]
mod testing;

pub use cache::{BoundedCache, CachedLoader};
pub use config::ClientConfig;
pub use connection::{Connection, ConnectionError, HttpConnection, QueryParams};
pub use error::{DecodeError, QueryError, QueryErrorKind, QueryState};
pub use loader::{
    FieldSelection, LoadRequest, PathTemplate, RequestCustomizer, RestLoader, StaticParams,
};
pub use paging::{CursorPager, OffsetPager, Page, PageNumberPager, Pager, PagingMode, PagingState};
pub use pipeline::{Enricher, Filter, MatchMode, Pipeline, Predicate};
pub use processor::{ChannelProcessor, CollectProcessor, FnProcessor, Processor, ProcessorError};
pub use query::{FieldErrorPolicy, OnDemandField, Query, QueryBuilder, QueryConfig, RunSummary};
