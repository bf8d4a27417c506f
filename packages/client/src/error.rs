//! Error types for paging queries.
//!
//! A [`QueryError`] always says how far the run got: the page it failed on
//! and how many records had already been handed to the processor. Records
//! dispatched before the failure stay dispatched; there is no rollback.

use std::fmt;

use pagewise::FieldError;
use thiserror::Error;

use crate::connection::ConnectionError;
use crate::processor::ProcessorError;

/// A page body that does not have the shape the pager expects.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("response body is not JSON: {0}")]
    Body(String),

    #[error("response has no items at {0:?}")]
    MissingItems(String),

    #[error("items at {key:?} are a {actual}, not a list")]
    NotAList { key: String, actual: &'static str },

    #[error("item {index} is a {actual}, not an object")]
    NotAnObject { index: usize, actual: &'static str },

    #[error("{key:?} should be a {expected}, got a {actual}")]
    BadMetadata {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },
}

/// Lower-case JSON type name, for error messages.
pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Where a run was when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Init,
    FetchingPage,
    Decoding,
    Dispatching,
    Done,
    Error,
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Init => "init",
            Self::FetchingPage => "fetching page",
            Self::Decoding => "decoding",
            Self::Dispatching => "dispatching",
            Self::Done => "done",
            Self::Error => "error",
        })
    }
}

#[derive(Debug, Error)]
pub enum QueryErrorKind {
    #[error("page request failed: {0}")]
    Transport(#[from] ConnectionError),

    #[error("page could not be decoded: {0}")]
    Decode(#[from] DecodeError),

    /// A pipeline stage could not read a field of a record.
    #[error("record {index} of the page ({}): {source}", .record.as_deref().unwrap_or("<no id>"))]
    Field {
        index: usize,
        record: Option<String>,
        #[source]
        source: FieldError,
    },

    #[error("processor failed: {0}")]
    Processor(#[source] ProcessorError),
}

/// A failed query run.
#[derive(Debug, Error)]
#[error("query {path:?} failed on page {page} while {state} after dispatching {dispatched} records: {kind}")]
pub struct QueryError {
    pub path: String,
    /// Zero-based index of the failing page.
    pub page: u64,
    pub dispatched: u64,
    pub state: QueryState,
    #[source]
    pub kind: QueryErrorKind,
}
