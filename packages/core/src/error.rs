//! Errors raised by field access on a [`JsonMap`](crate::JsonMap).
//!
//! Both kinds are local to a single field access: they propagate to whoever
//! performed the read (a filter, an enricher, or caller code) and never abort
//! anything on their own.

use thiserror::Error;

/// A present value could not be converted to the requested type.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("cannot convert {path:?} from {actual} to {expected}{}", detail_suffix(.detail))]
pub struct ConversionError {
    /// Key or dotted path that was read.
    pub path: String,
    /// Name of the requested target type.
    pub expected: &'static str,
    /// Kind of the value actually found (see [`Value::kind`](crate::Value::kind)).
    pub actual: &'static str,
    /// Extra parser output, when there is any.
    pub detail: Option<String>,
}

impl ConversionError {
    pub fn new(path: impl Into<String>, expected: &'static str, actual: &'static str) -> Self {
        Self {
            path: path.into(),
            expected,
            actual,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail.as_ref().map(|d| format!(": {d}")).unwrap_or_default()
}

/// Why an on-demand load failed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LoadFailure {
    /// The path template names a field the owning record does not have (or
    /// has as a non-scalar).
    #[error("path template {template:?} references unusable field {field:?}")]
    Template { template: String, field: String },

    /// The request could not be sent or no response was received.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered with a non-2xx status code.
    #[error("backend returned status {0}")]
    Status(u16),

    /// The response body was not the expected JSON.
    #[error("could not decode response: {0}")]
    Decode(String),

    /// The response did not contain the unwrap key.
    #[error("response has no {0:?} property")]
    MissingPayload(String),
}

/// An on-demand field could not be resolved.
///
/// Attributed to the key being read and, when the owning record carries an
/// `id`, to that record.
#[derive(Debug, Clone, Error, PartialEq)]
#[error(
    "failed to load on-demand field {key:?} of record {}: {reason}",
    .record.as_deref().unwrap_or("<no id>")
)]
pub struct LoadError {
    pub key: String,
    pub record: Option<String>,
    #[source]
    pub reason: LoadFailure,
}

/// Any failure of a typed field read.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FieldError {
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Load(#[from] LoadError),
}
