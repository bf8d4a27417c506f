//! Record model for consuming paginated, semi-structured JSON REST APIs.
//!
//! Different backends nest, name and encode the same information differently.
//! This crate gives callers one representation to work against: a
//! [`JsonMap`] per decoded JSON object, with typed accessors that fail loudly
//! and fields that can be fetched on demand the first time they are read.
//!
//! # Crate layout
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`value`] | [`Value`] and [`JsonMap`]: ordered maps, dotted paths, placeholder resolution |
//! | [`convert`] | [`FromValue`]: typed conversion targets |
//! | [`date`] | [`parse_date`]: multi-format timestamp parsing |
//! | [`loader`] | [`OnDemandLoader`]: the deferred-field capability |
//! | [`error`] | [`ConversionError`], [`LoadError`], [`FieldError`] |
//!
//! This crate performs no I/O itself. REST-backed loaders, the paging query
//! engine and the filter/enricher pipeline live in `pagewise-client`.
//!
//! # Quick start
//!
//! ```rust
//! use pagewise::JsonMap;
//! use serde_json::json;
//!
//! # tokio_test_block(async {
//! let serde_json::Value::Object(obj) = json!({"id": 7, "scan": {"date": "2019-11-26"}}) else {
//!     unreachable!()
//! };
//! let mut record = JsonMap::from(obj);
//!
//! let id: Option<i64> = record.get("id").await.unwrap();
//! assert_eq!(id, Some(7));
//!
//! let missing: Option<String> = record.get_path("scan.engine.name").await.unwrap();
//! assert_eq!(missing, None);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

pub mod convert;
pub mod date;
pub mod error;
pub mod loader;
pub mod value;

pub use convert::FromValue;
pub use date::parse_date;
pub use error::{ConversionError, FieldError, LoadError, LoadFailure};
pub use loader::{OnDemand, OnDemandLoader};
pub use value::{JsonMap, Value};
