//! The on-demand loading capability.
//!
//! An [`OnDemandLoader`] is a deferred computation bound to one map entry.
//! The map stores it inside a [`Value::OnDemand`] placeholder and calls
//! [`OnDemandLoader::load`] the first time the entry is read, passing itself as
//! the owner so the loader can fill path templates from sibling fields.
//!
//! This crate only defines the capability. REST-backed implementations live in
//! `pagewise-client`.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::LoadFailure;
use crate::value::{JsonMap, Value};

/// Produces the value of an on-demand field.
///
/// Implementations must be `Send + Sync`: records may be processed on
/// different tasks and each may resolve its own placeholders concurrently.
#[async_trait]
pub trait OnDemandLoader: Send + Sync {
    /// Compute the field value for `owner`.
    async fn load(&self, owner: &JsonMap) -> Result<Value, LoadFailure>;

    /// Short label used in `Debug` output and logs.
    fn describe(&self) -> String {
        "on-demand".into()
    }
}

/// An unresolved on-demand entry.
///
/// Cloning shares the loader, not a resolved value; every map instance
/// memoizes its own resolution.
#[derive(Clone)]
pub struct OnDemand {
    loader: Arc<dyn OnDemandLoader>,
}

impl OnDemand {
    pub fn new(loader: Arc<dyn OnDemandLoader>) -> Self {
        Self { loader }
    }

    pub fn loader(&self) -> Arc<dyn OnDemandLoader> {
        Arc::clone(&self.loader)
    }
}

impl fmt::Debug for OnDemand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OnDemand({})", self.loader.describe())
    }
}

/// Placeholders compare equal only when they share the same loader instance.
impl PartialEq for OnDemand {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.loader, &other.loader)
    }
}
