//! Runtime adapter contract.
//!
//! Policies that need the host runtime (deferred work after the response
//! is sent, or shared stores such as rate-limit counters) reach it through
//! [`RuntimeAdapter`]. The pipeline only passes the adapter along; stores
//! are opaque and own their concurrency.

use crate::types::BoxFuture;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A type-erased store handle.
pub type StoreHandle = Arc<dyn Any + Send + Sync>;

/// The stores a runtime may provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    /// Rate-limit counters.
    RateLimit,
    /// Circuit-breaker state.
    CircuitBreaker,
    /// Cached responses.
    Cache,
}

/// Host runtime services available to policies.
pub trait RuntimeAdapter: Send + Sync + 'static {
    /// Schedules `task` to run after the response is sent. Best effort.
    fn wait_until(&self, task: BoxFuture<'static, ()>);

    /// Returns the store of the given kind, if the runtime provides one.
    fn store(&self, kind: StoreKind) -> Option<StoreHandle>;
}

/// Returns a store downcast to its concrete type.
#[must_use]
pub fn typed_store<T: Any + Send + Sync>(
    adapter: &dyn RuntimeAdapter,
    kind: StoreKind,
) -> Option<Arc<T>> {
    adapter.store(kind).and_then(|store| store.downcast::<T>().ok())
}

/// A [`RuntimeAdapter`] backed by the current Tokio runtime.
#[derive(Default, Clone)]
pub struct TokioAdapter {
    stores: HashMap<StoreKind, StoreHandle>,
}

impl TokioAdapter {
    /// Creates an adapter with no stores.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a store.
    #[must_use]
    pub fn with_store<T: Any + Send + Sync>(mut self, kind: StoreKind, store: Arc<T>) -> Self {
        self.stores.insert(kind, store);
        self
    }
}

impl fmt::Debug for TokioAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioAdapter")
            .field("stores", &self.stores.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RuntimeAdapter for TokioAdapter {
    fn wait_until(&self, task: BoxFuture<'static, ()>) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(task);
            }
            Err(_) => tracing::warn!("wait_until called outside a Tokio runtime, task dropped"),
        }
    }

    fn store(&self, kind: StoreKind) -> Option<StoreHandle> {
        self.stores.get(&kind).cloned()
    }
}
