use async_trait::async_trait;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::PersistResult;

/// Backend-specific options applied when a new handle is created.
///
/// The keys and values are implementation defined; the shipped SQLite backend
/// applies them as PRAGMA settings on the freshly acquired connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectionOptions {
    values: BTreeMap<String, String>,
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A persistence provider: service lifecycle plus handle creation.
///
/// Implementations connect to (and disconnect from) the underlying store and
/// produce one opaque handle per unit of work.
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Whether the backend has been started and can create handles.
    fn is_running(&self) -> bool;

    /// Connect to the underlying store.
    async fn start(&self) -> PersistResult<()>;

    /// Disconnect from the underlying store.
    async fn stop(&self) -> PersistResult<()>;

    /// Create a new handle, applying the given options if any.
    async fn create_handle(
        &self,
        options: Option<&ConnectionOptions>,
    ) -> PersistResult<Arc<dyn PersistenceHandle>>;
}

/// Opaque resource representing one open connection/session.
///
/// A handle is owned exclusively by the unit of work of one execution context
/// and is never shared across contexts.
#[async_trait]
pub trait PersistenceHandle: Send + Sync {
    fn is_open(&self) -> bool;

    /// Release the underlying resource. Called exactly once, when the owning
    /// unit of work ends.
    async fn close(&self) -> PersistResult<()>;

    /// The handle's own resource-local transaction object.
    fn local_transaction(&self) -> Arc<dyn LocalTransaction>;

    /// Join the handle to an already-running globally-coordinated
    /// transaction. A no-op for purely resource-local handles.
    async fn join_transaction(&self) -> PersistResult<()>;

    /// Downcasting access to the concrete handle type.
    fn as_any(&self) -> &dyn Any;
}

/// A resource-local transaction object belonging to a single handle.
#[async_trait]
pub trait LocalTransaction: Send + Sync {
    fn is_active(&self) -> bool;

    async fn begin(&self) -> PersistResult<()>;

    async fn commit(&self) -> PersistResult<()>;

    async fn rollback(&self) -> PersistResult<()>;

    /// Mark the transaction so that the eventual outcome is a rollback.
    /// Cannot be unset.
    fn set_rollback_only(&self);

    fn is_rollback_only(&self) -> bool;
}

/// Status object of an ambient, globally-coordinated transaction shared by
/// every handle that joins it.
#[async_trait]
pub trait GlobalTransaction: Send + Sync {
    fn is_active(&self) -> bool;

    async fn begin(&self) -> PersistResult<()>;

    async fn commit(&self) -> PersistResult<()>;

    async fn rollback(&self) -> PersistResult<()>;

    /// Mark the transaction so that the eventual outcome is a rollback.
    /// Cannot be unset.
    fn set_rollback_only(&self);

    fn is_rollback_only(&self) -> bool;
}
