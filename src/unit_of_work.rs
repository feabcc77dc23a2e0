use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::backend::{ConnectionOptions, PersistenceBackend, PersistenceHandle};
use crate::context::{ExecutionContext, TransactionScope, UnitId};
use crate::error::{CallbackError, PersistError, PersistResult};
use crate::factory::{TransactionFacadeFactory, TransactionStrategy};
use crate::transaction::{hook_from_fn, TransactionFacade, TransactionHook};

/// Lifecycle of one persistence backend's service.
#[async_trait]
pub trait PersistenceService: Send + Sync {
    fn is_running(&self) -> bool;

    async fn start(&self) -> PersistResult<()>;

    async fn stop(&self) -> PersistResult<()>;
}

/// The logical lifetime during which a handle is open, scoped to one
/// execution context.
///
/// This is the minimal capability surface the rest of the system depends on.
/// All operations are safe to call from many independent execution contexts
/// concurrently; per-context state never leaks between contexts.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    fn is_active(&self, ctx: &ExecutionContext) -> bool;

    /// Create and bind a new handle for this context.
    async fn begin(&self, ctx: &ExecutionContext) -> PersistResult<()>;

    /// Close and unbind the handle. Idempotent on an inactive context.
    async fn end(&self, ctx: &ExecutionContext) -> PersistResult<()>;

    /// The handle bound to this context.
    fn handle(&self, ctx: &ExecutionContext) -> PersistResult<Arc<dyn PersistenceHandle>>;
}

/// One configured persistence backend: its service lifecycle, its unit of
/// work, and its transaction facade factory.
pub struct PersistenceUnit {
    id: UnitId,
    name: String,
    backend: Arc<dyn PersistenceBackend>,
    options: Option<ConnectionOptions>,
    facade_factory: Arc<dyn TransactionFacadeFactory>,
}

impl PersistenceUnit {
    /// Create a resource-local persistence unit.
    pub fn new(name: impl Into<String>, backend: Arc<dyn PersistenceBackend>) -> Self {
        Self::with_strategy(name, backend, TransactionStrategy::ResourceLocal)
    }

    /// Create a persistence unit with an explicit transaction strategy.
    pub fn with_strategy(
        name: impl Into<String>,
        backend: Arc<dyn PersistenceBackend>,
        strategy: TransactionStrategy,
    ) -> Self {
        Self {
            id: UnitId::new(),
            name: name.into(),
            backend,
            options: None,
            facade_factory: strategy.factory(),
        }
    }

    /// Options applied to every handle this unit creates.
    pub fn with_options(mut self, options: ConnectionOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create a transaction facade for the current context: the outer one if
    /// no transaction is active for this backend, a nested one otherwise.
    pub fn transaction_facade(&self, ctx: &ExecutionContext) -> PersistResult<TransactionFacade> {
        let handle = self.handle(ctx)?;
        Ok(self
            .facade_factory
            .create_facade(handle, ctx.current_outer(self.id)))
    }

    /// Install the facade as the context's current transaction for this unit.
    /// The previous value is restored when the returned scope is dropped.
    pub fn enter_transaction<'a>(
        &self,
        ctx: &'a ExecutionContext,
        facade: &TransactionFacade,
    ) -> TransactionScope<'a> {
        ctx.enter_transaction(self.id, facade)
    }

    /// Register a hook against the context's current transaction.
    pub fn add_post_commit_hook(
        &self,
        ctx: &ExecutionContext,
        hook: Arc<dyn TransactionHook>,
    ) -> PersistResult<()> {
        let outer = ctx
            .current_outer(self.id)
            .ok_or(PersistError::NoActiveTransaction)?;
        outer.add_post_commit_hook(hook)
    }

    /// Register a plain post-commit callback against the context's current
    /// transaction.
    pub fn add_post_commit_fn<F>(&self, ctx: &ExecutionContext, callback: F) -> PersistResult<()>
    where
        F: Fn() -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.add_post_commit_hook(ctx, hook_from_fn(callback))
    }
}

#[async_trait]
impl PersistenceService for PersistenceUnit {
    fn is_running(&self) -> bool {
        self.backend.is_running()
    }

    async fn start(&self) -> PersistResult<()> {
        if self.backend.is_running() {
            return Err(PersistError::AlreadyRunning {
                unit: self.name.clone(),
            });
        }
        info!(unit = %self.name, "starting persistence service");
        self.backend.start().await
    }

    async fn stop(&self) -> PersistResult<()> {
        if !self.backend.is_running() {
            return Ok(());
        }
        info!(unit = %self.name, "stopping persistence service");
        self.backend.stop().await
    }
}

#[async_trait]
impl UnitOfWork for PersistenceUnit {
    fn is_active(&self, ctx: &ExecutionContext) -> bool {
        ctx.handle(self.id).is_some()
    }

    async fn begin(&self, ctx: &ExecutionContext) -> PersistResult<()> {
        if !self.backend.is_running() {
            return Err(PersistError::NotRunning {
                unit: self.name.clone(),
            });
        }
        if self.is_active(ctx) {
            return Err(PersistError::AlreadyActive {
                unit: self.name.clone(),
            });
        }
        let handle = self.backend.create_handle(self.options.as_ref()).await?;
        if !ctx.try_bind_handle(self.id, Arc::clone(&handle)) {
            let _ = handle.close().await;
            return Err(PersistError::AlreadyActive {
                unit: self.name.clone(),
            });
        }
        debug!(unit = %self.name, "unit of work started");
        Ok(())
    }

    async fn end(&self, ctx: &ExecutionContext) -> PersistResult<()> {
        match ctx.unbind_handle(self.id) {
            None => Ok(()),
            Some(handle) => {
                debug!(unit = %self.name, "unit of work ended");
                // the handle is already unbound, so the resource is released
                // from the context even if close reports a failure
                handle.close().await
            }
        }
    }

    fn handle(&self, ctx: &ExecutionContext) -> PersistResult<Arc<dyn PersistenceHandle>> {
        ctx.handle(self.id).ok_or_else(|| PersistError::NotActive {
            unit: self.name.clone(),
        })
    }
}
