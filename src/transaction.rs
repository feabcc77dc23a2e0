use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::backend::{GlobalTransaction, LocalTransaction, PersistenceHandle};
use crate::error::{CallbackError, CallbackFailure, PersistError, PersistResult};

/// Hook invoked around a successful physical commit.
///
/// `pre_commit` runs immediately before the physical commit is finalized and
/// `post_commit` immediately after, both in registration order. The default
/// `pre_commit` is a no-op, which gives the plain post-commit callback case.
/// Hook failures never abort the transaction; they are collected and reported
/// once from [`commit`] with the first failure as primary and the rest
/// suppressed.
///
/// [`commit`]: TransactionFacade::commit
#[async_trait]
pub trait TransactionHook: Send + Sync {
    async fn pre_commit(&self) -> Result<(), CallbackError> {
        Ok(())
    }

    async fn post_commit(&self) -> Result<(), CallbackError>;
}

struct FnHook<F>(F);

#[async_trait]
impl<F> TransactionHook for FnHook<F>
where
    F: Fn() -> Result<(), CallbackError> + Send + Sync,
{
    async fn post_commit(&self) -> Result<(), CallbackError> {
        (self.0)()
    }
}

/// The physical transaction shared by one nesting chain, hiding the
/// difference between a resource-local transaction object and an ambient
/// globally-coordinated one.
#[async_trait]
pub(crate) trait PhysicalTransaction: Send + Sync {
    async fn begin(&self) -> PersistResult<()>;

    /// Join the handle to the already-running transaction (inner begin).
    async fn join(&self) -> PersistResult<()>;

    async fn commit(&self) -> PersistResult<()>;

    async fn rollback(&self) -> PersistResult<()>;

    fn set_rollback_only(&self);

    fn is_rollback_only(&self) -> bool;
}

pub(crate) struct LocalPhysical {
    txn: Arc<dyn LocalTransaction>,
}

impl LocalPhysical {
    pub(crate) fn new(txn: Arc<dyn LocalTransaction>) -> Self {
        Self { txn }
    }
}

#[async_trait]
impl PhysicalTransaction for LocalPhysical {
    async fn begin(&self) -> PersistResult<()> {
        self.txn.begin().await
    }

    async fn join(&self) -> PersistResult<()> {
        // the handle owns its local transaction, there is nothing to join
        Ok(())
    }

    async fn commit(&self) -> PersistResult<()> {
        self.txn.commit().await
    }

    async fn rollback(&self) -> PersistResult<()> {
        self.txn.rollback().await
    }

    fn set_rollback_only(&self) {
        self.txn.set_rollback_only();
    }

    fn is_rollback_only(&self) -> bool {
        self.txn.is_rollback_only()
    }
}

pub(crate) struct GlobalPhysical {
    status: Arc<dyn GlobalTransaction>,
    handle: Arc<dyn PersistenceHandle>,
}

impl GlobalPhysical {
    pub(crate) fn new(status: Arc<dyn GlobalTransaction>, handle: Arc<dyn PersistenceHandle>) -> Self {
        Self { status, handle }
    }
}

#[async_trait]
impl PhysicalTransaction for GlobalPhysical {
    async fn begin(&self) -> PersistResult<()> {
        self.status.begin().await?;
        if let Err(join_error) = self.handle.join_transaction().await {
            // the ambient transaction must not leak past the facade that owns it
            if let Err(rollback_error) = self.status.rollback().await {
                warn!(
                    error = %rollback_error,
                    "failed to roll back ambient transaction after join failure"
                );
            }
            return Err(join_error);
        }
        Ok(())
    }

    async fn join(&self) -> PersistResult<()> {
        self.handle.join_transaction().await
    }

    async fn commit(&self) -> PersistResult<()> {
        self.status.commit().await
    }

    async fn rollback(&self) -> PersistResult<()> {
        self.status.rollback().await
    }

    fn set_rollback_only(&self) {
        self.status.set_rollback_only();
    }

    fn is_rollback_only(&self) -> bool {
        self.status.is_rollback_only()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnPhase {
    NotStarted,
    Active,
    /// Transient guard state while a commit is in flight; rejects concurrent
    /// mutation of the same outer. A failed physical commit leaves the facade
    /// here, terminal.
    Committing,
    Committed,
    RolledBack,
}

impl TxnPhase {
    fn name(self) -> &'static str {
        match self {
            TxnPhase::NotStarted => "not started",
            TxnPhase::Active => "active",
            TxnPhase::Committing => "committing",
            TxnPhase::Committed => "committed",
            TxnPhase::RolledBack => "rolled back",
        }
    }
}

struct OuterState {
    phase: TxnPhase,
    hooks: Vec<Arc<dyn TransactionHook>>,
}

/// The transaction that owns the physical begin/commit/rollback for one
/// nesting chain. Exactly one outer exists per physical transaction.
pub struct OuterTransaction {
    txn: Arc<dyn PhysicalTransaction>,
    state: Mutex<OuterState>,
}

impl OuterTransaction {
    pub(crate) fn new(txn: Arc<dyn PhysicalTransaction>) -> Self {
        Self {
            txn,
            state: Mutex::new(OuterState {
                phase: TxnPhase::NotStarted,
                hooks: Vec::new(),
            }),
        }
    }

    pub(crate) async fn begin(&self) -> PersistResult<()> {
        {
            let mut state = self.state.lock();
            if state.phase != TxnPhase::NotStarted {
                return Err(PersistError::InvalidTransactionState {
                    operation: "begin",
                    state: state.phase.name(),
                });
            }
            state.phase = TxnPhase::Active;
        }
        match self.txn.begin().await {
            Ok(()) => Ok(()),
            Err(error) => {
                self.state.lock().phase = TxnPhase::NotStarted;
                Err(error)
            }
        }
    }

    pub(crate) async fn commit(&self) -> PersistResult<()> {
        // Decide the outcome and drain the hooks under the state lock, then
        // perform the physical work without it. The phase transitions make
        // commit, rollback and hook registration mutually exclusive.
        let hooks = {
            let mut state = self.state.lock();
            if state.phase != TxnPhase::Active {
                return Err(PersistError::InvalidTransactionState {
                    operation: "commit",
                    state: state.phase.name(),
                });
            }
            if self.txn.is_rollback_only() {
                state.phase = TxnPhase::RolledBack;
                state.hooks.clear();
                None
            } else {
                state.phase = TxnPhase::Committing;
                Some(std::mem::take(&mut state.hooks))
            }
        };

        let hooks = match hooks {
            None => {
                debug!("rollback-only flag is set, rolling back instead of committing");
                return self.txn.rollback().await;
            }
            Some(hooks) => hooks,
        };

        let mut failures: Vec<CallbackError> = Vec::new();
        for hook in &hooks {
            if let Err(error) = hook.pre_commit().await {
                failures.push(error);
            }
        }

        self.txn.commit().await?;
        self.state.lock().phase = TxnPhase::Committed;

        for hook in &hooks {
            if let Err(error) = hook.post_commit().await {
                failures.push(error);
            }
        }

        let mut failures = failures.into_iter();
        match failures.next() {
            None => Ok(()),
            Some(primary) => Err(CallbackFailure {
                primary,
                suppressed: failures.collect(),
            }
            .into()),
        }
    }

    pub(crate) async fn rollback(&self) -> PersistResult<()> {
        {
            let mut state = self.state.lock();
            if state.phase != TxnPhase::Active {
                return Err(PersistError::InvalidTransactionState {
                    operation: "roll back",
                    state: state.phase.name(),
                });
            }
            state.phase = TxnPhase::RolledBack;
            state.hooks.clear();
        }
        self.txn.rollback().await
    }

    pub(crate) fn add_post_commit_hook(&self, hook: Arc<dyn TransactionHook>) -> PersistResult<()> {
        let mut state = self.state.lock();
        if state.phase != TxnPhase::Active {
            return Err(PersistError::NoActiveTransaction);
        }
        state.hooks.push(hook);
        Ok(())
    }
}

/// A nested call that delegates to its enclosing outer transaction. Begin
/// only joins the handle, commit has no effect and rollback marks the shared
/// rollback-only flag.
#[derive(Clone)]
pub struct InnerTransaction {
    txn: Arc<dyn PhysicalTransaction>,
    parent: Option<Arc<OuterTransaction>>,
}

impl InnerTransaction {
    pub(crate) fn new(txn: Arc<dyn PhysicalTransaction>, parent: Option<Arc<OuterTransaction>>) -> Self {
        Self { txn, parent }
    }
}

/// One attempt to run inside a transaction.
///
/// The first facade created for a backend within an execution context is the
/// outer one and owns the physical transaction; facades created while that
/// transaction is active are inner and delegate to it. Calling code never
/// needs to know which variant it holds, nor whether the transaction is
/// resource-local or globally coordinated.
#[derive(Clone)]
pub enum TransactionFacade {
    Outer(Arc<OuterTransaction>),
    Inner(InnerTransaction),
}

impl TransactionFacade {
    /// Start the transaction. The outer facade starts the physical
    /// transaction; an inner facade only joins the handle to it.
    pub async fn begin(&self) -> PersistResult<()> {
        match self {
            Self::Outer(outer) => outer.begin().await,
            Self::Inner(inner) => inner.txn.join().await,
        }
    }

    /// Commit the transaction.
    ///
    /// Only the outer facade commits; inner facades are a no-op. If any
    /// facade in the chain marked rollback-only, the physical outcome is a
    /// rollback instead. On a successful physical commit every registered
    /// hook fires; hook failures are collected into one
    /// [`CallbackFailure`](crate::CallbackFailure) without un-committing the
    /// transaction.
    pub async fn commit(&self) -> PersistResult<()> {
        match self {
            Self::Outer(outer) => outer.commit().await,
            Self::Inner(_) => Ok(()),
        }
    }

    /// Roll the transaction back.
    ///
    /// The outer facade performs the physical rollback unconditionally; an
    /// inner facade marks the rollback-only flag so the eventual outer commit
    /// becomes a rollback. The flag cannot be unset.
    pub async fn rollback(&self) -> PersistResult<()> {
        match self {
            Self::Outer(outer) => outer.rollback().await,
            Self::Inner(inner) => {
                inner.txn.set_rollback_only();
                Ok(())
            }
        }
    }

    /// Register a hook to run around the eventual physical commit. Inner
    /// facades delegate to their outer; the hook will not fire until the
    /// outermost call commits, and never fires on rollback.
    pub fn add_post_commit_hook(&self, hook: Arc<dyn TransactionHook>) -> PersistResult<()> {
        match self {
            Self::Outer(outer) => outer.add_post_commit_hook(hook),
            Self::Inner(inner) => match &inner.parent {
                Some(parent) => parent.add_post_commit_hook(hook),
                None => Err(PersistError::NoActiveTransaction),
            },
        }
    }

    /// Register a plain post-commit callback.
    pub fn add_post_commit_fn<F>(&self, callback: F) -> PersistResult<()>
    where
        F: Fn() -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.add_post_commit_hook(Arc::new(FnHook(callback)))
    }

    pub fn is_outer(&self) -> bool {
        matches!(self, Self::Outer(_))
    }
}

pub(crate) fn hook_from_fn<F>(callback: F) -> Arc<dyn TransactionHook>
where
    F: Fn() -> Result<(), CallbackError> + Send + Sync + 'static,
{
    Arc::new(FnHook(callback))
}
