use std::sync::Arc;

use crate::backend::{GlobalTransaction, PersistenceHandle};
use crate::transaction::{
    GlobalPhysical, InnerTransaction, LocalPhysical, OuterTransaction, PhysicalTransaction,
    TransactionFacade,
};

/// Factory deciding whether a transactional call is the outermost one for its
/// backend or a nested one, and producing the matching facade variant.
pub trait TransactionFacadeFactory: Send + Sync {
    fn create_facade(
        &self,
        handle: Arc<dyn PersistenceHandle>,
        current_outer: Option<Arc<OuterTransaction>>,
    ) -> TransactionFacade;
}

/// Strategy over the handle's own resource-local transaction object.
pub struct ResourceLocalFacadeFactory;

impl TransactionFacadeFactory for ResourceLocalFacadeFactory {
    fn create_facade(
        &self,
        handle: Arc<dyn PersistenceHandle>,
        current_outer: Option<Arc<OuterTransaction>>,
    ) -> TransactionFacade {
        let txn = handle.local_transaction();
        let active = txn.is_active();
        let physical: Arc<dyn PhysicalTransaction> = Arc::new(LocalPhysical::new(txn));
        if active {
            TransactionFacade::Inner(InnerTransaction::new(physical, current_outer))
        } else {
            TransactionFacade::Outer(Arc::new(OuterTransaction::new(physical)))
        }
    }
}

/// Strategy over an ambient, globally-coordinated transaction: the outer
/// facade starts the ambient transaction and joins the handle to it; nested
/// facades only join.
pub struct GlobalFacadeFactory {
    status: Arc<dyn GlobalTransaction>,
}

impl GlobalFacadeFactory {
    pub fn new(status: Arc<dyn GlobalTransaction>) -> Self {
        Self { status }
    }
}

impl TransactionFacadeFactory for GlobalFacadeFactory {
    fn create_facade(
        &self,
        handle: Arc<dyn PersistenceHandle>,
        current_outer: Option<Arc<OuterTransaction>>,
    ) -> TransactionFacade {
        let active = self.status.is_active();
        let physical: Arc<dyn PhysicalTransaction> =
            Arc::new(GlobalPhysical::new(Arc::clone(&self.status), handle));
        if active {
            TransactionFacade::Inner(InnerTransaction::new(physical, current_outer))
        } else {
            TransactionFacade::Outer(Arc::new(OuterTransaction::new(physical)))
        }
    }
}

/// Per-backend choice of transaction coordination, made at configuration
/// time.
#[derive(Clone)]
pub enum TransactionStrategy {
    /// Drive the handle's own transaction object directly.
    ResourceLocal,
    /// Coordinate through the given ambient transaction status object.
    Global(Arc<dyn GlobalTransaction>),
}

impl TransactionStrategy {
    pub(crate) fn factory(&self) -> Arc<dyn TransactionFacadeFactory> {
        match self {
            Self::ResourceLocal => Arc::new(ResourceLocalFacadeFactory),
            Self::Global(status) => Arc::new(GlobalFacadeFactory::new(Arc::clone(status))),
        }
    }
}
