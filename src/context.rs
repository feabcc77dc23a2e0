use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::backend::PersistenceHandle;
use crate::transaction::{OuterTransaction, TransactionFacade};

/// Identifier of one registered persistence unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitId(Uuid);

impl UnitId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

#[derive(Default)]
struct UnitSlot {
    handle: Option<Arc<dyn PersistenceHandle>>,
    current: Option<Arc<OuterTransaction>>,
}

/// Explicit per-task state: one slot per persistence unit holding the bound
/// handle and the current outer transaction, if any.
///
/// Create one context per logical task/request and pass it to every
/// operation. A context must never be shared between independent tasks;
/// nested calls contributing to the same logical unit of work share it.
#[derive(Default)]
pub struct ExecutionContext {
    slots: Mutex<HashMap<UnitId, UnitSlot>>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn handle(&self, id: UnitId) -> Option<Arc<dyn PersistenceHandle>> {
        self.slots
            .lock()
            .get(&id)
            .and_then(|slot| slot.handle.clone())
    }

    /// Bind a handle to the unit's slot. Returns false if one is already
    /// bound, in which case the caller keeps ownership of `handle`.
    pub(crate) fn try_bind_handle(&self, id: UnitId, handle: Arc<dyn PersistenceHandle>) -> bool {
        let mut slots = self.slots.lock();
        let slot = slots.entry(id).or_default();
        if slot.handle.is_some() {
            return false;
        }
        slot.handle = Some(handle);
        true
    }

    pub(crate) fn unbind_handle(&self, id: UnitId) -> Option<Arc<dyn PersistenceHandle>> {
        self.slots
            .lock()
            .get_mut(&id)
            .and_then(|slot| slot.handle.take())
    }

    pub(crate) fn current_outer(&self, id: UnitId) -> Option<Arc<OuterTransaction>> {
        self.slots
            .lock()
            .get(&id)
            .and_then(|slot| slot.current.clone())
    }

    fn set_current(&self, id: UnitId, value: Option<Arc<OuterTransaction>>) {
        let mut slots = self.slots.lock();
        slots.entry(id).or_default().current = value;
    }

    /// Enter a transaction scope: saves the previous current outer, installs
    /// the facade's outer if this call created one, and restores the previous
    /// value when the returned guard is dropped.
    pub(crate) fn enter_transaction<'a>(
        &'a self,
        id: UnitId,
        facade: &TransactionFacade,
    ) -> TransactionScope<'a> {
        let previous = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(id).or_default();
            let previous = slot.current.clone();
            if let TransactionFacade::Outer(outer) = facade {
                slot.current = Some(Arc::clone(outer));
            }
            previous
        };
        TransactionScope {
            ctx: self,
            id,
            previous,
        }
    }
}

/// Guard restoring the previously current outer transaction on drop,
/// unconditionally, so non-transactional code resumes cleanly after a
/// transactional block.
pub struct TransactionScope<'a> {
    ctx: &'a ExecutionContext,
    id: UnitId,
    previous: Option<Arc<OuterTransaction>>,
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        self.ctx.set_current(self.id, self.previous.take());
    }
}
