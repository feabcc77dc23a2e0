use async_trait::async_trait;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use unit_of_work::{
    ConnectionOptions, GlobalTransaction, LocalTransaction, PersistError, PersistResult,
    PersistenceBackend, PersistenceHandle,
};

/// Spy state shared by a backend and every handle it creates: the committed
/// store, physical transaction counters and an event log for ordering
/// assertions.
#[derive(Default)]
pub struct MemoryState {
    pub starts: AtomicUsize,
    pub begun: AtomicUsize,
    pub committed: AtomicUsize,
    pub rolled_back: AtomicUsize,
    pub store: Mutex<HashMap<String, String>>,
    pub events: Mutex<Vec<String>>,
}

impl MemoryState {
    pub fn record(&self, event: &str) {
        self.events.lock().push(event.to_string());
    }
}

/// In-memory spy backend recording physical transaction activity.
pub struct MemoryBackend {
    running: AtomicBool,
    fail_start: bool,
    fail_stop: bool,
    fail_close: bool,
    pub state: Arc<MemoryState>,
}

impl MemoryBackend {
    fn with_failures(fail_start: bool, fail_stop: bool, fail_close: bool) -> Arc<Self> {
        Arc::new(Self {
            running: AtomicBool::new(false),
            fail_start,
            fail_stop,
            fail_close,
            state: Arc::new(MemoryState::default()),
        })
    }

    pub fn new() -> Arc<Self> {
        Self::with_failures(false, false, false)
    }

    pub fn failing_start() -> Arc<Self> {
        Self::with_failures(true, false, false)
    }

    pub fn failing_stop() -> Arc<Self> {
        Self::with_failures(false, true, false)
    }

    pub fn failing_close() -> Arc<Self> {
        Self::with_failures(false, false, true)
    }

    pub fn starts(&self) -> usize {
        self.state.starts.load(Ordering::SeqCst)
    }

    pub fn begun(&self) -> usize {
        self.state.begun.load(Ordering::SeqCst)
    }

    pub fn committed(&self) -> usize {
        self.state.committed.load(Ordering::SeqCst)
    }

    pub fn rolled_back(&self) -> usize {
        self.state.rolled_back.load(Ordering::SeqCst)
    }

    pub fn committed_value(&self, key: &str) -> Option<String> {
        self.state.store.lock().get(key).cloned()
    }

    pub fn events(&self) -> Vec<String> {
        self.state.events.lock().clone()
    }
}

#[async_trait]
impl PersistenceBackend for MemoryBackend {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn start(&self) -> PersistResult<()> {
        self.state.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(PersistError::backend("start failed"));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> PersistResult<()> {
        if self.fail_stop {
            return Err(PersistError::backend("stop failed"));
        }
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn create_handle(
        &self,
        _options: Option<&ConnectionOptions>,
    ) -> PersistResult<Arc<dyn PersistenceHandle>> {
        Ok(Arc::new(MemoryHandle::new(
            Arc::clone(&self.state),
            self.fail_close,
        )))
    }
}

/// Handle staging writes until the physical transaction commits them into
/// the backend's store.
pub struct MemoryHandle {
    state: Arc<MemoryState>,
    staged: Arc<Mutex<Vec<(String, String)>>>,
    txn: Arc<MemoryTransaction>,
    open: AtomicBool,
    fail_close: bool,
    pub joins: AtomicUsize,
}

impl MemoryHandle {
    fn new(state: Arc<MemoryState>, fail_close: bool) -> Self {
        let staged: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
        Self {
            txn: Arc::new(MemoryTransaction::new(
                Arc::clone(&state),
                Arc::clone(&staged),
            )),
            state,
            staged,
            open: AtomicBool::new(true),
            fail_close,
            joins: AtomicUsize::new(0),
        }
    }

    pub fn put(&self, key: &str, value: &str) {
        self.staged.lock().push((key.to_string(), value.to_string()));
    }

    /// Staged value if present, committed value otherwise.
    pub fn get(&self, key: &str) -> Option<String> {
        if let Some((_, value)) = self.staged.lock().iter().rev().find(|(k, _)| k == key) {
            return Some(value.clone());
        }
        self.state.store.lock().get(key).cloned()
    }
}

#[async_trait]
impl PersistenceHandle for MemoryHandle {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> PersistResult<()> {
        self.open.store(false, Ordering::SeqCst);
        if self.fail_close {
            return Err(PersistError::backend("close failed"));
        }
        Ok(())
    }

    fn local_transaction(&self) -> Arc<dyn LocalTransaction> {
        Arc::clone(&self.txn) as Arc<dyn LocalTransaction>
    }

    async fn join_transaction(&self) -> PersistResult<()> {
        self.joins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MemoryTransaction {
    state: Arc<MemoryState>,
    staged: Arc<Mutex<Vec<(String, String)>>>,
    active: AtomicBool,
    rollback_only: AtomicBool,
}

impl MemoryTransaction {
    fn new(state: Arc<MemoryState>, staged: Arc<Mutex<Vec<(String, String)>>>) -> Self {
        Self {
            state,
            staged,
            active: AtomicBool::new(false),
            rollback_only: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl LocalTransaction for MemoryTransaction {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn begin(&self) -> PersistResult<()> {
        if self.is_active() {
            return Err(PersistError::backend("transaction already active"));
        }
        self.state.begun.fetch_add(1, Ordering::SeqCst);
        self.state.record("begin");
        self.rollback_only.store(false, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&self) -> PersistResult<()> {
        if !self.is_active() {
            return Err(PersistError::backend("commit without active transaction"));
        }
        let mut store = self.state.store.lock();
        for (key, value) in self.staged.lock().drain(..) {
            store.insert(key, value);
        }
        drop(store);
        self.state.committed.fetch_add(1, Ordering::SeqCst);
        self.state.record("commit");
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> PersistResult<()> {
        if !self.is_active() {
            return Err(PersistError::backend("rollback without active transaction"));
        }
        self.staged.lock().clear();
        self.state.rolled_back.fetch_add(1, Ordering::SeqCst);
        self.state.record("rollback");
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn set_rollback_only(&self) {
        self.rollback_only.store(true, Ordering::SeqCst);
    }

    fn is_rollback_only(&self) -> bool {
        self.rollback_only.load(Ordering::SeqCst)
    }
}

/// Mock ambient transaction status for the global-coordination strategy.
pub struct MockGlobalTransaction {
    active: AtomicBool,
    rollback_only: AtomicBool,
    pub begun: AtomicUsize,
    pub committed: AtomicUsize,
    pub rolled_back: AtomicUsize,
}

impl MockGlobalTransaction {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            active: AtomicBool::new(false),
            rollback_only: AtomicBool::new(false),
            begun: AtomicUsize::new(0),
            committed: AtomicUsize::new(0),
            rolled_back: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl GlobalTransaction for MockGlobalTransaction {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn begin(&self) -> PersistResult<()> {
        if self.is_active() {
            return Err(PersistError::backend("global transaction already active"));
        }
        self.begun.fetch_add(1, Ordering::SeqCst);
        self.rollback_only.store(false, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&self) -> PersistResult<()> {
        if !self.is_active() {
            return Err(PersistError::backend("commit without active global transaction"));
        }
        self.committed.fetch_add(1, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> PersistResult<()> {
        if !self.is_active() {
            return Err(PersistError::backend("rollback without active global transaction"));
        }
        self.rolled_back.fetch_add(1, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn set_rollback_only(&self) {
        self.rollback_only.store(true, Ordering::SeqCst);
    }

    fn is_rollback_only(&self) -> bool {
        self.rollback_only.load(Ordering::SeqCst)
    }
}
