#![allow(dead_code)]

pub mod memory;

pub use memory::{MemoryBackend, MemoryHandle, MockGlobalTransaction};

use std::sync::Arc;
use unit_of_work::{PersistenceBackend, PersistenceService, PersistenceUnit};

/// A started persistence unit over a fresh in-memory spy backend.
pub async fn memory_unit(name: &str) -> (Arc<PersistenceUnit>, Arc<MemoryBackend>) {
    let backend = MemoryBackend::new();
    let unit = Arc::new(PersistenceUnit::new(
        name,
        Arc::clone(&backend) as Arc<dyn PersistenceBackend>,
    ));
    unit.start().await.expect("failed to start persistence service");
    (unit, backend)
}
