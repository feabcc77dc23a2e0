//! Unit-of-Work and Transaction Coordination
//!
//! This crate coordinates connection and transaction lifecycles across one or
//! more independently configured persistence backends. It binds one opaque
//! handle per execution context, composes nested transactional calls into a
//! single physical transaction with begin-once/commit-once semantics, and
//! aggregates lifecycle operations over all registered backends without
//! failing fast.

pub mod aggregator;
pub mod backend;
pub mod context;
pub mod error;
pub mod factory;
pub mod sqlite;
pub mod transaction;
pub mod transactional;
pub mod unit_of_work;

pub use aggregator::PersistenceUnits;
pub use backend::{
    ConnectionOptions, GlobalTransaction, LocalTransaction, PersistenceBackend, PersistenceHandle,
};
pub use context::{ExecutionContext, TransactionScope, UnitId};
pub use error::{AggregatedError, CallbackError, CallbackFailure, PersistError, PersistResult};
pub use factory::{
    GlobalFacadeFactory, ResourceLocalFacadeFactory, TransactionFacadeFactory, TransactionStrategy,
};
pub use sqlite::{SqliteBackend, SqliteHandle, SqliteLocalTransaction};
pub use transaction::{InnerTransaction, OuterTransaction, TransactionFacade, TransactionHook};
pub use transactional::{Transactional, TransactionalError};
pub use unit_of_work::{PersistenceService, PersistenceUnit, UnitOfWork};
