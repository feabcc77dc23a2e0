use std::future::Future;
use std::sync::Arc;
use tracing::warn;

use crate::context::ExecutionContext;
use crate::error::{AggregatedError, PersistError};
use crate::transaction::TransactionFacade;
use crate::unit_of_work::{PersistenceUnit, UnitOfWork};

type ErrorPredicate = Box<dyn Fn(&(dyn std::error::Error + 'static)) -> bool + Send + Sync>;

/// Error returned by [`Transactional::execute`].
#[derive(Debug, thiserror::Error)]
pub enum TransactionalError<E> {
    /// The wrapped operation itself failed.
    #[error("transactional operation failed: {0}")]
    Task(E),
    /// Transaction or unit-of-work coordination failed.
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Explicit wrapper running one operation inside a transaction on each of its
/// configured persistence units.
///
/// For every unit with no active unit of work, one is begun before the
/// operation and ended after commit/rollback has completed; units of work
/// begun by the caller are left untouched. A facade is created per unit, so a
/// nested `execute` on the same unit joins the enclosing transaction instead
/// of starting a second one.
///
/// On `Ok` the transactions commit. On `Err` they roll back if the error
/// matches the rollback predicate and is not matched by the ignore predicate;
/// otherwise they still commit. The operation's error is propagated either
/// way. The default configuration rolls back on every error.
pub struct Transactional {
    units: Vec<Arc<PersistenceUnit>>,
    rollback_on: ErrorPredicate,
    ignore: ErrorPredicate,
}

impl Transactional {
    pub fn new(unit: Arc<PersistenceUnit>) -> Self {
        Self::on_units(vec![unit])
    }

    pub fn on_units(units: Vec<Arc<PersistenceUnit>>) -> Self {
        Self {
            units,
            rollback_on: Box::new(|_| true),
            ignore: Box::new(|_| false),
        }
    }

    /// Roll back only when the predicate matches the operation's error.
    pub fn rollback_on<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&(dyn std::error::Error + 'static)) -> bool + Send + Sync + 'static,
    {
        self.rollback_on = Box::new(predicate);
        self
    }

    /// Never roll back for errors matching the predicate, even when they
    /// match the rollback predicate.
    pub fn ignore<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&(dyn std::error::Error + 'static)) -> bool + Send + Sync + 'static,
    {
        self.ignore = Box::new(predicate);
        self
    }

    /// Run the operation inside a transaction on every configured unit.
    pub async fn execute<T, E, Fut>(
        &self,
        ctx: &ExecutionContext,
        op: Fut,
    ) -> Result<T, TransactionalError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        // begin units of work that are not yet active; only these are ended
        // here afterwards
        let mut began: Vec<Arc<PersistenceUnit>> = Vec::new();
        for unit in &self.units {
            if !unit.is_active(ctx) {
                match unit.begin(ctx).await {
                    Ok(()) => began.push(Arc::clone(unit)),
                    Err(error) => {
                        self.end_units(ctx, &began).await;
                        return Err(TransactionalError::Persist(error));
                    }
                }
            }
        }

        let result = self.run_in_transaction(ctx, op).await;

        let end_failures = self.end_units(ctx, &began).await;
        match result {
            Ok(value) => match end_failures.into_single_or(PersistError::EndFailures) {
                None => Ok(value),
                Some(error) => Err(TransactionalError::Persist(error)),
            },
            // end failures were already logged; the operation's error wins
            Err(error) => Err(error),
        }
    }

    async fn run_in_transaction<T, E, Fut>(
        &self,
        ctx: &ExecutionContext,
        op: Fut,
    ) -> Result<T, TransactionalError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut scopes = Vec::with_capacity(self.units.len());
        let mut active: Vec<(&str, TransactionFacade)> = Vec::with_capacity(self.units.len());
        for unit in &self.units {
            let facade = match unit.transaction_facade(ctx) {
                Ok(facade) => facade,
                Err(error) => {
                    self.rollback_all(&active).await;
                    return Err(TransactionalError::Persist(error));
                }
            };
            scopes.push(unit.enter_transaction(ctx, &facade));
            if let Err(error) = facade.begin().await {
                self.rollback_all(&active).await;
                return Err(TransactionalError::Persist(error));
            }
            active.push((unit.name(), facade));
        }

        match op.await {
            Ok(value) => {
                let mut failures = AggregatedError::new();
                for (name, facade) in &active {
                    if let Err(error) = facade.commit().await {
                        warn!(unit = %name, error = %error, "commit failed");
                        failures.add(error);
                    }
                }
                match failures.into_single_or(PersistError::CommitFailures) {
                    None => Ok(value),
                    Some(error) => Err(TransactionalError::Persist(error)),
                }
            }
            Err(error) => {
                if self.should_rollback(&error) {
                    self.rollback_all(&active).await;
                } else {
                    for (name, facade) in &active {
                        if let Err(commit_error) = facade.commit().await {
                            warn!(unit = %name, error = %commit_error, "commit failed");
                        }
                    }
                }
                Err(TransactionalError::Task(error))
            }
        }
    }

    fn should_rollback<E>(&self, error: &E) -> bool
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        (self.rollback_on)(error) && !(self.ignore)(error)
    }

    async fn rollback_all(&self, active: &[(&str, TransactionFacade)]) {
        for (name, facade) in active {
            if let Err(error) = facade.rollback().await {
                warn!(unit = %name, error = %error, "rollback failed");
            }
        }
    }

    async fn end_units(
        &self,
        ctx: &ExecutionContext,
        began: &[Arc<PersistenceUnit>],
    ) -> AggregatedError {
        let mut failures = AggregatedError::new();
        for unit in began {
            if let Err(error) = unit.end(ctx).await {
                warn!(unit = %unit.name(), error = %error, "failed to end unit of work");
                failures.add(error);
            }
        }
        failures
    }
}
