use std::fmt;

/// Error produced by a post-commit hook.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type for persistence coordination operations.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// A handle was requested while no unit of work is bound to the context.
    #[error("no unit of work is active for persistence unit '{unit}'")]
    NotActive { unit: String },

    /// `begin` was called while a unit of work is already bound.
    #[error("unit of work has already been started for persistence unit '{unit}'")]
    AlreadyActive { unit: String },

    /// A unit of work was begun while the persistence service is stopped.
    #[error("persistence service '{unit}' is not running")]
    NotRunning { unit: String },

    /// `start` was called on a persistence service that is already running.
    #[error("persistence service '{unit}' is already running")]
    AlreadyRunning { unit: String },

    /// A hook was registered with no outer transaction in progress.
    #[error("cannot register a post-commit hook outside of an active transaction")]
    NoActiveTransaction,

    /// A facade operation was attempted in a state that does not allow it.
    #[error("cannot {operation} a transaction that is {state}")]
    InvalidTransactionState {
        operation: &'static str,
        state: &'static str,
    },

    /// The physical commit succeeded but one or more hooks failed.
    #[error(transparent)]
    Callback(#[from] CallbackFailure),

    /// One or more persistence services failed to start.
    #[error("failed to start persistence services: {0}")]
    StartFailures(AggregatedError),

    /// One or more persistence services failed to stop.
    #[error("failed to stop persistence services: {0}")]
    StopFailures(AggregatedError),

    /// One or more units of work failed to begin.
    #[error("failed to begin units of work: {0}")]
    BeginFailures(AggregatedError),

    /// One or more units of work failed to end.
    #[error("failed to end units of work: {0}")]
    EndFailures(AggregatedError),

    /// One or more transactions failed to commit.
    #[error("failed to commit transactions: {0}")]
    CommitFailures(AggregatedError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Failure reported by a custom persistence backend.
    #[error("{message}")]
    Backend { message: String },
}

impl PersistError {
    /// Create a backend error from an arbitrary message.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// Result type for persistence coordination operations.
pub type PersistResult<T> = Result<T, PersistError>;

/// The physical commit succeeded but delivery of one or more hooks failed.
///
/// The first failure is the primary cause; every further failure is kept in
/// `suppressed`, in the order the hooks were registered.
#[derive(Debug, thiserror::Error)]
#[error("transaction committed but {} post-commit hook(s) failed: {primary}", .suppressed.len() + 1)]
pub struct CallbackFailure {
    pub primary: CallbackError,
    pub suppressed: Vec<CallbackError>,
}

/// Ordered collection of failures produced by one fan-out lifecycle operation.
///
/// An empty aggregate means success; callers build one up with [`add`] while
/// attempting every backend and convert it with [`into_result`] at the end.
///
/// [`add`]: AggregatedError::add
/// [`into_result`]: AggregatedError::into_result
#[derive(Debug, Default)]
pub struct AggregatedError {
    causes: Vec<PersistError>,
}

impl AggregatedError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one more underlying failure.
    pub fn add(&mut self, cause: PersistError) {
        self.causes.push(cause);
    }

    pub fn is_empty(&self) -> bool {
        self.causes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.causes.len()
    }

    /// The first recorded failure, if any.
    pub fn first(&self) -> Option<&PersistError> {
        self.causes.first()
    }

    /// All recorded failures, in the order they occurred.
    pub fn causes(&self) -> &[PersistError] {
        &self.causes
    }

    pub fn into_causes(self) -> Vec<PersistError> {
        self.causes
    }

    /// `Ok(())` if no failure was recorded, otherwise the wrapped aggregate.
    pub fn into_result(self, wrap: impl FnOnce(AggregatedError) -> PersistError) -> PersistResult<()> {
        if self.causes.is_empty() {
            Ok(())
        } else {
            Err(wrap(self))
        }
    }

    /// Collapse to nothing (no failures), the sole cause, or the wrapped
    /// aggregate when there is more than one.
    pub fn into_single_or(
        self,
        wrap: impl FnOnce(AggregatedError) -> PersistError,
    ) -> Option<PersistError> {
        match self.causes.len() {
            0 => None,
            1 => self.causes.into_iter().next(),
            _ => Some(wrap(self)),
        }
    }
}

impl fmt::Display for AggregatedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure(s)", self.causes.len())?;
        for (index, cause) in self.causes.iter().enumerate() {
            write!(f, "; [{index}] {cause}")?;
        }
        Ok(())
    }
}
