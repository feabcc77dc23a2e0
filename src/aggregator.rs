use futures::future::join_all;
use std::sync::Arc;
use tracing::warn;

use crate::backend::PersistenceHandle;
use crate::context::ExecutionContext;
use crate::error::{AggregatedError, PersistError, PersistResult};
use crate::unit_of_work::{PersistenceService, PersistenceUnit, UnitOfWork};

/// Convenience wrapper aggregating lifecycle operations over every
/// registered persistence unit.
///
/// Fan-out operations never fail fast: every unit is attempted and all
/// failures are collected into one aggregate error. Starting runs one task
/// per backend so slow backends start in parallel; begin/end/stop stay
/// sequential in registration order.
#[derive(Default)]
pub struct PersistenceUnits {
    units: Vec<Arc<PersistenceUnit>>,
}

impl PersistenceUnits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, unit: Arc<PersistenceUnit>) {
        self.units.push(unit);
    }

    pub fn units(&self) -> &[Arc<PersistenceUnit>] {
        &self.units
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Start every persistence service that is not already running, one
    /// concurrent task per backend. A failing backend never prevents the
    /// others from starting.
    pub async fn start_all_stopped(&self) -> PersistResult<()> {
        let mut tasks = Vec::with_capacity(self.units.len());
        for unit in &self.units {
            let unit = Arc::clone(unit);
            tasks.push(tokio::spawn(async move {
                if unit.is_running() {
                    return Ok(());
                }
                unit.start().await
            }));
        }

        let mut failures = AggregatedError::new();
        for result in join_all(tasks).await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(error)) => failures.add(error),
                Err(error) => {
                    failures.add(PersistError::backend(format!("start task aborted: {error}")))
                }
            }
        }
        failures.into_result(PersistError::StartFailures)
    }

    /// Stop every persistence service, collecting failures.
    pub async fn stop_all(&self) -> PersistResult<()> {
        let mut failures = AggregatedError::new();
        for unit in &self.units {
            if let Err(error) = unit.stop().await {
                warn!(unit = %unit.name(), error = %error, "failed to stop persistence service");
                failures.add(error);
            }
        }
        failures.into_result(PersistError::StopFailures)
    }

    /// Begin a unit of work on every unit; none should be active beforehand.
    pub async fn begin_all(&self, ctx: &ExecutionContext) -> PersistResult<()> {
        let mut failures = AggregatedError::new();
        for unit in &self.units {
            if let Err(error) = unit.begin(ctx).await {
                failures.add(error);
            }
        }
        failures.into_result(PersistError::BeginFailures)
    }

    /// Begin a unit of work on every unit that has none active.
    pub async fn begin_all_inactive(&self, ctx: &ExecutionContext) -> PersistResult<()> {
        let mut failures = AggregatedError::new();
        for unit in &self.units {
            if !unit.is_active(ctx) {
                if let Err(error) = unit.begin(ctx).await {
                    failures.add(error);
                }
            }
        }
        failures.into_result(PersistError::BeginFailures)
    }

    /// End the unit of work on every unit. Every unit is attempted even when
    /// an earlier one fails to end.
    pub async fn end_all(&self, ctx: &ExecutionContext) -> PersistResult<()> {
        let mut failures = AggregatedError::new();
        for unit in &self.units {
            if let Err(error) = unit.end(ctx).await {
                warn!(unit = %unit.name(), error = %error, "failed to end unit of work");
                failures.add(error);
            }
        }
        failures.into_result(PersistError::EndFailures)
    }

    /// One handle per registered unit, in registration order. Fails with
    /// `NotActive` for the first unit that has no active unit of work.
    pub fn all_handles(
        &self,
        ctx: &ExecutionContext,
    ) -> PersistResult<Vec<Arc<dyn PersistenceHandle>>> {
        self.units.iter().map(|unit| unit.handle(ctx)).collect()
    }
}
