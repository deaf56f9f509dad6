//! harvest-sched: the recurring-job scheduling core.
//!
//! Three pieces:
//! - [`recurrence`] — pure next-run computation over a recurrence rule;
//! - [`manager`] — schedule lifecycle, the failure/lock state machine,
//!   per-id critical sections, and executor reconciliation;
//! - [`queue`] — the aggregated operational view merging persisted records
//!   with the executor's live status.
//!
//! Nothing here fires jobs: the external executor performs the timed
//! dispatch, this crate only decides and registers *when*.

pub mod manager;
pub mod queue;
pub mod recurrence;

pub use manager::{CreateSchedule, Mutation, ResyncReport, ScheduleManager, UpdateSchedule};
pub use queue::QueueStateAggregator;
pub use recurrence::{RecurrenceError, compute_next_run};

/// Errors surfaced by schedule operations.
///
/// Executor unreachability is deliberately absent from the mutation paths:
/// it degrades to a warning on the successful local mutation (see
/// [`manager::Mutation`]) and only [`ScheduleManager::resync`] reports it
/// as an error, since resync has nothing local to fall back on.
#[derive(Debug, thiserror::Error)]
pub enum SchedError {
    #[error(transparent)]
    Validation(#[from] harvest_types::ValidationError),
    #[error("no qualifying run time could be computed for this schedule")]
    Unschedulable,
    #[error(transparent)]
    Recurrence(#[from] RecurrenceError),
    #[error("schedule {0} not found")]
    NotFound(String),
    #[error("target {0} not found")]
    TargetNotFound(String),
    #[error(transparent)]
    Registry(#[from] harvest_executor::RegistryError),
    #[error(transparent)]
    Executor(#[from] harvest_executor::ExecutorError),
    #[error(transparent)]
    Store(#[from] harvest_store::StoreError),
}

#[cfg(test)]
pub(crate) mod test_support;
