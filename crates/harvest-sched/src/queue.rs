//! Aggregated operational view of the job queue.
//!
//! Merges persisted schedule records with the executor's live job status.
//! Read-only; runs concurrently with record mutations and tolerates a
//! stale read, since the executor, not this view, triggers jobs.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use harvest_executor::{Executor, JobStatus};
use harvest_store::ScheduleStore;
use harvest_types::{QueueState, RunningJob, ScheduleRecord, ScheduleStatus, ScheduleStatusView};

use crate::SchedError;

pub struct QueueStateAggregator {
    store: Arc<ScheduleStore>,
    executor: Arc<dyn Executor>,
}

impl QueueStateAggregator {
    pub fn new(store: Arc<ScheduleStore>, executor: Arc<dyn Executor>) -> Self {
        Self { store, executor }
    }

    /// Jobs the executor currently reports as running, keyed by schedule
    /// id. The flag is false when the executor could not be queried; the
    /// snapshot then degrades to local state instead of failing the read.
    async fn running_jobs(&self) -> (HashMap<String, Option<DateTime<Utc>>>, bool) {
        match self.executor.list_jobs().await {
            Ok(jobs) => (
                jobs.into_iter()
                    .filter(|j| j.status == JobStatus::Running)
                    .map(|j| (j.id, j.last_run))
                    .collect(),
                true,
            ),
            Err(e) => {
                warn!("Executor job listing failed: {e}");
                (HashMap::new(), false)
            }
        }
    }

    /// Point-in-time aggregate: how much is queued, what is running right
    /// now, and when the next dispatch is due.
    pub async fn get_queue_state(&self) -> Result<QueueState, SchedError> {
        let records = self.store.list_all().await?;
        let (running, executor_reachable) = self.running_jobs().await;

        let running_jobs = records
            .iter()
            .filter_map(|r| {
                running.get(&r.id).map(|started_at| RunningJob {
                    id: r.id.clone(),
                    started_at: *started_at,
                })
            })
            .collect();
        let queued_count = records.iter().filter(|r| r.active).count();
        let next_run = records
            .iter()
            .filter(|r| r.dispatchable())
            .filter_map(|r| r.next_run)
            .min();

        Ok(QueueState {
            queued_count,
            running_jobs,
            next_run,
            executor_reachable,
        })
    }

    /// Per-schedule classification rows for the admin listing.
    pub async fn list_statuses(&self) -> Result<Vec<ScheduleStatusView>, SchedError> {
        let records = self.store.list_all().await?;
        let (running, _) = self.running_jobs().await;

        Ok(records
            .iter()
            .map(|r| ScheduleStatusView {
                id: r.id.clone(),
                target_id: r.target_id.clone(),
                status: classify(r, running.contains_key(&r.id)),
                next_run: r.next_run,
                last_run: r.last_run,
                failed_attempts: r.failed_attempts,
            })
            .collect())
    }
}

/// Classify one schedule, descending precedence: a job the executor is
/// actually running outranks every locally derived state, so a record is
/// counted exactly once.
pub fn classify(record: &ScheduleRecord, executor_running: bool) -> ScheduleStatus {
    if executor_running {
        ScheduleStatus::Executing
    } else if record.lock.locked {
        ScheduleStatus::Locked
    } else if record.active {
        ScheduleStatus::ActiveWaiting
    } else {
        ScheduleStatus::Paused
    }
}
