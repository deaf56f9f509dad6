//! Schedule lifecycle management.
//!
//! Owns every mutation of persisted schedule records, the failure/lock
//! state machine, and reconciliation with the executor. Mutations on the
//! same record id serialize through a per-id async mutex so a failure
//! report arriving mid-update cannot leave the stored record and the
//! executor registration divergent.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use harvest_executor::{Executor, SubmitParams, TargetRegistry};
use harvest_store::ScheduleStore;
use harvest_types::{
    ExecutionError, ExecutionOutcome, FrequencyType, ScheduleLock, ScheduleRecord, TimeSlotConfig,
    ValidityWindow, validate_priority, validate_recurrence,
};

use crate::recurrence::compute_next_run;
use crate::SchedError;

/// Reason recorded when the failure threshold locks a schedule.
const LOCK_REASON: &str = "consecutive execution failures reached the lock threshold";

/// Create request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSchedule {
    pub target_id: String,
    pub frequency: FrequencyType,
    pub configurations: Vec<TimeSlotConfig>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity_window: Option<ValidityWindow>,
}

fn default_priority() -> u8 {
    5
}

/// Partial update; absent fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSchedule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<FrequencyType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configurations: Option<Vec<TimeSlotConfig>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity_window: Option<ValidityWindow>,
}

/// Outcome of a schedule mutation. The local state change always took
/// effect; `executor_warning` is set when the executor could not be kept
/// in step and a later resync will repair the divergence.
#[derive(Debug, Clone, Serialize)]
pub struct Mutation {
    pub record: ScheduleRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor_warning: Option<String>,
}

/// Counters from a reconciliation pass.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ResyncReport {
    pub cancelled: usize,
    pub submitted: usize,
}

/// Owns the schedule record lifecycle and invariant enforcement.
///
/// Constructed once at startup with its collaborators injected; the
/// executor client never references back.
pub struct ScheduleManager {
    store: Arc<ScheduleStore>,
    executor: Arc<dyn Executor>,
    registry: Arc<dyn TargetRegistry>,
    failure_lock_threshold: u32,
    id_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ScheduleManager {
    pub fn new(
        store: Arc<ScheduleStore>,
        executor: Arc<dyn Executor>,
        registry: Arc<dyn TargetRegistry>,
        failure_lock_threshold: u32,
    ) -> Self {
        Self {
            store,
            executor,
            registry,
            failure_lock_threshold,
            id_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The per-id critical-section handle for a record.
    async fn id_lock(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.id_locks.lock().await;
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Next run for a record's rule, clamped to its validity window.
    fn compute_clamped(
        &self,
        record: &ScheduleRecord,
        from: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, SchedError> {
        let from = match record.validity_window {
            Some(window) if window.from > from => window.from,
            _ => from,
        };
        let next = compute_next_run(record.frequency, &record.configurations, from)?;
        Ok(next.filter(|n| record.validity_window.is_none_or(|w| *n <= w.to)))
    }

    /// Register the record with the executor; unreachability degrades to a
    /// warning on the already-persisted local state.
    async fn register(&self, record: &ScheduleRecord, url: &str) -> Option<String> {
        let Some(next_run) = record.next_run else {
            return None;
        };
        let params = SubmitParams {
            job_id: record.id.clone(),
            next_run,
            url: url.to_string(),
            config: serde_json::json!({
                "frequency": record.frequency.as_str(),
                "configurations": record.configurations,
                "priority": record.priority,
                "tags": record.tags,
            }),
        };
        match self.executor.submit(&params).await {
            Ok(()) => None,
            Err(e) => {
                warn!(schedule_id = %record.id, "Executor submit failed: {e}");
                Some(format!("executor registration failed: {e}"))
            }
        }
    }

    async fn unregister(&self, id: &str) -> Option<String> {
        match self.executor.cancel(id).await {
            Ok(()) => None,
            Err(e) => {
                warn!(schedule_id = %id, "Executor cancel failed: {e}");
                Some(format!("executor cancellation failed: {e}"))
            }
        }
    }

    /// Re-read the target's URL; `None` defers registration to resync.
    async fn target_url(&self, target_id: &str) -> Option<String> {
        match self.registry.get_target(target_id).await {
            Ok(Some(target)) => Some(target.url),
            Ok(None) => {
                warn!(target_id, "Target vanished from the registry");
                None
            }
            Err(e) => {
                warn!(target_id, "Registry lookup failed: {e}");
                None
            }
        }
    }

    async fn register_via_registry(&self, record: &ScheduleRecord) -> Option<String> {
        match self.target_url(&record.target_id).await {
            Some(url) => self.register(record, &url).await,
            None => Some("target unavailable; executor registration deferred to resync".into()),
        }
    }

    // ─── Operations ─────────────────────────────────────────

    pub async fn get(&self, id: &str) -> Result<ScheduleRecord, SchedError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| SchedError::NotFound(id.to_string()))
    }

    pub async fn list(&self) -> Result<Vec<ScheduleRecord>, SchedError> {
        Ok(self.store.list_all().await?)
    }

    /// Create a schedule for a target. Nothing persists unless validation
    /// passes, the target exists, and a next run can be computed.
    pub async fn create(&self, req: CreateSchedule) -> Result<Mutation, SchedError> {
        validate_recurrence(req.frequency, &req.configurations)?;
        validate_priority(req.priority)?;

        let target = self
            .registry
            .get_target(&req.target_id)
            .await?
            .ok_or_else(|| SchedError::TargetNotFound(req.target_id.clone()))?;

        let now = Utc::now();
        let mut record = ScheduleRecord {
            id: uuid::Uuid::new_v4().to_string(),
            target_id: req.target_id,
            frequency: req.frequency,
            configurations: req.configurations,
            active: true,
            next_run: None,
            last_run: None,
            failed_attempts: 0,
            last_error: None,
            lock: ScheduleLock::default(),
            tags: req.tags,
            priority: req.priority,
            validity_window: req.validity_window,
            created_at: now,
        };
        record.next_run = Some(
            self.compute_clamped(&record, now)?
                .ok_or(SchedError::Unschedulable)?,
        );

        self.store.upsert(&record).await?;
        info!(schedule_id = %record.id, target_id = %record.target_id, "Schedule created");

        let executor_warning = self.register(&record, &target.url).await;
        Ok(Mutation {
            record,
            executor_warning,
        })
    }

    /// Merge a patch into a schedule. The rule is recomputed when the
    /// frequency or configurations changed, or when no next run is set.
    pub async fn update(&self, id: &str, patch: UpdateSchedule) -> Result<Mutation, SchedError> {
        let lock = self.id_lock(id).await;
        let _guard = lock.lock().await;

        let mut record = self.get(id).await?;
        let rule_changed = patch.frequency.is_some() || patch.configurations.is_some();
        if let Some(frequency) = patch.frequency {
            record.frequency = frequency;
        }
        if let Some(configurations) = patch.configurations {
            record.configurations = configurations;
        }
        if let Some(tags) = patch.tags {
            record.tags = tags;
        }
        if let Some(priority) = patch.priority {
            record.priority = priority;
        }
        if let Some(window) = patch.validity_window {
            record.validity_window = Some(window);
        }

        validate_recurrence(record.frequency, &record.configurations)?;
        validate_priority(record.priority)?;

        if rule_changed || record.next_run.is_none() {
            record.next_run = Some(
                self.compute_clamped(&record, Utc::now())?
                    .ok_or(SchedError::Unschedulable)?,
            );
        }

        self.store.upsert(&record).await?;
        info!(schedule_id = %id, "Schedule updated");

        let executor_warning = if record.dispatchable() {
            match self.unregister(id).await {
                Some(w) => Some(w),
                None => self.register_via_registry(&record).await,
            }
        } else {
            None
        };
        Ok(Mutation {
            record,
            executor_warning,
        })
    }

    /// Stop dispatching without losing state; `next_run` is retained for a
    /// potential resume.
    pub async fn pause(&self, id: &str) -> Result<Mutation, SchedError> {
        let lock = self.id_lock(id).await;
        let _guard = lock.lock().await;

        let mut record = self.get(id).await?;
        record.active = false;
        self.store.upsert(&record).await?;
        info!(schedule_id = %id, "Schedule paused");

        let executor_warning = self.unregister(id).await;
        Ok(Mutation {
            record,
            executor_warning,
        })
    }

    /// Reactivate a schedule, clearing the lock and failure counters and
    /// recomputing `next_run` from the current instant. Idempotent on an
    /// already-active, unlocked record.
    pub async fn resume(&self, id: &str) -> Result<Mutation, SchedError> {
        let lock = self.id_lock(id).await;
        let _guard = lock.lock().await;

        let mut record = self.get(id).await?;
        record.active = true;
        record.lock = ScheduleLock::default();
        record.failed_attempts = 0;
        record.next_run = Some(
            self.compute_clamped(&record, Utc::now())?
                .ok_or(SchedError::Unschedulable)?,
        );
        self.store.upsert(&record).await?;
        info!(schedule_id = %id, "Schedule resumed");

        let executor_warning = self.register_via_registry(&record).await;
        Ok(Mutation {
            record,
            executor_warning,
        })
    }

    /// Record the outcome of a dispatched execution, reported
    /// asynchronously by the executor.
    pub async fn report_execution_result(
        &self,
        id: &str,
        outcome: ExecutionOutcome,
    ) -> Result<Mutation, SchedError> {
        let lock = self.id_lock(id).await;
        let _guard = lock.lock().await;

        let mut record = self.get(id).await?;
        let now = Utc::now();
        match outcome {
            ExecutionOutcome::Success => {
                record.last_run = Some(now);
                record.failed_attempts = 0;
                record.lock = ScheduleLock::default();
                record.next_run = self.compute_clamped(&record, now)?;
                self.store.upsert(&record).await?;

                let executor_warning = if record.next_run.is_none() {
                    // A spent rule (e.g. a once schedule that just ran)
                    // goes dormant rather than erroring.
                    info!(schedule_id = %id, "No further occurrence, schedule dormant");
                    self.unregister(id).await
                } else if record.dispatchable() {
                    self.register_via_registry(&record).await
                } else {
                    None
                };
                Ok(Mutation {
                    record,
                    executor_warning,
                })
            }
            ExecutionOutcome::Failure { message } => {
                record.failed_attempts += 1;
                record.last_error = Some(ExecutionError {
                    message,
                    occurred_at: now,
                    attempt_count: record.failed_attempts,
                });
                let newly_locked =
                    !record.lock.locked && record.failed_attempts >= self.failure_lock_threshold;
                if newly_locked {
                    record.lock = ScheduleLock {
                        locked: true,
                        reason: Some(LOCK_REASON.to_string()),
                        locked_at: Some(now),
                    };
                    warn!(
                        schedule_id = %id,
                        attempts = record.failed_attempts,
                        "Schedule locked after repeated failures"
                    );
                }
                self.store.upsert(&record).await?;

                let executor_warning = if newly_locked {
                    self.unregister(id).await
                } else {
                    None
                };
                Ok(Mutation {
                    record,
                    executor_warning,
                })
            }
        }
    }

    /// Remove a schedule and its executor registration. A failed
    /// cancellation leaves an orphan for resync to reap.
    pub async fn delete(&self, id: &str) -> Result<Option<String>, SchedError> {
        let lock = self.id_lock(id).await;
        let _guard = lock.lock().await;

        // Surface NotFound before touching the executor.
        self.get(id).await?;
        let executor_warning = self.unregister(id).await;
        self.store.delete(id).await?;
        info!(schedule_id = %id, "Schedule deleted");
        drop(_guard);
        self.id_locks.lock().await.remove(id);
        Ok(executor_warning)
    }

    /// Reconcile the executor with the persisted store: cancel jobs with
    /// no dispatchable record behind them, re-submit every dispatchable
    /// record. Safe to run repeatedly and concurrently with single-record
    /// operations.
    pub async fn resync(&self) -> Result<ResyncReport, SchedError> {
        let jobs = self.executor.list_jobs().await?;
        let records = self.store.list_all().await?;
        let mut report = ResyncReport::default();

        for job in &jobs {
            let lock = self.id_lock(&job.id).await;
            let _guard = lock.lock().await;
            // Re-read under the lock; the record may have changed since
            // the listing.
            let keep = self
                .store
                .get(&job.id)
                .await?
                .is_some_and(|r| r.dispatchable());
            if !keep {
                match self.executor.cancel(&job.id).await {
                    Ok(()) => report.cancelled += 1,
                    Err(e) => warn!(job_id = %job.id, "Resync cancel failed: {e}"),
                }
            }
        }

        for record in &records {
            let lock = self.id_lock(&record.id).await;
            let _guard = lock.lock().await;
            let Some(current) = self.store.get(&record.id).await? else {
                continue;
            };
            if !current.dispatchable() || current.next_run.is_none() {
                continue;
            }
            if self.register_via_registry(&current).await.is_none() {
                report.submitted += 1;
            }
        }

        info!(
            cancelled = report.cancelled,
            submitted = report.submitted,
            "Resync complete"
        );
        Ok(report)
    }

    // ─── Target cascades ────────────────────────────────────

    /// Explicit notification from the target registry that a target was
    /// enabled or disabled. Disabling pauses its schedules; enabling
    /// resumes them.
    pub async fn on_target_changed(
        &self,
        target_id: &str,
        enabled: bool,
    ) -> Result<usize, SchedError> {
        let records = self.store.list_for_target(target_id).await?;
        let mut affected = 0;
        for record in &records {
            let result = if enabled {
                self.resume(&record.id).await
            } else {
                self.pause(&record.id).await
            };
            match result {
                Ok(_) => affected += 1,
                Err(e) => warn!(schedule_id = %record.id, "Target cascade failed: {e}"),
            }
        }
        info!(target_id, enabled, affected, "Target change applied");
        Ok(affected)
    }

    /// A removed target takes its schedules with it.
    pub async fn on_target_removed(&self, target_id: &str) -> Result<usize, SchedError> {
        let records = self.store.list_for_target(target_id).await?;
        let mut deleted = 0;
        for record in &records {
            match self.delete(&record.id).await {
                Ok(_) => deleted += 1,
                Err(e) => warn!(schedule_id = %record.id, "Cascade delete failed: {e}"),
            }
        }
        info!(target_id, deleted, "Target schedules removed");
        Ok(deleted)
    }
}
