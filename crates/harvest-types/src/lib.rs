//! harvest-types: shared data model for the scrape scheduling service.
//!
//! Defines the persisted schedule record, its recurrence rule types, the
//! aggregated queue-view types, and the invariant checks that guard every
//! create/update path.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ──────────────────── Recurrence Types ────────────────────

/// How often a schedule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyType {
    /// Fire at the next matching slot, then go dormant.
    Once,
    Daily,
    Weekly,
    MonthlyByDay,
    /// "Nth weekday of month". Declared in the data model but not yet
    /// computable; the scheduler refuses it explicitly.
    MonthlyByPosition,
    /// Fires one minute after the reference instant, ignoring every
    /// configured slot. For fast iteration, not production cadence.
    Test,
}

impl FrequencyType {
    /// Stable string name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            FrequencyType::Once => "once",
            FrequencyType::Daily => "daily",
            FrequencyType::Weekly => "weekly",
            FrequencyType::MonthlyByDay => "monthly_by_day",
            FrequencyType::MonthlyByPosition => "monthly_by_position",
            FrequencyType::Test => "test",
        }
    }

    /// Inverse of [`FrequencyType::as_str`].
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "once" => Some(FrequencyType::Once),
            "daily" => Some(FrequencyType::Daily),
            "weekly" => Some(FrequencyType::Weekly),
            "monthly_by_day" => Some(FrequencyType::MonthlyByDay),
            "monthly_by_position" => Some(FrequencyType::MonthlyByPosition),
            "test" => Some(FrequencyType::Test),
            _ => None,
        }
    }
}

/// One (time-of-day + applicability rule) entry of a recurrence rule.
///
/// Weekdays are numbered 0 = Monday .. 6 = Sunday. All times are in the
/// fixed operating timezone (UTC), never client-local.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSlotConfig {
    /// 24-hour "HH:MM".
    pub time_of_day: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_of_week: Option<BTreeSet<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_of_month: Option<BTreeSet<u8>>,
    /// Week slot for monthly-by-position rules (e.g. "first").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub week_position: Option<String>,
    /// Weekday for monthly-by-position rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TimeSlotConfig {
    /// A slot at the given time of day with no day restrictions.
    pub fn at(time_of_day: &str) -> Self {
        Self {
            time_of_day: time_of_day.to_string(),
            days_of_week: None,
            days_of_month: None,
            week_position: None,
            day_of_week: None,
            description: None,
        }
    }

    /// Restrict the slot to the given weekdays (0 = Monday).
    pub fn on_weekdays(mut self, days: impl IntoIterator<Item = u8>) -> Self {
        self.days_of_week = Some(days.into_iter().collect());
        self
    }

    /// Restrict the slot to the given days of month (1..=31).
    pub fn on_month_days(mut self, days: impl IntoIterator<Item = u8>) -> Self {
        self.days_of_month = Some(days.into_iter().collect());
        self
    }

    /// Parse `time_of_day`, if well-formed.
    pub fn parsed_time(&self) -> Option<NaiveTime> {
        parse_time_of_day(&self.time_of_day)
    }
}

/// Parse a strict 24-hour "HH:MM" string.
pub fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    // %H:%M alone would accept "9:00"; the format here is exactly five
    // characters with a colon in the middle.
    if s.len() != 5 || s.as_bytes()[2] != b':' {
        return None;
    }
    NaiveTime::parse_from_str(s, "%H:%M").ok()
}

// ──────────────────── Schedule Record ────────────────────

/// Details of the most recent failed execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub message: String,
    pub occurred_at: DateTime<Utc>,
    /// Value of `failed_attempts` when this error was recorded.
    pub attempt_count: u32,
}

/// Dispatch-suppression state entered after repeated execution failures.
/// Cleared only by an explicit resume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleLock {
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<DateTime<Utc>>,
}

/// Bounds outside which a schedule never fires.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ValidityWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Result of one dispatched execution, reported back by the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success,
    Failure { message: String },
}

/// Persisted recurrence configuration and execution-health state for one
/// recurring scrape job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub id: String,
    /// Weak reference to the scrape target; existence is validated at
    /// creation only.
    pub target_id: String,
    pub frequency: FrequencyType,
    /// At least one entry.
    pub configurations: Vec<TimeSlotConfig>,
    /// Whether the schedule should be dispatched. A locked record may
    /// still be active; the lock suppresses dispatch without deactivating.
    pub active: bool,
    /// Either absent or strictly after the instant it was computed from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failed_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ExecutionError>,
    #[serde(default)]
    pub lock: ScheduleLock,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    /// 1 (lowest) ..= 10 (highest).
    pub priority: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity_window: Option<ValidityWindow>,
    pub created_at: DateTime<Utc>,
}

impl ScheduleRecord {
    /// Whether the executor should currently hold a registration for this
    /// schedule.
    pub fn dispatchable(&self) -> bool {
        self.active && !self.lock.locked
    }
}

// ──────────────────── Validation ────────────────────

pub const PRIORITY_MIN: u8 = 1;
pub const PRIORITY_MAX: u8 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("a schedule needs at least one time slot configuration")]
    EmptyConfigurations,
    #[error("bad time of day {0:?}, expected 24-hour HH:MM")]
    BadTimeOfDay(String),
    #[error("weekly schedules need a non-empty days_of_week")]
    MissingDaysOfWeek,
    #[error("monthly-by-day schedules need a non-empty days_of_month")]
    MissingDaysOfMonth,
    #[error("day of week {0} out of range 0..=6")]
    DayOfWeekOutOfRange(u8),
    #[error("day of month {0} out of range 1..=31")]
    DayOfMonthOutOfRange(u8),
    #[error("priority {0} out of range {PRIORITY_MIN}..={PRIORITY_MAX}")]
    PriorityOutOfRange(u8),
}

/// Check the per-frequency invariants of a recurrence rule.
pub fn validate_recurrence(
    frequency: FrequencyType,
    configs: &[TimeSlotConfig],
) -> Result<(), ValidationError> {
    if configs.is_empty() {
        return Err(ValidationError::EmptyConfigurations);
    }
    for config in configs {
        if config.parsed_time().is_none() {
            return Err(ValidationError::BadTimeOfDay(config.time_of_day.clone()));
        }
        if let Some(days) = &config.days_of_week {
            if let Some(&d) = days.iter().find(|&&d| d > 6) {
                return Err(ValidationError::DayOfWeekOutOfRange(d));
            }
        }
        if let Some(days) = &config.days_of_month {
            if let Some(&d) = days.iter().find(|&&d| !(1..=31).contains(&d)) {
                return Err(ValidationError::DayOfMonthOutOfRange(d));
            }
        }
        match frequency {
            FrequencyType::Weekly
                if config.days_of_week.as_ref().is_none_or(|d| d.is_empty()) =>
            {
                return Err(ValidationError::MissingDaysOfWeek);
            }
            FrequencyType::MonthlyByDay
                if config.days_of_month.as_ref().is_none_or(|d| d.is_empty()) =>
            {
                return Err(ValidationError::MissingDaysOfMonth);
            }
            _ => {}
        }
    }
    Ok(())
}

/// Check a priority value against the allowed range.
pub fn validate_priority(priority: u8) -> Result<(), ValidationError> {
    if !(PRIORITY_MIN..=PRIORITY_MAX).contains(&priority) {
        return Err(ValidationError::PriorityOutOfRange(priority));
    }
    Ok(())
}

// ──────────────────── Queue View Types ────────────────────

/// Live activity entry for a schedule the executor is currently running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningJob {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

/// Point-in-time aggregate of the job queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueState {
    /// Count of persisted active schedules.
    pub queued_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub running_jobs: Vec<RunningJob>,
    /// Earliest upcoming fire instant over active, unlocked schedules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
    /// False when the executor could not be queried and the snapshot was
    /// built from local state alone.
    pub executor_reachable: bool,
}

/// Operational classification of one schedule, highest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Executing,
    Locked,
    ActiveWaiting,
    Paused,
}

/// One row of the per-schedule status listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleStatusView {
    pub id: String,
    pub target_id: String,
    pub status: ScheduleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    pub failed_attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> ScheduleRecord {
        ScheduleRecord {
            id: "sched-1".into(),
            target_id: "target-1".into(),
            frequency: FrequencyType::Daily,
            configurations: vec![TimeSlotConfig::at("09:00")],
            active: true,
            next_run: None,
            last_run: None,
            failed_attempts: 0,
            last_error: None,
            lock: ScheduleLock::default(),
            tags: BTreeSet::new(),
            priority: 5,
            validity_window: None,
            created_at: "2026-01-10T00:00:00Z".parse().unwrap(),
        }
    }

    #[test]
    fn test_frequency_serde() {
        let json = serde_json::to_string(&FrequencyType::MonthlyByDay).unwrap();
        assert_eq!(json, "\"monthly_by_day\"");
        let parsed: FrequencyType = serde_json::from_str("\"weekly\"").unwrap();
        assert_eq!(parsed, FrequencyType::Weekly);
    }

    #[test]
    fn test_record_serde_roundtrip() {
        let mut record = sample_record();
        record.next_run = Some("2026-01-11T09:00:00Z".parse().unwrap());
        record.tags.insert("nightly".into());
        record.last_error = Some(ExecutionError {
            message: "timeout".into(),
            occurred_at: "2026-01-10T09:00:30Z".parse().unwrap(),
            attempt_count: 2,
        });
        let json = serde_json::to_string(&record).unwrap();
        let parsed: ScheduleRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, "sched-1");
        assert_eq!(parsed.frequency, FrequencyType::Daily);
        assert_eq!(parsed.next_run, record.next_run);
        assert_eq!(parsed.last_error, record.last_error);
        assert!(parsed.tags.contains("nightly"));
    }

    #[test]
    fn test_record_minimal_json_defaults() {
        let json = r#"{
            "id": "s",
            "target_id": "t",
            "frequency": "daily",
            "configurations": [{"time_of_day": "09:00"}],
            "active": true,
            "priority": 5,
            "created_at": "2026-01-10T00:00:00Z"
        }"#;
        let parsed: ScheduleRecord = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.failed_attempts, 0);
        assert!(!parsed.lock.locked);
        assert!(parsed.tags.is_empty());
        assert!(parsed.next_run.is_none());
    }

    #[test]
    fn test_parse_time_of_day() {
        assert!(parse_time_of_day("00:00").is_some());
        assert!(parse_time_of_day("23:59").is_some());
        assert!(parse_time_of_day("9:00").is_none());
        assert!(parse_time_of_day("24:00").is_none());
        assert!(parse_time_of_day("09:60").is_none());
        assert!(parse_time_of_day("09-00").is_none());
        assert!(parse_time_of_day("0900").is_none());
        assert!(parse_time_of_day("").is_none());
    }

    #[test]
    fn test_validate_requires_configs() {
        assert_eq!(
            validate_recurrence(FrequencyType::Daily, &[]),
            Err(ValidationError::EmptyConfigurations)
        );
    }

    #[test]
    fn test_validate_weekly_needs_days() {
        let missing = vec![TimeSlotConfig::at("09:00")];
        assert_eq!(
            validate_recurrence(FrequencyType::Weekly, &missing),
            Err(ValidationError::MissingDaysOfWeek)
        );
        let empty = vec![TimeSlotConfig::at("09:00").on_weekdays([])];
        assert_eq!(
            validate_recurrence(FrequencyType::Weekly, &empty),
            Err(ValidationError::MissingDaysOfWeek)
        );
        let ok = vec![TimeSlotConfig::at("09:00").on_weekdays([0, 2, 4])];
        assert!(validate_recurrence(FrequencyType::Weekly, &ok).is_ok());
    }

    #[test]
    fn test_validate_monthly_needs_days() {
        let missing = vec![TimeSlotConfig::at("08:00")];
        assert_eq!(
            validate_recurrence(FrequencyType::MonthlyByDay, &missing),
            Err(ValidationError::MissingDaysOfMonth)
        );
        let ok = vec![TimeSlotConfig::at("08:00").on_month_days([1, 15, 28])];
        assert!(validate_recurrence(FrequencyType::MonthlyByDay, &ok).is_ok());
    }

    #[test]
    fn test_validate_ranges() {
        let bad_weekday = vec![TimeSlotConfig::at("09:00").on_weekdays([7])];
        assert_eq!(
            validate_recurrence(FrequencyType::Weekly, &bad_weekday),
            Err(ValidationError::DayOfWeekOutOfRange(7))
        );
        let bad_month_day = vec![TimeSlotConfig::at("08:00").on_month_days([0])];
        assert_eq!(
            validate_recurrence(FrequencyType::MonthlyByDay, &bad_month_day),
            Err(ValidationError::DayOfMonthOutOfRange(0))
        );
        let bad_time = vec![TimeSlotConfig::at("25:00")];
        assert_eq!(
            validate_recurrence(FrequencyType::Daily, &bad_time),
            Err(ValidationError::BadTimeOfDay("25:00".into()))
        );
    }

    #[test]
    fn test_validate_priority() {
        assert!(validate_priority(1).is_ok());
        assert!(validate_priority(10).is_ok());
        assert_eq!(
            validate_priority(0),
            Err(ValidationError::PriorityOutOfRange(0))
        );
        assert_eq!(
            validate_priority(11),
            Err(ValidationError::PriorityOutOfRange(11))
        );
    }

    #[test]
    fn test_dispatchable() {
        let mut record = sample_record();
        assert!(record.dispatchable());
        record.lock.locked = true;
        assert!(!record.dispatchable());
        record.lock.locked = false;
        record.active = false;
        assert!(!record.dispatchable());
    }

    #[test]
    fn test_schedule_status_serde() {
        let json = serde_json::to_string(&ScheduleStatus::ActiveWaiting).unwrap();
        assert_eq!(json, "\"active_waiting\"");
    }

    #[test]
    fn test_execution_outcome_serde() {
        let failure: ExecutionOutcome =
            serde_json::from_str(r#"{"outcome":"failure","message":"boom"}"#).unwrap();
        match failure {
            ExecutionOutcome::Failure { message } => assert_eq!(message, "boom"),
            ExecutionOutcome::Success => panic!("expected failure variant"),
        }
    }
}
