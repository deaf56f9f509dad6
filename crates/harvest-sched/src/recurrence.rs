//! Pure next-run computation for recurrence rules.
//!
//! All arithmetic happens in the fixed operating timezone (UTC); client
//! timezones never enter the computation, which keeps DST ambiguity out of
//! it. Weekdays are numbered 0 = Monday .. 6 = Sunday.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

use harvest_types::{FrequencyType, TimeSlotConfig};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RecurrenceError {
    #[error("monthly-by-position recurrence is not yet supported")]
    MonthlyByPositionUnsupported,
}

/// Compute the next qualifying instant strictly after `from`, across all
/// slot configurations of a rule.
///
/// Configs missing the fields their frequency requires (or carrying an
/// unparseable time of day) are skipped, not fatal. `Ok(None)` means no
/// slot can produce an instant; callers mutating schedules must treat that
/// as a hard error, never ignore it.
pub fn compute_next_run(
    frequency: FrequencyType,
    configs: &[TimeSlotConfig],
    from: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, RecurrenceError> {
    if frequency == FrequencyType::MonthlyByPosition {
        return Err(RecurrenceError::MonthlyByPositionUnsupported);
    }

    let mut next: Option<DateTime<Utc>> = None;
    for config in configs {
        let candidate = match frequency {
            FrequencyType::Once => next_once(config, from),
            FrequencyType::Daily => next_daily(config, from),
            FrequencyType::Weekly => next_weekly(config, from),
            FrequencyType::MonthlyByDay => next_monthly_by_day(config, from),
            FrequencyType::Test => Some(from + Duration::minutes(1)),
            FrequencyType::MonthlyByPosition => {
                return Err(RecurrenceError::MonthlyByPositionUnsupported);
            }
        };
        if let Some(candidate) = candidate {
            if next.is_none_or(|best| candidate < best) {
                next = Some(candidate);
            }
        }
    }
    Ok(next)
}

/// The config's slot on `from`'s date, seconds zeroed.
fn base_candidate(config: &TimeSlotConfig, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let time = config.parsed_time()?;
    Some(from.date_naive().and_time(time).and_utc())
}

fn next_once(config: &TimeSlotConfig, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let candidate = base_candidate(config, from)?;
    (candidate > from).then_some(candidate)
}

fn next_daily(config: &TimeSlotConfig, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let candidate = base_candidate(config, from)?;
    if candidate > from {
        Some(candidate)
    } else {
        Some(candidate + Duration::days(1))
    }
}

fn next_weekly(config: &TimeSlotConfig, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let days = config.days_of_week.as_ref().filter(|d| !d.is_empty())?;
    let mut candidate = base_candidate(config, from)?;
    // Today plus at most seven day-steps.
    for _ in 0..=7 {
        let weekday = candidate.weekday().num_days_from_monday() as u8;
        if candidate > from && days.contains(&weekday) {
            return Some(candidate);
        }
        candidate = candidate + Duration::days(1);
    }
    None
}

fn next_monthly_by_day(config: &TimeSlotConfig, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let days = config.days_of_month.as_ref().filter(|d| !d.is_empty())?;
    let time = config.parsed_time()?;
    let base = from.date_naive();

    // Smallest listed day still ahead in the current month. Listed days
    // that don't form a valid date this month (e.g. 30 in February) are
    // skipped.
    for &day in days.iter() {
        if let Some(date) = base.with_day(day as u32) {
            let candidate = date.and_time(time).and_utc();
            if candidate > from {
                return Some(candidate);
            }
        }
    }

    // Roll to the next month's first listed day that forms a valid date.
    let (year, month) = if base.month() == 12 {
        (base.year() + 1, 1)
    } else {
        (base.year(), base.month() + 1)
    };
    for &day in days.iter() {
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day as u32) {
            return Some(date.and_time(time).and_utc());
        }
    }
    None
}
