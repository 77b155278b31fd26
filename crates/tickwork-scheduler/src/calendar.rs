use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};

use crate::error::{Result, SchedulerError};

/// Upper bound on how far [`CronCalendar::next_invalid_after`] walks through
/// consecutive matching seconds: one hour.
pub const WINDOW_SEARCH_LIMIT: usize = 60 * 60;

/// A calendar expression evaluated against UTC instants.
pub trait Calendar: Send + Sync {
    /// First matching instant strictly after `instant`, or `None` when the
    /// expression never matches again.
    fn next_valid_after(&self, instant: DateTime<Utc>) -> Option<DateTime<Utc>>;

    /// First instant after `instant` at which the expression stops matching,
    /// i.e. the end of the matching window `instant` belongs to. `None` when
    /// no such instant can be found.
    fn next_invalid_after(&self, instant: DateTime<Utc>) -> Option<DateTime<Utc>>;
}

/// Cron expression with a leading seconds field
/// (`sec min hour day-of-month month day-of-week [year]`).
///
/// The Quartz `?` placeholder is accepted and means "any".
#[derive(Debug, Clone)]
pub struct CronCalendar {
    expression: String,
    schedule: cron::Schedule,
}

impl CronCalendar {
    pub fn parse(expression: &str) -> Result<Self> {
        let normalized = expression
            .split_whitespace()
            .map(|field| if field == "?" { "*" } else { field })
            .collect::<Vec<_>>()
            .join(" ");

        let schedule =
            cron::Schedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidCron {
                expression: expression.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }
}

impl Calendar for CronCalendar {
    fn next_valid_after(&self, instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&instant).next()
    }

    fn next_invalid_after(&self, instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let step = Duration::seconds(1);
        let mut last = instant;
        for next in self.schedule.after(&instant).take(WINDOW_SEARCH_LIMIT) {
            if next - last != step {
                return Some(last + step);
            }
            last = next;
        }
        None
    }
}

/// Compute the next fire instant for a calendar task.
///
/// `previous` is the instant the task was last planned for. A candidate at
/// or before it is the same occurrence coming round again (the execution
/// finished before its planned instant); in that case the search restarts
/// after the end of the previous occurrence's matching window. The result is
/// therefore always strictly later than `previous`.
pub fn next_fire_time(
    calendar: &dyn Calendar,
    now: DateTime<Utc>,
    previous: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    let candidate = calendar.next_valid_after(now)?;
    let Some(previous) = previous.filter(|p| candidate <= *p) else {
        return Some(candidate);
    };

    match calendar.next_invalid_after(previous) {
        Some(window_end) => calendar.next_valid_after(window_end),
        None => calendar.next_valid_after(previous),
    }
}
