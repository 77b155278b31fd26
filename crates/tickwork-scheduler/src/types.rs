use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Identity of a [`crate::ScheduledTask`], assigned at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub uuid::Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of one registration in the engine's registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(pub u64);

/// Handle of one pool submission, used for queue introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubmissionId(pub u64);

/// How a registration repeats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleMode {
    /// Run `seconds` after the previous run completed. `literal` is what the
    /// caller passed (e.g. `"${every.poll}"`), kept for reporting.
    FixedDelay { literal: String, seconds: u64 },

    /// Run at each instant matching a cron expression.
    Calendar { literal: String },
}

impl ScheduleMode {
    pub fn is_calendar(&self) -> bool {
        matches!(self, ScheduleMode::Calendar { .. })
    }
}

impl std::fmt::Display for ScheduleMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleMode::FixedDelay { literal, .. } => write!(f, "run every {literal}."),
            ScheduleMode::Calendar { literal } => {
                write!(f, "run with cron expression {literal}.")
            }
        }
    }
}

/// Where a registration stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum EntryState {
    /// Recorded before the engine started; armed by `start()`.
    Registered,
    /// A pool submission is pending or running.
    Scheduled,
    /// The schedule resolved to nothing or to `never`.
    Dormant,
    /// The cron expression has no future match.
    Exhausted,
    /// The schedule literal could not be used.
    Misconfigured(String),
    /// The pool refused the submission.
    Rejected(String),
}

impl std::fmt::Display for EntryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryState::Registered => write!(f, "registered"),
            EntryState::Scheduled => write!(f, "scheduled"),
            EntryState::Dormant => write!(f, "dormant"),
            EntryState::Exhausted => write!(f, "exhausted"),
            EntryState::Misconfigured(reason) => write!(f, "misconfigured: {reason}"),
            EntryState::Rejected(reason) => write!(f, "rejected: {reason}"),
        }
    }
}

/// Outcome of a registration call. Registration never fails loudly; this is
/// for callers who want to look.
#[derive(Debug, Clone)]
pub enum Registration {
    /// Armed. `next` is the planned instant for calendar entries.
    Scheduled {
        entry: EntryId,
        next: Option<DateTime<Utc>>,
    },
    /// Recorded; armed once the engine starts.
    Deferred { entry: EntryId },
    /// The schedule is disabled (`never` or empty).
    Dormant { entry: EntryId },
    /// The cron expression will never match again.
    Exhausted { entry: EntryId },
    /// Refused or not armed; the error was logged.
    Failed(SchedulerError),
}

impl Registration {
    pub fn is_scheduled(&self) -> bool {
        matches!(self, Registration::Scheduled { .. })
    }

    pub fn entry(&self) -> Option<EntryId> {
        match self {
            Registration::Scheduled { entry, .. }
            | Registration::Deferred { entry }
            | Registration::Dormant { entry }
            | Registration::Exhausted { entry } => Some(*entry),
            Registration::Failed(_) => None,
        }
    }
}
