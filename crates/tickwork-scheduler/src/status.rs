//! Read-only snapshot of the scheduler, renderable as text or JSON.

use std::fmt::{self, Write as _};

use serde::Serialize;

use crate::job::TaskTelemetry;
use crate::pool::{PendingSubmission, PoolStats};
use crate::types::{EntryId, EntryState, ScheduleMode, TaskId};

const DATE_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

/// One registration as seen by the report.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub entry: EntryId,
    pub task_id: TaskId,
    pub label: String,
    pub schedule: ScheduleMode,
    pub state: EntryState,
    pub telemetry: TaskTelemetry,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// `None` until the engine has been started.
    pub pool: Option<PoolStats>,
    pub jobs: Vec<JobReport>,
    /// Queued submissions, soonest first.
    pub waiting: Vec<PendingSubmission>,
}

impl StatusReport {
    pub fn is_started(&self) -> bool {
        self.pool.is_some()
    }

    pub fn job(&self, entry: EntryId) -> Option<&JobReport> {
        self.jobs.iter().find(|j| j.entry == entry)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Jobs execution pool:")?;
        writeln!(f, "~~~~~~~~~~~~~~~~~~~")?;
        let Some(pool) = &self.pool else {
            return writeln!(f, "(not yet started)");
        };
        if !pool.running {
            writeln!(f, "(stopped)")?;
        }
        writeln!(f, "Pool size: {}", pool.pool_size)?;
        writeln!(f, "Active count: {}", pool.active_count)?;
        writeln!(f, "Scheduled task count: {}", pool.task_count)?;
        writeln!(f, "Queue size: {}", pool.queue_size)?;

        if !self.jobs.is_empty() {
            writeln!(f)?;
            writeln!(f, "Scheduled jobs ({}):", self.jobs.len())?;
            writeln!(f, "~~~~~~~~~~~~~~~~~~~~~~~~~~")?;
            for job in &self.jobs {
                let mut line = format!("{} {}", job.label, job.schedule);
                match job.telemetry.last_run_at {
                    Some(at) => {
                        write!(line, " (last run at {}", at.format(DATE_FORMAT))?;
                        line.push_str(if job.telemetry.last_run_failed {
                            " with error)"
                        } else {
                            ")"
                        });
                    }
                    None => line.push_str(" (has never run)"),
                }
                if job.state != EntryState::Scheduled {
                    write!(line, " [{}]", job.state)?;
                }
                writeln!(f, "{line}")?;
            }
        }

        if !self.waiting.is_empty() {
            writeln!(f)?;
            writeln!(f, "Waiting jobs:")?;
            writeln!(f, "~~~~~~~~~~~~~~~~~~~~~~~~~~~")?;
            for waiting in &self.waiting {
                writeln!(
                    f,
                    "{} will run in {} seconds",
                    waiting.label,
                    waiting.remaining.as_secs()
                )?;
            }
        }
        Ok(())
    }
}
