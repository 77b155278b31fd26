//! `tickwork-scheduler` — recurring background jobs on a bounded worker pool.
//!
//! # Overview
//!
//! A [`Job`] is wrapped in a [`ScheduledTask`] and registered with the
//! [`JobScheduler`] in one of two modes:
//!
//! | Mode          | Literal                 | Behaviour                                      |
//! |---------------|-------------------------|------------------------------------------------|
//! | fixed delay   | `"30s"`, `"1h 30min"`   | Next run starts a fixed delay after the last one finished |
//! | calendar      | `"0 */5 * * * ?"`       | Runs at each instant matching a cron expression |
//!
//! Both literals may be `${name}` placeholders resolved from configuration,
//! and `never` disables a registration. Executions run on a [`WorkerPool`]
//! of `pool_size` named threads; one task never overlaps itself, and a
//! calendar task is never run twice for the same occurrence.
//!
//! [`JobScheduler::status`] returns a [`StatusReport`] that renders as text or
//! JSON without touching task state.

pub mod calendar;
pub mod engine;
pub mod error;
pub mod job;
pub mod monitor;
pub mod pool;
pub mod status;
pub mod thread_factory;
pub mod types;

pub use async_trait::async_trait;
pub use calendar::{next_fire_time, Calendar, CronCalendar};
pub use engine::JobScheduler;
pub use error::{Result, SchedulerError};
pub use job::{Job, ScheduledTask, TaskTelemetry};
pub use monitor::{Monitor, MonitorHandle, MonitorStats, StatsMonitor, TracingMonitor};
pub use pool::{PendingSubmission, PoolStats, WorkerPool};
pub use status::{JobReport, StatusReport};
pub use types::{EntryId, EntryState, Registration, ScheduleMode, SubmissionId, TaskId};
