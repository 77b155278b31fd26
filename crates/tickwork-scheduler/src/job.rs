//! The unit of recurring work and its execution wrapper.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::engine::{EngineCommand, JobScheduler};
use crate::monitor::{timed_start, timed_stop, Monitor, TracingMonitor};
use crate::types::{EntryId, Registration, TaskId};

/// User-supplied work.
///
/// Implement [`Job::do_job`] for fire-and-forget work, or
/// [`Job::do_job_with_result`] when the caller of [`ScheduledTask::call`]
/// wants a value back. Errors and panics are both contained by the wrapper.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    type Output: Send + 'static;

    /// Label used in logs, monitor keys and status reports.
    fn name(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }

    async fn do_job(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn do_job_with_result(&self) -> anyhow::Result<Option<Self::Output>> {
        self.do_job().await?;
        Ok(None)
    }
}

/// Execution telemetry of one task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskTelemetry {
    /// Start of the most recent attempt.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Whether the most recent attempt failed.
    pub last_run_failed: bool,
    /// Occurrence the task is armed for (calendar schedules only).
    pub next_planned_execution: Option<DateTime<Utc>>,
}

/// A [`Job`] plus the state the scheduler keeps about it.
pub struct ScheduledTask<J: Job> {
    id: TaskId,
    label: String,
    job: J,
    telemetry: Mutex<TaskTelemetry>,
    monitor: Arc<dyn Monitor>,
}

impl<J: Job> ScheduledTask<J> {
    pub fn new(job: J) -> Arc<Self> {
        Self::with_monitor(job, Arc::new(TracingMonitor))
    }

    pub fn with_monitor(job: J, monitor: Arc<dyn Monitor>) -> Arc<Self> {
        Arc::new(Self {
            id: TaskId::new(),
            label: job.name(),
            job,
            telemetry: Mutex::new(TaskTelemetry::default()),
            monitor,
        })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn job(&self) -> &J {
        &self.job
    }

    /// Copy of the current telemetry.
    pub fn telemetry(&self) -> TaskTelemetry {
        self.state().clone()
    }

    /// Run the job once on the caller's task. Never re-arms.
    pub async fn call(&self) -> Option<J::Output> {
        self.run_once().await
    }

    /// Register this task with a fixed delay, e.g. `"3min"` or `"2s"`.
    pub fn every(self: &Arc<Self>, scheduler: &JobScheduler, interval: &str) -> Registration {
        scheduler.every(self, interval)
    }

    /// Register this task with a cron expression.
    pub fn on(self: &Arc<Self>, scheduler: &JobScheduler, expression: &str) -> Registration {
        scheduler.on(self, expression)
    }

    fn state(&self) -> MutexGuard<'_, TaskTelemetry> {
        self.telemetry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_once(&self) -> Option<J::Output> {
        self.state().last_run_at = Some(Utc::now());
        let timer = timed_start(self.monitor.as_ref(), &format!("{}.do_job()", self.label));

        let outcome = AssertUnwindSafe(self.job.do_job_with_result())
            .catch_unwind()
            .await;
        timed_stop(timer);

        match outcome {
            Ok(Ok(result)) => {
                self.state().last_run_failed = false;
                result
            }
            Ok(Err(e)) => {
                let error = format!("{e:#}");
                error!(task = %self.label, task_id = %self.id, %error, "job failed");
                self.state().last_run_failed = true;
                None
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic payload".to_string());
                error!(task = %self.label, task_id = %self.id, %reason, "job panicked");
                self.state().last_run_failed = true;
                None
            }
        }
    }
}

/// Permission for one pool execution to ask the engine for the next
/// calendar occurrence once it has finished.
pub(crate) struct RearmTicket {
    entry: EntryId,
    commands: mpsc::UnboundedSender<EngineCommand>,
}

impl RearmTicket {
    pub(crate) fn new(entry: EntryId, commands: mpsc::UnboundedSender<EngineCommand>) -> Self {
        Self { entry, commands }
    }

    fn post(self) {
        if self
            .commands
            .send(EngineCommand::Rearm { entry: self.entry })
            .is_err()
        {
            debug!(entry = self.entry.0, "engine stopped; not re-arming");
        }
    }
}

/// Object-safe view of a [`ScheduledTask`] held by the registry.
pub(crate) trait RunnableTask: Send + Sync + 'static {
    fn id(&self) -> TaskId;
    fn label(&self) -> &str;
    fn telemetry(&self) -> TaskTelemetry;
    fn next_planned_execution(&self) -> Option<DateTime<Utc>>;
    fn plan(&self, at: DateTime<Utc>);
    fn execute(self: Arc<Self>, rearm: Option<RearmTicket>) -> BoxFuture<'static, ()>;
}

impl<J: Job> RunnableTask for ScheduledTask<J> {
    fn id(&self) -> TaskId {
        self.id
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn telemetry(&self) -> TaskTelemetry {
        ScheduledTask::telemetry(self)
    }

    fn next_planned_execution(&self) -> Option<DateTime<Utc>> {
        self.state().next_planned_execution
    }

    fn plan(&self, at: DateTime<Utc>) {
        self.state().next_planned_execution = Some(at);
    }

    fn execute(self: Arc<Self>, rearm: Option<RearmTicket>) -> BoxFuture<'static, ()> {
        async move {
            let _ = self.run_once().await;
            // Re-arm only after the execution has fully finished, so one
            // calendar task never overlaps itself.
            if let Some(ticket) = rearm {
                ticket.post();
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::StatsMonitor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Answer;

    #[async_trait]
    impl Job for Answer {
        type Output = u32;

        async fn do_job_with_result(&self) -> anyhow::Result<Option<u32>> {
            Ok(Some(42))
        }
    }

    /// Fails on odd attempts, succeeds on even ones.
    #[derive(Default)]
    struct Flaky {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Job for Flaky {
        type Output = ();

        fn name(&self) -> String {
            "flaky".to_string()
        }

        async fn do_job(&self) -> anyhow::Result<()> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n % 2 == 1 {
                anyhow::bail!("attempt {n} failed");
            }
            Ok(())
        }
    }

    struct Panics;

    #[async_trait]
    impl Job for Panics {
        type Output = ();

        async fn do_job(&self) -> anyhow::Result<()> {
            panic!("boom");
        }
    }

    struct Noop;

    #[async_trait]
    impl Job for Noop {
        type Output = ();
    }

    #[tokio::test]
    async fn success_returns_result_and_clears_error_flag() {
        let task = ScheduledTask::new(Answer);
        assert_eq!(task.telemetry(), TaskTelemetry::default());

        let before = Utc::now();
        assert_eq!(task.call().await, Some(42));

        let t = task.telemetry();
        assert!(t.last_run_at.unwrap() >= before);
        assert!(!t.last_run_failed);
        assert!(t.next_planned_execution.is_none());
    }

    #[tokio::test]
    async fn default_do_job_yields_no_result() {
        let task = ScheduledTask::new(Noop);
        assert_eq!(task.call().await, None);
        assert!(!task.telemetry().last_run_failed);
    }

    #[tokio::test]
    async fn failure_is_recorded_and_reset_by_next_success() {
        let task = ScheduledTask::new(Flaky::default());

        task.call().await;
        let first = task.telemetry();
        assert!(first.last_run_failed);

        task.call().await;
        let second = task.telemetry();
        assert!(!second.last_run_failed);
        assert!(second.last_run_at >= first.last_run_at);
        assert_eq!(task.job().attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let task = ScheduledTask::new(Panics);
        assert_eq!(task.call().await, None);
        let t = task.telemetry();
        assert!(t.last_run_failed);
        assert!(t.last_run_at.is_some());
    }

    #[tokio::test]
    async fn monitor_is_stopped_on_success_and_failure() {
        let stats = StatsMonitor::new();
        let task = ScheduledTask::with_monitor(Flaky::default(), Arc::new(stats.clone()));
        task.call().await;
        task.call().await;
        task.call().await;
        assert_eq!(stats.get("flaky.do_job()").unwrap().hits, 3);
    }

    #[test]
    fn label_defaults_to_type_name() {
        let task = ScheduledTask::new(Noop);
        assert!(task.label().ends_with("Noop"), "label was {}", task.label());
        assert_eq!(ScheduledTask::new(Flaky::default()).label(), "flaky");
    }

    #[tokio::test]
    async fn pool_execution_posts_rearm_after_finishing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = ScheduledTask::new(Flaky::default());

        let runnable: Arc<dyn RunnableTask> = task.clone();
        runnable
            .execute(Some(RearmTicket::new(EntryId(7), tx)))
            .await;

        assert!(task.telemetry().last_run_failed);
        match rx.try_recv() {
            Ok(EngineCommand::Rearm { entry }) => assert_eq!(entry, EntryId(7)),
            other => panic!("expected a re-arm request, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn execution_without_ticket_does_not_rearm() {
        let (_tx, mut rx) = mpsc::unbounded_channel::<EngineCommand>();
        let task: Arc<dyn RunnableTask> = ScheduledTask::new(Noop);
        task.execute(None).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn plan_records_next_execution() {
        let task = ScheduledTask::new(Noop);
        let at = Utc::now();
        RunnableTask::plan(task.as_ref(), at);
        assert_eq!(task.telemetry().next_planned_execution, Some(at));
        assert_eq!(RunnableTask::next_planned_execution(task.as_ref()), Some(at));
    }
}
