use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use tickwork_core::{parse_duration, DualRegistration, Resolver, SchedulerConfig, TickworkConfig, VariableResolver};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{
    calendar::{next_fire_time, CronCalendar},
    error::{Result, SchedulerError},
    job::{Job, RearmTicket, RunnableTask, ScheduledTask},
    pool::{PeriodicWork, WorkerPool},
    status::{JobReport, StatusReport},
    types::{EntryId, EntryState, Registration, ScheduleMode, SubmissionId},
};

/// Messages posted to the engine's control loop.
#[derive(Debug)]
pub(crate) enum EngineCommand {
    /// A calendar execution finished; plan its next occurrence.
    Rearm { entry: EntryId },
}

struct ScheduleEntry {
    id: EntryId,
    task: Arc<dyn RunnableTask>,
    mode: ScheduleMode,
    state: EntryState,
    submission: Option<SubmissionId>,
}

#[derive(Default)]
struct Registry {
    entries: Vec<ScheduleEntry>,
}

impl Registry {
    fn push(&mut self, task: Arc<dyn RunnableTask>, mode: ScheduleMode, state: EntryState) -> EntryId {
        let id = EntryId(self.entries.len() as u64);
        self.entries.push(ScheduleEntry {
            id,
            task,
            mode,
            state,
            submission: None,
        });
        id
    }

    fn get_mut(&mut self, id: EntryId) -> Option<&mut ScheduleEntry> {
        self.entries.get_mut(id.0 as usize)
    }
}

struct EngineInner {
    config: SchedulerConfig,
    resolver: Arc<dyn Resolver>,
    registry: Mutex<Registry>,
    pool: OnceLock<WorkerPool>,
    commands: mpsc::UnboundedSender<EngineCommand>,
}

/// Recurring job scheduler.
///
/// One instance per process is the common case: the host builds it, calls
/// [`JobScheduler::start`] and hands `&JobScheduler` to whatever registers
/// jobs. Registration, re-arming and reporting are serialised on a single
/// registry lock; job bodies run in parallel on the worker pool.
///
/// Registration never fails loudly. Problems (bad literal, exhausted cron
/// expression, full queue) are logged, recorded on the entry and returned as
/// a [`Registration`] value; the affected task simply does not run.
pub struct JobScheduler {
    inner: Arc<EngineInner>,
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<EngineCommand>>>,
}

impl JobScheduler {
    /// Create an engine with no schedule variables.
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_resolver(config, Arc::new(VariableResolver::new(BTreeMap::new())))
    }

    /// Create an engine resolving `${name}` literals from `config.variables`.
    pub fn from_config(config: &TickworkConfig) -> Self {
        Self::with_resolver(
            config.scheduler.clone(),
            Arc::new(VariableResolver::new(config.variables.clone())),
        )
    }

    pub fn with_resolver(config: SchedulerConfig, resolver: Arc<dyn Resolver>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(EngineInner {
                config,
                resolver,
                registry: Mutex::new(Registry::default()),
                pool: OnceLock::new(),
                commands: tx,
            }),
            command_rx: Mutex::new(Some(rx)),
        }
    }

    /// Start the worker pool and arm everything registered so far.
    pub fn start(&self) -> Result<()> {
        if self.inner.pool.get().is_some() {
            return Err(SchedulerError::AlreadyStarted);
        }
        let pool = WorkerPool::from_config(&self.inner.config)?;
        let handle = pool.handle().clone();
        self.inner
            .pool
            .set(pool)
            .map_err(|_| SchedulerError::AlreadyStarted)?;

        let commands = self
            .command_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(SchedulerError::AlreadyStarted)?;
        handle.spawn(control_loop(Arc::downgrade(&self.inner), commands));

        let pool = self.inner.pool.get().ok_or(SchedulerError::NotRunning)?;
        let mut registry = self.inner.registry();
        let mut armed = 0usize;
        for entry in registry
            .entries
            .iter_mut()
            .filter(|e| e.state == EntryState::Registered)
        {
            if self.inner.arm(pool, entry).is_scheduled() {
                armed += 1;
            }
        }
        info!(
            pool = %self.inner.config.pool_name,
            registered = registry.entries.len(),
            armed,
            "job scheduler started"
        );
        Ok(())
    }

    /// Stop the worker pool. Running jobs are abandoned at their next await
    /// point and nothing is re-armed afterwards.
    pub fn shutdown(&self) {
        if let Some(pool) = self.inner.pool.get() {
            pool.shutdown();
        }
    }

    pub fn is_started(&self) -> bool {
        self.inner.pool.get().is_some()
    }

    /// Run `task` with a fixed delay given as a duration literal (`"30s"`,
    /// `"2min"`, `"${every.poll}"`). `"never"` leaves the task dormant.
    pub fn every<J: Job>(&self, task: &Arc<ScheduledTask<J>>, interval: &str) -> Registration {
        let resolved = self.inner.resolver.resolve(interval);
        let seconds = if resolved.eq_ignore_ascii_case("never") {
            None
        } else {
            Some(parse_duration(Some(resolved.as_str())).map_err(SchedulerError::from))
        };
        self.inner
            .register_fixed_delay(task.clone(), interval.to_string(), seconds)
    }

    /// Run `task` with a fixed delay of `seconds`.
    pub fn every_secs<J: Job>(&self, task: &Arc<ScheduledTask<J>>, seconds: u64) -> Registration {
        self.inner
            .register_fixed_delay(task.clone(), format!("{seconds}s"), Some(Ok(seconds)))
    }

    /// Run `task` at every instant matching a cron expression
    /// (`"0 */5 * * * ?"`, `"${cron.cleanup}"`). `"never"` or an empty
    /// literal leaves the task dormant.
    pub fn on<J: Job>(&self, task: &Arc<ScheduledTask<J>>, expression: &str) -> Registration {
        self.inner
            .register_calendar(task.clone(), expression.to_string())
    }

    /// Snapshot of the pool, the registry and the queue. Never mutates task
    /// state and never waits on a running job.
    pub fn status(&self) -> StatusReport {
        let jobs = self
            .inner
            .registry()
            .entries
            .iter()
            .map(|e| JobReport {
                entry: e.id,
                task_id: e.task.id(),
                label: e.task.label().to_string(),
                schedule: e.mode.clone(),
                state: e.state.clone(),
                telemetry: e.task.telemetry(),
            })
            .collect();

        match self.inner.pool.get() {
            Some(pool) => StatusReport {
                pool: Some(pool.stats()),
                jobs,
                waiting: pool.pending(),
            },
            None => StatusReport {
                pool: None,
                jobs,
                waiting: Vec::new(),
            },
        }
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl EngineInner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse a registration that would arm one task in both modes.
    fn check_dual(&self, registry: &Registry, task: &dyn RunnableTask, calendar: bool) -> Result<()> {
        if self.config.dual_registration == DualRegistration::Allow {
            return Ok(());
        }
        let conflict = registry
            .entries
            .iter()
            .filter(|e| matches!(e.state, EntryState::Registered | EntryState::Scheduled))
            .any(|e| e.task.id() == task.id() && e.mode.is_calendar() != calendar);
        if conflict {
            return Err(SchedulerError::DualRegistration {
                task: task.label().to_string(),
            });
        }
        Ok(())
    }

    /// `seconds` is `None` for a disabled (`never`) interval.
    fn register_fixed_delay(
        &self,
        task: Arc<dyn RunnableTask>,
        literal: String,
        seconds: Option<Result<u64>>,
    ) -> Registration {
        let mut registry = self.registry();
        if let Err(e) = self.check_dual(&registry, task.as_ref(), false) {
            warn!(task = %task.label(), error = %e, "registration refused");
            return Registration::Failed(e);
        }

        let seconds = match seconds {
            None => {
                info!(task = %task.label(), "skipping job, interval is set to never");
                let mode = ScheduleMode::FixedDelay { literal, seconds: 0 };
                let entry = registry.push(task, mode, EntryState::Dormant);
                return Registration::Dormant { entry };
            }
            Some(Ok(0)) => Err(SchedulerError::Configuration(format!(
                "interval '{literal}' must be at least one second"
            ))),
            Some(other) => other,
        };

        let seconds = match seconds {
            Ok(seconds) => seconds,
            Err(e) => {
                error!(task = %task.label(), %literal, error = %e, "cannot schedule job");
                let mode = ScheduleMode::FixedDelay { literal, seconds: 0 };
                registry.push(task, mode, EntryState::Misconfigured(e.to_string()));
                return Registration::Failed(e);
            }
        };

        let mode = ScheduleMode::FixedDelay { literal, seconds };
        let id = registry.push(task, mode, EntryState::Registered);
        self.arm_registered(&mut registry, id)
    }

    fn register_calendar(&self, task: Arc<dyn RunnableTask>, literal: String) -> Registration {
        let mut registry = self.registry();
        if let Err(e) = self.check_dual(&registry, task.as_ref(), true) {
            warn!(task = %task.label(), error = %e, "registration refused");
            return Registration::Failed(e);
        }
        let id = registry.push(task, ScheduleMode::Calendar { literal }, EntryState::Registered);
        self.arm_registered(&mut registry, id)
    }

    fn arm_registered(&self, registry: &mut Registry, id: EntryId) -> Registration {
        let (Some(pool), Some(entry)) = (self.pool.get(), registry.get_mut(id)) else {
            debug!(entry = id.0, "engine not started; registration deferred");
            return Registration::Deferred { entry: id };
        };
        self.arm(pool, entry)
    }

    fn arm(&self, pool: &WorkerPool, entry: &mut ScheduleEntry) -> Registration {
        match entry.mode.clone() {
            ScheduleMode::FixedDelay { seconds, .. } => self.arm_fixed_delay(pool, entry, seconds),
            ScheduleMode::Calendar { literal } => self.arm_calendar(pool, entry, &literal),
        }
    }

    fn arm_fixed_delay(&self, pool: &WorkerPool, entry: &mut ScheduleEntry, seconds: u64) -> Registration {
        let period = Duration::from_secs(seconds);
        let task = Arc::clone(&entry.task);
        let work: PeriodicWork = Arc::new(move || Arc::clone(&task).execute(None));

        match pool.schedule_with_fixed_delay(entry.task.label(), period, period, work) {
            Ok(submission) => {
                entry.submission = Some(submission);
                entry.state = EntryState::Scheduled;
                info!(task = %entry.task.label(), every_secs = seconds, "job scheduled with fixed delay");
                Registration::Scheduled {
                    entry: entry.id,
                    next: Some(Utc::now() + chrono::Duration::seconds(seconds as i64)),
                }
            }
            Err(e) => self.reject(entry, e),
        }
    }

    /// Plan and submit the next occurrence of a calendar entry.
    fn arm_calendar(&self, pool: &WorkerPool, entry: &mut ScheduleEntry, literal: &str) -> Registration {
        entry.submission = None;
        let expression = self.resolver.resolve(literal);
        if expression.is_empty() || expression.eq_ignore_ascii_case("never") {
            info!(task = %entry.task.label(), "skipping job, cron expression is not defined");
            entry.state = EntryState::Dormant;
            return Registration::Dormant { entry: entry.id };
        }

        let calendar = match CronCalendar::parse(&expression) {
            Ok(calendar) => calendar,
            Err(e) => {
                error!(task = %entry.task.label(), %expression, error = %e, "cannot schedule job");
                entry.state = EntryState::Misconfigured(e.to_string());
                return Registration::Failed(e);
            }
        };

        let now = Utc::now();
        let Some(next) = next_fire_time(&calendar, now, entry.task.next_planned_execution()) else {
            warn!(
                task = %entry.task.label(),
                %expression,
                "cron expression has no match in the future; job will never be executed"
            );
            entry.state = EntryState::Exhausted;
            return Registration::Exhausted { entry: entry.id };
        };

        entry.task.plan(next);
        // Clock skew can put `next` a hair in the past: run right away.
        let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
        let ticket = RearmTicket::new(entry.id, self.commands.clone());
        let work = Arc::clone(&entry.task).execute(Some(ticket));

        match pool.schedule(entry.task.label(), delay, work) {
            Ok(submission) => {
                entry.submission = Some(submission);
                entry.state = EntryState::Scheduled;
                debug!(task = %entry.task.label(), %next, delay_ms = delay.as_millis() as u64, "job armed");
                Registration::Scheduled {
                    entry: entry.id,
                    next: Some(next),
                }
            }
            Err(e) => self.reject(entry, e),
        }
    }

    fn reject(&self, entry: &mut ScheduleEntry, e: SchedulerError) -> Registration {
        warn!(task = %entry.task.label(), error = %e, code = e.code(), "job submission rejected; occurrence skipped");
        entry.submission = None;
        entry.state = EntryState::Rejected(e.to_string());
        Registration::Failed(e)
    }

    fn rearm(&self, id: EntryId) {
        let Some(pool) = self.pool.get() else {
            return;
        };
        let mut registry = self.registry();
        let Some(entry) = registry.get_mut(id) else {
            warn!(entry = id.0, "re-arm requested for unknown entry");
            return;
        };
        let ScheduleMode::Calendar { literal } = entry.mode.clone() else {
            return;
        };
        self.arm_calendar(pool, entry, &literal);
    }
}

/// Applies re-arm requests posted by finished calendar executions.
async fn control_loop(engine: Weak<EngineInner>, mut commands: mpsc::UnboundedReceiver<EngineCommand>) {
    while let Some(command) = commands.recv().await {
        let Some(engine) = engine.upgrade() else {
            break;
        };
        match command {
            EngineCommand::Rearm { entry } => engine.rearm(entry),
        }
    }
    debug!("engine control loop stopped");
}
