//! `WorkerPool`: fixed-size execution substrate for scheduled jobs.
//!
//! The pool owns a dedicated multi-thread Tokio runtime whose worker threads
//! are named by a [`WorkerThreadFactory`]. Tokio's timer driver plays the role
//! of the delay queue; a semaphore with one permit per worker bounds how many
//! submissions execute at once. Submissions wait in a bounded queue until
//! their deadline passes and a permit is free; once the queue is full, new
//! submissions are rejected instead of piling up.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::Serialize;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Result, SchedulerError};
use crate::thread_factory::WorkerThreadFactory;
use crate::types::SubmissionId;

/// Work for a one-shot submission.
pub type Work = BoxFuture<'static, ()>;

/// Work for a periodic submission; called once per run.
pub type PeriodicWork = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Point-in-time counters of the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub running: bool,
    pub pool_size: usize,
    /// Submissions executing right now.
    pub active_count: usize,
    /// Every submission ever queued, periodic re-queues included.
    pub task_count: u64,
    pub completed_count: u64,
    /// Submissions waiting for their deadline or for a free worker.
    pub queue_size: usize,
    pub queue_capacity: usize,
    pub threads_created: usize,
}

/// A queued submission as seen by status reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingSubmission {
    pub id: SubmissionId,
    pub label: String,
    /// Time until the deadline; zero once it has passed and the submission
    /// is only waiting for a worker.
    pub remaining: Duration,
}

struct Pending {
    label: String,
    deadline: Instant,
}

struct PoolShared {
    pending: Mutex<BTreeMap<SubmissionId, Pending>>,
    permits: Arc<Semaphore>,
    active: AtomicUsize,
    submitted: AtomicU64,
    completed: AtomicU64,
    /// Set under the `pending` lock by `shutdown`.
    stopped: AtomicBool,
}

impl PoolShared {
    fn pending(&self) -> MutexGuard<'_, BTreeMap<SubmissionId, Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Re-queue a periodic submission. Returns `false` once the pool has
    /// been shut down.
    fn enqueue(&self, id: SubmissionId, label: String, deadline: Instant) -> bool {
        let mut pending = self.pending();
        if self.stopped.load(Ordering::SeqCst) {
            return false;
        }
        pending.insert(id, Pending { label, deadline });
        drop(pending);
        self.submitted.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn stop(&self) {
        let mut pending = self.pending();
        self.stopped.store(true, Ordering::SeqCst);
        pending.clear();
    }

    /// Wait for the deadline and a free worker, then run `work`.
    async fn dispatch(self: &Arc<Self>, id: SubmissionId, deadline: Instant, work: Work) {
        tokio::time::sleep_until(deadline).await;
        let Ok(_permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return;
        };
        self.pending().remove(&id);

        let _active = ActiveGuard::enter(self);
        work.await;
    }
}

/// Keeps `active` / `completed` right even if the work panics.
struct ActiveGuard<'a> {
    shared: &'a PoolShared,
}

impl<'a> ActiveGuard<'a> {
    fn enter(shared: &'a PoolShared) -> Self {
        shared.active.fetch_add(1, Ordering::SeqCst);
        Self { shared }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.shared.active.fetch_sub(1, Ordering::SeqCst);
        self.shared.completed.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct WorkerPool {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    factory: Arc<WorkerThreadFactory>,
    shared: Arc<PoolShared>,
    pool_size: usize,
    capacity: usize,
    next_id: AtomicU64,
}

impl WorkerPool {
    /// Build the pool and start its `pool_size` worker threads.
    pub fn new(pool_name: &str, pool_size: usize, capacity: usize) -> Result<Self> {
        if pool_size == 0 {
            return Err(SchedulerError::Configuration(
                "pool size must be at least 1".to_string(),
            ));
        }
        if capacity == 0 {
            return Err(SchedulerError::Configuration(
                "queue capacity must be at least 1".to_string(),
            ));
        }

        let factory = Arc::new(WorkerThreadFactory::new(pool_name));
        let names = Arc::clone(&factory);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(pool_size)
            .thread_name_fn(move || names.next_name())
            .on_thread_start(|| {
                debug!(thread = ?std::thread::current().name(), "pool thread started");
            })
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();

        info!(pool = %pool_name, pool_size, capacity, "worker pool started");
        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            handle,
            factory,
            shared: Arc::new(PoolShared {
                pending: Mutex::new(BTreeMap::new()),
                permits: Arc::new(Semaphore::new(pool_size)),
                active: AtomicUsize::new(0),
                submitted: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                stopped: AtomicBool::new(false),
            }),
            pool_size,
            capacity,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn from_config(config: &tickwork_core::SchedulerConfig) -> Result<Self> {
        Self::new(&config.pool_name, config.pool_size, config.queue_capacity)
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn is_running(&self) -> bool {
        self.runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Run `work` once, `delay` from now.
    pub fn schedule(&self, label: &str, delay: Duration, work: Work) -> Result<SubmissionId> {
        let deadline = Instant::now() + delay;
        let id = self.admit(label, deadline)?;

        let shared = Arc::clone(&self.shared);
        self.handle.spawn(async move {
            shared.dispatch(id, deadline, work).await;
        });
        Ok(id)
    }

    /// Run `work` after `initial`, then again `period` after each run
    /// completes. Runs of one periodic submission never overlap.
    ///
    /// Only the first submission counts against the queue capacity; the
    /// periodic re-queues of an accepted submission are never rejected.
    pub fn schedule_with_fixed_delay(
        &self,
        label: &str,
        initial: Duration,
        period: Duration,
        work: PeriodicWork,
    ) -> Result<SubmissionId> {
        let first = Instant::now() + initial;
        let id = self.admit(label, first)?;

        let shared = Arc::clone(&self.shared);
        let label = label.to_string();
        self.handle.spawn(async move {
            let mut deadline = first;
            loop {
                shared.dispatch(id, deadline, work()).await;
                deadline = Instant::now() + period;
                if !shared.enqueue(id, label.clone(), deadline) {
                    debug!(%label, "pool stopped; periodic submission ends");
                    break;
                }
            }
        });
        Ok(id)
    }

    fn admit(&self, label: &str, deadline: Instant) -> Result<SubmissionId> {
        if !self.is_running() {
            warn!(%label, "submission refused: pool is shut down");
            return Err(SchedulerError::NotRunning);
        }

        let mut pending = self.shared.pending();
        if pending.len() >= self.capacity {
            warn!(%label, capacity = self.capacity, "submission rejected: pool queue is full");
            return Err(SchedulerError::Capacity {
                capacity: self.capacity,
            });
        }
        let id = SubmissionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        pending.insert(
            id,
            Pending {
                label: label.to_string(),
                deadline,
            },
        );
        drop(pending);
        self.shared.submitted.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            running: self.is_running(),
            pool_size: self.pool_size,
            active_count: self.shared.active.load(Ordering::SeqCst),
            task_count: self.shared.submitted.load(Ordering::SeqCst),
            completed_count: self.shared.completed.load(Ordering::SeqCst),
            queue_size: self.shared.pending().len(),
            queue_capacity: self.capacity,
            threads_created: self.factory.threads_created(),
        }
    }

    /// Queued submissions, soonest first.
    pub fn pending(&self) -> Vec<PendingSubmission> {
        let now = Instant::now();
        let mut queued: Vec<_> = self
            .shared
            .pending()
            .iter()
            .map(|(id, p)| PendingSubmission {
                id: *id,
                label: p.label.clone(),
                remaining: p.deadline.saturating_duration_since(now),
            })
            .collect();
        queued.sort_by_key(|p| (p.remaining, p.id));
        queued
    }

    /// Stop the runtime without waiting for running jobs. Idempotent.
    pub fn shutdown(&self) {
        let runtime = self
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(runtime) = runtime {
            self.shared.stop();
            runtime.shutdown_background();
            info!(pool = %self.factory.group(), "worker pool stopped");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::sync::mpsc;
    use std::time::Instant as StdInstant;

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = StdInstant::now();
        while start.elapsed() < timeout {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        cond()
    }

    #[test]
    fn workers_are_named_by_the_factory() {
        let pool = WorkerPool::new("jobs", 2, 10).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.schedule(
            "name-probe",
            Duration::ZERO,
            async move {
                let name = std::thread::current().name().map(str::to_string);
                let _ = tx.send(name);
            }
            .boxed(),
        )
        .unwrap();

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert!(name.starts_with("jobs-thread-"), "thread name was {name}");
        assert!(pool.stats().threads_created >= 1);
    }

    #[test]
    fn one_shot_waits_for_its_delay() {
        let pool = WorkerPool::new("jobs", 1, 10).unwrap();
        let (tx, rx) = mpsc::channel();
        let submitted = StdInstant::now();
        pool.schedule(
            "delayed",
            Duration::from_millis(300),
            async move {
                let _ = tx.send(StdInstant::now());
            }
            .boxed(),
        )
        .unwrap();

        let ran_at = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(ran_at.duration_since(submitted) >= Duration::from_millis(290));
    }

    #[test]
    fn pending_submissions_are_listed_with_labels() {
        let pool = WorkerPool::new("jobs", 1, 10).unwrap();
        pool.schedule("later", Duration::from_secs(60), async {}.boxed())
            .unwrap();
        pool.schedule("sooner", Duration::from_secs(30), async {}.boxed())
            .unwrap();

        let pending = pool.pending();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].label, "sooner");
        assert_eq!(pending[1].label, "later");
        assert!(pending[0].remaining <= Duration::from_secs(30));
        assert!(pending[0].remaining > Duration::from_secs(25));

        let stats = pool.stats();
        assert_eq!(stats.queue_size, 2);
        assert_eq!(stats.task_count, 2);
        assert_eq!(stats.active_count, 0);
    }

    #[test]
    fn full_queue_rejects_new_submissions() {
        let pool = WorkerPool::new("jobs", 1, 2).unwrap();
        for _ in 0..2 {
            pool.schedule("slow", Duration::from_secs(10), async {}.boxed())
                .unwrap();
        }
        let err = pool
            .schedule("overflow", Duration::from_secs(10), async {}.boxed())
            .unwrap_err();
        assert_eq!(err.code(), "CAPACITY_ERROR");
        assert_eq!(pool.stats().queue_size, 2);
    }

    #[test]
    fn concurrency_is_bounded_by_pool_size() {
        let pool = WorkerPool::new("jobs", 2, 10).unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let (active, peak, done) = (active.clone(), peak.clone(), done.clone());
            pool.schedule(
                "slow",
                Duration::ZERO,
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(150)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    done.fetch_add(1, Ordering::SeqCst);
                }
                .boxed(),
            )
            .unwrap();
        }

        assert!(wait_until(Duration::from_secs(5), || done.load(Ordering::SeqCst) == 5));
        assert!(peak.load(Ordering::SeqCst) <= 2);
        let stats = pool.stats();
        assert_eq!(stats.completed_count, 5);
        assert_eq!(stats.active_count, 0);
        assert_eq!(stats.queue_size, 0);
    }

    #[test]
    fn fixed_delay_runs_never_overlap() {
        let pool = WorkerPool::new("jobs", 4, 10).unwrap();
        let starts = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicUsize::new(0));
        let overlapped = Arc::new(AtomicUsize::new(0));

        let work: PeriodicWork = {
            let (starts, running, overlapped) = (starts.clone(), running.clone(), overlapped.clone());
            Arc::new(move || {
                let (starts, running, overlapped) =
                    (starts.clone(), running.clone(), overlapped.clone());
                async move {
                    if running.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlapped.fetch_add(1, Ordering::SeqCst);
                    }
                    starts.lock().unwrap().push(StdInstant::now());
                    tokio::time::sleep(Duration::from_millis(60)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                }
                .boxed()
            })
        };
        pool.schedule_with_fixed_delay(
            "periodic",
            Duration::from_millis(100),
            Duration::from_millis(100),
            work,
        )
        .unwrap();

        assert!(wait_until(Duration::from_secs(5), || starts.lock().unwrap().len() >= 4));
        assert_eq!(overlapped.load(Ordering::SeqCst), 0);
        let starts = starts.lock().unwrap().clone();
        for pair in starts.windows(2) {
            // period is counted from completion: 60ms of work + 100ms delay
            assert!(pair[1].duration_since(pair[0]) >= Duration::from_millis(150));
        }
    }

    #[test]
    fn shutdown_refuses_further_work() {
        let pool = WorkerPool::new("jobs", 1, 10).unwrap();
        pool.schedule("queued", Duration::from_secs(60), async {}.boxed())
            .unwrap();
        pool.shutdown();
        pool.shutdown();

        let stats = pool.stats();
        assert!(!stats.running);
        assert_eq!(stats.queue_size, 0);
        let err = pool
            .schedule("late", Duration::ZERO, async {}.boxed())
            .unwrap_err();
        assert_eq!(err.code(), "NOT_RUNNING");
    }

    #[test]
    fn periodic_requeue_is_refused_after_shutdown() {
        let pool = WorkerPool::new("jobs", 1, 10).unwrap();
        let work: PeriodicWork = Arc::new(|| async {}.boxed());
        let id = pool
            .schedule_with_fixed_delay("periodic", Duration::from_secs(60), Duration::from_secs(60), work)
            .unwrap();
        assert!(pool
            .shared
            .enqueue(id, "periodic".to_string(), Instant::now()));

        pool.shutdown();
        assert!(!pool
            .shared
            .enqueue(id, "periodic".to_string(), Instant::now()));
        assert_eq!(pool.stats().queue_size, 0);
        assert!(pool.pending().is_empty());
    }

    #[test]
    fn zero_workers_is_a_configuration_error() {
        let err = WorkerPool::new("jobs", 0, 10).err().unwrap();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn zero_capacity_is_a_configuration_error() {
        let err = WorkerPool::new("jobs", 2, 0).err().unwrap();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
        assert!(err.to_string().contains("queue capacity"));
    }
}
