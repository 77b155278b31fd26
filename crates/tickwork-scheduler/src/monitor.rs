//! Execution timing sinks.
//!
//! A [`Monitor`] is started right before a job's work function and stopped
//! right after, whatever the outcome. Sinks are best-effort: a panic inside
//! `start` or `stop` is swallowed by [`timed_start`] / [`timed_stop`] so it
//! can never change the result of the job being timed.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, warn};

/// Factory of running timers.
pub trait Monitor: Send + Sync {
    fn start(&self, label: &str) -> Box<dyn MonitorHandle>;
}

/// A running timer.
pub trait MonitorHandle: Send {
    fn stop(self: Box<Self>);
}

/// Start a timer, treating a panicking sink as "no timer".
pub(crate) fn timed_start(monitor: &dyn Monitor, label: &str) -> Option<Box<dyn MonitorHandle>> {
    match catch_unwind(AssertUnwindSafe(|| monitor.start(label))) {
        Ok(handle) => Some(handle),
        Err(_) => {
            warn!(%label, "monitor start panicked; execution continues untimed");
            None
        }
    }
}

pub(crate) fn timed_stop(handle: Option<Box<dyn MonitorHandle>>) {
    if let Some(handle) = handle {
        if catch_unwind(AssertUnwindSafe(|| handle.stop())).is_err() {
            warn!("monitor stop panicked");
        }
    }
}

// ---------------------------------------------------------------------------
// TracingMonitor
// ---------------------------------------------------------------------------

/// Default sink: emits a `debug!` event with the elapsed time.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMonitor;

struct TracingHandle {
    label: String,
    started: Instant,
}

impl Monitor for TracingMonitor {
    fn start(&self, label: &str) -> Box<dyn MonitorHandle> {
        Box::new(TracingHandle {
            label: label.to_string(),
            started: Instant::now(),
        })
    }
}

impl MonitorHandle for TracingHandle {
    fn stop(self: Box<Self>) {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        debug!(label = %self.label, elapsed_ms, "job timed");
    }
}

// ---------------------------------------------------------------------------
// StatsMonitor
// ---------------------------------------------------------------------------

/// Aggregated timings for one label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonitorStats {
    pub hits: u64,
    pub total: Duration,
    pub min: Duration,
    pub max: Duration,
    pub last: Duration,
}

impl MonitorStats {
    fn record(&mut self, elapsed: Duration) {
        self.min = if self.hits == 0 {
            elapsed
        } else {
            self.min.min(elapsed)
        };
        self.max = self.max.max(elapsed);
        self.hits += 1;
        self.total += elapsed;
        self.last = elapsed;
    }

    pub fn average(&self) -> Duration {
        if self.hits == 0 {
            Duration::ZERO
        } else {
            self.total / self.hits as u32
        }
    }
}

/// Keeps hit count and min/max/last/total duration per label.
///
/// Cloning shares the underlying table, so the engine and the application
/// can hold the same monitor.
#[derive(Debug, Default, Clone)]
pub struct StatsMonitor {
    stats: std::sync::Arc<DashMap<String, MonitorStats>>,
}

struct StatsHandle {
    label: String,
    started: Instant,
    stats: std::sync::Arc<DashMap<String, MonitorStats>>,
}

impl StatsMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, label: &str) -> Option<MonitorStats> {
        self.stats.get(label).map(|entry| entry.value().clone())
    }

    /// Copy of every label's stats, sorted by label.
    pub fn snapshot(&self) -> Vec<(String, MonitorStats)> {
        let mut all: Vec<_> = self
            .stats
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

impl Monitor for StatsMonitor {
    fn start(&self, label: &str) -> Box<dyn MonitorHandle> {
        Box::new(StatsHandle {
            label: label.to_string(),
            started: Instant::now(),
            stats: std::sync::Arc::clone(&self.stats),
        })
    }
}

impl MonitorHandle for StatsHandle {
    fn stop(self: Box<Self>) {
        let StatsHandle {
            label,
            started,
            stats,
        } = *self;
        stats.entry(label).or_default().record(started.elapsed());
    }
}
