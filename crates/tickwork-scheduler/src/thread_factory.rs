use std::sync::atomic::{AtomicUsize, Ordering};

/// Names the worker threads of one pool.
///
/// Every name is `<pool>-thread-<n>` with `n` starting at 1 and never reused,
/// even after the thread it was given to has exited. The pool name doubles as
/// the thread group: it is the only thing all of the pool's threads share.
#[derive(Debug)]
pub struct WorkerThreadFactory {
    group: String,
    name_prefix: String,
    thread_number: AtomicUsize,
}

impl WorkerThreadFactory {
    pub fn new(pool_name: &str) -> Self {
        Self {
            group: pool_name.to_string(),
            name_prefix: format!("{pool_name}-thread-"),
            thread_number: AtomicUsize::new(1),
        }
    }

    /// Name for the next thread. Safe to call from any thread.
    pub fn next_name(&self) -> String {
        let n = self.thread_number.fetch_add(1, Ordering::SeqCst);
        format!("{}{}", self.name_prefix, n)
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// How many names have been handed out so far.
    pub fn threads_created(&self) -> usize {
        self.thread_number.load(Ordering::SeqCst) - 1
    }
}
