//! Fixed pool of worker threads draining the delay queue.
//!
//! Each worker loops on [`DelayQueue::wait_for_next`], claims the task it
//! receives, and executes it. The pool size is fixed at construction and
//! bounds the number of concurrently running tasks; a saturated pool
//! simply leaves eligible tasks queued until a worker frees up.
//!
//! # Claiming
//!
//! Between the queue handing a task out and the worker running it sits the
//! `Pending -> Running` compare-and-swap. A task cancelled before that
//! transition loses the race here and is dropped unexecuted; its waiters
//! were already woken by the cancel.
//!
//! # Panics in work
//!
//! The task's `run` closure captures panics and publishes them as a failed
//! outcome, so a panicking task never takes a worker thread down. The loop
//! itself contains no fallible work.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::queue::DelayQueue;
use crate::scheduler::SchedulerConfig;

/// The worker threads executing scheduled tasks.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

struct PoolInner {
    queue: Arc<DelayQueue>,
    workers: usize,
    active: AtomicUsize,
    busy: AtomicUsize,
    executed: AtomicU64,
    on_thread_start: Option<Arc<dyn Fn() + Send + Sync>>,
    on_thread_stop: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl WorkerPool {
    /// Spawns `config.workers` named threads draining `queue`.
    ///
    /// # Panics
    ///
    /// Panics if a worker thread cannot be spawned.
    #[must_use]
    pub fn start(queue: Arc<DelayQueue>, config: &SchedulerConfig) -> Self {
        let inner = Arc::new(PoolInner {
            queue,
            workers: config.workers,
            active: AtomicUsize::new(0),
            busy: AtomicUsize::new(0),
            executed: AtomicU64::new(0),
            on_thread_start: config.on_thread_start.clone(),
            on_thread_stop: config.on_thread_stop.clone(),
        });

        let mut handles = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            let inner = Arc::clone(&inner);
            let name = format!("{}-worker-{index}", config.thread_name_prefix);
            inner.active.fetch_add(1, Ordering::Relaxed);
            let handle = thread::Builder::new()
                .name(name)
                .spawn(move || {
                    if let Some(ref callback) = inner.on_thread_start {
                        callback();
                    }
                    worker_loop(&inner);
                    if let Some(ref callback) = inner.on_thread_stop {
                        callback();
                    }
                    inner.active.fetch_sub(1, Ordering::Release);
                })
                .expect("failed to spawn scheduler worker thread");
            handles.push(handle);
        }

        Self {
            inner,
            handles: Mutex::new(handles),
        }
    }

    /// The fixed number of workers.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.inner.workers
    }

    /// Workers currently executing a task.
    #[must_use]
    pub fn busy_workers(&self) -> usize {
        self.inner.busy.load(Ordering::Relaxed)
    }

    /// Tasks executed so far, cancelled claims excluded.
    #[must_use]
    pub fn executed_count(&self) -> u64 {
        self.inner.executed.load(Ordering::Relaxed)
    }

    /// Waits for every worker to exit after the queue was closed.
    ///
    /// Returns true if all workers exited within `timeout`. Workers only
    /// exit once the closed queue drains, so with far-future tasks still
    /// queued a graceful join can legitimately time out.
    pub fn join(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.inner.active.load(Ordering::Acquire) > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }

        let mut handles = self.handles.lock().expect("worker pool mutex poisoned");
        for handle in handles.drain(..) {
            // Workers have left the loop; join returns immediately.
            let _ = handle.join();
        }
        true
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.inner.workers)
            .field("busy", &self.busy_workers())
            .field("executed", &self.executed_count())
            .finish_non_exhaustive()
    }
}

fn worker_loop(inner: &PoolInner) {
    tracing::trace!("worker started");
    while let Some(task) = inner.queue.wait_for_next() {
        if !task.status().try_claim() {
            tracing::trace!(seq = task.seq(), "dropping cancelled task");
            continue;
        }
        inner.busy.fetch_add(1, Ordering::Relaxed);
        task.execute();
        inner.busy.fetch_sub(1, Ordering::Relaxed);
        inner.executed.fetch_add(1, Ordering::Relaxed);
    }
    tracing::trace!("worker exiting");
}
