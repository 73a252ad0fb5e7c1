//! The scheduler facade: submission, shutdown, and composition root.
//!
//! [`Scheduler`] owns the delay queue, the worker pool, the time source,
//! and the sequence counter as explicit components. The absolute-time
//! entry point is a pure clamped-delay computation over the relative one,
//! not a separate scheduling path.
//!
//! # Ordering guarantee
//!
//! Sequence numbers come from a single atomic counter, so concurrent
//! submitters with the same deadline are ordered by submission, never by
//! wall-clock resolution or insertion race. For any two tasks, the one
//! with the earlier `(deadline, seq)` key is claimed first.
//!
//! # Example
//!
//! ```
//! use delayq::Scheduler;
//! use std::time::Duration;
//!
//! let scheduler = Scheduler::new(2);
//! let handle = scheduler
//!     .submit_after(|| 2 + 2, Duration::from_millis(1))
//!     .expect("scheduler accepting work");
//! assert_eq!(handle.get(), Ok(4));
//! scheduler.shutdown_and_wait(Duration::from_secs(1));
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::ScheduleError;
use crate::handle::{self, TaskHandle};
use crate::pool::WorkerPool;
use crate::queue::DelayQueue;
use crate::time::{Time, TimeSource, WallClock};

/// Construction options for a [`Scheduler`].
#[derive(Clone)]
pub struct SchedulerConfig {
    /// Number of worker threads; fixed for the scheduler's lifetime.
    pub workers: usize,
    /// Prefix for worker thread names.
    pub thread_name_prefix: String,
    /// Callback invoked on each worker thread as it starts.
    pub on_thread_start: Option<Arc<dyn Fn() + Send + Sync>>,
    /// Callback invoked on each worker thread before it exits.
    pub on_thread_stop: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl SchedulerConfig {
    /// Sets the number of worker threads.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Sets the thread-start callback.
    #[must_use]
    pub fn with_on_thread_start(mut self, callback: Arc<dyn Fn() + Send + Sync>) -> Self {
        self.on_thread_start = Some(callback);
        self
    }

    /// Sets the thread-stop callback.
    #[must_use]
    pub fn with_on_thread_stop(mut self, callback: Arc<dyn Fn() + Send + Sync>) -> Self {
        self.on_thread_stop = Some(callback);
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            thread_name_prefix: "delayq".to_string(),
            on_thread_start: None,
            on_thread_stop: None,
        }
    }
}

impl fmt::Debug for SchedulerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerConfig")
            .field("workers", &self.workers)
            .field("thread_name_prefix", &self.thread_name_prefix)
            .field("on_thread_start", &self.on_thread_start.is_some())
            .field("on_thread_stop", &self.on_thread_stop.is_some())
            .finish()
    }
}

/// Delay-ordered task scheduler over a fixed worker pool.
///
/// Submission never blocks; only handle joins and the internal worker
/// wait loop do. Share across threads behind an `Arc`; all methods take
/// `&self`.
pub struct Scheduler {
    queue: Arc<DelayQueue>,
    pool: WorkerPool,
    clock: Arc<dyn TimeSource>,
    next_seq: AtomicU64,
}

impl Scheduler {
    /// Creates a scheduler with `workers` threads on a wall clock.
    ///
    /// # Panics
    ///
    /// Panics if `workers` is zero.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self::with_config(
            SchedulerConfig::default().with_workers(workers),
            Arc::new(WallClock::new()),
        )
    }

    /// Creates a scheduler from explicit options and time source.
    ///
    /// # Panics
    ///
    /// Panics if `config.workers` is zero.
    #[must_use]
    pub fn with_config(config: SchedulerConfig, clock: Arc<dyn TimeSource>) -> Self {
        assert!(config.workers > 0, "scheduler needs at least one worker");
        let queue = Arc::new(DelayQueue::new(Arc::clone(&clock)));
        let pool = WorkerPool::start(Arc::clone(&queue), &config);
        Self {
            queue,
            pool,
            clock,
            next_seq: AtomicU64::new(0),
        }
    }

    /// Submits work to run once `delay` has elapsed.
    ///
    /// A zero delay makes the task immediately eligible. Returns the
    /// handle without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::Shutdown`] after
    /// [`shutdown`](Self::shutdown); the work is dropped unrun.
    pub fn submit_after<T, F>(&self, work: F, delay: Duration) -> Result<TaskHandle<T>, ScheduleError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let deadline = self.clock.now() + delay;
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (handle, task) = handle::bind(seq, deadline, work, &self.queue);
        self.queue.insert(task)?;
        Ok(handle)
    }

    /// Submits work to run at an absolute instant.
    ///
    /// Equivalent to `submit_after` with `max(0, deadline - now)`: a
    /// deadline already in the past runs at once, ordered among other
    /// due tasks by submission sequence, not by how far past it was.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::Shutdown`] after [`shutdown`](Self::shutdown).
    pub fn submit_at<T, F>(&self, work: F, deadline: Time) -> Result<TaskHandle<T>, ScheduleError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let delay = deadline.saturating_duration_since(self.clock.now());
        self.submit_after(work, delay)
    }

    /// Stops accepting submissions; queued tasks drain at their deadlines.
    ///
    /// Workers exit once the queue is empty. Idempotent.
    pub fn shutdown(&self) {
        tracing::debug!("scheduler shutdown requested");
        self.queue.close();
    }

    /// Shuts down and cancels every task still pending.
    ///
    /// Returns how many pending tasks were cancelled; their joiners
    /// observe `Cancelled`. Tasks already running are not interruptible
    /// and complete normally.
    pub fn shutdown_now(&self) -> usize {
        tracing::debug!("scheduler immediate shutdown requested");
        self.queue.clear_pending()
    }

    /// Graceful shutdown plus a bounded wait for workers to exit.
    ///
    /// Returns true if all workers exited within `timeout`. With
    /// far-future tasks still queued the drain can outlast the timeout;
    /// use [`shutdown_now`](Self::shutdown_now) to cut them loose first.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.shutdown();
        self.pool.join(timeout)
    }

    /// Returns true once the scheduler stopped accepting work.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.queue.is_closed()
    }

    /// Number of tasks queued and not yet claimed.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// The fixed worker count.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    /// Workers currently executing a task.
    #[must_use]
    pub fn busy_workers(&self) -> usize {
        self.pool.busy_workers()
    }

    /// The scheduler's time source, for computing absolute deadlines.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn TimeSource> {
        &self.clock
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.queue.len())
            .field("workers", &self.pool.worker_count())
            .field("busy", &self.pool.busy_workers())
            .field("shutdown", &self.queue.is_closed())
            .finish_non_exhaustive()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // Cancel pending work rather than draining: a graceful drain would
        // block the drop until the last queued deadline.
        self.shutdown_now();
        let _ = self.pool.join(Duration::from_secs(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JoinError;
    use crate::task::TaskState;
    use crate::time::VirtualClock;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;

    #[test]
    fn zero_delay_runs_immediately() {
        let scheduler = Scheduler::new(1);
        let handle = scheduler.submit_after(|| 7, Duration::ZERO).unwrap();
        assert_eq!(handle.get_timeout(Duration::from_secs(2)), Ok(7));
    }

    #[test]
    fn sequences_are_assigned_in_submission_order() {
        let scheduler = Scheduler::new(1);
        let a = scheduler
            .submit_after(|| (), Duration::from_secs(60))
            .unwrap();
        let b = scheduler
            .submit_after(|| (), Duration::from_secs(60))
            .unwrap();
        assert!(a.sequence() < b.sequence());
        assert_eq!(scheduler.pending_count(), 2);
    }

    #[test]
    fn submit_at_past_deadline_is_clamped_to_now() {
        let clock = Arc::new(VirtualClock::starting_at(Time::from_secs(100)));
        let scheduler = Scheduler::with_config(
            SchedulerConfig::default(),
            Arc::clone(&clock) as Arc<dyn TimeSource>,
        );

        let handle = scheduler.submit_at(|| 1, Time::from_secs(10)).unwrap();
        assert_eq!(
            handle.deadline(),
            Time::from_secs(100),
            "past deadline clamps to now"
        );
        assert_eq!(handle.get_timeout(Duration::from_secs(2)), Ok(1));
    }

    #[test]
    fn submit_after_shutdown_is_rejected() {
        let scheduler = Scheduler::new(1);
        scheduler.shutdown();
        assert!(scheduler.is_shutdown());

        let err = scheduler.submit_after(|| (), Duration::ZERO).unwrap_err();
        assert_eq!(err, ScheduleError::Shutdown);
        let err = scheduler.submit_at(|| (), Time::ZERO).unwrap_err();
        assert_eq!(err, ScheduleError::Shutdown);
    }

    #[test]
    fn tasks_queued_before_shutdown_still_complete() {
        let scheduler = Scheduler::new(2);
        let results = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..3 {
            let results = Arc::clone(&results);
            handles.push(
                scheduler
                    .submit_after(
                        move || results.lock().unwrap().push(i),
                        Duration::from_millis(30),
                    )
                    .unwrap(),
            );
        }

        scheduler.shutdown();
        assert!(scheduler.shutdown_and_wait(Duration::from_secs(2)));
        for handle in handles {
            assert_eq!(handle.get(), Ok(()));
        }
        assert_eq!(results.lock().unwrap().len(), 3);
    }

    #[test]
    fn shutdown_now_cancels_pending_tasks() {
        let scheduler = Scheduler::new(1);
        let ran = Arc::new(AtomicBool::new(false));
        let handle = {
            let ran = Arc::clone(&ran);
            scheduler
                .submit_after(
                    move || ran.store(true, Ordering::Release),
                    Duration::from_secs(60),
                )
                .unwrap()
        };

        assert_eq!(scheduler.shutdown_now(), 1);
        assert_eq!(handle.get(), Err(JoinError::Cancelled));
        assert!(!ran.load(Ordering::Acquire));
        assert!(scheduler.shutdown_and_wait(Duration::from_secs(2)));
    }

    #[test]
    fn panicking_task_fails_without_killing_workers() {
        let scheduler = Scheduler::new(1);
        let bad = scheduler
            .submit_after(|| -> () { panic!("exploding task") }, Duration::ZERO)
            .unwrap();
        match bad.get_timeout(Duration::from_secs(2)) {
            Err(JoinError::Panicked(payload)) => {
                assert_eq!(payload.message(), "exploding task");
            }
            other => panic!("expected panic outcome, got {other:?}"),
        }

        // The same (sole) worker keeps serving tasks.
        let good = scheduler.submit_after(|| 11, Duration::ZERO).unwrap();
        assert_eq!(good.get_timeout(Duration::from_secs(2)), Ok(11));
    }

    #[test]
    fn cancel_before_deadline_prevents_execution() {
        let scheduler = Scheduler::new(1);
        let ran = Arc::new(AtomicBool::new(false));
        let handle = {
            let ran = Arc::clone(&ran);
            scheduler
                .submit_after(
                    move || ran.store(true, Ordering::Release),
                    Duration::from_millis(80),
                )
                .unwrap()
        };

        assert!(handle.cancel());
        assert_eq!(scheduler.pending_count(), 0, "cancelled entry removed");
        assert!(handle.is_cancelled());
        std::thread::sleep(Duration::from_millis(160));
        assert!(!ran.load(Ordering::Acquire));
    }

    #[test]
    fn cancel_after_start_reports_too_late() {
        let scheduler = Scheduler::new(1);
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let handle = scheduler
            .submit_after(
                move || {
                    started_tx.send(()).expect("receiver alive");
                    std::thread::sleep(Duration::from_millis(60));
                    123
                },
                Duration::ZERO,
            )
            .unwrap();

        started_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("task never started");
        assert!(!handle.cancel(), "running task reported cancellable");
        assert_eq!(handle.state(), TaskState::Running);
        assert_eq!(handle.get_timeout(Duration::from_secs(2)), Ok(123));
    }

    #[test]
    fn shutdown_is_idempotent() {
        let scheduler = Scheduler::new(1);
        scheduler.shutdown();
        scheduler.shutdown();
        assert_eq!(scheduler.shutdown_now(), 0);
        assert!(scheduler.shutdown_and_wait(Duration::from_secs(2)));
    }

    #[test]
    fn config_debug_hides_callbacks() {
        let config = SchedulerConfig::default()
            .with_workers(4)
            .with_thread_name_prefix("test")
            .with_on_thread_start(Arc::new(|| {}));
        let rendered = format!("{config:?}");
        assert!(rendered.contains("workers: 4"));
        assert!(rendered.contains("on_thread_start: true"));
    }
}
