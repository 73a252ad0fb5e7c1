//! Task records and the per-task state machine.
//!
//! Every submitted unit of work is tracked by a type-erased [`TaskStatus`]
//! shared between the ready queue, the claiming worker, and the caller's
//! handle. The status owns the atomic lifecycle state and the wait/notify
//! pair that handle joins block on; the typed outcome travels separately
//! through the handle's slot.
//!
//! # Lifecycle
//!
//! ```text
//! Pending ──try_claim──► Running ──finish──► Completed | Failed
//!    │
//!    └───try_cancel──► Cancelled
//! ```
//!
//! Both `try_claim` and `try_cancel` are compare-and-swap transitions out
//! of `Pending`, so exactly one side wins a claim/cancel race: a task
//! cancelled strictly before the worker's claim never executes, and a
//! cancel that loses the race reports "too late". Terminal states are
//! final; there is no resurrection.

use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::time::Time;

/// Lifecycle state of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TaskState {
    /// Queued, waiting for its deadline.
    Pending = 0,
    /// Claimed by a worker and executing.
    Running = 1,
    /// Work returned a value.
    Completed = 2,
    /// Cancelled before a worker claimed it.
    Cancelled = 3,
    /// Work panicked.
    Failed = 4,
}

impl TaskState {
    /// Returns true for states a task can never leave.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Pending,
            1 => Self::Running,
            2 => Self::Completed,
            3 => Self::Cancelled,
            4 => Self::Failed,
            _ => unreachable!("invalid task state {raw}"),
        }
    }
}

/// Shared, type-erased state cell for one task.
///
/// Holds the atomic lifecycle state plus the mutex/condvar pair that
/// blocking joins park on. State transitions wake all waiters; waits
/// re-check the state in a loop, so spurious wakeups are harmless.
#[derive(Debug, Default)]
pub struct TaskStatus {
    state: AtomicU8,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl TaskStatus {
    /// Creates a status cell in the `Pending` state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Worker-side transition `Pending -> Running`.
    ///
    /// Returns false if the task is no longer pending, in which case the
    /// worker must drop the task without executing it.
    pub fn try_claim(&self) -> bool {
        self.state
            .compare_exchange(
                TaskState::Pending as u8,
                TaskState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Caller-side transition `Pending -> Cancelled`.
    ///
    /// Returns true only if the cancel beat the worker's claim; a false
    /// return means the task is already running or finished ("too late").
    /// Waiters are woken so a blocked join observes the cancellation.
    pub fn try_cancel(&self) -> bool {
        let won = self
            .state
            .compare_exchange(
                TaskState::Pending as u8,
                TaskState::Cancelled as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if won {
            self.notify_waiters();
        }
        won
    }

    /// Records the outcome of executed work and wakes waiters.
    ///
    /// Only a claimed task finishes, and only into `Completed` or `Failed`.
    pub fn finish(&self, state: TaskState) {
        debug_assert!(matches!(state, TaskState::Completed | TaskState::Failed));
        let prev = self.state.swap(state as u8, Ordering::AcqRel);
        debug_assert_eq!(prev, TaskState::Running as u8);
        self.notify_waiters();
    }

    /// Blocks until the task reaches a terminal state.
    pub fn wait_terminal(&self) {
        if self.state().is_terminal() {
            return;
        }
        let mut guard = self.mutex.lock().expect("task status mutex poisoned");
        while !self.state().is_terminal() {
            guard = self
                .condvar
                .wait(guard)
                .expect("task status mutex poisoned");
        }
        drop(guard);
    }

    /// Blocks until a terminal state or the timeout elapses.
    ///
    /// Returns true if the task is terminal, false on timeout. Timing out
    /// leaves the task untouched.
    pub fn wait_terminal_timeout(&self, timeout: Duration) -> bool {
        if self.state().is_terminal() {
            return true;
        }
        let deadline = Instant::now() + timeout;
        let mut guard = self.mutex.lock().expect("task status mutex poisoned");
        while !self.state().is_terminal() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let (next, _timeout_result) = self
                .condvar
                .wait_timeout(guard, remaining)
                .expect("task status mutex poisoned");
            guard = next;
        }
        drop(guard);
        true
    }

    fn notify_waiters(&self) {
        let _guard = self.mutex.lock().expect("task status mutex poisoned");
        self.condvar.notify_all();
    }
}

/// A queue entry: one unit of work with its ordering key.
///
/// Created by the scheduler facade at submission, ordered by
/// `(deadline, seq)`, consumed by the worker that claims it. The `run`
/// closure carries the typed work and publishes the outcome into the
/// submitter's handle.
pub struct ScheduledTask {
    seq: u64,
    deadline: Time,
    status: Arc<TaskStatus>,
    run: Box<dyn FnOnce() + Send>,
}

impl ScheduledTask {
    /// Creates a queue entry.
    #[must_use]
    pub fn new(
        seq: u64,
        deadline: Time,
        status: Arc<TaskStatus>,
        run: Box<dyn FnOnce() + Send>,
    ) -> Self {
        Self {
            seq,
            deadline,
            status,
            run,
        }
    }

    /// The task's sequence number, unique per scheduler.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// The instant at which the task becomes eligible.
    #[must_use]
    pub fn deadline(&self) -> Time {
        self.deadline
    }

    /// The shared state cell.
    #[must_use]
    pub fn status(&self) -> &TaskStatus {
        &self.status
    }

    /// Ordering key: earliest deadline first, ties broken by sequence.
    #[must_use]
    pub fn key(&self) -> (Time, u64) {
        (self.deadline, self.seq)
    }

    /// Runs the work, consuming the entry.
    ///
    /// Must only be called after a successful
    /// [`try_claim`](TaskStatus::try_claim).
    pub fn execute(self) {
        (self.run)();
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("seq", &self.seq)
            .field("deadline", &self.deadline)
            .field("state", &self.status.state())
            .finish_non_exhaustive()
    }
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ScheduledTask {}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reverse ordering so BinaryHeap pops the earliest (deadline, seq).
        other.key().cmp(&self.key())
    }
}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    fn entry(seq: u64, deadline_ms: u64) -> ScheduledTask {
        ScheduledTask::new(
            seq,
            Time::from_millis(deadline_ms),
            Arc::new(TaskStatus::new()),
            Box::new(|| {}),
        )
    }

    #[test]
    fn claim_wins_over_later_cancel() {
        let status = TaskStatus::new();
        assert!(status.try_claim());
        assert!(!status.try_cancel(), "cancel after claim is too late");
        assert_eq!(status.state(), TaskState::Running);
    }

    #[test]
    fn cancel_wins_over_later_claim() {
        let status = TaskStatus::new();
        assert!(status.try_cancel());
        assert!(!status.try_claim(), "cancelled task must not be claimed");
        assert_eq!(status.state(), TaskState::Cancelled);
    }

    #[test]
    fn cancel_is_not_repeatable() {
        let status = TaskStatus::new();
        assert!(status.try_cancel());
        assert!(!status.try_cancel());
    }

    #[test]
    fn finish_records_outcome() {
        let status = TaskStatus::new();
        assert!(status.try_claim());
        status.finish(TaskState::Completed);
        assert_eq!(status.state(), TaskState::Completed);
        assert!(status.state().is_terminal());
    }

    #[test]
    fn wait_terminal_timeout_expires_on_pending() {
        let status = TaskStatus::new();
        assert!(!status.wait_terminal_timeout(Duration::from_millis(20)));
        assert_eq!(status.state(), TaskState::Pending);
    }

    #[test]
    fn wait_terminal_wakes_on_finish() {
        let status = Arc::new(TaskStatus::new());
        assert!(status.try_claim());

        let waiter = {
            let status = Arc::clone(&status);
            thread::spawn(move || {
                status.wait_terminal();
                status.state()
            })
        };

        thread::sleep(Duration::from_millis(20));
        status.finish(TaskState::Failed);
        assert_eq!(waiter.join().expect("waiter panicked"), TaskState::Failed);
    }

    #[test]
    fn wait_terminal_wakes_on_cancel() {
        let status = Arc::new(TaskStatus::new());
        let waiter = {
            let status = Arc::clone(&status);
            thread::spawn(move || status.wait_terminal_timeout(Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(20));
        assert!(status.try_cancel());
        assert!(waiter.join().expect("waiter panicked"));
    }

    #[test]
    fn heap_orders_by_deadline_then_seq() {
        let mut heap = BinaryHeap::new();
        heap.push(entry(3, 50));
        heap.push(entry(1, 100));
        heap.push(entry(2, 50));

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|t| t.seq())).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn execute_runs_the_closure() {
        let ran = Arc::new(AtomicBool::new(false));
        let task = {
            let ran = Arc::clone(&ran);
            ScheduledTask::new(
                0,
                Time::ZERO,
                Arc::new(TaskStatus::new()),
                Box::new(move || ran.store(true, Ordering::Release)),
            )
        };
        task.execute();
        assert!(ran.load(Ordering::Acquire));
    }
}
