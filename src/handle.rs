//! Caller-facing task handles.
//!
//! A [`TaskHandle`] is the submitter's half of a single-producer,
//! single-consumer outcome slot. The worker's run closure produces into
//! the slot exactly once and flips the shared [`TaskStatus`] to a terminal
//! state; the handle blocks on that status to consume the outcome.
//!
//! Waiting and cancelling are independent: a timed-out
//! [`get_timeout`](TaskHandle::get_timeout) leaves the task pending or
//! running, and [`cancel`](TaskHandle::cancel) never interrupts work that
//! already started.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::error::{JoinError, PanicPayload};
use crate::queue::DelayQueue;
use crate::task::{ScheduledTask, TaskState, TaskStatus};
use crate::time::Time;

/// The typed outcome produced by the run closure.
type Outcome<T> = Result<T, PanicPayload>;

/// Handle to one scheduled task, created at submission.
///
/// Shared between the submitter and the worker pool until the task reaches
/// a terminal state; dropping the handle detaches from the task without
/// affecting it.
pub struct TaskHandle<T> {
    seq: u64,
    deadline: Time,
    status: Arc<TaskStatus>,
    slot: Arc<Mutex<Option<Outcome<T>>>>,
    queue: Weak<DelayQueue>,
}

impl<T> TaskHandle<T> {
    /// Blocks until the task finishes and returns its outcome.
    ///
    /// # Errors
    ///
    /// [`JoinError::Cancelled`] if the task was cancelled before running;
    /// [`JoinError::Panicked`] re-raising a captured panic.
    pub fn get(self) -> Result<T, JoinError> {
        self.status.wait_terminal();
        self.take_outcome()
    }

    /// Like [`get`](Self::get), but gives up after `timeout`.
    ///
    /// # Errors
    ///
    /// [`JoinError::Timeout`] if no terminal state was reached in time.
    /// The task itself is unaffected; to wait again without consuming the
    /// handle, use [`wait_timeout`](Self::wait_timeout) first.
    pub fn get_timeout(self, timeout: Duration) -> Result<T, JoinError> {
        if !self.status.wait_terminal_timeout(timeout) {
            return Err(JoinError::Timeout);
        }
        self.take_outcome()
    }

    /// Requests cancellation.
    ///
    /// Returns true only if the task had not started: it is removed from
    /// the queue best-effort and any joiner observes
    /// [`JoinError::Cancelled`]. Returns false once the task is running or
    /// finished; execution is never interrupted.
    pub fn cancel(&self) -> bool {
        if !self.status.try_cancel() {
            return false;
        }
        if let Some(queue) = self.queue.upgrade() {
            queue.remove_if_present(self.seq);
        }
        tracing::debug!(seq = self.seq, "task cancelled before start");
        true
    }

    /// Blocks until the task reaches a terminal state.
    pub fn wait(&self) {
        self.status.wait_terminal();
    }

    /// Waits for a terminal state, giving up after `timeout`.
    ///
    /// Returns true if the task is finished. Never consumes the outcome.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.status.wait_terminal_timeout(timeout)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.status.state()
    }

    /// Returns true once the task is completed, cancelled, or failed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status.state().is_terminal()
    }

    /// Returns true if the task was cancelled before running.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.status.state() == TaskState::Cancelled
    }

    /// The task's sequence number: the deadline tie-break key, assigned in
    /// submission order.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.seq
    }

    /// The instant at which the task becomes eligible.
    #[must_use]
    pub fn deadline(&self) -> Time {
        self.deadline
    }

    /// Consumes a terminal task's outcome.
    fn take_outcome(self) -> Result<T, JoinError> {
        match self.status.state() {
            TaskState::Cancelled => Err(JoinError::Cancelled),
            state @ (TaskState::Completed | TaskState::Failed) => {
                let outcome = self
                    .slot
                    .lock()
                    .expect("task outcome slot poisoned")
                    .take()
                    .expect("terminal task without outcome");
                debug_assert_eq!(outcome.is_ok(), state == TaskState::Completed);
                outcome.map_err(JoinError::Panicked)
            }
            TaskState::Pending | TaskState::Running => {
                unreachable!("take_outcome on a non-terminal task")
            }
        }
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("seq", &self.seq)
            .field("deadline", &self.deadline)
            .field("state", &self.status.state())
            .finish_non_exhaustive()
    }
}

/// Binds a unit of work to a new handle/queue-entry pair.
///
/// The returned [`ScheduledTask`] carries a run closure that executes the
/// work under a panic guard, stores the outcome in the handle's slot, and
/// flips the shared status terminal, in that order, so a joiner woken by
/// the status flip always finds the outcome present.
pub(crate) fn bind<T, F>(
    seq: u64,
    deadline: Time,
    work: F,
    queue: &Arc<DelayQueue>,
) -> (TaskHandle<T>, ScheduledTask)
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let status = Arc::new(TaskStatus::new());
    let slot: Arc<Mutex<Option<Outcome<T>>>> = Arc::new(Mutex::new(None));

    let run = {
        let status = Arc::clone(&status);
        let slot = Arc::clone(&slot);
        Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(work));
            let (outcome, state) = match result {
                Ok(value) => (Ok(value), TaskState::Completed),
                Err(payload) => {
                    let payload = PanicPayload::from_any(payload.as_ref());
                    tracing::debug!(seq, panic = %payload, "task work panicked");
                    (Err(payload), TaskState::Failed)
                }
            };
            *slot.lock().expect("task outcome slot poisoned") = Some(outcome);
            status.finish(state);
        })
    };

    let handle = TaskHandle {
        seq,
        deadline,
        status: Arc::clone(&status),
        slot,
        queue: Arc::downgrade(queue),
    };
    let task = ScheduledTask::new(seq, deadline, status, run);
    (handle, task)
}
