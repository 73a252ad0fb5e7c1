//! Delay-ordered ready queue.
//!
//! [`DelayQueue`] is the single shared structure between submitters and
//! workers: a min-heap of pending tasks keyed by `(deadline, seq)` behind
//! one mutex, with a condvar carrying the blocking-wait protocol.
//!
//! # Waiting protocol
//!
//! A worker in [`wait_for_next`](DelayQueue::wait_for_next):
//!
//! - parks indefinitely while the queue is empty;
//! - parks until the head's deadline when the head is not yet eligible;
//!   an insert that becomes the new head wakes it so the wait rewinds to
//!   the earlier deadline;
//! - pops the head once eligible, then wakes one more waiter so the next
//!   worker stands by on the new head;
//! - returns `None` once the queue is closed and drained.
//!
//! The eligibility decision itself is a pure step function over the locked
//! state, so unit tests drive it deterministically with a virtual clock.
//!
//! # Tie-breaking
//!
//! Deadlines equal within clock resolution order strictly by sequence
//! number. Eligibility is `deadline <= now`, so zero and past deadlines
//! run immediately.

use std::collections::BinaryHeap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::ScheduleError;
use crate::task::ScheduledTask;
use crate::time::{Time, TimeSource};

/// Concurrency-safe ordered multiset of pending tasks.
pub struct DelayQueue {
    clock: Arc<dyn TimeSource>,
    state: Mutex<QueueState>,
    available: Condvar,
}

struct QueueState {
    heap: BinaryHeap<ScheduledTask>,
    closed: bool,
}

/// Outcome of one eligibility check over the locked state.
enum NextStep {
    /// The head was eligible and has been popped.
    Ready(ScheduledTask),
    /// Queue closed and empty; workers should exit.
    Drained,
    /// Queue empty but open; park until an insert.
    Idle,
    /// Head exists but is not yet eligible; park for at most this long.
    NotYet(Duration),
}

impl DelayQueue {
    /// Creates an empty queue reading time from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn TimeSource>) -> Self {
        Self {
            clock,
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Inserts a task in O(log n).
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::Shutdown`] once the queue is closed; the
    /// task is dropped unqueued.
    pub fn insert(&self, task: ScheduledTask) -> Result<(), ScheduleError> {
        let mut state = self.lock_state();
        if state.closed {
            return Err(ScheduleError::Shutdown);
        }
        let new_head = state
            .heap
            .peek()
            .map_or(true, |head| task.key() < head.key());
        tracing::trace!(seq = task.seq(), deadline = %task.deadline(), "task queued");
        state.heap.push(task);
        drop(state);
        if new_head {
            // The new earliest deadline invalidates a waiter's timed park;
            // wake one so it re-evaluates against the new head.
            self.available.notify_one();
        }
        Ok(())
    }

    /// Returns the `(deadline, seq)` key of the earliest task, if any.
    #[must_use]
    pub fn peek_earliest(&self) -> Option<(Time, u64)> {
        self.lock_state().heap.peek().map(ScheduledTask::key)
    }

    /// Best-effort removal by sequence number, used by cancellation.
    ///
    /// Returns false if the task is absent, typically because a worker
    /// already popped it.
    pub fn remove_if_present(&self, seq: u64) -> bool {
        let mut state = self.lock_state();
        let before = state.heap.len();
        state.heap.retain(|task| task.seq() != seq);
        state.heap.len() != before
    }

    /// Pops the earliest task if its deadline has elapsed. Non-blocking.
    #[must_use]
    pub fn try_next(&self) -> Option<ScheduledTask> {
        let mut state = self.lock_state();
        let now = self.clock.now();
        match Self::next_step(&mut state, now) {
            NextStep::Ready(task) => Some(task),
            NextStep::Drained | NextStep::Idle | NextStep::NotYet(_) => None,
        }
    }

    /// Blocks until a task is eligible, returning it, or until the queue
    /// is closed and drained, returning `None`.
    pub fn wait_for_next(&self) -> Option<ScheduledTask> {
        let mut state = self.lock_state();
        loop {
            let now = self.clock.now();
            match Self::next_step(&mut state, now) {
                NextStep::Ready(task) => {
                    if !state.heap.is_empty() {
                        // Hand the new head to the next standby worker.
                        self.available.notify_one();
                    }
                    return Some(task);
                }
                NextStep::Drained => return None,
                NextStep::Idle => {
                    state = self
                        .available
                        .wait(state)
                        .expect("delay queue mutex poisoned");
                }
                NextStep::NotYet(wait) => {
                    let (next, _timeout_result) = self
                        .available
                        .wait_timeout(state, wait)
                        .expect("delay queue mutex poisoned");
                    state = next;
                }
            }
        }
    }

    /// Stops accepting inserts; queued tasks keep draining.
    pub fn close(&self) {
        let mut state = self.lock_state();
        state.closed = true;
        drop(state);
        tracing::debug!("delay queue closed");
        self.available.notify_all();
    }

    /// Closes the queue and cancels every still-pending entry.
    ///
    /// Returns the number of tasks whose cancellation took effect; their
    /// waiters observe `Cancelled`. Entries already cancelled through a
    /// handle drain without being counted again.
    pub fn clear_pending(&self) -> usize {
        let drained = {
            let mut state = self.lock_state();
            state.closed = true;
            std::mem::take(&mut state.heap)
        };
        self.available.notify_all();

        let mut cancelled = 0;
        for task in drained {
            if task.status().try_cancel() {
                cancelled += 1;
            }
        }
        tracing::debug!(cancelled, "delay queue cleared");
        cancelled
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_state().heap.len()
    }

    /// Returns true if no tasks are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_state().heap.is_empty()
    }

    /// Returns true once the queue stopped accepting inserts.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().expect("delay queue mutex poisoned")
    }

    fn next_step(state: &mut QueueState, now: Time) -> NextStep {
        let Some(head) = state.heap.peek() else {
            return if state.closed {
                NextStep::Drained
            } else {
                NextStep::Idle
            };
        };
        let deadline = head.deadline();
        if deadline <= now {
            let task = state.heap.pop().expect("peeked head vanished");
            debug_assert!(
                state.heap.peek().map_or(true, |next| task.key() < next.key()),
                "heap popped out of (deadline, seq) order"
            );
            NextStep::Ready(task)
        } else {
            NextStep::NotYet(deadline.saturating_duration_since(now))
        }
    }
}

impl std::fmt::Debug for DelayQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("DelayQueue")
            .field("len", &state.heap.len())
            .field("closed", &state.closed)
            .finish_non_exhaustive()
    }
}
