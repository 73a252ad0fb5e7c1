//! Property tests for the ready queue's ordering invariant.

mod common;

use std::sync::Arc;

use delayq::queue::DelayQueue;
use delayq::task::{ScheduledTask, TaskStatus};
use delayq::time::{Time, TimeSource, VirtualClock};
use proptest::prelude::*;

fn entry(seq: u64, deadline_ms: u16) -> ScheduledTask {
    ScheduledTask::new(
        seq,
        Time::from_millis(u64::from(deadline_ms)),
        Arc::new(TaskStatus::new()),
        Box::new(|| {}),
    )
}

proptest! {
    /// Pop order over arbitrary insert interleavings is exactly the
    /// lexicographic (deadline, seq) order.
    #[test]
    fn pop_order_is_deadline_then_sequence(deadlines in prop::collection::vec(any::<u16>(), 0..64)) {
        common::init_test_logging();
        let clock = Arc::new(VirtualClock::new());
        let queue = DelayQueue::new(Arc::clone(&clock) as Arc<dyn TimeSource>);

        for (seq, &deadline_ms) in deadlines.iter().enumerate() {
            queue.insert(entry(seq as u64, deadline_ms)).unwrap();
        }

        clock.set(Time::MAX);
        let popped: Vec<(Time, u64)> =
            std::iter::from_fn(|| queue.try_next().map(|t| t.key())).collect();

        let mut expected: Vec<(Time, u64)> = deadlines
            .iter()
            .enumerate()
            .map(|(seq, &d)| (Time::from_millis(u64::from(d)), seq as u64))
            .collect();
        expected.sort_unstable();

        prop_assert_eq!(popped, expected);
    }

    /// Removing an arbitrary subset before draining never disturbs the
    /// relative order of the survivors.
    #[test]
    fn removal_preserves_survivor_order(
        deadlines in prop::collection::vec(any::<u16>(), 1..48),
        removal_mask in prop::collection::vec(any::<bool>(), 1..48),
    ) {
        common::init_test_logging();
        let clock = Arc::new(VirtualClock::new());
        let queue = DelayQueue::new(Arc::clone(&clock) as Arc<dyn TimeSource>);

        for (seq, &deadline_ms) in deadlines.iter().enumerate() {
            queue.insert(entry(seq as u64, deadline_ms)).unwrap();
        }

        let removed: Vec<u64> = deadlines
            .iter()
            .enumerate()
            .zip(removal_mask.iter().cycle())
            .filter_map(|((seq, _), &remove)| remove.then_some(seq as u64))
            .collect();
        for &seq in &removed {
            prop_assert!(queue.remove_if_present(seq));
        }

        clock.set(Time::MAX);
        let popped: Vec<(Time, u64)> =
            std::iter::from_fn(|| queue.try_next().map(|t| t.key())).collect();

        let mut expected: Vec<(Time, u64)> = deadlines
            .iter()
            .enumerate()
            .filter(|(seq, _)| !removed.contains(&(*seq as u64)))
            .map(|(seq, &d)| (Time::from_millis(u64::from(d)), seq as u64))
            .collect();
        expected.sort_unstable();

        prop_assert_eq!(popped, expected);
    }
}
