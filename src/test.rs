//! Internal unit test utilities.

use std::{
    collections::{BTreeMap, VecDeque},
    panic::resume_unwind,
    sync::Arc,
    time::Duration,
};

use crate::{
    executor::{Execute, Work},
    sync::Mutex,
    Executor,
};

/// Panics without invoking the panic hook, so expected panics don't clutter the test output.
pub fn silent_panic(payload: &str) -> ! {
    resume_unwind(Box::new(payload.to_string()))
}

/// Creates a [`ManualExecutor`] and an [`Executor`] handle to it.
pub fn manual() -> (Arc<ManualExecutor>, Executor) {
    let exec = Arc::new(ManualExecutor::default());
    (exec.clone(), Executor::from(exec))
}

/// A deterministic executor with a virtual clock.
///
/// Nothing runs until the test calls [`ManualExecutor::run_until_idle`] or
/// [`ManualExecutor::advance`]. Work runs on the calling thread, one item at a time, in submission
/// order. Delayed work becomes ready when the virtual clock reaches its deadline.
#[derive(Default)]
pub struct ManualExecutor {
    queue: Mutex<Queue>,
}

#[derive(Default)]
struct Queue {
    now: Duration,
    /// Tie-breaker for timers with equal deadlines.
    seq: u64,
    ready: VecDeque<Work>,
    timers: BTreeMap<(Duration, u64), Work>,
}

impl Execute for ManualExecutor {
    fn run_now(&self, work: Work) {
        self.queue.lock().ready.push_back(work);
    }

    fn run_after(&self, delay: Duration, work: Work) {
        let mut queue = self.queue.lock();
        let key = (queue.now.saturating_add(delay), queue.seq);
        queue.seq += 1;
        queue.timers.insert(key, work);
    }
}

impl ManualExecutor {
    /// Runs ready work (including work enqueued while running) until none is left.
    ///
    /// Returns the number of work items that ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        loop {
            // The lock must not be held while running work, since work may enqueue more work.
            let next = self.queue.lock().ready.pop_front();
            match next {
                Some(work) => {
                    work();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Moves the virtual clock forward by `by`, firing every timer that becomes due, in deadline
    /// order, and running all resulting work.
    pub fn advance(&self, by: Duration) {
        self.run_until_idle();
        let target = self.queue.lock().now.saturating_add(by);
        loop {
            let due = {
                let mut queue = self.queue.lock();
                let next = queue.timers.keys().next().map(|&(deadline, _)| deadline);
                match next {
                    Some(deadline) if deadline <= target => {
                        queue.now = deadline;
                        queue.timers.pop_first().map(|(_, work)| work)
                    }
                    _ => None,
                }
            };
            match due {
                Some(work) => {
                    work();
                    self.run_until_idle();
                }
                None => break,
            }
        }
        self.queue.lock().now = target;
    }

    /// Returns the current virtual time.
    pub fn now(&self) -> Duration {
        self.queue.lock().now
    }

    /// Returns the number of timers that haven't fired yet.
    pub fn pending_timers(&self) -> usize {
        self.queue.lock().timers.len()
    }
}
