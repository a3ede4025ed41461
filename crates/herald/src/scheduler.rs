#![forbid(unsafe_code)]

//! Coalescing wake-up scheduler.
//!
//! [`CoalescingScheduler`] collapses any number of [`schedule`] calls made
//! before its callback runs into a single invocation on the next turn of
//! its [`Executor`].
//!
//! # Invariants
//!
//! 1. At most one invocation is pending at any time.
//! 2. The pending flag is cleared before the callback runs, so a
//!    `schedule()` made from inside the callback starts a new cycle.
//! 3. There is no cancel. Dropping the scheduler turns any pending
//!    invocation into a no-op: the posted task only holds a weak reference.
//!
//! [`schedule`]: CoalescingScheduler::schedule

use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use crate::executor::Executor;

struct SchedulerState {
    executor: Rc<dyn Executor>,
    pending: Cell<bool>,
    callback: Box<dyn Fn()>,
}

/// Deduplicates wake-up requests into one deferred callback.
pub struct CoalescingScheduler {
    state: Rc<SchedulerState>,
}

impl fmt::Debug for CoalescingScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoalescingScheduler")
            .field("pending", &self.state.pending.get())
            .finish_non_exhaustive()
    }
}

impl CoalescingScheduler {
    /// Create a scheduler that runs `callback` on `executor`.
    pub fn new(executor: Rc<dyn Executor>, callback: impl Fn() + 'static) -> Self {
        Self {
            state: Rc::new(SchedulerState {
                executor,
                pending: Cell::new(false),
                callback: Box::new(callback),
            }),
        }
    }

    /// Request a callback on the next turn. Absorbed if one is pending.
    pub fn schedule(&self) {
        if self.state.pending.replace(true) {
            trace!("wake-up absorbed by pending invocation");
            return;
        }
        debug!("wake-up scheduled for next turn");
        let state: Weak<SchedulerState> = Rc::downgrade(&self.state);
        self.state.executor.post(Box::new(move || {
            let Some(state) = state.upgrade() else {
                return;
            };
            state.pending.set(false);
            debug!("coalesced wake-up firing");
            (state.callback)();
        }));
    }

    /// True while an invocation is queued and has not run yet.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state.pending.get()
    }

    pub fn executor(&self) -> &Rc<dyn Executor> {
        &self.state.executor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::RunLoop;

    fn counting(rl: &Rc<RunLoop>) -> (CoalescingScheduler, Rc<Cell<u32>>) {
        let runs = Rc::new(Cell::new(0));
        let sink = Rc::clone(&runs);
        let executor: Rc<dyn Executor> = rl.clone();
        let scheduler = CoalescingScheduler::new(executor, move || sink.set(sink.get() + 1));
        (scheduler, runs)
    }

    #[test]
    fn double_schedule_runs_once() {
        let rl = Rc::new(RunLoop::with_manual_clock());
        let (scheduler, runs) = counting(&rl);

        scheduler.schedule();
        scheduler.schedule();
        assert!(scheduler.is_pending());
        assert_eq!(rl.pending_tasks(), 1);

        rl.run_until_idle();
        assert_eq!(runs.get(), 1);
        assert!(!scheduler.is_pending());
    }

    #[test]
    fn each_cycle_with_a_schedule_runs_once() {
        let rl = Rc::new(RunLoop::with_manual_clock());
        let (scheduler, runs) = counting(&rl);

        for cycle in 1..=3 {
            for _ in 0..5 {
                scheduler.schedule();
            }
            rl.run_until_idle();
            assert_eq!(runs.get(), cycle);
        }

        rl.run_until_idle();
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn schedule_from_callback_starts_new_cycle() {
        let rl = Rc::new(RunLoop::with_manual_clock());
        let runs = Rc::new(Cell::new(0u32));
        let slot: Rc<std::cell::RefCell<Option<CoalescingScheduler>>> = Rc::default();

        let sink = Rc::clone(&runs);
        let me = Rc::downgrade(&slot);
        let executor: Rc<dyn Executor> = rl.clone();
        let scheduler = CoalescingScheduler::new(executor, move || {
            sink.set(sink.get() + 1);
            if sink.get() < 3 {
                if let Some(slot) = me.upgrade() {
                    if let Some(scheduler) = slot.borrow().as_ref() {
                        scheduler.schedule();
                    }
                }
            }
        });
        scheduler.schedule();
        *slot.borrow_mut() = Some(scheduler);

        assert_eq!(rl.turn(), 1);
        assert_eq!(runs.get(), 1);
        assert_eq!(rl.turn(), 1);
        assert_eq!(runs.get(), 2);
        rl.run_until_idle();
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn dropped_scheduler_never_runs() {
        let rl = Rc::new(RunLoop::with_manual_clock());
        let (scheduler, runs) = counting(&rl);

        scheduler.schedule();
        drop(scheduler);
        rl.run_until_idle();
        assert_eq!(runs.get(), 0);
    }
}
