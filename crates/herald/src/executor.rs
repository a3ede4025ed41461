#![forbid(unsafe_code)]

//! Host execution context: next-turn tasks and one-shot timers.
//!
//! Deferred work in this crate never runs inline. It is handed to an
//! [`Executor`], which decides when "the next opportunity" is. [`RunLoop`]
//! is the bundled single-threaded implementation.
//!
//! # Turn model
//!
//! - [`Executor::post`] queues a task for the next turn. Tasks posted while
//!   a turn is running wait for the following turn.
//! - [`Executor::schedule_timer`] queues a task for a deadline. When the
//!   deadline has passed, the task runs in the same turn it fires.
//! - Timers fire in deadline order; equal deadlines fire in creation order.
//!
//! # Clocks
//!
//! `RunLoop::new()` reads the system clock and sleeps when asked to
//! [`advance`](RunLoop::advance). `RunLoop::with_manual_clock()` jumps
//! straight from deadline to deadline, which keeps timing tests
//! deterministic (same idea as the `*_at(now)` helpers on the runtime's
//! debouncers).

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::Duration;

use tracing::{trace, warn};
use web_time::Instant;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

/// Identifies a pending timer so it can be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// An execution context able to run tasks later.
pub trait Executor {
    /// Run `task` on the next turn.
    fn post(&self, task: Task);

    /// Run `task` once `delay` has elapsed.
    fn schedule_timer(&self, delay: Duration, task: Task) -> TimerId;

    /// Cancel a pending timer. Returns false if it already fired or was
    /// cancelled.
    fn cancel_timer(&self, id: TimerId) -> bool;

    /// Current time as seen by this executor.
    fn now(&self) -> Instant;
}

/// Upper bound on turns in one `run_until_idle` call. A task that re-posts
/// itself forever would otherwise never let the loop go idle.
const MAX_TURNS_PER_RUN: usize = 100_000;

/// Time source for a [`RunLoop`].
#[derive(Debug)]
pub enum Clock {
    System,
    Manual(Cell<Instant>),
}

impl Clock {
    #[must_use]
    pub fn now(&self) -> Instant {
        match self {
            Self::System => Instant::now(),
            Self::Manual(now) => now.get(),
        }
    }

    fn wait_until(&self, deadline: Instant) {
        match self {
            Self::System => {
                let now = Instant::now();
                if deadline > now {
                    std::thread::sleep(deadline - now);
                }
            }
            Self::Manual(now) => {
                if deadline > now.get() {
                    now.set(deadline);
                }
            }
        }
    }
}

/// Single-threaded task queue plus timer wheel.
pub struct RunLoop {
    clock: Clock,
    queue: RefCell<VecDeque<Task>>,
    timers: RefCell<BTreeMap<(Instant, TimerId), Task>>,
    next_timer: Cell<u64>,
}

impl fmt::Debug for RunLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunLoop")
            .field("clock", &self.clock)
            .field("pending_tasks", &self.pending_tasks())
            .field("pending_timers", &self.pending_timers())
            .finish()
    }
}

impl Default for RunLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl RunLoop {
    /// Run loop on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Clock::System)
    }

    /// Run loop on a manual clock starting at the current instant.
    #[must_use]
    pub fn with_manual_clock() -> Self {
        Self::with_clock(Clock::Manual(Cell::new(Instant::now())))
    }

    #[must_use]
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            clock,
            queue: RefCell::new(VecDeque::new()),
            timers: RefCell::new(BTreeMap::new()),
            next_timer: Cell::new(0),
        }
    }

    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Tasks waiting for the next turn.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Timers that have not fired or been cancelled.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Deadline of the earliest pending timer.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers
            .borrow()
            .first_key_value()
            .map(|(&(deadline, _), _)| deadline)
    }

    /// Run the tasks that were queued when the turn started.
    ///
    /// Returns the number of tasks run.
    pub fn turn(&self) -> usize {
        let queued = self.queue.borrow().len();
        let mut ran = 0;
        for _ in 0..queued {
            let Some(task) = self.queue.borrow_mut().pop_front() else {
                break;
            };
            task();
            ran += 1;
        }
        if ran > 0 {
            trace!(ran, "run loop turn");
        }
        ran
    }

    /// Fire every timer whose deadline has passed, earliest first.
    ///
    /// Returns the number of timers fired.
    pub fn fire_due_timers(&self) -> usize {
        let mut fired = 0;
        loop {
            let now = self.clock.now();
            let due = {
                let mut timers = self.timers.borrow_mut();
                let ready = timers
                    .first_key_value()
                    .is_some_and(|(&(deadline, _), _)| deadline <= now);
                if ready { timers.pop_first() } else { None }
            };
            let Some(((_, id), task)) = due else {
                break;
            };
            trace!(?id, "timer fired");
            task();
            fired += 1;
        }
        fired
    }

    /// Fire due timers and run turns until nothing is ready.
    ///
    /// Returns the number of tasks and timers run.
    pub fn run_until_idle(&self) -> usize {
        let mut total = 0;
        for _ in 0..MAX_TURNS_PER_RUN {
            let ran = self.fire_due_timers() + self.turn();
            if ran == 0 {
                return total;
            }
            total += ran;
        }
        warn!(
            turns = MAX_TURNS_PER_RUN,
            pending = self.pending_tasks(),
            "run loop did not go idle; tasks keep re-posting"
        );
        total
    }

    /// Let `by` elapse, running every task and timer that becomes due.
    ///
    /// With a manual clock the clock jumps from deadline to deadline; with
    /// the system clock the thread sleeps.
    pub fn advance(&self, by: Duration) {
        let target = self.clock.now() + by;
        loop {
            self.run_until_idle();
            let Some(deadline) = self.next_deadline().filter(|d| *d <= target) else {
                break;
            };
            self.clock.wait_until(deadline);
        }
        self.clock.wait_until(target);
        self.run_until_idle();
    }
}

impl Executor for RunLoop {
    fn post(&self, task: Task) {
        self.queue.borrow_mut().push_back(task);
    }

    fn schedule_timer(&self, delay: Duration, task: Task) -> TimerId {
        let id = TimerId(self.next_timer.get());
        self.next_timer.set(id.0 + 1);
        let deadline = self.clock.now() + delay;
        self.timers.borrow_mut().insert((deadline, id), task);
        trace!(?id, ?delay, "timer scheduled");
        id
    }

    fn cancel_timer(&self, id: TimerId) -> bool {
        let mut timers = self.timers.borrow_mut();
        let before = timers.len();
        timers.retain(|&(_, timer), _| timer != id);
        timers.len() != before
    }

    fn now(&self) -> Instant {
        self.clock.now()
    }
}
