#![forbid(unsafe_code)]

//! Debounced observer over several sources.
//!
//! A [`GroupObserver`] registers one relay observer with every source and
//! turns the stream of source notifications into calls of a single
//! callback, shaped by a [`DebouncePolicy`].
//!
//! | Policy     | On notification                            | Callback runs                   |
//! |------------|--------------------------------------------|---------------------------------|
//! | `None`     | schedule forward                           | next turn                       |
//! | `Reset`    | restart timer                              | `timeout` after the last one    |
//! | `Leading`  | forward if idle, restart timer             | at the start of each burst      |
//! | `Throttle` | if not paused: pause, start timer          | `timeout` after the first one   |
//!
//! A zero timeout behaves as `None` for every policy.
//!
//! # Invariants
//!
//! 1. At most one timer is outstanding. A running timer is cancelled before
//!    it is replaced.
//! 2. Every forward goes through one [`CoalescingScheduler`], so forwards
//!    requested in the same turn collapse into one callback.
//! 3. Throttle: the paused flag is cleared when the forward executes, right
//!    before the callback, not when the timer elapses.
//! 4. After [`GroupObserver::remove`] (or drop) no callback runs.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tracing::{debug, trace};

use crate::executor::{Executor, TimerId};
use crate::observable::{Observable, ObservableId, Observer};
use crate::scheduler::CoalescingScheduler;
use crate::token::ObserverToken;

/// How source notifications are shaped into callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DebouncePolicy {
    /// Forward on the next turn.
    None,
    /// Forward once the sources have been quiet for `timeout`.
    #[default]
    Reset,
    /// Forward at the first notification of a burst; absorb the rest until
    /// the sources have been quiet for `timeout`.
    Leading,
    /// Forward at most once per `timeout` window, at the window's end.
    Throttle,
}

/// Configuration for a [`GroupObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupConfig {
    pub policy: DebouncePolicy,
    pub timeout: Duration,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            policy: DebouncePolicy::Reset,
            timeout: Duration::from_millis(100),
        }
    }
}

impl GroupConfig {
    /// Forward on the next turn with no debouncing.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            policy: DebouncePolicy::None,
            timeout: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: DebouncePolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The policy actually applied: a zero timeout means `None`.
    #[must_use]
    pub fn effective_policy(&self) -> DebouncePolicy {
        if self.timeout.is_zero() {
            DebouncePolicy::None
        } else {
            self.policy
        }
    }
}

struct GroupInner {
    me: Weak<GroupInner>,
    config: GroupConfig,
    executor: Rc<dyn Executor>,
    scheduler: CoalescingScheduler,
    /// Registered with every source. Holds only a weak link back here.
    relay: Rc<dyn Observer>,
    /// One registration per source. Tokens hold sources' registries weakly.
    sources: RefCell<Vec<(ObservableId, ObserverToken)>>,
    timer: Cell<Option<TimerId>>,
    throttle_paused: Cell<bool>,
    /// Set by `remove`, cleared by the next `add_source`.
    detached: Cell<bool>,
}

impl GroupInner {
    fn on_source_notified(&self, source: ObservableId) {
        match self.config.effective_policy() {
            DebouncePolicy::None => self.scheduler.schedule(),
            DebouncePolicy::Reset => self.restart_timer(true),
            DebouncePolicy::Leading => {
                if self.timer.get().is_none() {
                    debug!(%source, "leading edge forwarded");
                    self.scheduler.schedule();
                }
                self.restart_timer(false);
            }
            DebouncePolicy::Throttle => {
                if self.throttle_paused.get() {
                    trace!(%source, "throttled notification dropped");
                    return;
                }
                self.throttle_paused.set(true);
                self.restart_timer(true);
            }
        }
    }

    /// Replace the running timer. When it elapses the timer slot is cleared
    /// and, if `forward` is set, a forward is scheduled.
    fn restart_timer(&self, forward: bool) {
        self.cancel_timer();
        let me = self.me.clone();
        let id = self.executor.schedule_timer(
            self.config.timeout,
            Box::new(move || {
                let Some(inner) = me.upgrade() else {
                    return;
                };
                inner.timer.set(None);
                if forward {
                    inner.scheduler.schedule();
                }
            }),
        );
        self.timer.set(Some(id));
    }

    fn cancel_timer(&self) {
        if let Some(id) = self.timer.take() {
            self.executor.cancel_timer(id);
        }
    }

    fn remove(&self) {
        self.detached.set(true);
        self.throttle_paused.set(false);
        self.cancel_timer();
        let sources = std::mem::take(&mut *self.sources.borrow_mut());
        if !sources.is_empty() {
            debug!(sources = sources.len(), "group observer detached");
        }
        // Dropping the tokens unregisters the relay from every live source.
        drop(sources);
    }
}

/// Aggregates several observables into one debounced callback.
///
/// Dropping the group unregisters it from every source.
pub struct GroupObserver {
    inner: Rc<GroupInner>,
}

impl fmt::Debug for GroupObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupObserver")
            .field("config", &self.inner.config)
            .field("sources", &self.source_count())
            .field("timer_active", &self.is_timer_active())
            .field("throttle_paused", &self.inner.throttle_paused.get())
            .finish()
    }
}

impl GroupObserver {
    /// Create a group delivering `callback` on `executor`.
    pub fn new(
        executor: Rc<dyn Executor>,
        config: GroupConfig,
        callback: impl Fn() + 'static,
    ) -> Self {
        let inner = Rc::new_cyclic(|me: &Weak<GroupInner>| {
            let forward_me = me.clone();
            let scheduler = CoalescingScheduler::new(Rc::clone(&executor), move || {
                let Some(inner) = forward_me.upgrade() else {
                    return;
                };
                if inner.detached.get() {
                    trace!("forward after detach dropped");
                    return;
                }
                inner.throttle_paused.set(false);
                callback();
            });

            let relay_me = me.clone();
            let relay: Rc<dyn Observer> = Rc::new(move |source: ObservableId| {
                if let Some(inner) = relay_me.upgrade() {
                    inner.on_source_notified(source);
                }
            });

            GroupInner {
                me: me.clone(),
                config,
                executor,
                scheduler,
                relay,
                sources: RefCell::new(Vec::new()),
                timer: Cell::new(None),
                throttle_paused: Cell::new(false),
                detached: Cell::new(false),
            }
        });
        Self { inner }
    }

    /// Start listening to `source`. Returns false if it is already observed.
    ///
    /// The group does not keep `source` alive.
    pub fn add_source<O: Observable + ?Sized>(&self, source: &O) -> bool {
        let id = source.id();
        if self.inner.sources.borrow().iter().any(|(seen, _)| *seen == id) {
            return false;
        }
        let token = source.subscribe_labeled(Rc::clone(&self.inner.relay), "group relay");
        self.inner.sources.borrow_mut().push((id, token));
        self.inner.detached.set(false);
        true
    }

    /// Cancel any pending timer and unregister from all sources.
    ///
    /// Idempotent; also runs on drop.
    pub fn remove(&self) {
        self.inner.remove();
    }

    #[must_use]
    pub fn config(&self) -> &GroupConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn source_count(&self) -> usize {
        self.inner.sources.borrow().len()
    }

    /// True while a debounce or throttle timer is running.
    #[must_use]
    pub fn is_timer_active(&self) -> bool {
        self.inner.timer.get().is_some()
    }
}

impl Drop for GroupObserver {
    fn drop(&mut self) {
        self.inner.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiagnosticMode;
    use crate::event::Event;
    use crate::executor::RunLoop;
    use crate::lazy::LazyEvent;
    use web_time::Instant;

    const T: Duration = Duration::from_millis(100);

    struct Harness {
        rl: Rc<RunLoop>,
        start: Instant,
        fired_at: Rc<RefCell<Vec<Duration>>>,
        group: GroupObserver,
        a: Event,
        b: Event,
    }

    impl Harness {
        fn new(config: GroupConfig) -> Self {
            let rl = Rc::new(RunLoop::with_manual_clock());
            let start = rl.now();
            let fired_at = Rc::new(RefCell::new(Vec::new()));

            let clock = Rc::clone(&rl);
            let sink = Rc::clone(&fired_at);
            let executor: Rc<dyn Executor> = rl.clone();
            let group = GroupObserver::new(executor, config, move || {
                sink.borrow_mut().push(clock.now() - start);
            });

            let a = Event::with_mode(DiagnosticMode::Strict);
            let b = Event::with_mode(DiagnosticMode::Strict);
            assert!(group.add_source(&a));
            assert!(group.add_source(&b));
            Self {
                rl,
                start,
                fired_at,
                group,
                a,
                b,
            }
        }

        /// Advance the manual clock to `at` (relative to start).
        fn at(&self, at: Duration) -> &Self {
            let now = self.rl.now() - self.start;
            self.rl.advance(at.saturating_sub(now));
            self
        }

        fn fired(&self) -> Vec<Duration> {
            self.fired_at.borrow().clone()
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn none_policy_coalesces_same_turn_triggers() {
        let h = Harness::new(GroupConfig::immediate());
        h.a.trigger();
        h.b.trigger();
        h.a.trigger();
        assert!(h.fired().is_empty());

        h.rl.run_until_idle();
        assert_eq!(h.fired(), vec![ms(0)]);
    }

    #[test]
    fn zero_timeout_acts_as_none() {
        let config = GroupConfig::default()
            .with_policy(DebouncePolicy::Throttle)
            .with_timeout(Duration::ZERO);
        assert_eq!(config.effective_policy(), DebouncePolicy::None);

        let h = Harness::new(config);
        h.a.trigger();
        h.rl.run_until_idle();
        h.a.trigger();
        h.rl.run_until_idle();
        assert_eq!(h.fired().len(), 2);
        assert!(!h.group.is_timer_active());
    }

    #[test]
    fn reset_fires_once_after_last_of_burst() {
        let h = Harness::new(GroupConfig::default().with_timeout(T));
        h.a.trigger();
        h.at(ms(40)).b.trigger();
        h.at(ms(80)).a.trigger();
        assert!(h.group.is_timer_active());

        h.at(ms(500));
        assert_eq!(h.fired(), vec![ms(180)]);
        assert!(!h.group.is_timer_active());
    }

    #[test]
    fn reset_separate_bursts_fire_separately() {
        let h = Harness::new(GroupConfig::default().with_timeout(T));
        h.a.trigger();
        h.at(ms(300)).a.trigger();
        h.at(ms(1000));
        assert_eq!(h.fired(), vec![ms(100), ms(400)]);
    }

    #[test]
    fn leading_fires_at_burst_start_only() {
        let h = Harness::new(
            GroupConfig::default()
                .with_policy(DebouncePolicy::Leading)
                .with_timeout(T),
        );
        h.a.trigger();
        h.rl.run_until_idle();
        assert_eq!(h.fired(), vec![ms(0)]);

        h.at(ms(50)).b.trigger();
        h.at(ms(120)).a.trigger();
        h.at(ms(200));
        assert_eq!(h.fired(), vec![ms(0)]);

        // Quiet since 120ms: the burst ended at 220ms.
        h.at(ms(230)).a.trigger();
        h.rl.run_until_idle();
        assert_eq!(h.fired(), vec![ms(0), ms(230)]);
    }

    #[test]
    fn throttle_drops_inside_window_and_reopens_after_forward() {
        let h = Harness::new(
            GroupConfig::default()
                .with_policy(DebouncePolicy::Throttle)
                .with_timeout(T),
        );
        h.a.trigger();
        h.at(ms(5)).b.trigger();
        h.at(ms(120)).a.trigger();
        h.at(ms(1000));

        assert_eq!(h.fired(), vec![ms(100), ms(220)]);
    }

    #[test]
    fn throttle_notification_between_timer_and_forward_is_dropped() {
        let h = Harness::new(
            GroupConfig::default()
                .with_policy(DebouncePolicy::Throttle)
                .with_timeout(T),
        );
        h.a.trigger();

        // Fire the timer without running the posted forward.
        let crate::executor::Clock::Manual(now) = h.rl.clock() else {
            unreachable!("harness uses a manual clock");
        };
        now.set(h.start + T);
        assert_eq!(h.rl.fire_due_timers(), 1);
        h.b.trigger();

        h.rl.run_until_idle();
        assert_eq!(h.fired(), vec![ms(100)]);
        assert!(!h.group.is_timer_active());
    }

    #[test]
    fn remove_is_idempotent_and_silences_group() {
        let h = Harness::new(GroupConfig::default().with_timeout(T));
        h.a.trigger();
        assert!(h.group.is_timer_active());

        h.group.remove();
        h.group.remove();
        assert_eq!(h.group.source_count(), 0);
        assert_eq!(h.a.observer_count(), 0);
        assert_eq!(h.b.observer_count(), 0);
        assert!(!h.group.is_timer_active());

        h.a.trigger();
        h.at(ms(500));
        assert!(h.fired().is_empty());
    }

    #[test]
    fn remove_drops_already_scheduled_forward() {
        let h = Harness::new(GroupConfig::immediate());
        h.a.trigger();
        h.group.remove();
        h.rl.run_until_idle();
        assert!(h.fired().is_empty());

        let c = Event::with_mode(DiagnosticMode::Strict);
        assert!(h.group.add_source(&c));
        c.trigger();
        h.rl.run_until_idle();
        assert_eq!(h.fired().len(), 1);
    }

    #[test]
    fn drop_unregisters_from_sources() {
        let rl = Rc::new(RunLoop::with_manual_clock());
        let executor: Rc<dyn Executor> = rl.clone();
        let event = Event::with_mode(DiagnosticMode::Strict);
        let lazy = LazyEvent::with_mode(Rc::clone(&executor), DiagnosticMode::Strict);
        let hits = Rc::new(Cell::new(0u32));

        let sink = Rc::clone(&hits);
        let group = GroupObserver::new(executor, GroupConfig::immediate(), move || {
            sink.set(sink.get() + 1)
        });
        group.add_source(&event);
        group.add_source(&lazy);
        assert_eq!(event.observer_count(), 1);
        assert_eq!(lazy.observer_count(), 1);

        event.trigger();
        drop(group);
        assert_eq!(event.observer_count(), 0);
        assert_eq!(lazy.observer_count(), 0);

        lazy.trigger();
        rl.run_until_idle();
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn group_does_not_keep_sources_alive() {
        let rl = Rc::new(RunLoop::with_manual_clock());
        let executor: Rc<dyn Executor> = rl.clone();
        let lazy = LazyEvent::with_mode(Rc::clone(&executor), DiagnosticMode::Strict);
        let hits = Rc::new(Cell::new(0u32));

        let sink = Rc::clone(&hits);
        let group = GroupObserver::new(executor, GroupConfig::immediate(), move || {
            sink.set(sink.get() + 1)
        });
        assert!(group.add_source(&lazy));

        // The pending delivery dies with the last handle to the source.
        lazy.trigger();
        drop(lazy);
        rl.run_until_idle();
        assert_eq!(hits.get(), 0);

        assert_eq!(group.source_count(), 1);
        group.remove();
        assert_eq!(group.source_count(), 0);
    }

    #[test]
    fn sources_accepted_as_trait_objects() {
        let h = Harness::new(GroupConfig::immediate());
        let c = Event::with_mode(DiagnosticMode::Strict);
        let dynamic: &dyn Observable = &c;
        assert!(h.group.add_source(dynamic));
        assert!(!h.group.add_source(&c));

        c.trigger();
        h.rl.run_until_idle();
        assert_eq!(h.fired().len(), 1);
    }

    #[test]
    fn lazy_sources_feed_group() {
        let rl = Rc::new(RunLoop::with_manual_clock());
        let executor: Rc<dyn Executor> = rl.clone();
        let lazy = LazyEvent::with_mode(Rc::clone(&executor), DiagnosticMode::Strict);
        let hits = Rc::new(Cell::new(0u32));

        let sink = Rc::clone(&hits);
        let group = GroupObserver::new(executor, GroupConfig::immediate(), move || {
            sink.set(sink.get() + 1)
        });
        group.add_source(&lazy);

        lazy.trigger();
        lazy.trigger();
        rl.run_until_idle();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn adding_same_source_twice_is_rejected() {
        let h = Harness::new(GroupConfig::immediate());
        assert!(!h.group.add_source(&h.a.clone()));
        assert_eq!(h.group.source_count(), 2);
        assert_eq!(h.a.observer_count(), 1);
    }
}
