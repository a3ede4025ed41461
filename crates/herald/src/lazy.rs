#![forbid(unsafe_code)]

//! Event whose notifications are deferred to the next turn.
//!
//! [`LazyEvent`] pairs an observer registry with a [`CoalescingScheduler`].
//! Every trigger before the scheduled turn collapses into one notification,
//! so producers never need an explicit batching block.

use std::fmt;
use std::rc::{Rc, Weak};

use tracing::debug_span;

use crate::config::DiagnosticMode;
use crate::executor::Executor;
use crate::observable::{Observable, ObservableId, Observer, Trigger};
use crate::registry::ObserverRegistry;
use crate::scheduler::CoalescingScheduler;
use crate::token::ObserverToken;

struct LazyInner {
    registry: Rc<ObserverRegistry<dyn Observer>>,
    scheduler: CoalescingScheduler,
}

impl LazyInner {
    fn notify(self: &Rc<Self>) {
        let id = ObservableId::of(self);
        let _span = debug_span!("lazy_event_notify", %id, observers = self.registry.len()).entered();
        self.registry.for_each(|observer| observer.notify(id));
    }
}

/// An observable whose triggers are coalesced per executor turn.
#[derive(Clone)]
pub struct LazyEvent {
    inner: Rc<LazyInner>,
}

impl fmt::Debug for LazyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyEvent")
            .field("id", &self.id())
            .field("pending", &self.is_pending())
            .field("observers", &self.inner.registry.len())
            .finish()
    }
}

impl LazyEvent {
    /// Create a lazy event delivering on `executor`.
    pub fn new(executor: Rc<dyn Executor>) -> Self {
        Self::with_mode(executor, DiagnosticMode::default())
    }

    pub fn with_mode(executor: Rc<dyn Executor>, mode: DiagnosticMode) -> Self {
        let inner = Rc::new_cyclic(|me: &Weak<LazyInner>| {
            let me = me.clone();
            LazyInner {
                registry: Rc::new(ObserverRegistry::with_mode(mode)),
                scheduler: CoalescingScheduler::new(executor, move || {
                    if let Some(inner) = me.upgrade() {
                        inner.notify();
                    }
                }),
            }
        });
        Self { inner }
    }

    /// Request a notification on the next turn.
    pub fn trigger(&self) {
        self.inner.scheduler.schedule();
    }

    pub fn trigger_if(&self, condition: bool) {
        if condition {
            self.trigger();
        }
    }

    /// True while a notification is scheduled and not yet delivered.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.inner.scheduler.is_pending()
    }
}

impl Observable for LazyEvent {
    fn id(&self) -> ObservableId {
        ObservableId::of(&self.inner)
    }

    fn add_observer(&self, observer: &Rc<dyn Observer>) {
        self.inner.registry.add(observer);
    }

    fn remove_observer(&self, observer: &Rc<dyn Observer>) {
        self.inner.registry.remove(observer);
    }

    fn remove_observer_weak(&self, observer: &Weak<dyn Observer>) {
        self.inner.registry.remove_weak(observer);
    }

    fn subscribe(&self, observer: Rc<dyn Observer>) -> ObserverToken {
        ObserverToken::register(&self.inner.registry, observer)
    }

    fn subscribe_labeled(&self, observer: Rc<dyn Observer>, label: &str) -> ObserverToken {
        ObserverToken::register_labeled(&self.inner.registry, observer, label)
    }

    fn observer_count(&self) -> usize {
        self.inner.registry.len()
    }
}

impl Trigger for LazyEvent {
    fn trigger(&self) {
        LazyEvent::trigger(self);
    }
}
