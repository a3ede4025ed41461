#![forbid(unsafe_code)]

//! Synchronous event with optional batching.
//!
//! # Design
//!
//! [`Event`] is a cloneable handle over shared state (`Rc`), in the same way
//! the reactive `Observable` handles share their inner value. Every clone
//! triggers the same observers.
//!
//! Triggering notifies observers synchronously. Inside a coalescing block
//! ([`Event::coalesce`] or [`Event::coalescing_scope`]) triggers only mark
//! the event; the outermost block delivers a single notification on exit.
//!
//! # Invariants
//!
//! 1. Observers are notified iff the event is triggered and the coalescing
//!    depth is zero.
//! 2. The triggered flag is cleared before observers run.
//! 3. Nested blocks deliver once, when the outermost block exits.
//!
//! # Failure Modes
//!
//! - **Observer panics**: propagates to the caller of `trigger` (or to the
//!   scope exit that delivered).
//! - **Trigger from an observer of the same event**: re-entrant
//!   notification, reported by the registry.
//! - **Block panics**: depth is restored, nothing is delivered.

use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::debug_span;

use crate::config::DiagnosticMode;
use crate::observable::{Observable, ObservableId, Observer, Trigger};
use crate::registry::ObserverRegistry;
use crate::token::ObserverToken;

struct EventInner {
    registry: Rc<ObserverRegistry<dyn Observer>>,
    triggered: Cell<bool>,
    depth: Cell<usize>,
}

/// An observable fired explicitly by its producer.
#[derive(Clone)]
pub struct Event {
    inner: Rc<EventInner>,
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id())
            .field("triggered", &self.inner.triggered.get())
            .field("depth", &self.inner.depth.get())
            .field("observers", &self.inner.registry.len())
            .finish()
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl Event {
    #[must_use]
    pub fn new() -> Self {
        Self::with_mode(DiagnosticMode::default())
    }

    /// Create an event whose registry reports misuse under `mode`.
    #[must_use]
    pub fn with_mode(mode: DiagnosticMode) -> Self {
        Self {
            inner: Rc::new(EventInner {
                registry: Rc::new(ObserverRegistry::with_mode(mode)),
                triggered: Cell::new(false),
                depth: Cell::new(0),
            }),
        }
    }

    /// Fire the event.
    pub fn trigger(&self) {
        self.trigger_if(true);
    }

    /// Fire the event if `condition` holds.
    ///
    /// Inside a coalescing block this only marks the event.
    pub fn trigger_if(&self, condition: bool) {
        if condition {
            self.inner.triggered.set(true);
        }
        self.deliver_if_ready();
    }

    /// True if triggered inside a coalescing block and not delivered yet.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.get()
    }

    /// Number of coalescing blocks currently open.
    #[must_use]
    pub fn coalescing_depth(&self) -> usize {
        self.inner.depth.get()
    }

    /// Run `block` with notifications deferred until it returns.
    pub fn coalesce<R>(&self, block: impl FnOnce() -> R) -> R {
        let scope = self.coalescing_scope();
        let result = block();
        drop(scope);
        result
    }

    /// Open a coalescing block that closes when the guard drops.
    pub fn coalescing_scope(&self) -> CoalescingScope {
        self.inner.depth.set(self.inner.depth.get() + 1);
        CoalescingScope {
            event: self.clone(),
        }
    }

    fn deliver_if_ready(&self) {
        let inner = &self.inner;
        if inner.depth.get() != 0 || !inner.triggered.get() {
            return;
        }
        inner.triggered.set(false);

        let id = self.id();
        let _span = debug_span!("event_notify", %id, observers = inner.registry.len()).entered();
        inner.registry.for_each(|observer| observer.notify(id));
    }
}

impl Observable for Event {
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

impl Trigger for Event {
    fn trigger(&self) {
        Event::trigger(self);
    }
}

/// RAII coalescing block for an [`Event`].
///
/// Dropping the outermost scope delivers a pending notification. A scope
/// dropped during unwinding restores the depth without delivering.
#[must_use = "dropping the scope immediately closes the coalescing block"]
pub struct CoalescingScope {
    event: Event,
}

impl fmt::Debug for CoalescingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoalescingScope")
            .field("depth", &self.event.coalescing_depth())
            .finish()
    }
}

impl Drop for CoalescingScope {
    fn drop(&mut self) {
        let depth = &self.event.inner.depth;
        depth.set(depth.get().saturating_sub(1));
        if std::thread::panicking() {
            return;
        }
        self.event.deliver_if_ready();
    }
}
