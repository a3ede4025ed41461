#![forbid(unsafe_code)]

//! Observer and observable traits shared by every notifier in the crate.
//!
//! Observers receive the [`ObservableId`] of the source that fired, so one
//! observer registered with several sources can tell them apart.
//!
//! Two registration styles are available on every [`Observable`]:
//!
//! - **Classic**: [`Observable::add_observer`] / [`Observable::remove_observer`].
//!   The caller keeps the `Rc` alive and must remove it exactly once.
//! - **Token**: [`Observable::subscribe`] / [`Observable::observe`] return an
//!   [`ObserverToken`] that unregisters when dropped.

use std::fmt;
use std::rc::{Rc, Weak};

use crate::token::ObserverToken;

/// Opaque identity of an observable.
///
/// Derived from the address of the observable's shared state, so every
/// clone of an [`Event`](crate::Event) handle reports the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObservableId(usize);

impl ObservableId {
    pub(crate) fn of<T: ?Sized>(shared: &Rc<T>) -> Self {
        Self(Rc::as_ptr(shared).cast::<()>() as usize)
    }
}

impl fmt::Display for ObservableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obs#{:x}", self.0)
    }
}

/// A party notified when an observable fires.
pub trait Observer {
    fn notify(&self, source: ObservableId);
}

impl<F: Fn(ObservableId)> Observer for F {
    fn notify(&self, source: ObservableId) {
        self(source)
    }
}

/// The subscribable side of a notifier.
pub trait Observable {
    /// Identity passed to observers when this observable fires.
    fn id(&self) -> ObservableId;

    /// Register a long-lived observer. It must be removed exactly once
    /// with [`remove_observer`](Self::remove_observer).
    fn add_observer(&self, observer: &Rc<dyn Observer>);

    /// Unregister an observer added with [`add_observer`](Self::add_observer).
    fn remove_observer(&self, observer: &Rc<dyn Observer>);

    /// Unregister through a weak reference.
    ///
    /// An observer removing itself from its own `Drop` can no longer produce
    /// an `Rc`; this form accepts its `Weak` and succeeds silently when the
    /// observer is already gone.
    fn remove_observer_weak(&self, observer: &Weak<dyn Observer>);

    /// Register `observer` and return a token owning the registration.
    fn subscribe(&self, observer: Rc<dyn Observer>) -> ObserverToken;

    /// Like [`subscribe`](Self::subscribe), naming the registration in
    /// misuse reports.
    fn subscribe_labeled(&self, observer: Rc<dyn Observer>, label: &str) -> ObserverToken;

    /// Number of live registered observers.
    fn observer_count(&self) -> usize;

    /// Register a callback. Dropping the returned token unregisters it.
    fn observe(&self, callback: impl Fn(ObservableId) + 'static) -> ObserverToken
    where
        Self: Sized,
    {
        self.subscribe(Rc::new(callback))
    }
}

/// Something that can be fired, such as an [`Event`](crate::Event) or a
/// [`LazyEvent`](crate::LazyEvent).
pub trait Trigger {
    fn trigger(&self);
}
