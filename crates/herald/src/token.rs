#![forbid(unsafe_code)]

//! RAII registration guard.

use std::fmt;
use std::rc::{Rc, Weak};

use crate::observable::Observer;
use crate::registry::ObserverRegistry;

/// Owns one registration in an [`ObserverRegistry`].
///
/// The registry only holds a weak reference to the observer; the token
/// holds the strong one. Dropping the token (or calling
/// [`cancel`](Self::cancel)) removes the observer exactly once. If the
/// registry is already gone, the observer is simply released.
///
/// Share the token through an `Rc` when several owners should keep the
/// registration alive.
#[must_use = "dropping the token immediately unregisters the observer"]
pub struct ObserverToken<T: ?Sized = dyn Observer> {
    registry: Weak<ObserverRegistry<T>>,
    observer: Option<Rc<T>>,
}

impl<T: ?Sized> ObserverToken<T> {
    /// Add `observer` to `registry` and return the owning token.
    #[track_caller]
    pub fn register(registry: &Rc<ObserverRegistry<T>>, observer: Rc<T>) -> Self {
        registry.add(&observer);
        Self::owning(registry, observer)
    }

    /// Like [`register`](Self::register), with a label shown in misuse
    /// reports.
    #[track_caller]
    pub fn register_labeled(
        registry: &Rc<ObserverRegistry<T>>,
        observer: Rc<T>,
        label: impl Into<String>,
    ) -> Self {
        registry.add_labeled(&observer, label);
        Self::owning(registry, observer)
    }

    fn owning(registry: &Rc<ObserverRegistry<T>>, observer: Rc<T>) -> Self {
        Self {
            registry: Rc::downgrade(registry),
            observer: Some(observer),
        }
    }

    /// Unregister now. Later calls (and the eventual drop) do nothing.
    pub fn cancel(&mut self) {
        let Some(observer) = self.observer.take() else {
            return;
        };
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&observer);
        }
        // `observer` is released only after removal so the registry never
        // sees a dead, still-subscribed handle.
        drop(observer);
    }

    /// True until the token is cancelled or dropped.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.observer.is_some()
    }
}

impl<T: ?Sized> Drop for ObserverToken<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl<T: ?Sized> fmt::Debug for ObserverToken<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverToken")
            .field("active", &self.is_active())
            .field("registry_alive", &(self.registry.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiagnosticMode;
    use std::cell::Cell;

    fn noop() -> Rc<dyn Fn()> {
        Rc::new(|| {})
    }

    fn registry() -> Rc<ObserverRegistry<dyn Fn()>> {
        Rc::new(ObserverRegistry::with_mode(DiagnosticMode::Strict))
    }

    #[test]
    fn drop_unregisters() {
        let registry = registry();
        let hits = Rc::new(Cell::new(0));
        let sink = Rc::clone(&hits);
        let observer: Rc<dyn Fn()> = Rc::new(move || sink.set(sink.get() + 1));
        let token = ObserverToken::register(&registry, observer);

        registry.for_each(|f| f());
        assert_eq!(hits.get(), 1);

        drop(token);
        assert!(registry.is_empty());
        registry.for_each(|f| f());
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn cancel_is_idempotent() {
        let registry = registry();
        let mut token = ObserverToken::register(&registry, noop());
        assert!(token.is_active());

        token.cancel();
        token.cancel();
        assert!(!token.is_active());
        assert!(registry.is_empty());
        // Drop after cancel must not remove a second time (strict would panic).
        drop(token);
    }

    #[test]
    fn token_outliving_registry_is_harmless() {
        let registry = registry();
        let token = ObserverToken::register(&registry, noop());
        drop(registry);
        assert!(format!("{token:?}").contains("registry_alive: false"));
        drop(token);
    }

    #[test]
    fn labels_identify_registrations() {
        let registry = registry();
        let _plain = ObserverToken::register(&registry, noop());
        let _named = ObserverToken::register_labeled(&registry, noop(), "status-bar");

        let dump = format!("{registry:?}");
        assert!(dump.contains("\"<unlabeled>\", \"status-bar\""), "{dump}");
    }

    #[test]
    #[should_panic(expected = "status-bar")]
    fn duplicate_report_names_the_registration() {
        let registry = registry();
        let observer = noop();
        let _first = ObserverToken::register_labeled(&registry, Rc::clone(&observer), "status-bar");
        let _second = ObserverToken::register(&registry, observer);
    }

    #[test]
    fn shared_token_unregisters_when_last_owner_drops() {
        let registry = registry();
        let token = Rc::new(ObserverToken::register(&registry, noop()));
        let second_owner = Rc::clone(&token);

        drop(token);
        assert_eq!(registry.len(), 1);
        drop(second_owner);
        assert!(registry.is_empty());
    }
}
