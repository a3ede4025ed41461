#![forbid(unsafe_code)]

//! Weak observer registry.
//!
//! # Design
//!
//! [`ObserverRegistry<T>`] keeps an ordered list of handles, each holding a
//! `Weak<T>` to a registered observer. The registry never keeps an observer
//! alive: owners are expected to remove their observer explicitly (or hold
//! an [`ObserverToken`](crate::ObserverToken) that does it for them).
//!
//! All operations take `&self`, so observers may add or remove entries on
//! the registry that is currently notifying them.
//!
//! # Invariants
//!
//! 1. An observer identity (the `Rc` allocation) appears at most once.
//! 2. Iteration follows insertion order.
//! 3. The set of observers visited by `for_each` is frozen when the pass
//!    starts: observers added during the pass are not visited, observers
//!    removed during the pass are skipped if not yet visited.
//! 4. Handles whose observer died without being removed are purged by the
//!    next cleanup pass (after `add`, `remove` or `for_each`).
//!
//! # Failure Modes
//!
//! - **Re-entrant notification**: `for_each` from inside `for_each` on the
//!   same registry is a [`MisuseError::ReentrantNotification`]. In lenient
//!   mode the nested pass is skipped.
//! - **Leaked observer**: an observer dropped while still registered is a
//!   [`MisuseError::LeakedObserver`]. The entry is purged before the report,
//!   so lenient mode self-heals.
//! - **Panicking observer**: propagates to the caller of `for_each`. The
//!   remaining observers of that pass are not visited.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::config::DiagnosticMode;
use crate::error::{MisuseError, report};

/// One registered observer.
struct Handle<T: ?Sized> {
    observer: Weak<T>,
    /// Set by an explicit removal. A dead handle without this flag is a leak.
    unsubscribed: Cell<bool>,
    label: Option<String>,
}

impl<T: ?Sized> Handle<T> {
    fn is(&self, ptr: *const T) -> bool {
        std::ptr::addr_eq(self.observer.as_ptr(), ptr)
    }

    fn is_alive(&self) -> bool {
        self.observer.strong_count() > 0
    }
}

/// A registry of weakly-held observers.
///
/// `T` is usually a trait object such as `dyn Observer`, but any type works:
/// identity is the address of the `Rc` allocation.
pub struct ObserverRegistry<T: ?Sized> {
    handles: RefCell<Vec<Rc<Handle<T>>>>,
    notifying: Cell<bool>,
    mode: DiagnosticMode,
}

impl<T: ?Sized> fmt::Debug for ObserverRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handles = self.handles.borrow();
        let labels: Vec<&str> = handles
            .iter()
            .map(|h| h.label.as_deref().unwrap_or("<unlabeled>"))
            .collect();
        f.debug_struct("ObserverRegistry")
            .field("observers", &labels)
            .field("notifying", &self.notifying.get())
            .field("mode", &self.mode)
            .finish()
    }
}

impl<T: ?Sized> Default for ObserverRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Resets the `notifying` flag even if an observer panics.
struct NotifyGuard<'a>(&'a Cell<bool>);

impl Drop for NotifyGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl<T: ?Sized> ObserverRegistry<T> {
    /// Create an empty registry using the process-wide diagnostic mode.
    #[must_use]
    pub fn new() -> Self {
        Self::with_mode(DiagnosticMode::default())
    }

    /// Create an empty registry with an explicit diagnostic mode.
    #[must_use]
    pub fn with_mode(mode: DiagnosticMode) -> Self {
        Self {
            handles: RefCell::new(Vec::new()),
            notifying: Cell::new(false),
            mode,
        }
    }

    #[must_use]
    pub fn mode(&self) -> DiagnosticMode {
        self.mode
    }

    /// Register `observer`.
    ///
    /// Adding an observer that is already registered is a misuse defect:
    /// strict mode panics, lenient mode logs and keeps the existing entry.
    #[track_caller]
    pub fn add(&self, observer: &Rc<T>) {
        if let Err(err) = self.insert(observer, None) {
            report(self.mode, err);
        }
    }

    /// Register `observer` with a diagnostic label shown in misuse reports.
    #[track_caller]
    pub fn add_labeled(&self, observer: &Rc<T>, label: impl Into<String>) {
        if let Err(err) = self.insert(observer, Some(label.into())) {
            report(self.mode, err);
        }
    }

    /// Register `observer`, returning misuse as an error instead of
    /// reporting it.
    pub fn try_add(&self, observer: &Rc<T>) -> Result<(), MisuseError> {
        self.insert(observer, None)
    }

    fn insert(&self, observer: &Rc<T>, label: Option<String>) -> Result<(), MisuseError> {
        let ptr = Rc::as_ptr(observer);
        let result = {
            let mut handles = self.handles.borrow_mut();
            match handles.iter().find(|h| h.is(ptr) && h.is_alive()) {
                Some(existing) => Err(MisuseError::DuplicateObserver {
                    label: label.or_else(|| existing.label.clone()),
                }),
                None => {
                    handles.push(Rc::new(Handle {
                        observer: Rc::downgrade(observer),
                        unsubscribed: Cell::new(false),
                        label,
                    }));
                    Ok(())
                }
            }
        };
        self.cleanup();
        result
    }

    /// Unregister `observer`.
    ///
    /// Removing an observer that is not registered is a misuse defect:
    /// strict mode panics, lenient mode logs and does nothing.
    #[track_caller]
    pub fn remove(&self, observer: &Rc<T>) {
        if let Err(err) = self.try_remove(observer) {
            report(self.mode, err);
        }
    }

    /// Unregister `observer`, returning misuse as an error instead of
    /// reporting it.
    pub fn try_remove(&self, observer: &Rc<T>) -> Result<(), MisuseError> {
        let removed = self.detach(Rc::as_ptr(observer));
        self.cleanup();
        if removed {
            Ok(())
        } else {
            Err(MisuseError::UnknownObserver)
        }
    }

    /// Unregister an observer through a weak reference.
    ///
    /// Meant for an observer removing itself from its own `Drop`: when the
    /// observer is already gone and not found, the call succeeds silently.
    #[track_caller]
    pub fn remove_weak(&self, observer: &Weak<T>) {
        let removed = self.detach(observer.as_ptr());
        self.cleanup();
        if !removed && observer.strong_count() > 0 {
            report(self.mode, MisuseError::UnknownObserver);
        }
    }

    fn detach(&self, ptr: *const T) -> bool {
        let mut handles = self.handles.borrow_mut();
        match handles.iter().position(|h| h.is(ptr) && !h.unsubscribed.get()) {
            Some(index) => {
                let handle = handles.remove(index);
                handle.unsubscribed.set(true);
                true
            }
            None => false,
        }
    }

    /// Visit every live observer in registration order.
    ///
    /// The visited set is a snapshot taken when the pass starts. Calling
    /// `for_each` again from inside `action` on the same registry is a
    /// misuse defect.
    #[track_caller]
    pub fn for_each(&self, mut action: impl FnMut(&T)) {
        if self.notifying.get() {
            report(self.mode, MisuseError::ReentrantNotification);
            return;
        }
        self.notifying.set(true);
        let guard = NotifyGuard(&self.notifying);

        let snapshot: Vec<Rc<Handle<T>>> = self.handles.borrow().clone();
        for handle in &snapshot {
            // Removed by an earlier observer of this same pass.
            if handle.unsubscribed.get() {
                continue;
            }
            let Some(observer) = handle.observer.upgrade() else {
                continue;
            };
            trace!(
                observer = handle.label.as_deref().unwrap_or("<unlabeled>"),
                "notifying observer"
            );
            action(&observer);
        }

        drop(guard);
        self.cleanup();
    }

    /// True while a `for_each` pass is running.
    #[must_use]
    pub fn is_notifying(&self) -> bool {
        self.notifying.get()
    }

    /// True iff no live observer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live registered observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.borrow().iter().filter(|h| h.is_alive()).count()
    }

    #[must_use]
    pub fn contains(&self, observer: &Rc<T>) -> bool {
        let ptr = Rc::as_ptr(observer);
        self.handles.borrow().iter().any(|h| h.is(ptr))
    }

    /// Purge dead handles, reporting the ones that were never removed.
    fn cleanup(&self) {
        let leaked: Vec<Option<String>> = {
            let mut handles = self.handles.borrow_mut();
            let mut leaked = Vec::new();
            handles.retain(|h| {
                if h.is_alive() {
                    return true;
                }
                if !h.unsubscribed.get() {
                    leaked.push(h.label.clone());
                }
                false
            });
            leaked
        };
        for label in leaked {
            report(self.mode, MisuseError::LeakedObserver { label });
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
