#![forbid(unsafe_code)]

//! Single-slot value hand-off with change notification.
//!
//! A [`Mailbox`] holds at most one value and fires a notifier (an
//! [`Event`] by default, or a [`LazyEvent`](crate::LazyEvent)) when a value
//! is placed. The consumer observes the notifier and calls [`Mailbox::take`].
//!
//! The slot is released before the notifier fires, so observers may read or
//! take the value from inside their callback.

use std::cell::RefCell;
use std::fmt;

use crate::event::Event;
use crate::observable::Trigger;

/// Single-slot value cell.
pub struct Mailbox<T, N: Trigger = Event> {
    slot: RefCell<Option<T>>,
    notifier: N,
}

impl<T: fmt::Debug, N: Trigger + fmt::Debug> fmt::Debug for Mailbox<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("slot", &self.slot.borrow())
            .field("notifier", &self.notifier)
            .finish()
    }
}

impl<T, N: Trigger> Mailbox<T, N> {
    /// Create an empty mailbox firing `notifier` on placement.
    pub fn new(notifier: N) -> Self {
        Self {
            slot: RefCell::new(None),
            notifier,
        }
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Remove and return the value. The slot is always empty afterwards.
    pub fn take(&self) -> Option<T> {
        self.slot.borrow_mut().take()
    }

    /// Store `value` and fire the notifier, whatever was stored before.
    pub fn replace_even_if_same(&self, value: T) {
        let previous = self.slot.replace(Some(value));
        drop(previous);
        self.notifier.trigger();
    }

    /// Store `value` only if the slot is empty. Fires on success.
    pub fn place_if_fits(&self, value: T) -> bool {
        {
            let mut slot = self.slot.borrow_mut();
            if slot.is_some() {
                return false;
            }
            *slot = Some(value);
        }
        self.notifier.trigger();
        true
    }

    /// True iff the slot holds a value (a stored `None` of an optional
    /// payload counts as a value).
    #[must_use]
    pub fn has_value(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Inspect the slot without taking the value.
    pub fn with_value<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        f(self.slot.borrow().as_ref())
    }
}

impl<T: Clone, N: Trigger> Mailbox<T, N> {
    /// Clone of the current value, leaving it in place.
    #[must_use]
    pub fn peek(&self) -> Option<T> {
        self.slot.borrow().clone()
    }
}

impl<T: PartialEq, N: Trigger> Mailbox<T, N> {
    /// Store `value`; fire the notifier only if it differs from the
    /// previous content (an empty slot always differs).
    pub fn replace(&self, value: T) {
        let changed = {
            let mut slot = self.slot.borrow_mut();
            let changed = slot.as_ref() != Some(&value);
            *slot = Some(value);
            changed
        };
        if changed {
            self.notifier.trigger();
        }
    }
}
