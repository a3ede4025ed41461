#![forbid(unsafe_code)]

//! Observer hub, coalescing events and debounced notification for
//! single-threaded hosts.
//!
//! # Role
//!
//! `herald` connects producers of "something changed" signals to the
//! parties interested in them, without either side owning the other:
//!
//! - [`ObserverRegistry`]: weakly-held observers with snapshot iteration
//!   and re-entrancy detection.
//! - [`ObserverToken`]: RAII registration that unregisters on drop.
//! - [`Event`]: synchronous notification, batchable with
//!   [`Event::coalesce`].
//! - [`LazyEvent`]: notification deferred to the next executor turn; all
//!   triggers of a turn collapse into one.
//! - [`CoalescingScheduler`]: the "at most one pending wake-up" primitive
//!   under `LazyEvent` and `GroupObserver`.
//! - [`GroupObserver`]: one debounced callback over several sources.
//! - [`Mailbox`]: single-slot value hand-off firing a notifier.
//! - [`RunLoop`]: bundled [`Executor`] with tasks, timers and a manual
//!   clock for deterministic tests.
//!
//! # Threading
//!
//! Everything is `Rc`-based and `!Send`. All calls are expected on one
//! logical execution context.
//!
//! # Misuse
//!
//! Double registration, removing an unknown observer, re-entrant
//! notification and leaked observers are programmer errors. See
//! [`DiagnosticMode`] for how they are surfaced.

pub mod config;
pub mod error;
pub mod event;
pub mod executor;
pub mod group;
pub mod lazy;
pub mod mailbox;
pub mod observable;
pub mod registry;
pub mod scheduler;
pub mod token;

pub use config::DiagnosticMode;
pub use error::MisuseError;
pub use event::{CoalescingScope, Event};
pub use executor::{Clock, Executor, RunLoop, Task, TimerId};
pub use group::{DebouncePolicy, GroupConfig, GroupObserver};
pub use lazy::LazyEvent;
pub use mailbox::Mailbox;
pub use observable::{Observable, ObservableId, Observer, Trigger};
pub use registry::ObserverRegistry;
pub use scheduler::CoalescingScheduler;
pub use token::ObserverToken;
