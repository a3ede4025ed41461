#![forbid(unsafe_code)]

//! Misuse defects and how they are reported.

use crate::config::DiagnosticMode;

/// A programmer error detected by an observer registry.
///
/// None of these are runtime conditions: a correct program never produces
/// them. They are surfaced according to the registry's [`DiagnosticMode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MisuseError {
    /// The same observer identity was added twice.
    DuplicateObserver { label: Option<String> },
    /// An observer that was never added (or already removed) was removed.
    UnknownObserver,
    /// `for_each` was called while a `for_each` on the same registry was
    /// already running.
    ReentrantNotification,
    /// An observer was dropped without being removed first.
    LeakedObserver { label: Option<String> },
}

impl MisuseError {
    /// Short stable name, used as a structured logging field.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateObserver { .. } => "duplicate_observer",
            Self::UnknownObserver => "unknown_observer",
            Self::ReentrantNotification => "reentrant_notification",
            Self::LeakedObserver { .. } => "leaked_observer",
        }
    }
}

impl std::fmt::Display for MisuseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateObserver { label: Some(label) } => {
                write!(f, "observer `{label}` is already registered")
            }
            Self::DuplicateObserver { label: None } => {
                write!(f, "observer is already registered")
            }
            Self::UnknownObserver => write!(f, "removing an observer that was never added"),
            Self::ReentrantNotification => {
                write!(f, "re-entrant notification on the same observer registry")
            }
            Self::LeakedObserver { label: Some(label) } => {
                write!(f, "observer `{label}` was dropped without being removed")
            }
            Self::LeakedObserver { label: None } => {
                write!(f, "observer was dropped without being removed")
            }
        }
    }
}

impl std::error::Error for MisuseError {}

/// Surface a misuse defect under the given mode.
///
/// # Panics
///
/// Panics in [`DiagnosticMode::Strict`].
#[track_caller]
pub(crate) fn report(mode: DiagnosticMode, error: MisuseError) {
    match mode {
        DiagnosticMode::Strict => panic!("herald misuse: {error}"),
        DiagnosticMode::Lenient => {
            tracing::warn!(kind = error.kind(), "herald misuse: {error}");
        }
    }
}
