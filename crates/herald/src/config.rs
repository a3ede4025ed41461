#![forbid(unsafe_code)]

//! Diagnostic mode selection.
//!
//! Misuse of the observer APIs (double registration, removing an observer
//! that was never added, re-entrant notification, leaked registrations) is a
//! programmer error. How it is surfaced depends on the [`DiagnosticMode`]:
//!
//! | Mode      | Behavior                                   |
//! |-----------|--------------------------------------------|
//! | `Strict`  | Panic with the misuse message              |
//! | `Lenient` | Log at `warn` and self-heal (ignore/purge) |
//!
//! # Resolution order
//!
//! 1. An explicit mode passed to a registry (`ObserverRegistry::with_mode`).
//! 2. The `HERALD_DIAGNOSTICS` environment variable (`strict` / `lenient`),
//!    read once per process.
//! 3. The `strict-diagnostics` feature, which forces `Strict`.
//! 4. `Strict` in debug builds, `Lenient` in release builds.

use std::sync::OnceLock;

/// Environment variable overriding the default diagnostic mode.
pub const DIAGNOSTICS_ENV: &str = "HERALD_DIAGNOSTICS";

/// How misuse defects are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticMode {
    /// Abort the current operation with a panic.
    Strict,
    /// Log a warning and restore invariants without crashing the host.
    Lenient,
}

impl DiagnosticMode {
    /// The mode implied by the build configuration alone.
    #[must_use]
    pub const fn build_default() -> Self {
        if cfg!(any(debug_assertions, feature = "strict-diagnostics")) {
            Self::Strict
        } else {
            Self::Lenient
        }
    }

    /// Parse a mode name. Accepts `strict`/`lenient` and a few aliases.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" | "panic" | "debug" | "1" | "on" => Some(Self::Strict),
            "lenient" | "log" | "release" | "0" | "off" => Some(Self::Lenient),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_strict(self) -> bool {
        matches!(self, Self::Strict)
    }
}

impl Default for DiagnosticMode {
    fn default() -> Self {
        default_mode()
    }
}

#[inline]
fn mode_from_env_impl<F>(get_env: F) -> DiagnosticMode
where
    F: Fn(&str) -> Option<String>,
{
    get_env(DIAGNOSTICS_ENV)
        .and_then(|value| DiagnosticMode::parse(&value))
        .unwrap_or(DiagnosticMode::build_default())
}

/// Resolve the diagnostic mode using a custom environment lookup.
#[inline]
pub fn mode_from_env<F>(get_env: F) -> DiagnosticMode
where
    F: Fn(&str) -> Option<String>,
{
    mode_from_env_impl(get_env)
}

/// Process-wide default diagnostic mode (cached after the first call).
#[inline]
pub fn default_mode() -> DiagnosticMode {
    static MODE: OnceLock<DiagnosticMode> = OnceLock::new();
    *MODE.get_or_init(|| mode_from_env_impl(|key| std::env::var(key).ok()))
}
