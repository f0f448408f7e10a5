//! Entity checkers.
//!
//! An entity checker composes field matchers over one payload shape. Every
//! field is optional: an unset field is a wildcard. Checks short-circuit on
//! the first failing field and return a path-qualified [`Mismatch`] such as
//! `process: pod: namespace mismatch: exact("kube-system") does not match "default"`.
//!
//! [`EventChecker`] is the tagged union over event kinds. Adding an event kind
//! means adding a variant here and a checker type in [`kinds`]; the runner and
//! tree never change.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::event::{Event, EventKind};

/// Per-kind event checkers.
pub mod kinds;
/// Process, pod and container checkers.
pub mod process;

pub use kinds::{ExecChecker, ExitChecker, KprobeArgChecker, KprobeChecker};
pub use process::{ContainerChecker, PodChecker, ProcessChecker};

/// Why a checker rejected a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    reason: String,
}

impl Mismatch {
    /// A mismatch on `field`, with the matcher's explanation.
    #[must_use]
    pub fn field(field: &str, detail: impl fmt::Display) -> Self {
        Self {
            reason: format!("{field} mismatch: {detail}"),
        }
    }

    /// A required nested entity was absent from the payload.
    #[must_use]
    pub fn missing(field: &str) -> Self {
        Self {
            reason: format!("{field} missing"),
        }
    }

    /// Qualify the reason with the enclosing attribute name.
    #[must_use]
    pub fn within(self, scope: &str) -> Self {
        Self {
            reason: format!("{scope}: {}", self.reason),
        }
    }

    /// The human-readable reason.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Consume into the reason string.
    #[must_use]
    pub fn into_reason(self) -> String {
        self.reason
    }
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Outcome of an entity check.
pub type CheckOutcome = Result<(), Mismatch>;

/// Checker for one event of a given kind.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventChecker {
    Exec(ExecChecker),
    Exit(ExitChecker),
    Kprobe(KprobeChecker),
}

impl EventChecker {
    /// The event kind this checker applies to.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Exec(_) => EventKind::Exec,
            Self::Exit(_) => EventKind::Exit,
            Self::Kprobe(_) => EventKind::Kprobe,
        }
    }

    /// Check `event` against this checker.
    ///
    /// Callers are expected to have compared kinds already; a kind mismatch
    /// still yields a `Mismatch` rather than a panic.
    pub fn check(&self, event: &Event) -> CheckOutcome {
        match self {
            Self::Exec(c) => c.check(&event.payload),
            Self::Exit(c) => c.check(&event.payload),
            Self::Kprobe(c) => c.check(&event.payload),
        }
    }
}

impl From<ExecChecker> for EventChecker {
    fn from(c: ExecChecker) -> Self {
        Self::Exec(c)
    }
}

impl From<ExitChecker> for EventChecker {
    fn from(c: ExitChecker) -> Self {
        Self::Exit(c)
    }
}

impl From<KprobeChecker> for EventChecker {
    fn from(c: KprobeChecker) -> Self {
        Self::Kprobe(c)
    }
}

/// Apply an optional string matcher to a field.
pub(crate) fn check_str(
    field: &str,
    matcher: Option<&crate::matcher::StringMatcher>,
    value: &str,
) -> CheckOutcome {
    match matcher {
        None => Ok(()),
        Some(m) => m.check(value).map_err(|detail| Mismatch::field(field, detail)),
    }
}

/// Apply an optional equality expectation to a scalar field.
pub(crate) fn check_eq<T>(field: &str, expected: Option<&T>, actual: &T) -> CheckOutcome
where
    T: PartialEq + fmt::Debug,
{
    match expected {
        Some(want) if want != actual => Err(Mismatch::field(
            field,
            format_args!("expected {want:?}, got {actual:?}"),
        )),
        _ => Ok(()),
    }
}
