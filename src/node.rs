//! Checker nodes: one named expectation against one event occurrence.

use serde::{Deserialize, Serialize};

use crate::checker::EventChecker;
use crate::event::{Event, EventKind};

/// Result of trying one event against one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    /// Every populated field matched.
    Matched,
    /// Same kind, but a field did not match.
    Rejected(String),
    /// The event is of a different kind; no field was evaluated.
    WrongKind,
}

impl MatchResult {
    /// True for [`MatchResult::Matched`].
    #[must_use]
    pub const fn is_match(&self) -> bool {
        matches!(self, Self::Matched)
    }
}

/// A named expectation wrapping exactly one event checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckerNode {
    name: String,
    checker: EventChecker,
}

impl CheckerNode {
    /// Create a node. Name validation happens when the tree is built.
    #[must_use]
    pub fn new(name: impl Into<String>, checker: impl Into<EventChecker>) -> Self {
        Self {
            name: name.into(),
            checker: checker.into(),
        }
    }

    /// Node name, used in diagnostics and reports.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The event kind this node expects.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.checker.kind()
    }

    /// The wrapped checker.
    #[must_use]
    pub const fn checker(&self) -> &EventChecker {
        &self.checker
    }

    /// Try `event` against this node.
    #[must_use]
    pub fn try_match(&self, event: &Event) -> MatchResult {
        if event.kind() != self.kind() {
            return MatchResult::WrongKind;
        }
        match self.checker.check(event) {
            Ok(()) => MatchResult::Matched,
            Err(m) => MatchResult::Rejected(m.into_reason()),
        }
    }
}
