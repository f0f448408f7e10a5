//! Event scoping filter.
//!
//! Events rejected here never reach the checker tree and are not counted
//! against the event limit.

use serde::{Deserialize, Serialize};

use crate::event::{Event, EventKind};

/// Allow/deny lists applied before matching.
///
/// Empty allow-lists impose no restriction. An event without a pod has no
/// namespace: it fails a non-empty namespace allow-list and never hits a
/// namespace deny-list entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventFilter {
    /// Namespaces to keep.
    pub allow_namespaces: Vec<String>,
    /// Namespaces to drop; checked after the allow-list.
    pub deny_namespaces: Vec<String>,
    /// Event kinds to keep.
    pub allow_kinds: Vec<EventKind>,
}

impl EventFilter {
    /// A filter that keeps everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only events from `namespace` (repeatable).
    #[must_use]
    pub fn allow_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.allow_namespaces.push(namespace.into());
        self
    }

    /// Drop events from `namespace` (repeatable).
    #[must_use]
    pub fn deny_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.deny_namespaces.push(namespace.into());
        self
    }

    /// Keep only events of `kind` (repeatable).
    #[must_use]
    pub fn allow_kind(mut self, kind: EventKind) -> Self {
        self.allow_kinds.push(kind);
        self
    }

    /// True if `event` should be passed on to the tree.
    #[must_use]
    pub fn accepts(&self, event: &Event) -> bool {
        if !self.allow_kinds.is_empty() && !self.allow_kinds.contains(&event.kind()) {
            return false;
        }
        let namespace = event.namespace();
        if !self.allow_namespaces.is_empty() {
            let Some(ns) = namespace else {
                return false;
            };
            if !self.allow_namespaces.iter().any(|a| a == ns) {
                return false;
            }
        }
        match namespace {
            Some(ns) => !self.deny_namespaces.iter().any(|d| d == ns),
            None => true,
        }
    }
}
