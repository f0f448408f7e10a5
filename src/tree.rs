//! Checker trees and their matching algorithms.
//!
//! A tree is an ordered list of [`CheckerNode`]s plus a [`MatchMode`]:
//!
//! - `Ordered`: a cursor walks the nodes; only the node under the cursor is
//!   tried. An event that would satisfy a later node is ignored until every
//!   earlier node has matched.
//! - `Unordered`: every still-unmatched node is tried in declaration order and
//!   the first one that matches consumes the event.
//!
//! Trees start `Pending` and end in `Satisfied` (all nodes matched) or
//! `Failed` (set by the runner when limits run out). Both are terminal.
//! Individual non-matching events are never fatal.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::checker::EventChecker;
use crate::error::ValidationError;
use crate::event::Event;
use crate::node::{CheckerNode, MatchResult};
use crate::report::{MatchedEvent, Outcome, Report, RunInfo, UnmatchedNode};

/// Matching discipline of a tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Nodes must be satisfied in declaration order.
    #[default]
    Ordered,
    /// Nodes may be satisfied in any order.
    Unordered,
}

/// Lifecycle state of a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeState {
    /// Waiting for more matching events.
    Pending,
    /// Every node matched.
    Satisfied,
    /// Run limits were exhausted first.
    Failed,
}

impl TreeState {
    /// True for `Satisfied` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// What a single dispatch did to the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// A node matched; more remain.
    Matched {
        /// The node that consumed the event.
        node: String,
    },
    /// The last outstanding node matched; the tree is now satisfied.
    FinalMatch {
        /// The node that consumed the event.
        node: String,
    },
    /// At least one eligible node had the right kind but rejected the event.
    NoMatch {
        /// `node: reason` for each rejecting node, `; ` separated.
        reason: String,
    },
    /// No eligible node expects this event kind.
    Skipped,
    /// The tree was already terminal.
    Ignored,
}

/// Serializable, immutable definition of a tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeDefinition {
    /// Checker name; also the stem of the report files.
    pub name: String,
    /// Matching discipline.
    #[serde(default)]
    pub mode: MatchMode,
    /// Nodes in declaration order.
    pub nodes: Vec<CheckerNode>,
}

impl TreeDefinition {
    /// Validate the definition and produce a fresh tree.
    pub fn build(&self) -> Result<CheckerTree, ValidationError> {
        self.validate()?;
        Ok(CheckerTree::from_valid(self.clone()))
    }

    /// Parse and validate a JSON definition.
    pub fn from_json(json: &str) -> Result<CheckerTree, ValidationError> {
        let def: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            reason: format!("invalid checker tree JSON: {e}"),
        })?;
        def.build()
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyCheckerName);
        }
        if !self.name.chars().all(crate::report::is_file_safe) {
            return Err(ValidationError::InvalidCheckerName {
                name: self.name.clone(),
            });
        }
        if self.nodes.is_empty() {
            return Err(ValidationError::EmptyTree {
                checker: self.name.clone(),
            });
        }
        let mut seen = HashSet::with_capacity(self.nodes.len());
        for (index, node) in self.nodes.iter().enumerate() {
            if node.name().trim().is_empty() {
                return Err(ValidationError::EmptyNodeName { index });
            }
            if !seen.insert(node.name()) {
                return Err(ValidationError::DuplicateNodeName {
                    name: node.name().to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Builder for [`CheckerTree`].
///
/// # Example
/// ```rust
/// use eventcheck::checker::{ExecChecker, ProcessChecker};
/// use eventcheck::matcher::StringMatcher;
/// use eventcheck::tree::CheckerTree;
///
/// let tree = CheckerTree::unordered("curl-then-false")
///     .node("curl", ExecChecker::new().process(ProcessChecker::new().binary(StringMatcher::suffix("curl"))))
///     .node("false", ExecChecker::new().process(ProcessChecker::new().binary(StringMatcher::exact("/bin/false"))))
///     .build()
///     .unwrap();
/// assert_eq!(tree.len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct TreeBuilder {
    def: TreeDefinition,
}

impl TreeBuilder {
    /// Append a node.
    #[must_use]
    pub fn node(mut self, name: impl Into<String>, checker: impl Into<EventChecker>) -> Self {
        self.def.nodes.push(CheckerNode::new(name, checker));
        self
    }

    /// Append a prebuilt node.
    #[must_use]
    pub fn push(mut self, node: CheckerNode) -> Self {
        self.def.nodes.push(node);
        self
    }

    /// The definition built so far.
    #[must_use]
    pub fn into_definition(self) -> TreeDefinition {
        self.def
    }

    /// Validate and build.
    pub fn build(self) -> Result<CheckerTree, ValidationError> {
        self.def.validate()?;
        Ok(CheckerTree::from_valid(self.def))
    }
}

#[derive(Debug, Clone)]
enum Progress {
    Ordered { cursor: usize },
    Unordered { remaining: Vec<usize> },
}

/// A checker tree with its match state.
#[derive(Debug, Clone)]
pub struct CheckerTree {
    def: TreeDefinition,
    state: TreeState,
    progress: Progress,
    last_reason: Vec<Option<String>>,
    matched: Vec<MatchedEvent>,
}

impl CheckerTree {
    /// Start building an ordered tree.
    #[must_use]
    pub fn ordered(name: impl Into<String>) -> TreeBuilder {
        Self::builder(name, MatchMode::Ordered)
    }

    /// Start building an unordered tree.
    #[must_use]
    pub fn unordered(name: impl Into<String>) -> TreeBuilder {
        Self::builder(name, MatchMode::Unordered)
    }

    /// Start building a tree with an explicit mode.
    #[must_use]
    pub fn builder(name: impl Into<String>, mode: MatchMode) -> TreeBuilder {
        TreeBuilder {
            def: TreeDefinition {
                name: name.into(),
                mode,
                nodes: Vec::new(),
            },
        }
    }

    fn from_valid(def: TreeDefinition) -> Self {
        let progress = match def.mode {
            MatchMode::Ordered => Progress::Ordered { cursor: 0 },
            MatchMode::Unordered => Progress::Unordered {
                remaining: (0..def.nodes.len()).collect(),
            },
        };
        let last_reason = vec![None; def.nodes.len()];
        Self {
            def,
            state: TreeState::Pending,
            progress,
            last_reason,
            matched: Vec::new(),
        }
    }

    /// Checker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Matching discipline.
    #[must_use]
    pub const fn mode(&self) -> MatchMode {
        self.def.mode
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.def.nodes.len()
    }

    /// Always false for a built tree; provided for clippy.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.def.nodes.is_empty()
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> TreeState {
        self.state
    }

    /// The definition this tree was built from.
    #[must_use]
    pub const fn definition(&self) -> &TreeDefinition {
        &self.def
    }

    /// Feed one event to the tree. `seq` is the runner's event sequence
    /// number, recorded in the matched section.
    pub fn dispatch(&mut self, seq: u64, event: &Event) -> Step {
        if self.state.is_terminal() {
            return Step::Ignored;
        }
        match &mut self.progress {
            Progress::Ordered { cursor } => {
                let idx = *cursor;
                let node = &self.def.nodes[idx];
                match node.try_match(event) {
                    MatchResult::Matched => {
                        *cursor += 1;
                        let done = *cursor >= self.def.nodes.len();
                        self.record_match(idx, seq, event, done)
                    }
                    MatchResult::Rejected(reason) => {
                        let step = Step::NoMatch {
                            reason: format!("{}: {reason}", node.name()),
                        };
                        self.last_reason[idx] = Some(reason);
                        step
                    }
                    MatchResult::WrongKind => Step::Skipped,
                }
            }
            Progress::Unordered { remaining } => {
                let mut rejections = Vec::new();
                let mut hit = None;
                for (pos, &idx) in remaining.iter().enumerate() {
                    let node = &self.def.nodes[idx];
                    match node.try_match(event) {
                        MatchResult::Matched => {
                            hit = Some(pos);
                            break;
                        }
                        MatchResult::Rejected(reason) => rejections.push((idx, reason)),
                        MatchResult::WrongKind => {}
                    }
                }
                if let Some(pos) = hit {
                    let idx = remaining.remove(pos);
                    let done = remaining.is_empty();
                    // Nodes declared before the hit rejected this event.
                    for (i, reason) in rejections {
                        self.last_reason[i] = Some(reason);
                    }
                    return self.record_match(idx, seq, event, done);
                }
                if rejections.is_empty() {
                    return Step::Skipped;
                }
                let reason = rejections
                    .iter()
                    .map(|(i, r)| format!("{}: {r}", self.def.nodes[*i].name()))
                    .collect::<Vec<_>>()
                    .join("; ");
                for (i, r) in rejections {
                    self.last_reason[i] = Some(r);
                }
                Step::NoMatch { reason }
            }
        }
    }

    fn record_match(&mut self, idx: usize, seq: u64, event: &Event, done: bool) -> Step {
        let node = self.def.nodes[idx].name().to_string();
        self.last_reason[idx] = None;
        self.matched.push(MatchedEvent {
            node: node.clone(),
            seq,
            event: event.clone(),
        });
        if done {
            self.state = TreeState::Satisfied;
            Step::FinalMatch { node }
        } else {
            Step::Matched { node }
        }
    }

    /// Mark the tree failed. No-op once terminal.
    pub fn fail(&mut self) {
        if self.state == TreeState::Pending {
            self.state = TreeState::Failed;
        }
    }

    /// Matched events, in match order.
    #[must_use]
    pub fn matched(&self) -> &[MatchedEvent] {
        &self.matched
    }

    /// Nodes not yet matched, in declaration order, with their last
    /// field-mismatch reason.
    #[must_use]
    pub fn unmatched(&self) -> Vec<UnmatchedNode> {
        let indices: Vec<usize> = match &self.progress {
            Progress::Ordered { cursor } => (*cursor..self.def.nodes.len()).collect(),
            Progress::Unordered { remaining } => remaining.clone(),
        };
        indices
            .into_iter()
            .map(|i| UnmatchedNode {
                node: self.def.nodes[i].name().to_string(),
                reason: self.last_reason[i].clone(),
            })
            .collect()
    }

    /// Snapshot the matched and unmatched sections.
    #[must_use]
    pub fn report(&self, outcome: Outcome, run: RunInfo) -> Report {
        Report {
            run_id: run.run_id,
            checker: self.def.name.clone(),
            mode: self.def.mode,
            outcome,
            started_at: run.started_at,
            finished_at: run.finished_at,
            events_seen: run.events_seen,
            events_filtered: run.events_filtered,
            matched: self.matched.clone(),
            unmatched: self.unmatched(),
        }
    }

    /// A fresh tree with the same definition.
    #[must_use]
    pub fn reset(&self) -> Self {
        Self::from_valid(self.def.clone())
    }
}
