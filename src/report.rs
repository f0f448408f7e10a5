//! Run reports.
//!
//! A [`Report`] is assembled once by the runner when the run reaches a
//! terminal state and is never mutated afterwards. [`Report::persist`] writes
//! the two per-run documents:
//!
//! - `<checker>.events.json`: matched events with the node each satisfied
//! - `<checker>.unmatched.json`: unsatisfied nodes with their last reason

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ReportError;
use crate::event::Event;
use crate::tree::MatchMode;

/// Which run limit ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    /// The event-count ceiling was reached.
    Events,
    /// The wall-clock deadline expired.
    Time,
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Events => f.write_str("event limit"),
            Self::Time => f.write_str("time limit"),
        }
    }
}

/// Terminal outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outcome {
    /// Every node matched.
    Satisfied,
    /// A limit was exhausted while nodes were still pending.
    Failed {
        /// The limit that ran out.
        limit: LimitKind,
    },
    /// The event stream broke before the tree was satisfied.
    StreamFault {
        /// Source-supplied description.
        message: String,
    },
    /// The run was stopped from outside.
    Cancelled,
}

impl Outcome {
    /// True only for [`Outcome::Satisfied`].
    #[must_use]
    pub const fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Satisfied => f.write_str("satisfied"),
            Self::Failed { limit } => write!(f, "failed: {limit} reached"),
            Self::StreamFault { message } => write!(f, "stream fault: {message}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// A matched event and the node it satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedEvent {
    /// Node name.
    pub node: String,
    /// Runner sequence number of the event (1-based, filtered events excluded).
    pub seq: u64,
    /// The event itself.
    pub event: Event,
}

/// A node that was never satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmatchedNode {
    /// Node name.
    pub node: String,
    /// Last field-mismatch reason seen for this node, if any.
    pub reason: Option<String>,
}

/// Bookkeeping for one run, combined with a tree snapshot into a [`Report`].
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunInfo {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub events_seen: u64,
    pub events_filtered: u64,
}

/// The result of one checker run.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub run_id: Uuid,
    pub checker: String,
    pub mode: MatchMode,
    pub outcome: Outcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Events that passed the filter and were counted.
    pub events_seen: u64,
    /// Events discarded by the filter.
    pub events_filtered: u64,
    pub matched: Vec<MatchedEvent>,
    pub unmatched: Vec<UnmatchedNode>,
}

impl Report {
    /// Path of the matched-events document inside `dir`.
    #[must_use]
    pub fn events_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.events.json", file_stem(&self.checker)))
    }

    /// Path of the unmatched-nodes document inside `dir`.
    #[must_use]
    pub fn unmatched_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.unmatched.json", file_stem(&self.checker)))
    }

    /// Write both documents into `dir`, creating it if needed.
    ///
    /// Files are named after the checker, so a later run of the same checker
    /// into the same directory overwrites the earlier documents. Returns the
    /// `(events, unmatched)` paths.
    pub fn persist(&self, dir: &Path) -> Result<(PathBuf, PathBuf), ReportError> {
        fs::create_dir_all(dir).map_err(|source| ReportError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let events = self.events_path(dir);
        write_json(&events, &self.matched)?;
        let unmatched = self.unmatched_path(dir);
        write_json(&unmatched, &self.unmatched)?;
        tracing::debug!(
            checker = %self.checker,
            events = %events.display(),
            unmatched = %unmatched.display(),
            "report persisted"
        );
        Ok((events, unmatched))
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} [{:?}]: {} ({} events seen, {} filtered)",
            self.checker, self.mode, self.outcome, self.events_seen, self.events_filtered
        )?;
        for m in &self.matched {
            writeln!(f, "  MATCH   {} <= {}:{}", m.node, m.event.kind(), m.seq)?;
        }
        for u in &self.unmatched {
            match &u.reason {
                Some(reason) => writeln!(f, "  PENDING {}: {reason}", u.node)?,
                None => writeln!(f, "  PENDING {}", u.node)?,
            }
        }
        Ok(())
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), ReportError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| ReportError::Serialize {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    fs::write(path, bytes).map_err(|source| ReportError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Characters allowed in a checker name, and so in report file names.
pub(crate) const fn is_file_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

/// Validated trees only carry safe names; hand-built reports are mapped.
fn file_stem(checker: &str) -> String {
    checker.chars().map(|c| if is_file_safe(c) { c } else { '_' }).collect()
}
