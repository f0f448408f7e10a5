//! # eventcheck - Runtime Event Stream Checker
//!
//! eventcheck verifies that a monitored system emitted the runtime events a
//! test expects. A test declares a tree of expectations, starts a runner
//! against the live event stream, waits until the stream is ready, runs its
//! workload, and waits for the runner to report whether every expectation was
//! met within the event and time budgets.
//!
//! ## Core Concepts
//!
//! - **Matcher**: tests one field value against a pattern (exact, prefix,
//!   suffix, contains, regex) or a list of values
//! - **Checker**: composes matchers over one event shape (exec, exit, kprobe)
//! - **Node**: a named expectation wrapping one checker
//! - **Tree**: ordered or unordered collection of nodes with match state
//! - **Runner**: consumes the stream on its own thread, enforcing limits,
//!   filters, readiness and cancellation, and produces a [`Report`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use eventcheck::{
//!     ChannelSource, CheckerTree, ExecChecker, ProcessChecker, RunnerConfig,
//!     StreamRunner, StringMatcher,
//! };
//!
//! let tree = CheckerTree::unordered("curl-test")
//!     .node("curl", ExecChecker::new().process(
//!         ProcessChecker::new().binary(StringMatcher::suffix("/curl")),
//!     ))
//!     .build()?;
//!
//! let (sender, source) = ChannelSource::new(1024);
//! let handle = StreamRunner::start(source, tree, RunnerConfig::default())?;
//! handle.await_ready(Duration::from_secs(30))?;
//! // ... run the workload, forward events through `sender` ...
//! let outcome = handle.await_done(Duration::from_secs(65))?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Event model and matching
pub mod checker;
pub mod error;
pub mod event;
pub mod matcher;
pub mod node;
pub mod tree;

// Stream consumption
pub mod filter;
pub mod harness;
pub mod logging;
pub mod report;
pub mod runner;

#[cfg(feature = "transport-grpc")]
pub mod transport;

// Re-export primary types at crate root for convenience
pub use checker::{
    ContainerChecker, EventChecker, ExecChecker, ExitChecker, KprobeArgChecker, KprobeChecker,
    Mismatch, PodChecker, ProcessChecker,
};
pub use error::{CheckError, CheckResult, ReportError, RunnerError, SourceError, ValidationError};
pub use event::{
    Container, Event, EventKind, EventPayload, Image, KprobeAction, KprobeArg, Pod, Process,
};
pub use filter::EventFilter;
pub use harness::{CheckRun, Harness};
pub use matcher::{ElementCheck, ListMatcher, ListMode, MatchOperator, StringMatcher};
pub use node::{CheckerNode, MatchResult};
pub use report::{LimitKind, MatchedEvent, Outcome, Report, RunInfo, UnmatchedNode};
pub use runner::{
    ChannelSource, EventSender, EventSource, RunLimits, RunnerConfig, RunnerHandle, SourceItem,
    StreamRunner, Subscription,
};
pub use tree::{CheckerTree, MatchMode, Step, TreeBuilder, TreeDefinition, TreeState};

#[cfg(feature = "transport-grpc")]
pub use transport::{EventFeed, EventStreamService, GrpcEventSource};
