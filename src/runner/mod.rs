//! Stream runner.
//!
//! [`StreamRunner::start`] moves an [`EventSource`] and a [`CheckerTree`]
//! onto a dedicated worker thread and returns a [`RunnerHandle`] at once.
//! The worker opens the subscription, signals readiness, and then consumes
//! events in stream order. For each event:
//!
//! filter → count against the event limit → check the deadline → dispatch
//! to the tree → stop if satisfied or out of budget.
//!
//! While waiting, the worker races the next event against the deadline and
//! against cancellation. The tree is owned by the worker; the handle sees
//! only the shared status and, once published, the report.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{after, bounded, never, select, Receiver, Sender};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::error::{CheckResult, RunnerError};
use crate::event::Event;
use crate::report::{LimitKind, Outcome, Report, RunInfo};
use crate::tree::{CheckerTree, Step, TreeState};

/// Runner limits and configuration.
pub mod config;
/// Event source abstraction and the in-process channel source.
pub mod source;
mod status;

pub use config::{RunLimits, RunnerConfig};
pub use source::{ChannelSource, EventSender, EventSource, SourceItem, Subscription};

use status::RunStatus;

/// Entry point for starting runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamRunner;

impl StreamRunner {
    /// Start consuming `source` against `tree` on a new worker thread.
    ///
    /// Fails only for an invalid configuration or if the thread cannot be
    /// spawned; everything else is reported through the handle.
    pub fn start<S: EventSource>(
        source: S,
        tree: CheckerTree,
        config: RunnerConfig,
    ) -> CheckResult<RunnerHandle> {
        config.validate()?;

        let run_id = Uuid::new_v4();
        let status = Arc::new(RunStatus::default());
        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        let checker = tree.name().to_string();

        let worker = Worker {
            run_id,
            tree,
            config: config.clone(),
            status: Arc::clone(&status),
            cancel_rx,
        };
        thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || worker.run(source))
            .map_err(|e| RunnerError::Spawn {
                message: e.to_string(),
            })?;

        debug!(%run_id, checker = %checker, "runner started");
        Ok(RunnerHandle {
            run_id,
            checker,
            status,
            cancel_tx,
        })
    }
}

/// Handle to a running checker.
///
/// Dropping the handle cancels the run if it is still in progress.
#[derive(Debug)]
pub struct RunnerHandle {
    run_id: Uuid,
    checker: String,
    status: Arc<RunStatus>,
    cancel_tx: Sender<()>,
}

impl RunnerHandle {
    /// Unique id of this run.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Name of the tree being checked.
    #[must_use]
    pub fn checker(&self) -> &str {
        &self.checker
    }

    /// Block until the subscription is live, the run ends early, or
    /// `timeout` elapses.
    ///
    /// Start the workload only after this returns `Ok`.
    pub fn await_ready(&self, timeout: Duration) -> Result<(), RunnerError> {
        self.status.wait_ready(timeout)
    }

    /// Block until the run reaches a terminal outcome or `timeout` elapses.
    pub fn await_done(&self, timeout: Duration) -> Result<Outcome, RunnerError> {
        self.status.wait_done(timeout)
    }

    /// The final report; `NotReady` until the worker has published it.
    pub fn report(&self) -> Result<Report, RunnerError> {
        self.status.report()
    }

    /// Like [`RunnerHandle::report`], waiting up to `timeout` for the worker
    /// to publish. Useful right after a cancel.
    pub fn await_report(&self, timeout: Duration) -> Result<Report, RunnerError> {
        self.status.wait_report(timeout)
    }

    /// Stop the run. Idempotent; pending waiters observe `Cancelled`
    /// unless the run had already finished.
    pub fn cancel(&self) {
        if self.status.settle(Outcome::Cancelled) == Outcome::Cancelled {
            // Full channel means a cancel is already queued.
            let _ = self.cancel_tx.try_send(());
        }
    }

    /// True once a terminal outcome has been recorded.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status.is_finished()
    }
}

impl Drop for RunnerHandle {
    fn drop(&mut self) {
        if !self.status.is_finished() {
            self.cancel();
        }
    }
}

struct Worker {
    run_id: Uuid,
    tree: CheckerTree,
    config: RunnerConfig,
    status: Arc<RunStatus>,
    cancel_rx: Receiver<()>,
}

#[derive(Debug, Default)]
struct Counters {
    seen: u64,
    filtered: u64,
}

impl Worker {
    fn run<S: EventSource>(mut self, mut source: S) {
        let started_at = Utc::now();
        let mut counters = Counters::default();
        let endpoint = source.describe();

        let outcome = match source.subscribe() {
            Err(e) => {
                warn!(checker = %self.tree.name(), %endpoint, error = %e, "subscription failed");
                Outcome::StreamFault {
                    message: e.to_string(),
                }
            }
            Ok(subscription) => {
                if self.status.mark_ready() {
                    info!(checker = %self.tree.name(), %endpoint, "event stream ready");
                    let outcome = self.consume(&subscription, &mut counters);
                    drop(subscription);
                    outcome
                } else {
                    Outcome::Cancelled
                }
            }
        };

        if matches!(outcome, Outcome::Failed { .. } | Outcome::StreamFault { .. }) {
            self.tree.fail();
        }
        let outcome = self.status.settle(outcome);
        self.log_outcome(&outcome, &counters);

        let report = self.tree.report(
            outcome,
            RunInfo {
                run_id: self.run_id,
                started_at,
                finished_at: Utc::now(),
                events_seen: counters.seen,
                events_filtered: counters.filtered,
            },
        );
        self.status.publish(report);
    }

    fn consume(&mut self, subscription: &Subscription, counters: &mut Counters) -> Outcome {
        let limits = self.config.limits;
        let deadline = limits.timeout.map(|t| Instant::now() + t);
        let events = subscription.receiver();

        loop {
            let timer = match deadline {
                Some(d) => after(d.saturating_duration_since(Instant::now())),
                None => never(),
            };

            let event = select! {
                recv(self.cancel_rx) -> _ => return Outcome::Cancelled,
                recv(timer) -> _ => return Outcome::Failed { limit: LimitKind::Time },
                recv(events) -> msg => match msg {
                    Ok(Ok(event)) => event,
                    Ok(Err(e)) => return Outcome::StreamFault { message: e.to_string() },
                    Err(_) => {
                        return Outcome::StreamFault {
                            message: "event source disconnected".to_string(),
                        }
                    }
                },
            };

            if !self.config.filter.accepts(&event) {
                counters.filtered += 1;
                trace!(kind = %event.kind(), namespace = ?event.namespace(), "filtered");
                continue;
            }

            counters.seen += 1;
            let seq = counters.seen;

            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Outcome::Failed {
                    limit: LimitKind::Time,
                };
            }

            let step = self.tree.dispatch(seq, &event);
            log_step(&event, seq, &step);

            if self.tree.state() == TreeState::Satisfied {
                info!(checker = %self.tree.name(), "DONE!");
                return Outcome::Satisfied;
            }
            if limits.max_events.is_some_and(|max| seq >= max) {
                return Outcome::Failed {
                    limit: LimitKind::Events,
                };
            }
        }
    }

    fn log_outcome(&self, outcome: &Outcome, counters: &Counters) {
        let checker = self.tree.name();
        match outcome {
            Outcome::Satisfied => {
                debug!(checker, seen = counters.seen, filtered = counters.filtered, "checker satisfied");
            }
            Outcome::Cancelled => info!(checker, seen = counters.seen, "checker cancelled"),
            Outcome::Failed { .. } | Outcome::StreamFault { .. } => {
                let pending: Vec<String> = self
                    .tree
                    .unmatched()
                    .into_iter()
                    .map(|u| match u.reason {
                        Some(r) => format!("{} ({r})", u.node),
                        None => u.node,
                    })
                    .collect();
                warn!(
                    checker,
                    %outcome,
                    seen = counters.seen,
                    filtered = counters.filtered,
                    unmatched = %pending.join(", "),
                    "checker failed"
                );
            }
        }
    }
}

fn log_step(event: &Event, seq: u64, step: &Step) {
    let kind = event.kind();
    match step {
        Step::Matched { node } => info!(%node, "{kind}:{seq} => MATCH, continuing"),
        Step::FinalMatch { node } => info!(%node, "{kind}:{seq} => FINAL MATCH"),
        Step::NoMatch { reason } => info!("{kind}:{seq} => no match: {reason}, continuing"),
        Step::Skipped => trace!("{kind}:{seq} => no pending node for this kind, continuing"),
        Step::Ignored => trace!("{kind}:{seq} => checker already done"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::{ExecChecker, ProcessChecker};
    use crate::event::Process;
    use crate::filter::EventFilter;
    use crate::matcher::StringMatcher;

    const WAIT: Duration = Duration::from_secs(5);

    fn tree() -> CheckerTree {
        CheckerTree::ordered("unit")
            .node(
                "true",
                ExecChecker::new().process(ProcessChecker::new().binary(StringMatcher::exact("/bin/true"))),
            )
            .build()
            .unwrap()
    }

    fn exec(binary: &str) -> Event {
        Event::exec(Process::new(1, binary, ""))
    }

    #[test]
    fn invalid_config_fails_start() {
        let (_tx, source) = ChannelSource::new(1);
        let cfg = RunnerConfig::new(RunLimits::unbounded().with_max_events(0), EventFilter::new());
        let err = StreamRunner::start(source, tree(), cfg).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn satisfied_run_publishes_report() {
        let (tx, source) = ChannelSource::new(8);
        let handle = StreamRunner::start(source, tree(), RunnerConfig::default()).unwrap();
        handle.await_ready(WAIT).unwrap();
        tx.send(exec("/bin/false")).unwrap();
        tx.send(exec("/bin/true")).unwrap();

        assert_eq!(handle.await_done(WAIT).unwrap(), Outcome::Satisfied);
        let report = handle.await_report(WAIT).unwrap();
        assert_eq!(report.events_seen, 2);
        assert_eq!(report.matched.len(), 1);
        assert_eq!(report.matched[0].seq, 2);
        assert!(report.unmatched.is_empty());
        assert_eq!(report.run_id, handle.run_id());
    }

    #[test]
    fn disconnect_while_pending_is_a_stream_fault() {
        let (tx, source) = ChannelSource::new(8);
        let handle = StreamRunner::start(source, tree(), RunnerConfig::default()).unwrap();
        handle.await_ready(WAIT).unwrap();
        tx.send(exec("/bin/false")).unwrap();
        drop(tx);

        let outcome = handle.await_done(WAIT).unwrap();
        assert!(matches!(outcome, Outcome::StreamFault { .. }), "{outcome:?}");
        let report = handle.await_report(WAIT).unwrap();
        assert_eq!(report.unmatched.len(), 1);
        assert!(report.unmatched[0].reason.is_some());
    }

    #[test]
    fn cancel_unblocks_waiters() {
        let (_tx, source) = ChannelSource::new(8);
        let cfg = RunnerConfig::new(RunLimits::unbounded(), EventFilter::new());
        let handle = StreamRunner::start(source, tree(), cfg).unwrap();
        handle.await_ready(WAIT).unwrap();
        handle.cancel();
        handle.cancel();
        assert_eq!(handle.await_done(WAIT).unwrap(), Outcome::Cancelled);
        let report = handle.await_report(WAIT).unwrap();
        assert_eq!(report.outcome, Outcome::Cancelled);
    }
}
