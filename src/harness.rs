//! Run a workload under a checker.
//!
//! [`Harness::run`] performs the usual sequence for one test: start the
//! runner, wait until the stream is live, run the workload on the calling
//! thread while the runner consumes events, wait for a terminal outcome, and
//! persist the report.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{CheckError, CheckResult, RunnerError};
use crate::report::{Outcome, Report};
use crate::runner::{EventSource, RunnerConfig, StreamRunner};
use crate::tree::CheckerTree;

/// Grace added to the run deadline when waiting for completion.
const DONE_GRACE: Duration = Duration::from_secs(5);

/// Completion wait when the run itself has no deadline.
const UNBOUNDED_DONE_TIMEOUT: Duration = Duration::from_secs(300);

/// How long to wait for the worker to publish after a forced cancel.
const REPORT_WAIT: Duration = Duration::from_secs(5);

/// Result of a harnessed run.
#[derive(Debug)]
pub struct CheckRun<T> {
    /// Terminal outcome.
    pub outcome: Outcome,
    /// The full report.
    pub report: Report,
    /// Whatever the workload returned.
    pub workload: T,
    /// `(events, unmatched)` report files, when a report directory is set.
    pub files: Option<(PathBuf, PathBuf)>,
}

impl<T> CheckRun<T> {
    /// True if every expectation was met.
    #[must_use]
    pub const fn is_satisfied(&self) -> bool {
        self.outcome.is_satisfied()
    }
}

/// Orchestrates one checker run around a workload.
#[derive(Debug, Clone)]
pub struct Harness {
    config: RunnerConfig,
    ready_timeout: Duration,
    done_timeout: Duration,
    report_dir: Option<PathBuf>,
}

impl Harness {
    /// Harness with readiness timeout of 30s and a completion timeout
    /// derived from the run deadline.
    #[must_use]
    pub fn new(config: RunnerConfig) -> Self {
        let done_timeout = config
            .limits
            .timeout
            .map_or(UNBOUNDED_DONE_TIMEOUT, |t| t + DONE_GRACE);
        Self {
            config,
            ready_timeout: Duration::from_secs(30),
            done_timeout,
            report_dir: None,
        }
    }

    /// Override the readiness wait.
    #[must_use]
    pub const fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Override the completion wait.
    #[must_use]
    pub const fn done_timeout(mut self, timeout: Duration) -> Self {
        self.done_timeout = timeout;
        self
    }

    /// Persist reports into `dir`.
    #[must_use]
    pub fn report_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.report_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Run `workload` while `tree` is checked against `source`.
    ///
    /// The workload is not started if the stream never becomes ready. A
    /// completion timeout cancels the run, persists what was gathered, and
    /// returns `RunnerError::Timeout`.
    pub fn run<S, W, T>(&self, source: S, tree: CheckerTree, workload: W) -> CheckResult<CheckRun<T>>
    where
        S: EventSource,
        W: FnOnce() -> T,
    {
        let handle = StreamRunner::start(source, tree, self.config.clone())?;

        if let Err(e) = handle.await_ready(self.ready_timeout) {
            warn!(checker = %handle.checker(), error = %e, "stream never became ready");
            handle.cancel();
            if let Ok(report) = handle.await_report(REPORT_WAIT) {
                self.persist(&report)?;
            }
            return Err(e.into());
        }

        let workload = workload();

        let outcome = match handle.await_done(self.done_timeout) {
            Ok(outcome) => outcome,
            Err(e @ RunnerError::Timeout { .. }) => {
                warn!(checker = %handle.checker(), error = %e, "checker did not finish; cancelling");
                handle.cancel();
                if let Ok(report) = handle.await_report(REPORT_WAIT) {
                    self.persist(&report)?;
                }
                return Err(CheckError::Runner(e));
            }
            Err(e) => return Err(e.into()),
        };

        let report = handle.await_report(REPORT_WAIT)?;
        let files = self.persist(&report)?;
        info!(checker = %report.checker, %outcome, "checker finished");
        Ok(CheckRun {
            outcome,
            report,
            workload,
            files,
        })
    }

    fn persist(&self, report: &Report) -> CheckResult<Option<(PathBuf, PathBuf)>> {
        match &self.report_dir {
            Some(dir) => Ok(Some(report.persist(dir)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::{ExecChecker, ProcessChecker};
    use crate::event::{Event, Process};
    use crate::filter::EventFilter;
    use crate::matcher::StringMatcher;
    use crate::runner::{ChannelSource, RunLimits};

    fn tree() -> CheckerTree {
        CheckerTree::ordered("harness")
            .node(
                "ls",
                ExecChecker::new().process(ProcessChecker::new().binary(StringMatcher::suffix("/ls"))),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn workload_runs_after_ready_and_report_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, source) = ChannelSource::new(8);
        let harness = Harness::new(RunnerConfig::new(
            RunLimits::unbounded().with_timeout(Duration::from_secs(5)),
            EventFilter::new(),
        ))
        .report_dir(dir.path());

        let run = harness
            .run(source, tree(), move || {
                tx.send(Event::exec(Process::new(5, "/bin/ls", "-l"))).unwrap();
                "workload done"
            })
            .unwrap();

        assert!(run.is_satisfied());
        assert_eq!(run.workload, "workload done");
        let (events, unmatched) = run.files.unwrap();
        assert!(events.exists());
        assert!(unmatched.exists());
    }

    #[test]
    fn done_timeout_cancels_and_keeps_report() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, source) = ChannelSource::new(8);
        let harness = Harness::new(RunnerConfig::new(RunLimits::unbounded(), EventFilter::new()))
            .done_timeout(Duration::from_millis(100))
            .report_dir(dir.path());

        let err = harness.run(source, tree(), || ()).unwrap_err();
        assert!(matches!(err, CheckError::Runner(RunnerError::Timeout { .. })));
        assert!(dir.path().join("harness.unmatched.json").exists());
        drop(tx);
    }
}
