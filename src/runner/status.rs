//! Shared run status between the worker and its handle.
//!
//! The worker owns the tree; the handle only ever sees this status cell.
//! The first terminal outcome recorded wins, whether it comes from the worker
//! or from an external cancel.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::RunnerError;
use crate::report::{Outcome, Report};

#[derive(Debug, Default)]
struct Progress {
    ready: bool,
    outcome: Option<Outcome>,
    report: Option<Report>,
}

#[derive(Debug, Default)]
pub(crate) struct RunStatus {
    state: Mutex<Progress>,
    changed: Condvar,
}

impl RunStatus {
    fn lock(&self) -> MutexGuard<'_, Progress> {
        // A poisoned lock only means a panicking waiter; the data is plain.
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Record readiness. Returns false if the run already ended (cancelled).
    pub(crate) fn mark_ready(&self) -> bool {
        let mut p = self.lock();
        if p.outcome.is_some() {
            return false;
        }
        p.ready = true;
        self.changed.notify_all();
        true
    }

    /// Record `outcome` unless one is already set; returns the effective one.
    pub(crate) fn settle(&self, outcome: Outcome) -> Outcome {
        let mut p = self.lock();
        let effective = p.outcome.get_or_insert(outcome).clone();
        self.changed.notify_all();
        effective
    }

    /// Publish the final report.
    pub(crate) fn publish(&self, report: Report) {
        let mut p = self.lock();
        p.report = Some(report);
        self.changed.notify_all();
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.lock().outcome.is_some()
    }

    pub(crate) fn wait_ready(&self, timeout: Duration) -> Result<(), RunnerError> {
        let guard = self.lock();
        let (p, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |p| !p.ready && p.outcome.is_none())
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if p.ready {
            return Ok(());
        }
        match &p.outcome {
            Some(Outcome::Cancelled) => Err(RunnerError::Cancelled),
            Some(Outcome::StreamFault { message }) => Err(RunnerError::StreamFault {
                message: message.clone(),
            }),
            // Limits only run after readiness.
            Some(Outcome::Satisfied | Outcome::Failed { .. }) => Ok(()),
            None => Err(RunnerError::timeout(timeout)),
        }
    }

    pub(crate) fn wait_done(&self, timeout: Duration) -> Result<Outcome, RunnerError> {
        let guard = self.lock();
        let (p, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |p| p.outcome.is_none())
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        p.outcome.clone().ok_or_else(|| RunnerError::timeout(timeout))
    }

    pub(crate) fn wait_report(&self, timeout: Duration) -> Result<Report, RunnerError> {
        let guard = self.lock();
        let (p, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |p| p.report.is_none())
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        p.report.clone().ok_or(RunnerError::NotReady)
    }

    pub(crate) fn report(&self) -> Result<Report, RunnerError> {
        self.lock().report.clone().ok_or(RunnerError::NotReady)
    }
}
