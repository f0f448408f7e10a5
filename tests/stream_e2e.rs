use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;

use eventcheck::{
    ChannelSource, CheckerTree, Event, EventFilter, EventSource, ExecChecker, ExitChecker, LimitKind,
    Outcome, Process, ProcessChecker, RunLimits, RunnerConfig, RunnerError, SourceError,
    StreamRunner, StringMatcher, Subscription,
};

const WAIT: Duration = Duration::from_secs(10);

fn exec_suffix(suffix: &str) -> ExecChecker {
    ExecChecker::new().process(ProcessChecker::new().binary(StringMatcher::suffix(suffix)))
}

fn exec_exact(binary: &str) -> ExecChecker {
    ExecChecker::new().process(ProcessChecker::new().binary(StringMatcher::exact(binary)))
}

fn exec(binary: &str) -> Event {
    Event::exec(Process::new(100, binary, ""))
}

fn curl_false_tree() -> CheckerTree {
    CheckerTree::unordered("curl-false")
        .node("NodeA", exec_suffix("curl"))
        .node("NodeB", exec_exact("/bin/false"))
        .build()
        .unwrap()
}

fn config(max_events: u64, timeout: Duration) -> RunnerConfig {
    RunnerConfig::new(
        RunLimits::unbounded().with_max_events(max_events).with_timeout(timeout),
        EventFilter::new(),
    )
}

#[test]
fn unordered_tree_satisfied_within_limits() {
    eventcheck::logging::init();
    let (tx, source) = ChannelSource::new(64);
    let handle = StreamRunner::start(source, curl_false_tree(), config(10, Duration::from_secs(5))).unwrap();
    handle.await_ready(WAIT).unwrap();

    tx.send(exec("/usr/bin/ls")).unwrap();
    tx.send(exec("/bin/false")).unwrap();
    tx.send(exec("/usr/bin/env")).unwrap();
    tx.send(exec("/usr/bin/curl")).unwrap();

    assert_eq!(handle.await_done(WAIT).unwrap(), Outcome::Satisfied);
    let report = handle.await_report(WAIT).unwrap();
    let matched: Vec<(&str, u64)> = report.matched.iter().map(|m| (m.node.as_str(), m.seq)).collect();
    assert_eq!(matched, vec![("NodeB", 2), ("NodeA", 4)]);
    assert!(report.unmatched.is_empty());
    assert_eq!(report.events_seen, 4);
}

#[test]
fn unordered_tree_matches_curl_then_false_and_skips_bash() {
    let (tx, source) = ChannelSource::new(64);
    let handle = StreamRunner::start(source, curl_false_tree(), config(10, Duration::from_secs(5))).unwrap();
    handle.await_ready(WAIT).unwrap();

    tx.send(exec("/usr/bin/curl")).unwrap();
    tx.send(exec("/bin/bash")).unwrap();
    tx.send(exec("/bin/false")).unwrap();

    assert_eq!(handle.await_done(WAIT).unwrap(), Outcome::Satisfied);
    let report = handle.await_report(WAIT).unwrap();
    let matched: Vec<(&str, u64, &str)> = report
        .matched
        .iter()
        .map(|m| (m.node.as_str(), m.seq, m.event.process().binary.as_str()))
        .collect();
    assert_eq!(
        matched,
        vec![("NodeA", 1, "/usr/bin/curl"), ("NodeB", 3, "/bin/false")]
    );
    assert!(report.unmatched.is_empty());
    assert_eq!(report.events_seen, 3);
}

#[test]
fn stalled_stream_fails_on_time_limit() {
    let (tx, source) = ChannelSource::new(64);
    let handle = StreamRunner::start(source, curl_false_tree(), config(10, Duration::from_millis(500))).unwrap();
    handle.await_ready(WAIT).unwrap();
    let started = Instant::now();

    tx.send(exec("/usr/bin/curl")).unwrap();

    assert_eq!(
        handle.await_done(WAIT).unwrap(),
        Outcome::Failed {
            limit: LimitKind::Time
        }
    );
    assert!(started.elapsed() >= Duration::from_millis(400));

    let report = handle.await_report(WAIT).unwrap();
    assert_eq!(report.matched.len(), 1);
    assert_eq!(report.matched[0].node, "NodeA");
    assert_eq!(report.matched[0].event.process().binary, "/usr/bin/curl");
    assert_eq!(report.unmatched.len(), 1);
    assert_eq!(report.unmatched[0].node, "NodeB");
    drop(tx);
}

#[test]
fn unordered_outcome_is_independent_of_arrival_order() {
    let orders: [[&str; 3]; 6] = [
        ["/bin/a", "/bin/b", "/bin/c"],
        ["/bin/a", "/bin/c", "/bin/b"],
        ["/bin/b", "/bin/a", "/bin/c"],
        ["/bin/b", "/bin/c", "/bin/a"],
        ["/bin/c", "/bin/a", "/bin/b"],
        ["/bin/c", "/bin/b", "/bin/a"],
    ];
    for order in orders {
        let tree = CheckerTree::unordered("perm")
            .node("a", exec_exact("/bin/a"))
            .node("b", exec_exact("/bin/b"))
            .node("c", exec_exact("/bin/c"))
            .build()
            .unwrap();
        let (tx, source) = ChannelSource::new(8);
        let handle = StreamRunner::start(source, tree, config(3, Duration::from_secs(5))).unwrap();
        handle.await_ready(WAIT).unwrap();
        for binary in order {
            tx.send(exec(binary)).unwrap();
        }
        assert_eq!(handle.await_done(WAIT).unwrap(), Outcome::Satisfied, "order {order:?}");
    }
}

#[test]
fn unordered_event_matching_two_nodes_goes_to_first_declared() {
    let tree = CheckerTree::unordered("tie")
        .node("broad", exec_suffix("sh"))
        .node("narrow", exec_exact("/bin/bash"))
        .build()
        .unwrap();
    let (tx, source) = ChannelSource::new(8);
    let handle = StreamRunner::start(source, tree, config(1, Duration::from_secs(5))).unwrap();
    handle.await_ready(WAIT).unwrap();
    tx.send(exec("/bin/bash")).unwrap();

    assert_eq!(
        handle.await_done(WAIT).unwrap(),
        Outcome::Failed {
            limit: LimitKind::Events
        }
    );
    let report = handle.await_report(WAIT).unwrap();
    assert_eq!(report.matched[0].node, "broad");
    assert_eq!(report.unmatched[0].node, "narrow");
}

#[test]
fn ordered_tree_rejects_reordered_stream() {
    let tree = CheckerTree::ordered("ordered")
        .node("exec", exec_exact("/bin/sleep"))
        .node("exit", ExitChecker::new().process(ProcessChecker::new().binary(StringMatcher::exact("/bin/sleep"))))
        .build()
        .unwrap();
    let (tx, source) = ChannelSource::new(8);
    let handle = StreamRunner::start(source, tree, config(2, Duration::from_secs(5))).unwrap();
    handle.await_ready(WAIT).unwrap();

    tx.send(Event::exit(Process::new(9, "/bin/sleep", "1"), "", 0)).unwrap();
    tx.send(exec("/bin/sleep")).unwrap();

    assert_eq!(
        handle.await_done(WAIT).unwrap(),
        Outcome::Failed {
            limit: LimitKind::Events
        }
    );
    let report = handle.await_report(WAIT).unwrap();
    assert_eq!(report.matched.len(), 1);
    assert_eq!(report.matched[0].node, "exec");
    assert_eq!(report.matched[0].seq, 2);
    assert_eq!(report.unmatched[0].node, "exit");
}

#[test]
fn event_limit_stops_after_exactly_k_events() {
    let tree = CheckerTree::ordered("limit")
        .node("never", exec_exact("/bin/never"))
        .build()
        .unwrap();
    let (tx, source) = ChannelSource::new(16);
    let handle = StreamRunner::start(source, tree, config(3, Duration::from_secs(5))).unwrap();
    handle.await_ready(WAIT).unwrap();
    // The runner may hang up before the last sends.
    for _ in 0..5 {
        let _ = tx.send(exec("/bin/other"));
    }

    assert_eq!(
        handle.await_done(WAIT).unwrap(),
        Outcome::Failed {
            limit: LimitKind::Events
        }
    );
    let report = handle.await_report(WAIT).unwrap();
    assert_eq!(report.events_seen, 3);
    let reason = report.unmatched[0].reason.as_deref().unwrap();
    assert!(reason.contains("binary mismatch"), "{reason}");
}

#[test]
fn denied_namespace_is_neither_matched_nor_counted() {
    let tree = CheckerTree::ordered("deny")
        .node("curl", exec_suffix("curl"))
        .build()
        .unwrap();
    let cfg = RunnerConfig::new(
        RunLimits::unbounded().with_max_events(1).with_timeout(Duration::from_secs(5)),
        EventFilter::new().deny_namespace("kube-system"),
    );
    let (tx, source) = ChannelSource::new(8);
    let handle = StreamRunner::start(source, tree, cfg).unwrap();
    handle.await_ready(WAIT).unwrap();

    tx.send(Event::exec(Process::new(1, "/usr/bin/curl", "").in_pod("kube-system", "coredns")))
        .unwrap();
    tx.send(Event::exec(Process::new(2, "/usr/bin/curl", "").in_pod("default", "client")))
        .unwrap();

    assert_eq!(handle.await_done(WAIT).unwrap(), Outcome::Satisfied);
    let report = handle.await_report(WAIT).unwrap();
    assert_eq!(report.events_seen, 1);
    assert_eq!(report.events_filtered, 1);
    assert_eq!(report.matched[0].event.namespace(), Some("default"));
}

#[test]
fn events_queued_before_ready_are_counted_once() {
    let (tx, source) = ChannelSource::new(8);
    tx.send(exec("/bin/false")).unwrap();
    tx.send(exec("/usr/bin/curl")).unwrap();

    let handle = StreamRunner::start(source, curl_false_tree(), config(10, Duration::from_secs(5))).unwrap();
    handle.await_ready(WAIT).unwrap();

    assert_eq!(handle.await_done(WAIT).unwrap(), Outcome::Satisfied);
    let report = handle.await_report(WAIT).unwrap();
    assert_eq!(report.events_seen, 2);
    assert_eq!(report.matched.len(), 2);
}

#[test]
fn stream_fault_is_reported_as_fault() {
    let (tx, source) = ChannelSource::new(8);
    let handle = StreamRunner::start(source, curl_false_tree(), config(10, Duration::from_secs(5))).unwrap();
    handle.await_ready(WAIT).unwrap();
    tx.fault(SourceError::Decode {
        message: "truncated record".to_string(),
    })
    .unwrap();

    let outcome = handle.await_done(WAIT).unwrap();
    match outcome {
        Outcome::StreamFault { message } => assert!(message.contains("truncated record")),
        other => panic!("expected stream fault, got {other:?}"),
    }
}

/// A source whose handshake blocks until released.
struct SlowSource {
    release: crossbeam_channel::Receiver<()>,
    subscribed: Arc<AtomicBool>,
}

impl EventSource for SlowSource {
    fn describe(&self) -> String {
        "slow".to_string()
    }

    fn subscribe(&mut self) -> Result<Subscription, SourceError> {
        let _ = self.release.recv();
        self.subscribed.store(true, Ordering::SeqCst);
        let (_tx, rx) = bounded(1);
        Ok(Subscription::new(rx))
    }
}

#[test]
fn cancel_before_ready_resolves_as_cancelled() {
    let (release_tx, release) = bounded(1);
    let subscribed = Arc::new(AtomicBool::new(false));
    let source = SlowSource {
        release,
        subscribed: Arc::clone(&subscribed),
    };
    let handle = StreamRunner::start(source, curl_false_tree(), config(10, Duration::from_secs(5))).unwrap();

    let err = handle.await_ready(Duration::from_millis(50)).unwrap_err();
    assert!(matches!(err, RunnerError::Timeout { .. }));

    handle.cancel();
    assert_eq!(handle.await_ready(WAIT).unwrap_err(), RunnerError::Cancelled);
    assert_eq!(handle.await_done(WAIT).unwrap(), Outcome::Cancelled);

    release_tx.send(()).unwrap();
    let report = handle.await_report(WAIT).unwrap();
    assert!(subscribed.load(Ordering::SeqCst));
    assert_eq!(report.outcome, Outcome::Cancelled);
    assert_eq!(report.events_seen, 0);
}

#[test]
fn dropping_handle_cancels_the_run() {
    let (tx, source) = ChannelSource::new(8);
    let handle = StreamRunner::start(source, curl_false_tree(), RunnerConfig::new(RunLimits::unbounded(), EventFilter::new()))
        .unwrap();
    handle.await_ready(WAIT).unwrap();
    drop(handle);

    // The worker drops its subscription once it sees the cancel.
    let deadline = Instant::now() + WAIT;
    while tx.send(exec("/bin/true")).is_ok() {
        assert!(Instant::now() < deadline, "worker kept consuming after handle drop");
        thread::sleep(Duration::from_millis(10));
    }
}
