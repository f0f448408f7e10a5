use std::fs;
use std::time::Duration;

use eventcheck::{
    ChannelSource, CheckError, Event, Harness, KprobeArg, LimitKind, MatchedEvent, Outcome, Process,
    RunnerConfig, RunnerError, TreeDefinition, UnmatchedNode,
};

const TREE: &str = r#"{
    "name": "open-passwd",
    "mode": "ordered",
    "nodes": [
        {
            "name": "cat",
            "checker": {
                "type": "exec",
                "process": {"binary": {"operator": "suffix", "value": "/cat"}}
            }
        },
        {
            "name": "open",
            "checker": {
                "type": "kprobe",
                "function_name": {"value": "security_file_permission"},
                "args": {
                    "mode": "subset",
                    "values": [{"type": "file", "path": {"operator": "suffix", "value": "passwd"}}]
                }
            }
        },
        {
            "name": "exit",
            "checker": {"type": "exit", "status": 0}
        }
    ]
}"#;

fn load_config(dir: &std::path::Path, json: &str) -> RunnerConfig {
    let path = dir.join("runner.json");
    fs::write(&path, json).unwrap();
    RunnerConfig::from_json_file(&path).unwrap()
}

fn cat() -> Process {
    Process::new(42, "/usr/bin/cat", "/etc/passwd")
}

#[test]
fn json_defined_tree_runs_under_harness_and_persists() {
    eventcheck::logging::init();
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(dir.path(), r#"{"limits": {"max_events": 10, "timeout_ms": 5000}}"#);
    let tree = TreeDefinition::from_json(TREE).unwrap();
    let (tx, source) = ChannelSource::new(16);

    let run = Harness::new(config)
        .report_dir(dir.path().join("reports"))
        .run(source, tree, move || {
            tx.send(Event::exec(cat())).unwrap();
            tx.send(Event::kprobe(
                cat(),
                "security_file_permission",
                vec![
                    KprobeArg::File {
                        path: "/etc/passwd".to_string(),
                        flags: String::new(),
                    },
                    KprobeArg::Int(4),
                ],
            ))
            .unwrap();
            tx.send(Event::exit(cat(), "", 0)).unwrap();
            3
        })
        .unwrap();

    assert!(run.is_satisfied());
    assert_eq!(run.workload, 3);

    let (events, unmatched) = run.files.unwrap();
    let matched: Vec<MatchedEvent> = serde_json::from_slice(&fs::read(events).unwrap()).unwrap();
    let nodes: Vec<&str> = matched.iter().map(|m| m.node.as_str()).collect();
    assert_eq!(nodes, ["cat", "open", "exit"]);
    let pending: Vec<UnmatchedNode> = serde_json::from_slice(&fs::read(unmatched).unwrap()).unwrap();
    assert!(pending.is_empty());
}

#[test]
fn failed_run_persists_last_mismatch_reasons() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(dir.path(), r#"{"limits": {"max_events": 2, "timeout_ms": 5000}}"#);
    let tree = TreeDefinition::from_json(TREE).unwrap();
    let (tx, source) = ChannelSource::new(16);

    let run = Harness::new(config)
        .report_dir(dir.path())
        .run(source, tree, move || {
            tx.send(Event::exec(cat())).unwrap();
            tx.send(Event::kprobe(cat(), "security_file_open", Vec::new())).unwrap();
        })
        .unwrap();

    assert_eq!(
        run.outcome,
        Outcome::Failed {
            limit: LimitKind::Events
        }
    );
    let rendered = run.report.to_string();
    assert!(rendered.contains("MATCH   cat <= ProcessExec:1"), "{rendered}");
    assert!(rendered.contains("PENDING open: function name mismatch"), "{rendered}");

    let (_, unmatched) = run.files.unwrap();
    let pending: Vec<UnmatchedNode> = serde_json::from_slice(&fs::read(unmatched).unwrap()).unwrap();
    let names: Vec<&str> = pending.iter().map(|u| u.node.as_str()).collect();
    assert_eq!(names, ["open", "exit"]);
    assert!(pending[1].reason.is_none());
}

#[test]
fn ready_timeout_prevents_workload() {
    struct Never;
    impl eventcheck::EventSource for Never {
        fn describe(&self) -> String {
            "never".to_string()
        }
        fn subscribe(&mut self) -> Result<eventcheck::Subscription, eventcheck::SourceError> {
            std::thread::sleep(Duration::from_millis(300));
            Err(eventcheck::SourceError::Connect {
                endpoint: "never".to_string(),
                message: "refused".to_string(),
            })
        }
    }

    let tree = TreeDefinition::from_json(TREE).unwrap();
    let mut ran = false;
    let err = Harness::new(RunnerConfig::default())
        .ready_timeout(Duration::from_millis(50))
        .run(Never, tree, || ran = true)
        .unwrap_err();
    assert!(matches!(err, CheckError::Runner(RunnerError::Timeout { .. })), "{err:?}");
    assert!(!err.is_infrastructure());
    assert!(!ran);
}
