//! Runtime event types.
//!
//! Events are produced by the monitored agent and consumed read-only by the
//! checker. They are serializable so they can travel over the gRPC source as
//! JSON and be persisted verbatim in reports.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind tag of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A process started executing a binary.
    Exec,
    /// A process exited.
    Exit,
    /// A kprobe fired.
    Kprobe,
}

impl EventKind {
    /// Human-readable name used in diagnostics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exec => "ProcessExec",
            Self::Exit => "ProcessExit",
            Self::Kprobe => "ProcessKprobe",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Image a container was started from.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Container descriptor.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image: Image,
    /// PID inside the container's PID namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

/// Kubernetes pod descriptor.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<Container>,
}

/// Process descriptor carried by every event kind.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Process {
    #[serde(default)]
    pub exec_id: String,
    #[serde(default)]
    pub pid: u32,
    #[serde(default)]
    pub uid: u32,
    #[serde(default)]
    pub cwd: String,
    #[serde(default)]
    pub binary: String,
    /// Command line arguments, space separated, without the binary.
    #[serde(default)]
    pub arguments: String,
    #[serde(default)]
    pub flags: String,
    #[serde(default)]
    pub parent_exec_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod: Option<Pod>,
}

impl Process {
    /// Convenience constructor used heavily by tests and fixtures.
    #[must_use]
    pub fn new(pid: u32, binary: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            pid,
            binary: binary.into(),
            arguments: arguments.into(),
            ..Self::default()
        }
    }

    /// Attach the process to a pod.
    #[must_use]
    pub fn in_pod(mut self, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        self.pod = Some(Pod {
            namespace: namespace.into(),
            name: name.into(),
            ..Pod::default()
        });
        self
    }

    /// Namespace of the owning pod, if any.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.pod.as_ref().map(|p| p.namespace.as_str())
    }
}

/// A single kprobe argument value.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum KprobeArg {
    Int(i64),
    Size(u64),
    String(String),
    Bytes(Vec<u8>),
    File { path: String, flags: String },
    Path { path: String, flags: String },
}

/// What the agent did in response to the kprobe.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KprobeAction {
    #[default]
    Post,
    FollowFd,
    Sigkill,
    Override,
}

/// Kind-specific event payload.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    ProcessExec {
        process: Process,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<Process>,
    },
    ProcessExit {
        process: Process,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<Process>,
        #[serde(default)]
        signal: String,
        #[serde(default)]
        status: u32,
    },
    ProcessKprobe {
        process: Process,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<Process>,
        function_name: String,
        #[serde(default)]
        args: Vec<KprobeArg>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        return_value: Option<KprobeArg>,
        #[serde(default)]
        action: KprobeAction,
    },
}

/// One runtime event as received from the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Node the event was observed on.
    #[serde(default)]
    pub node_name: String,
    /// Agent-side timestamp.
    pub time: DateTime<Utc>,
    /// Kind-specific payload.
    pub payload: EventPayload,
}

impl Event {
    /// Wrap a payload, stamping the current time.
    #[must_use]
    pub fn new(payload: EventPayload) -> Self {
        Self {
            node_name: String::new(),
            time: Utc::now(),
            payload,
        }
    }

    /// Build an exec event for `process`.
    #[must_use]
    pub fn exec(process: Process) -> Self {
        Self::new(EventPayload::ProcessExec {
            process,
            parent: None,
        })
    }

    /// Build an exit event for `process`.
    #[must_use]
    pub fn exit(process: Process, signal: impl Into<String>, status: u32) -> Self {
        Self::new(EventPayload::ProcessExit {
            process,
            parent: None,
            signal: signal.into(),
            status,
        })
    }

    /// Build a kprobe event for `process`.
    #[must_use]
    pub fn kprobe(process: Process, function_name: impl Into<String>, args: Vec<KprobeArg>) -> Self {
        Self::new(EventPayload::ProcessKprobe {
            process,
            parent: None,
            function_name: function_name.into(),
            args,
            return_value: None,
            action: KprobeAction::Post,
        })
    }

    /// The event's kind tag.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::ProcessExec { .. } => EventKind::Exec,
            EventPayload::ProcessExit { .. } => EventKind::Exit,
            EventPayload::ProcessKprobe { .. } => EventKind::Kprobe,
        }
    }

    /// The process the event is about.
    #[must_use]
    pub const fn process(&self) -> &Process {
        match &self.payload {
            EventPayload::ProcessExec { process, .. }
            | EventPayload::ProcessExit { process, .. }
            | EventPayload::ProcessKprobe { process, .. } => process,
        }
    }

    /// Namespace scope of the event, if the process runs in a pod.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.process().namespace()
    }
}
