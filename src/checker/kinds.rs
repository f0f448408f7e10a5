use serde::{Deserialize, Serialize};

use crate::event::{EventPayload, KprobeAction, KprobeArg, Process};
use crate::matcher::{ElementCheck, ListMatcher, StringMatcher};

use super::{check_eq, check_str, CheckOutcome, Mismatch, ProcessChecker};

fn check_process(
    scope: &str,
    checker: Option<&ProcessChecker>,
    process: Option<&Process>,
) -> CheckOutcome {
    let Some(checker) = checker else {
        return Ok(());
    };
    let Some(process) = process else {
        return Err(Mismatch::missing(scope));
    };
    checker.check(process).map_err(|m| m.within(scope))
}

fn wrong_payload(expected: &str, payload: &EventPayload) -> Mismatch {
    let got = match payload {
        EventPayload::ProcessExec { .. } => "process_exec",
        EventPayload::ProcessExit { .. } => "process_exit",
        EventPayload::ProcessKprobe { .. } => "process_kprobe",
    };
    Mismatch::field("kind", format_args!("expected {expected}, got {got}"))
}

/// Checker for process exec events.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecChecker {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessChecker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<ProcessChecker>,
}

impl ExecChecker {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn process(mut self, p: ProcessChecker) -> Self {
        self.process = Some(p);
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn parent(mut self, p: ProcessChecker) -> Self {
        self.parent = Some(p);
        self
    }

    /// Check an exec payload.
    pub fn check(&self, payload: &EventPayload) -> CheckOutcome {
        let EventPayload::ProcessExec { process, parent } = payload else {
            return Err(wrong_payload("process_exec", payload));
        };
        check_process("process", self.process.as_ref(), Some(process))?;
        check_process("parent", self.parent.as_ref(), parent.as_ref())
    }
}

/// Checker for process exit events.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitChecker {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessChecker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<ProcessChecker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<StringMatcher>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u32>,
}

impl ExitChecker {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn process(mut self, p: ProcessChecker) -> Self {
        self.process = Some(p);
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn parent(mut self, p: ProcessChecker) -> Self {
        self.parent = Some(p);
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn signal(mut self, m: StringMatcher) -> Self {
        self.signal = Some(m);
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn status(mut self, status: u32) -> Self {
        self.status = Some(status);
        self
    }

    /// Check an exit payload.
    pub fn check(&self, payload: &EventPayload) -> CheckOutcome {
        let EventPayload::ProcessExit {
            process,
            parent,
            signal,
            status,
        } = payload
        else {
            return Err(wrong_payload("process_exit", payload));
        };
        check_process("process", self.process.as_ref(), Some(process))?;
        check_process("parent", self.parent.as_ref(), parent.as_ref())?;
        check_str("signal", self.signal.as_ref(), signal)?;
        check_eq("status", self.status.as_ref(), status)
    }
}

/// Checker for one kprobe argument.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KprobeArgChecker {
    Int {
        value: i64,
    },
    Size {
        value: u64,
    },
    String {
        value: StringMatcher,
    },
    Bytes {
        value: Vec<u8>,
    },
    File {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<StringMatcher>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        flags: Option<StringMatcher>,
    },
    Path {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<StringMatcher>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        flags: Option<StringMatcher>,
    },
}

impl KprobeArgChecker {
    /// File argument whose path satisfies `path`.
    #[must_use]
    pub const fn file_path(path: StringMatcher) -> Self {
        Self::File {
            path: Some(path),
            flags: None,
        }
    }

    /// Check one argument value.
    pub fn check(&self, arg: &KprobeArg) -> CheckOutcome {
        match (self, arg) {
            (Self::Int { value }, KprobeArg::Int(got)) => check_eq("int", Some(value), got),
            (Self::Size { value }, KprobeArg::Size(got)) => check_eq("size", Some(value), got),
            (Self::String { value }, KprobeArg::String(got)) => check_str("string", Some(value), got),
            (Self::Bytes { value }, KprobeArg::Bytes(got)) => check_eq("bytes", Some(value), got),
            (Self::File { path, flags }, KprobeArg::File { path: p, flags: f })
            | (Self::Path { path, flags }, KprobeArg::Path { path: p, flags: f }) => {
                check_str("path", path.as_ref(), p)?;
                check_str("flags", flags.as_ref(), f)
            }
            (_, other) => Err(Mismatch::field(
                "argument type",
                format_args!("expected {}, got {other:?}", self.type_name()),
            )),
        }
    }

    const fn type_name(&self) -> &'static str {
        match self {
            Self::Int { .. } => "int",
            Self::Size { .. } => "size",
            Self::String { .. } => "string",
            Self::Bytes { .. } => "bytes",
            Self::File { .. } => "file",
            Self::Path { .. } => "path",
        }
    }
}

impl ElementCheck<KprobeArg> for KprobeArgChecker {
    fn check_element(&self, value: &KprobeArg) -> Result<(), String> {
        self.check(value).map_err(Mismatch::into_reason)
    }
}

/// Checker for kprobe events.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KprobeChecker {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessChecker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<ProcessChecker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_name: Option<StringMatcher>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<ListMatcher<KprobeArgChecker>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_value: Option<KprobeArgChecker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<KprobeAction>,
}

impl KprobeChecker {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn process(mut self, p: ProcessChecker) -> Self {
        self.process = Some(p);
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn parent(mut self, p: ProcessChecker) -> Self {
        self.parent = Some(p);
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn function_name(mut self, m: StringMatcher) -> Self {
        self.function_name = Some(m);
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn args(mut self, m: ListMatcher<KprobeArgChecker>) -> Self {
        self.args = Some(m);
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn return_value(mut self, c: KprobeArgChecker) -> Self {
        self.return_value = Some(c);
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn action(mut self, action: KprobeAction) -> Self {
        self.action = Some(action);
        self
    }

    /// Check a kprobe payload.
    pub fn check(&self, payload: &EventPayload) -> CheckOutcome {
        let EventPayload::ProcessKprobe {
            process,
            parent,
            function_name,
            args,
            return_value,
            action,
        } = payload
        else {
            return Err(wrong_payload("process_kprobe", payload));
        };
        check_str("function name", self.function_name.as_ref(), function_name)?;
        check_process("process", self.process.as_ref(), Some(process))?;
        check_process("parent", self.parent.as_ref(), parent.as_ref())?;
        if let Some(list) = &self.args {
            list.check(args).map_err(|detail| Mismatch::field("args", detail))?;
        }
        if let Some(want) = &self.return_value {
            let Some(got) = return_value else {
                return Err(Mismatch::missing("return value"));
            };
            want.check(got).map_err(|m| m.within("return value"))?;
        }
        check_eq("action", self.action.as_ref(), action)
    }
}
