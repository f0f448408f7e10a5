use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::event::{Container, Pod, Process};
use crate::matcher::StringMatcher;

use super::{check_eq, check_str, CheckOutcome, Mismatch};

/// Checker over a [`Container`].
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContainerChecker {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<StringMatcher>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<StringMatcher>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<StringMatcher>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_name: Option<StringMatcher>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

impl ContainerChecker {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn id(mut self, m: StringMatcher) -> Self {
        self.id = Some(m);
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn name(mut self, m: StringMatcher) -> Self {
        self.name = Some(m);
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn image_name(mut self, m: StringMatcher) -> Self {
        self.image_name = Some(m);
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn image_id(mut self, m: StringMatcher) -> Self {
        self.image_id = Some(m);
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Check a container descriptor.
    pub fn check(&self, container: &Container) -> CheckOutcome {
        check_str("id", self.id.as_ref(), &container.id)?;
        check_str("name", self.name.as_ref(), &container.name)?;
        check_str("image id", self.image_id.as_ref(), &container.image.id)?;
        check_str("image name", self.image_name.as_ref(), &container.image.name)?;
        if let Some(want) = self.pid {
            match container.pid {
                Some(got) => check_eq("pid", Some(&want), &got)?,
                None => return Err(Mismatch::missing("pid")),
            }
        }
        Ok(())
    }
}

/// Checker over a [`Pod`].
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PodChecker {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<StringMatcher>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<StringMatcher>,
    /// Every listed label must be present and match.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, StringMatcher>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerChecker>,
}

impl PodChecker {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn namespace(mut self, m: StringMatcher) -> Self {
        self.namespace = Some(m);
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn name(mut self, m: StringMatcher) -> Self {
        self.name = Some(m);
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn label(mut self, key: impl Into<String>, m: StringMatcher) -> Self {
        self.labels.insert(key.into(), m);
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn container(mut self, c: ContainerChecker) -> Self {
        self.container = Some(c);
        self
    }

    /// Check a pod descriptor.
    pub fn check(&self, pod: &Pod) -> CheckOutcome {
        check_str("namespace", self.namespace.as_ref(), &pod.namespace)?;
        check_str("name", self.name.as_ref(), &pod.name)?;
        for (key, matcher) in &self.labels {
            let Some(value) = pod.labels.get(key) else {
                return Err(Mismatch::missing(&format!("label {key:?}")));
            };
            check_str(&format!("label {key:?}"), Some(matcher), value)?;
        }
        if let Some(checker) = &self.container {
            let Some(container) = &pod.container else {
                return Err(Mismatch::missing("container"));
            };
            checker.check(container).map_err(|m| m.within("container"))?;
        }
        Ok(())
    }
}

/// Checker over a [`Process`].
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessChecker {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec_id: Option<StringMatcher>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<StringMatcher>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary: Option<StringMatcher>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<StringMatcher>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flags: Option<StringMatcher>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_exec_id: Option<StringMatcher>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod: Option<PodChecker>,
}

impl ProcessChecker {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn exec_id(mut self, m: StringMatcher) -> Self {
        self.exec_id = Some(m);
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn cwd(mut self, m: StringMatcher) -> Self {
        self.cwd = Some(m);
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn binary(mut self, m: StringMatcher) -> Self {
        self.binary = Some(m);
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn arguments(mut self, m: StringMatcher) -> Self {
        self.arguments = Some(m);
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn flags(mut self, m: StringMatcher) -> Self {
        self.flags = Some(m);
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn parent_exec_id(mut self, m: StringMatcher) -> Self {
        self.parent_exec_id = Some(m);
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn pod(mut self, p: PodChecker) -> Self {
        self.pod = Some(p);
        self
    }

    /// Check a process descriptor.
    pub fn check(&self, process: &Process) -> CheckOutcome {
        check_str("binary", self.binary.as_ref(), &process.binary)?;
        check_str("arguments", self.arguments.as_ref(), &process.arguments)?;
        check_eq("pid", self.pid.as_ref(), &process.pid)?;
        check_eq("uid", self.uid.as_ref(), &process.uid)?;
        check_str("cwd", self.cwd.as_ref(), &process.cwd)?;
        check_str("flags", self.flags.as_ref(), &process.flags)?;
        check_str("exec id", self.exec_id.as_ref(), &process.exec_id)?;
        check_str("parent exec id", self.parent_exec_id.as_ref(), &process.parent_exec_id)?;
        if let Some(checker) = &self.pod {
            let Some(pod) = &process.pod else {
                return Err(Mismatch::missing("pod"));
            };
            checker.check(pod).map_err(|m| m.within("pod"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Image;

    fn curl_in_pod() -> Process {
        let mut p = Process::new(4242, "/usr/bin/curl", "-s https://example.com").in_pod("default", "client");
        p.uid = 1000;
        p.cwd = "/home/test".to_string();
        if let Some(pod) = p.pod.as_mut() {
            pod.labels.insert("app".to_string(), "client".to_string());
            pod.container = Some(Container {
                id: "containerd://abc123".to_string(),
                name: "client".to_string(),
                image: Image {
                    id: "sha256:feed".to_string(),
                    name: "docker.io/curlimages/curl:latest".to_string(),
                },
                pid: Some(7),
            });
        }
        p
    }

    #[test]
    fn empty_checker_is_wildcard() {
        assert!(ProcessChecker::new().check(&curl_in_pod()).is_ok());
        assert!(ProcessChecker::new().check(&Process::default()).is_ok());
    }

    #[test]
    fn all_populated_fields_must_match() {
        let checker = ProcessChecker::new()
            .binary(StringMatcher::suffix("curl"))
            .arguments(StringMatcher::contains("example.com"))
            .uid(1000)
            .cwd(StringMatcher::prefix("/home"))
            .pod(
                PodChecker::new()
                    .namespace(StringMatcher::exact("default"))
                    .label("app", StringMatcher::exact("client"))
                    .container(
                        ContainerChecker::new()
                            .image_name(StringMatcher::contains("curl"))
                            .pid(7),
                    ),
            );
        assert!(checker.check(&curl_in_pod()).is_ok());
    }

    #[test]
    fn first_failure_short_circuits_with_scoped_reason() {
        let checker = ProcessChecker::new()
            .binary(StringMatcher::suffix("curl"))
            .pod(PodChecker::new().namespace(StringMatcher::exact("kube-system")));
        let err = checker.check(&curl_in_pod()).unwrap_err();
        assert!(err.reason().starts_with("pod: namespace mismatch"), "{err}");
    }

    #[test]
    fn binary_mismatch_is_reported_first() {
        let checker = ProcessChecker::new()
            .binary(StringMatcher::exact("/bin/false"))
            .pid(1);
        let err = checker.check(&curl_in_pod()).unwrap_err();
        assert!(err.reason().starts_with("binary mismatch"), "{err}");
    }

    #[test]
    fn nested_checker_requires_nested_entity() {
        let checker = ProcessChecker::new().pod(PodChecker::new());
        let host = Process::new(1, "/sbin/init", "");
        assert_eq!(checker.check(&host).unwrap_err().reason(), "pod missing");
    }

    #[test]
    fn missing_label_and_container_pid() {
        let pod = PodChecker::new().label("tier", StringMatcher::exact("web"));
        let err = pod.check(curl_in_pod().pod.as_ref().unwrap()).unwrap_err();
        assert!(err.reason().contains("label \"tier\" missing"), "{err}");

        let container = ContainerChecker::new().pid(1);
        let err = container.check(&Container::default()).unwrap_err();
        assert_eq!(err.reason(), "pid missing");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let bad = serde_json::from_str::<ProcessChecker>(r#"{"binray": {"value": "x"}}"#);
        assert!(bad.is_err());
    }
}
