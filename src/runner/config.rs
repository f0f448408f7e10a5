use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::filter::EventFilter;

/// Event-count and wall-clock budgets for one run.
///
/// Either running out while the tree is pending ends the run as failed.
/// `None` disables that limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunLimits {
    /// Maximum number of (unfiltered) events to consume.
    pub max_events: Option<u64>,
    /// Deadline measured from readiness.
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Option<Duration>,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_events: None,
            timeout: Some(Duration::from_secs(60)),
        }
    }
}

impl RunLimits {
    /// No event ceiling, no deadline.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            max_events: None,
            timeout: None,
        }
    }

    /// Set the event ceiling.
    #[must_use]
    pub const fn with_max_events(mut self, max_events: u64) -> Self {
        self.max_events = Some(max_events);
        self
    }

    /// Set the deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Reject budgets that could never admit an event.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_events == Some(0) {
            return Err(ValidationError::InvalidLimit {
                reason: "max_events must be at least 1".to_string(),
            });
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(ValidationError::InvalidLimit {
                reason: "timeout must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Stream runner configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Budgets.
    pub limits: RunLimits,
    /// Scoping filter applied before matching.
    pub filter: EventFilter,
    /// Name given to the worker thread.
    pub thread_name: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            limits: RunLimits::default(),
            filter: EventFilter::default(),
            thread_name: "eventcheck-runner".to_string(),
        }
    }
}

impl RunnerConfig {
    /// Config with the given limits and filter.
    #[must_use]
    pub fn new(limits: RunLimits, filter: EventFilter) -> Self {
        Self {
            limits,
            filter,
            ..Self::default()
        }
    }

    /// Validate limits and names.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.limits.validate()?;
        if self.thread_name.trim().is_empty() {
            return Err(ValidationError::InvalidConfig {
                reason: "thread_name cannot be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            reason: format!("invalid runner config JSON: {e}"),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a JSON configuration file.
    pub fn from_json_file(path: &Path) -> Result<Self, ValidationError> {
        let text = std::fs::read_to_string(path).map_err(|e| ValidationError::InvalidConfig {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::from_json(&text)
    }
}

/// `Option<Duration>` as optional integer milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis().min(u128::from(u64::MAX)) as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
