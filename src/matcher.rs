//! Field matchers.
//!
//! A [`StringMatcher`] tests one scalar string against a pattern. Matchers are
//! validated when they are built (a malformed regex never reaches the event
//! loop) and evaluation is pure and total.
//!
//! A [`ListMatcher`] lifts element checkers to lists, e.g. kprobe arguments.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// How a [`StringMatcher`] compares its pattern with a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOperator {
    /// Byte-for-byte equality.
    Exact,
    /// Value starts with the pattern.
    Prefix,
    /// Value ends with the pattern.
    Suffix,
    /// Value contains the pattern.
    Contains,
    /// Value matches the regular expression (unanchored search).
    Regex,
}

impl MatchOperator {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Prefix => "prefix",
            Self::Suffix => "suffix",
            Self::Contains => "contains",
            Self::Regex => "regex",
        }
    }
}

/// Serialized shape of a string matcher: `{"operator": "suffix", "value": "curl"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawStringMatcher {
    #[serde(default = "default_operator")]
    operator: MatchOperator,
    value: String,
}

const fn default_operator() -> MatchOperator {
    MatchOperator::Exact
}

/// Matcher over a single string value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawStringMatcher", into = "RawStringMatcher")]
pub struct StringMatcher {
    operator: MatchOperator,
    pattern: String,
    compiled: Option<Regex>,
}

impl StringMatcher {
    /// Build a matcher for any operator.
    ///
    /// Only `Regex` can fail, when the expression does not compile.
    pub fn new(operator: MatchOperator, pattern: impl Into<String>) -> Result<Self, ValidationError> {
        let pattern = pattern.into();
        let compiled = match operator {
            MatchOperator::Regex => Some(Regex::new(&pattern).map_err(|e| {
                ValidationError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                }
            })?),
            _ => None,
        };
        Ok(Self {
            operator,
            pattern,
            compiled,
        })
    }

    /// Exact equality.
    #[must_use]
    pub fn exact(pattern: impl Into<String>) -> Self {
        Self::infallible(MatchOperator::Exact, pattern.into())
    }

    /// Prefix match.
    #[must_use]
    pub fn prefix(pattern: impl Into<String>) -> Self {
        Self::infallible(MatchOperator::Prefix, pattern.into())
    }

    /// Suffix match.
    #[must_use]
    pub fn suffix(pattern: impl Into<String>) -> Self {
        Self::infallible(MatchOperator::Suffix, pattern.into())
    }

    /// Substring match.
    #[must_use]
    pub fn contains(pattern: impl Into<String>) -> Self {
        Self::infallible(MatchOperator::Contains, pattern.into())
    }

    /// Regular expression match.
    pub fn regex(pattern: impl Into<String>) -> Result<Self, ValidationError> {
        Self::new(MatchOperator::Regex, pattern)
    }

    fn infallible(operator: MatchOperator, pattern: String) -> Self {
        Self {
            operator,
            pattern,
            compiled: None,
        }
    }

    /// The comparison operator.
    #[must_use]
    pub const fn operator(&self) -> MatchOperator {
        self.operator
    }

    /// The raw pattern text.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Evaluate the matcher against `value`.
    #[must_use]
    pub fn matches(&self, value: &str) -> bool {
        match self.operator {
            MatchOperator::Exact => value == self.pattern,
            MatchOperator::Prefix => value.starts_with(&self.pattern),
            MatchOperator::Suffix => value.ends_with(&self.pattern),
            MatchOperator::Contains => value.contains(&self.pattern),
            MatchOperator::Regex => self.compiled.as_ref().is_some_and(|re| re.is_match(value)),
        }
    }

    /// `Ok(())` on match, otherwise a short explanation naming both sides.
    pub fn check(&self, value: &str) -> Result<(), String> {
        if self.matches(value) {
            Ok(())
        } else {
            Err(format!("{self} does not match {value:?}"))
        }
    }
}

impl PartialEq for StringMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.operator == other.operator && self.pattern == other.pattern
    }
}

impl Eq for StringMatcher {}

impl fmt::Display for StringMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", self.operator.as_str(), self.pattern)
    }
}

impl TryFrom<RawStringMatcher> for StringMatcher {
    type Error = ValidationError;

    fn try_from(raw: RawStringMatcher) -> Result<Self, Self::Error> {
        Self::new(raw.operator, raw.value)
    }
}

impl From<StringMatcher> for RawStringMatcher {
    fn from(m: StringMatcher) -> Self {
        Self {
            operator: m.operator,
            value: m.pattern,
        }
    }
}

/// A checker that can be applied to one list element.
pub trait ElementCheck<T> {
    /// `Ok(())` if `value` satisfies the checker.
    fn check_element(&self, value: &T) -> Result<(), String>;
}

impl ElementCheck<String> for StringMatcher {
    fn check_element(&self, value: &String) -> Result<(), String> {
        self.check(value)
    }
}

/// How a [`ListMatcher`] pairs checkers with list elements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListMode {
    /// Same length; checker `i` must accept element `i`.
    #[default]
    Ordered,
    /// Same length; some one-to-one pairing of checkers and elements exists.
    Unordered,
    /// Every checker accepts a distinct element; extra elements are allowed.
    Subset,
}

/// Matcher over a list of values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListMatcher<C> {
    /// Pairing discipline.
    #[serde(default)]
    pub mode: ListMode,
    /// Element checkers.
    pub values: Vec<C>,
}

impl<C> ListMatcher<C> {
    /// Ordered list matcher.
    #[must_use]
    pub const fn ordered(values: Vec<C>) -> Self {
        Self {
            mode: ListMode::Ordered,
            values,
        }
    }

    /// Unordered list matcher.
    #[must_use]
    pub const fn unordered(values: Vec<C>) -> Self {
        Self {
            mode: ListMode::Unordered,
            values,
        }
    }

    /// Subset list matcher.
    #[must_use]
    pub const fn subset(values: Vec<C>) -> Self {
        Self {
            mode: ListMode::Subset,
            values,
        }
    }

    /// Check `items` against the element checkers.
    pub fn check<T>(&self, items: &[T]) -> Result<(), String>
    where
        C: ElementCheck<T>,
    {
        match self.mode {
            ListMode::Ordered => {
                if items.len() != self.values.len() {
                    return Err(format!(
                        "expected {} elements, got {}",
                        self.values.len(),
                        items.len()
                    ));
                }
                for (i, (checker, item)) in self.values.iter().zip(items).enumerate() {
                    checker
                        .check_element(item)
                        .map_err(|reason| format!("element {i}: {reason}"))?;
                }
                Ok(())
            }
            ListMode::Unordered | ListMode::Subset => {
                if self.mode == ListMode::Unordered && items.len() != self.values.len() {
                    return Err(format!(
                        "expected {} elements, got {}",
                        self.values.len(),
                        items.len()
                    ));
                }
                if self.values.len() > items.len() {
                    return Err(format!(
                        "expected at least {} elements, got {}",
                        self.values.len(),
                        items.len()
                    ));
                }
                let mut used = vec![false; items.len()];
                if assign(&self.values, items, &mut used, 0) {
                    Ok(())
                } else {
                    Err(format!(
                        "no one-to-one assignment of {} checkers to {} elements",
                        self.values.len(),
                        items.len()
                    ))
                }
            }
        }
    }
}

/// Backtracking search for a one-to-one assignment of checkers to items.
/// Lists are short (kprobe args), so the exponential worst case is fine.
fn assign<C, T>(checkers: &[C], items: &[T], used: &mut [bool], next: usize) -> bool
where
    C: ElementCheck<T>,
{
    let Some(checker) = checkers.get(next) else {
        return true;
    };
    for (i, item) in items.iter().enumerate() {
        if used[i] || checker.check_element(item).is_err() {
            continue;
        }
        used[i] = true;
        if assign(checkers, items, used, next + 1) {
            return true;
        }
        used[i] = false;
    }
    false
}
