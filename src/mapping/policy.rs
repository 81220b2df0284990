// src/mapping/policy.rs

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("sampling spec `{0}` has no field name")]
    NoField(String),

    #[error("unknown fan-out policy `{0}` (expected `continue` or `first-match`)")]
    UnknownFanOut(String),
}

/// `field[:prefix]`: the field every row must carry, and optionally the
/// prefix its raw value must start with for the row to be kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplingSpec {
    pub field: String,
    pub prefix: Option<String>,
}

impl SamplingSpec {
    /// True when `value` passes the prefix filter.
    pub fn keeps(&self, value: &str) -> bool {
        self.prefix
            .as_deref()
            .map_or(true, |prefix| value.starts_with(prefix))
    }
}

impl FromStr for SamplingSpec {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (field, prefix) = match s.split_once(':') {
            Some((field, prefix)) => (field, Some(prefix)),
            None => (s, None),
        };
        let field = field.trim().to_lowercase();
        if field.is_empty() {
            return Err(PolicyError::NoField(s.to_string()));
        }
        Ok(SamplingSpec {
            field,
            prefix: prefix.filter(|p| !p.is_empty()).map(str::to_string),
        })
    }
}

impl fmt::Display for SamplingSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.field, self.prefix.as_deref().unwrap_or(""))
    }
}

/// What to do when several mapping rows share a source field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FanOutPolicy {
    /// Apply every matching row (one IP → city, region, country).
    Continue,
    /// Apply only the first matching row.
    FirstMatch,
}

impl FanOutPolicy {
    pub fn as_str(&self) -> &str {
        match self {
            FanOutPolicy::Continue => "continue",
            FanOutPolicy::FirstMatch => "first-match",
        }
    }
}

impl FromStr for FanOutPolicy {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "continue" | "all" => Ok(FanOutPolicy::Continue),
            "first-match" | "first" => Ok(FanOutPolicy::FirstMatch),
            _ => Err(PolicyError::UnknownFanOut(s.to_string())),
        }
    }
}
