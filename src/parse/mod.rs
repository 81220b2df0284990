// src/parse/mod.rs

//! Log line parsers.
//!
//! A [`LineParser`] turns one raw line into [`RawFields`]: lower-cased field
//! names with their raw (still encoded) values, in the order they appeared.

mod assignment;
mod tagged;

pub use assignment::AssignmentParser;
pub use tagged::TaggedParser;

use crate::error::RowError;

/// Names bound to the leading `|`-separated tokens of every line.
pub const POSITIONAL_FIELDS: [&str; 2] = ["rts", "ip"];

/// Reserved key collecting tokens that carry no field name.
pub const UNKNOWN_FIELD: &str = "err_log_unknown";

/// Ordered name → raw value map for one line.
///
/// Inserting an existing name replaces its value but keeps its position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFields {
    entries: Vec<(String, String)>,
}

impl RawFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Pipe-join `value` onto whatever `name` already holds.
    pub fn append(&mut self, name: &str, value: &str) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => {
                slot.1.push('|');
                slot.1.push_str(value);
            }
            None => self.entries.push((name.to_string(), value.to_string())),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fail unless every name in `mandatory` is present.
    pub fn require(&self, mandatory: &[String]) -> Result<(), RowError> {
        let missing: Vec<String> = mandatory
            .iter()
            .filter(|m| !self.contains(m))
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(RowError::MissingMandatory { missing })
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogFormat {
    /// `rts|ip|name=value&name=value...`
    Assignment,
    /// `rts|ip|name:value|name:value...`
    Tagged,
}

impl LogFormat {
    pub fn as_str(&self) -> &str {
        match self {
            LogFormat::Assignment => "assignment",
            LogFormat::Tagged => "tagged",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "assignment" => Some(LogFormat::Assignment),
            "tagged" => Some(LogFormat::Tagged),
            _ => None,
        }
    }
}

pub trait LineParser {
    /// Split a raw line into fields, enforcing the mandatory set.
    fn parse(&self, line: &str) -> Result<RawFields, RowError>;
    fn format(&self) -> LogFormat;
}

/// Build the parser for `format`, rejecting lines that lack any of `mandatory`.
pub fn parser_for(format: LogFormat, mandatory: Vec<String>) -> Box<dyn LineParser> {
    match format {
        LogFormat::Assignment => Box::new(AssignmentParser::new(mandatory)),
        LogFormat::Tagged => Box::new(TaggedParser::new(mandatory)),
    }
}
