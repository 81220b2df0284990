// src/error.rs

use thiserror::Error;

/// A failure that rejects a whole log line.
///
/// Row errors never abort the file: the session records the offending line
/// in its error artifact and moves on to the next one.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RowError {
    #[error("line split into {tokens} tokens, expected at least {expected}")]
    TooFewTokens { tokens: usize, expected: usize },

    #[error("missing mandatory fields: {}", .missing.join(", "))]
    MissingMandatory { missing: Vec<String> },

    #[error("sampling field `{field}` is absent")]
    SamplingFieldAbsent { field: String },
}
