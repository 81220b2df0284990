// src/parse/assignment.rs

use super::{LineParser, LogFormat, RawFields, POSITIONAL_FIELDS, UNKNOWN_FIELD};
use crate::error::RowError;
use crate::transform::url_decode;

/// A line needs at least the positional fields plus one payload token.
const MIN_TOKENS: usize = POSITIONAL_FIELDS.len() + 1;

/// Parser for `rts|ip|name=value&name=value...` lines.
#[derive(Debug, Clone, Default)]
pub struct AssignmentParser {
    mandatory: Vec<String>,
}

impl AssignmentParser {
    pub fn new(mandatory: Vec<String>) -> Self {
        Self { mandatory }
    }

    fn tokens(line: &str) -> Result<Vec<String>, RowError> {
        let tokens: Vec<&str> = line.split(['|', '&']).collect();
        if tokens.len() > MIN_TOKENS {
            return Ok(tokens.into_iter().map(str::to_string).collect());
        }

        // Payload was percent-encoded as a whole: `rts|ip|a%3D1%7Cb%3D2`.
        let decoded = url_decode(line);
        let tokens: Vec<String> = decoded.split('|').map(str::to_string).collect();
        if tokens.len() < MIN_TOKENS {
            return Err(RowError::TooFewTokens {
                tokens: tokens.len(),
                expected: MIN_TOKENS,
            });
        }
        Ok(tokens)
    }
}

impl LineParser for AssignmentParser {
    fn parse(&self, line: &str) -> Result<RawFields, RowError> {
        let tokens = Self::tokens(line)?;
        let mut fields = RawFields::new();

        for (i, token) in tokens.iter().enumerate() {
            if let Some(name) = POSITIONAL_FIELDS.get(i) {
                fields.insert(*name, token.as_str());
                continue;
            }
            match token.split_once('=') {
                Some((name, value)) => {
                    let name = name.to_lowercase();
                    if POSITIONAL_FIELDS.contains(&name.as_str()) {
                        continue;
                    }
                    fields.insert(name, value);
                }
                None => fields.append(UNKNOWN_FIELD, token),
            }
        }

        fields.require(&self.mandatory)?;
        Ok(fields)
    }

    fn format(&self) -> LogFormat {
        LogFormat::Assignment
    }
}
