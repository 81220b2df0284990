// src/transform/kind.rs

//! Registry from textual transform kinds to [`Transform`] values.
//!
//! Mapping tables name transforms either by their short id (`log_guid`,
//! `truncate(64)`) or by the older class-style name (`LogGUIDField`,
//! `LimitedLengthFieldType(64)`). Both spellings normalize to the same key.

use regex::Regex;
use std::str::FromStr;
use thiserror::Error;

use super::Transform;
use crate::geo::GeoPart;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransformKindError {
    #[error("unknown transform kind `{0}`")]
    Unknown(String),

    #[error("transform kind `{0}` needs an argument")]
    MissingArgument(String),

    #[error("bad argument for `{kind}`: {reason}")]
    BadArgument { kind: String, reason: String },
}

/// Lower-case, drop underscores and the `Field`/`FieldType` suffix.
fn normalize(name: &str) -> String {
    let key: String = name
        .trim()
        .chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect();
    for suffix in ["fieldtype", "field"] {
        if let Some(stripped) = key.strip_suffix(suffix) {
            if !stripped.is_empty() {
                return stripped.to_string();
            }
        }
    }
    key
}

fn unquote(arg: &str) -> &str {
    let arg = arg.trim();
    for q in ['\'', '"'] {
        if arg.len() >= 2 && arg.starts_with(q) && arg.ends_with(q) {
            return &arg[1..arg.len() - 1];
        }
    }
    arg
}

/// Split `name(arg)` into its parts. The argument keeps its case.
fn split_call(s: &str) -> Result<(&str, Option<&str>), TransformKindError> {
    let s = s.trim();
    match s.find('(') {
        None => Ok((s, None)),
        Some(open) => {
            let inner = s[open + 1..].strip_suffix(')').ok_or_else(|| {
                TransformKindError::BadArgument {
                    kind: s[..open].to_string(),
                    reason: "unbalanced parentheses".to_string(),
                }
            })?;
            Ok((&s[..open], Some(inner)))
        }
    }
}

impl FromStr for Transform {
    type Err = TransformKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, arg) = split_call(s)?;
        let key = normalize(name);

        let needs = |arg: Option<&str>| -> Result<String, TransformKindError> {
            arg.map(|a| unquote(a).to_string())
                .filter(|a| !a.is_empty())
                .ok_or_else(|| TransformKindError::MissingArgument(name.to_string()))
        };
        let bad = |reason: String| TransformKindError::BadArgument {
            kind: name.to_string(),
            reason,
        };

        let transform = match key.as_str() {
            "truncate" | "limitedlength" => {
                let n = needs(arg)?;
                let limit = n
                    .parse::<usize>()
                    .map_err(|e| bad(format!("`{n}`: {e}")))?;
                return Ok(Transform::Truncate(limit));
            }
            "recursive" => {
                let inner: Transform = needs(arg)?.parse()?;
                return Ok(Transform::Recursive(Box::new(inner)));
            }
            "regex" => {
                let pattern = needs(arg)?;
                let re = Regex::new(&pattern).map_err(|e| bad(e.to_string()))?;
                return Ok(Transform::Matches(re));
            }
            "error" => return Ok(Transform::error_record(needs(arg)?)),

            "log" => Transform::Passthrough,
            "ipv4" => Transform::Ipv4,
            "nullable" => Transform::Nullable,
            "int" => Transform::Integer,
            "float" => Transform::Float,
            "escaped" => Transform::Escape,
            "singleline" | "multiline" => Transform::SingleLine,
            "urldecoded" => Transform::UrlDecode,
            "lower" => Transform::Lowercase,
            "guid" => Transform::guid(),
            "logguid" => Transform::log_guid(),
            "logfloat" => Transform::log_float(),
            "logchar" => Transform::log_char(),
            "timestamp" => Transform::timestamp(),
            "useragent" => Transform::user_agent(),
            "referer" => Transform::referer(),
            "geocity" | "geoip2citydbcity" => Transform::Geo(GeoPart::City),
            "georegion" | "geoip2citydbregion" => Transform::Geo(GeoPart::Region),
            "geocountry" | "geoip2citydbcountry" => Transform::Geo(GeoPart::Country),
            _ => return Err(TransformKindError::Unknown(s.trim().to_string())),
        };

        if arg.is_some() {
            return Err(bad("takes no argument".to_string()));
        }
        Ok(transform)
    }
}
