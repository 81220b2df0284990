// src/transform/mod.rs

//! Field cleaners.
//!
//! A [`Transform`] turns one raw token into a cleaned JSON value. Primitive
//! cleaners are composed into ordered chains; a chain stops at the first
//! step that yields null. Transforms are resolved from their textual kind
//! once, when a mapping table is loaded (see [`kind`]).

mod clean;
pub mod kind;
mod structure;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::geo::{GeoCache, GeoError, GeoPart};

pub use clean::url_decode;
pub use kind::TransformKindError;

/// Upper bound for [`Transform::Recursive`] before it gives up.
pub const MAX_FIXPOINT_ITERATIONS: usize = 32;

/// Length limit applied to free-text fields (user agents, referers).
pub const TEXT_LIMIT: usize = 1024;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("`{0}` is not an IPv4 address")]
    NotIpv4(String),

    #[error("`{value}` does not match /{pattern}/")]
    NoMatch { value: String, pattern: String },

    #[error("`{0}` is not an integer")]
    NotInteger(String),

    #[error("`{0}` is not a number")]
    NotNumber(String),

    #[error("expected text, got {0}")]
    NotText(&'static str),

    #[error("value did not settle after {0} iterations")]
    NoFixpoint(usize),

    #[error(transparent)]
    Geo(#[from] GeoError),
}

#[derive(Debug, Clone)]
pub enum Transform {
    Passthrough,
    Ipv4,
    Nullable,
    Integer,
    Float,
    Escape,
    SingleLine,
    UrlDecode,
    Lowercase,
    Truncate(usize),
    /// Value must match at its start (a leading `^` or trailing `$` in the
    /// pattern tightens this to a full match).
    Matches(Regex),
    /// Re-apply the inner transform until its output stops changing.
    Recursive(Box<Transform>),
    /// Ordered steps; stops and returns null as soon as a step yields null.
    Chain(Vec<Transform>),
    /// Terminal step: split a cleaned URL into a referer record.
    Referer,
    /// Terminal step: split `code,msg` into an error record named by the tag.
    ErrorRecord(String),
    Geo(GeoPart),
}

impl Transform {
    pub fn guid() -> Self {
        Transform::Matches(clean::GUID_RE.clone())
    }

    /// Nullable → GUID → Lowercase
    pub fn log_guid() -> Self {
        Transform::Chain(vec![Transform::Nullable, Transform::guid(), Transform::Lowercase])
    }

    /// Nullable → Float
    pub fn log_float() -> Self {
        Transform::Chain(vec![Transform::Nullable, Transform::Float])
    }

    /// Nullable → Recursive(URL-decode)
    pub fn log_char() -> Self {
        Transform::Chain(vec![Transform::Nullable, Transform::recursive_decode()])
    }

    /// Float → Integer: epoch seconds with the fractional part cut off.
    pub fn timestamp() -> Self {
        Transform::Chain(vec![Transform::Float, Transform::Integer])
    }

    pub fn user_agent() -> Self {
        Transform::Chain(vec![
            Transform::UrlDecode,
            Transform::Escape,
            Transform::Truncate(TEXT_LIMIT),
        ])
    }

    pub fn referer() -> Self {
        Transform::Chain(vec![
            Transform::recursive_decode(),
            Transform::Escape,
            Transform::Truncate(TEXT_LIMIT),
            Transform::Referer,
        ])
    }

    pub fn error_record(tag: impl Into<String>) -> Self {
        Transform::Chain(vec![
            Transform::recursive_decode(),
            Transform::Escape,
            Transform::ErrorRecord(tag.into()),
        ])
    }

    pub fn recursive_decode() -> Self {
        Transform::Recursive(Box::new(Transform::UrlDecode))
    }

    /// Clean `value`.
    ///
    /// `geo` is only consulted by [`Transform::Geo`]; every other kind is a
    /// pure function of its input.
    pub fn apply(&self, value: Value, geo: &mut GeoCache) -> Result<Value, TransformError> {
        match self {
            Transform::Passthrough => Ok(value),
            Transform::Ipv4 => clean::ipv4(value).map(|(_, v)| v),
            Transform::Nullable => Ok(clean::nullable(value)),
            Transform::Integer => clean::integer(value),
            Transform::Float => clean::float(value),
            Transform::Escape => clean::map_text(value, |s| clean::escape(&s)),
            Transform::SingleLine => clean::map_text(value, |s| clean::single_line(&s)),
            Transform::UrlDecode => clean::map_text(value, |s| clean::url_decode(&s)),
            Transform::Lowercase => clean::map_text(value, |s| s.to_lowercase()),
            Transform::Truncate(limit) => {
                clean::map_text(value, |s| s.chars().take(*limit).collect())
            }
            Transform::Matches(pattern) => clean::matches(value, pattern),
            Transform::Recursive(inner) => {
                inner.apply_until_stable(value, geo, MAX_FIXPOINT_ITERATIONS)
            }
            Transform::Chain(steps) => {
                let mut current = value;
                for step in steps {
                    current = step.apply(current, geo)?;
                    if current.is_null() {
                        break;
                    }
                }
                Ok(current)
            }
            Transform::Referer => structure::referer(value),
            Transform::ErrorRecord(tag) => structure::error_record(value, tag),
            Transform::Geo(part) => {
                let (ip, _) = clean::ipv4(value)?;
                let record = geo.resolve(ip)?;
                Ok(part.extract(record))
            }
        }
    }

    fn apply_until_stable(
        &self,
        value: Value,
        geo: &mut GeoCache,
        max_iterations: usize,
    ) -> Result<Value, TransformError> {
        let mut current = value;
        for _ in 0..max_iterations {
            let next = self.apply(current.clone(), geo)?;
            if next == current {
                return Ok(next);
            }
            current = next;
        }
        Err(TransformError::NoFixpoint(max_iterations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::NoGeo;
    use serde_json::json;

    fn run(t: &Transform, raw: &str) -> Result<Value, TransformError> {
        let mut geo = GeoCache::new(Box::new(NoGeo));
        t.apply(Value::String(raw.to_string()), &mut geo)
    }

    #[test]
    fn timestamp_truncates_fractional_seconds() {
        let t = Transform::timestamp();
        assert_eq!(run(&t, "1489616704.137").unwrap(), json!(1489616704));
        assert_eq!(run(&t, "").unwrap(), Value::Null);
        assert_eq!(run(&t, "nan").unwrap(), Value::Null);
        assert_eq!(run(&t, "-inf").unwrap(), Value::Null);
        assert!(run(&t, "yesterday").is_err());
    }

    #[test]
    fn url_decode_without_escapes_is_identity() {
        let plain = "http://cdn.example.ru/path?q=1";
        assert_eq!(run(&Transform::UrlDecode, plain).unwrap(), json!(plain));
        assert_eq!(run(&Transform::recursive_decode(), plain).unwrap(), json!(plain));
    }

    #[test]
    fn recursive_decode_unwraps_nested_encoding() {
        let t = Transform::recursive_decode();
        assert_eq!(run(&t, "a%252Fb").unwrap(), json!("a/b"));
        assert_eq!(run(&Transform::UrlDecode, "a%252Fb").unwrap(), json!("a%2Fb"));
    }

    #[test]
    fn recursive_gives_up_without_a_fixpoint() {
        // Every pass doubles the backslashes.
        let mut geo = GeoCache::new(Box::new(NoGeo));
        let err = Transform::Escape
            .apply_until_stable(json!("a\\b"), &mut geo, 4)
            .unwrap_err();
        assert!(matches!(err, TransformError::NoFixpoint(4)));
    }

    #[test]
    fn log_guid_lowercases_valid_guids() {
        let t = Transform::log_guid();
        assert_eq!(
            run(&t, "085049C7-8889-9F9F-1424-62F5B6E53B2B").unwrap(),
            json!("085049c7-8889-9f9f-1424-62f5b6e53b2b")
        );
        assert_eq!(
            run(&t, "085049C788899F9F142462F5B6E53B2B").unwrap(),
            json!("085049c788899f9f142462f5b6e53b2b")
        );
        assert!(run(&t, "085049C-8889-9F9F-1424-62F5B6E53B2B").is_err());
        assert_eq!(run(&t, "Undefined").unwrap(), Value::Null);
    }

    #[test]
    fn chain_stops_at_null() {
        // GUID validation would fail on "undefined"; Nullable stops the chain first.
        let t = Transform::Chain(vec![Transform::Nullable, Transform::guid()]);
        assert_eq!(run(&t, "undefined").unwrap(), Value::Null);
    }

    #[test]
    fn log_float_normalizes_non_finite() {
        let t = Transform::log_float();
        assert_eq!(run(&t, "2.5").unwrap(), json!(2.5));
        assert_eq!(run(&t, "undefined").unwrap(), Value::Null);
        assert_eq!(run(&t, "Infinity").unwrap(), Value::Null);
    }

    #[test]
    fn log_char_decodes_until_stable() {
        let t = Transform::log_char();
        assert_eq!(run(&t, "%25D0%25BF").unwrap(), json!("п"));
    }

    #[test]
    fn user_agent_is_escaped_and_bounded() {
        let t = Transform::user_agent();
        let long = "a".repeat(TEXT_LIMIT + 10);
        assert_eq!(run(&t, &long).unwrap().as_str().unwrap().len(), TEXT_LIMIT);
        assert_eq!(run(&t, "Mozilla%0A5.0").unwrap(), json!("Mozilla\\n5.0"));
    }

    #[test]
    fn referer_breaks_url_into_parts() {
        let out = run(&Transform::referer(), "http://cdn.example.ru/path?q=1").unwrap();
        assert_eq!(out["scheme"], json!("http"));
        assert_eq!(out["host"], json!("cdn.example.ru"));
        assert_eq!(out["host_reversed"], json!("ru.example.cdn"));
        assert_eq!(out["site"], json!("example.ru"));
        assert_eq!(out["path"], json!("/path"));
        assert_eq!(out["query"], json!({"q": ["1"]}));
    }

    #[test]
    fn referer_without_scheme_gets_placeholder() {
        let out = run(&Transform::referer(), "seasonvar.ru%2Fserial%3Fa%3D1%26a%3D2").unwrap();
        assert_eq!(out["scheme"], json!("undef"));
        assert_eq!(out["host"], json!("seasonvar.ru"));
        assert_eq!(out["site"], json!("seasonvar.ru"));
        assert_eq!(out["path"], json!("/serial"));
        assert_eq!(out["query"], json!({"a": ["1", "2"]}));
    }

    #[test]
    fn referer_path_keeps_escaped_quote_with_or_without_scheme() {
        let t = Transform::referer();
        assert_eq!(run(&t, "http://a.ru/it's").unwrap()["path"], json!("/it\\'s"));
        assert_eq!(run(&t, "a.ru/it's").unwrap()["path"], json!("/it\\'s"));
    }

    #[test]
    fn referer_decodes_cyrillic_once_and_keeps_it() {
        let t = Transform::referer();
        let raw = "http%3A%2F%2F%D0%BF%D1%80%D0%B8%D0%BC%D0%B5%D1%80.%D1%80%D1%84\
                   %2F%D0%BF%D1%83%D1%82%D1%8C";
        let out = run(&t, raw).unwrap();
        assert_eq!(out["host"], json!("пример.рф"));
        assert_eq!(out["host_reversed"], json!("рф.пример"));
        assert_eq!(out["path"], json!("/путь"));
    }

    #[test]
    fn error_record_splits_code_and_message() {
        let t = Transform::error_record("client");
        assert_eq!(
            run(&t, "404%2CNot%20found").unwrap(),
            json!({"name": "client", "code": 404, "msg": "Not found"})
        );
        assert_eq!(
            run(&t, "500,upstream, retry later").unwrap(),
            json!({"name": "client", "code": 500, "msg": "upstream, retry later"})
        );
        assert_eq!(
            run(&t, "timeout,waited").unwrap(),
            json!({"name": "client", "msg": "timeout,waited"})
        );
        assert_eq!(
            run(&t, "boom").unwrap(),
            json!({"name": "client", "msg": "boom"})
        );
    }

    #[test]
    fn integer_and_ipv4_validate_input() {
        assert_eq!(run(&Transform::Integer, " 42 ").unwrap(), json!(42));
        assert_eq!(run(&Transform::Integer, "").unwrap(), Value::Null);
        assert!(run(&Transform::Integer, "4.2").is_err());
        assert_eq!(run(&Transform::Ipv4, "46.38.48.106").unwrap(), json!("46.38.48.106"));
        assert!(run(&Transform::Ipv4, "46.38.48.256").is_err());
        assert!(run(&Transform::Ipv4, "46.38.48").is_err());
    }

    #[test]
    fn escape_and_single_line() {
        assert_eq!(run(&Transform::Escape, "it's\t\u{1}").unwrap(), json!("it\\'s\\t\\x01"));
        assert_eq!(run(&Transform::Escape, "привет").unwrap(), json!("привет"));
        assert_eq!(run(&Transform::SingleLine, "a\r\nb\nc\rd").unwrap(), json!("abcd"));
    }

    #[test]
    fn truncate_counts_characters() {
        assert_eq!(run(&Transform::Truncate(2), "привет").unwrap(), json!("пр"));
    }
}
