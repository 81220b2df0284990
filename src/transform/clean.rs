// src/transform/clean.rs

use percent_encoding::percent_decode_str;
use regex::Regex;
use serde_json::{Number, Value};
use std::net::Ipv4Addr;
use std::sync::LazyLock;

use super::TransformError;

/// Hyphenated or bare 32-hex-digit GUID.
pub(super) static GUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-?(?:[0-9a-f]{4}-?){3}[0-9a-f]{12}$")
        .expect("GUID pattern compiles")
});

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Borrow the textual form of a scalar; records and lists are rejected.
pub(super) fn text(value: Value) -> Result<String, TransformError> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(TransformError::NotText(kind_name(&other))),
    }
}

/// Apply a string-to-string cleaner; null passes through untouched.
pub(super) fn map_text<F>(value: Value, f: F) -> Result<Value, TransformError>
where
    F: FnOnce(String) -> String,
{
    if value.is_null() {
        return Ok(Value::Null);
    }
    text(value).map(|s| Value::String(f(s)))
}

pub(super) fn ipv4(value: Value) -> Result<(Ipv4Addr, Value), TransformError> {
    let s = text(value)?;
    match s.parse::<Ipv4Addr>() {
        Ok(ip) => Ok((ip, Value::String(s))),
        Err(_) => Err(TransformError::NotIpv4(s)),
    }
}

pub(super) fn nullable(value: Value) -> Value {
    match value {
        Value::String(s) if s.eq_ignore_ascii_case("undefined") => Value::Null,
        other => other,
    }
}

pub(super) fn integer(value: Value) -> Result<Value, TransformError> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::String(s) if s.is_empty() => Ok(Value::Null),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| TransformError::NotInteger(s)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::from(i))
            } else {
                match n.as_f64() {
                    // `as` saturates at the i64 bounds
                    Some(f) if f.is_finite() => Ok(Value::from(f.trunc() as i64)),
                    _ => Err(TransformError::NotInteger(n.to_string())),
                }
            }
        }
        other => Err(TransformError::NotInteger(other.to_string())),
    }
}

pub(super) fn float(value: Value) -> Result<Value, TransformError> {
    let parsed = match value {
        Value::Null => return Ok(Value::Null),
        Value::String(s) if s.is_empty() => return Ok(Value::Null),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| TransformError::NotNumber(s))?,
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| TransformError::NotNumber(n.to_string()))?,
        other => return Err(TransformError::NotNumber(other.to_string())),
    };
    // NaN and the infinities have no JSON form
    Ok(Number::from_f64(parsed).map_or(Value::Null, Value::Number))
}

/// Backslash-escape quotes, backslashes and control characters.
pub(super) fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() && (c as u32) <= 0xff => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c if c.is_control() => out.extend(c.escape_unicode()),
            c => out.push(c),
        }
    }
    out
}

pub(super) fn single_line(s: &str) -> String {
    s.chars()
        .filter(|c| {
            !matches!(
                c,
                '\n' | '\r'
                    | '\u{0b}'
                    | '\u{0c}'
                    | '\u{1c}'
                    | '\u{1d}'
                    | '\u{1e}'
                    | '\u{85}'
                    | '\u{2028}'
                    | '\u{2029}'
            )
        })
        .collect()
}

/// Percent-decode; `+` stays literal and broken UTF-8 becomes U+FFFD.
pub fn url_decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

pub(super) fn matches(value: Value, pattern: &Regex) -> Result<Value, TransformError> {
    let s = text(value)?;
    let anchored = pattern.find(&s).is_some_and(|m| m.start() == 0);
    if anchored {
        Ok(Value::String(s))
    } else {
        Err(TransformError::NoMatch {
            value: s,
            pattern: pattern.as_str().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn matches_is_a_prefix_match() {
        let re = Regex::new("(?i)ab+").unwrap();
        assert!(matches(json!("ABBBc"), &re).is_ok());
        assert!(matches(json!("cab"), &re).is_err());
    }

    #[test]
    fn url_decode_replaces_invalid_utf8() {
        assert_eq!(url_decode("%D0%BF%FF"), "п\u{fffd}");
        assert_eq!(url_decode("a+b%20c"), "a+b c");
        assert_eq!(url_decode("100%"), "100%");
    }

    #[test]
    fn integer_truncates_floats_toward_zero() {
        assert_eq!(integer(json!(-3.9)).unwrap(), json!(-3));
        assert_eq!(integer(json!(7)).unwrap(), json!(7));
        assert!(integer(json!(true)).is_err());
    }

    #[test]
    fn text_rejects_records() {
        assert!(matches!(
            map_text(json!({"a": 1}), |s| s),
            Err(TransformError::NotText("object"))
        ));
        assert_eq!(map_text(Value::Null, |s| s).unwrap(), Value::Null);
    }
}
