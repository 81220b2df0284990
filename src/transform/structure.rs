// src/transform/structure.rs

use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::LazyLock;
use url::form_urlencoded;

use super::{clean, TransformError};

const PLACEHOLDER_SCHEME: &str = "undef";

static SCHEME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9+.-]*)://").expect("scheme pattern compiles")
});

/// A URL split into its raw parts. Nothing is re-encoded: the input has
/// already been decoded and escaped, and the parts keep that text.
struct SplitUrl<'a> {
    scheme: String,
    netloc: &'a str,
    path: &'a str,
    query: &'a str,
}

impl<'a> SplitUrl<'a> {
    /// Text without a leading `scheme://` gets the placeholder scheme.
    fn split(s: &'a str) -> Self {
        let (scheme, rest) = match SCHEME_RE.captures(s) {
            Some(caps) => (caps[1].to_ascii_lowercase(), &s[caps[0].len()..]),
            None => (PLACEHOLDER_SCHEME.to_string(), s),
        };

        let rest = rest.split_once('#').map_or(rest, |(before, _)| before);
        let (rest, query) = rest.split_once('?').unwrap_or((rest, ""));
        let (netloc, path) = match rest.find('/') {
            Some(i) => rest.split_at(i),
            None => (rest, ""),
        };
        SplitUrl { scheme, netloc, path, query }
    }

    /// Lower-cased host without userinfo and port; `None` for an unclosed
    /// IPv6 bracket.
    fn hostname(&self) -> Option<String> {
        let host = self.netloc.rsplit('@').next().unwrap_or_default();
        let host = match host.strip_prefix('[') {
            Some(bracketed) => bracketed.split_once(']')?.0,
            None => host.split(':').next().unwrap_or_default(),
        };
        Some(host.to_lowercase())
    }
}

fn site_of(host: &str) -> String {
    let labels: Vec<&str> = host.split('.').collect();
    let from = labels.len().saturating_sub(2);
    labels[from..].join(".")
}

/// Break a cleaned URL into `{scheme, host, host_reversed, path, query, site}`.
pub(super) fn referer(value: Value) -> Result<Value, TransformError> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let s = clean::text(value)?;

    let url = SplitUrl::split(&s);
    let Some(host) = url.hostname() else {
        return Ok(json!({
            "scheme": PLACEHOLDER_SCHEME,
            "host": "",
            "host_reversed": "",
            "path": s,
            "query": {},
            "site": "",
        }));
    };
    let host_reversed = host.rsplit('.').collect::<Vec<_>>().join(".");

    let mut query = Map::new();
    for (k, v) in form_urlencoded::parse(url.query.as_bytes()) {
        if v.trim().is_empty() {
            continue;
        }
        let values = query
            .entry(k.into_owned())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(list) = values {
            list.push(Value::String(v.into_owned()));
        }
    }

    Ok(json!({
        "scheme": url.scheme,
        "site": site_of(&host),
        "host": host,
        "host_reversed": host_reversed,
        "path": url.path,
        "query": query,
    }))
}

/// Split `code,msg` into `{name, code, msg}`; `code` is left out when the
/// part before the first comma is not an integer.
pub(super) fn error_record(value: Value, tag: &str) -> Result<Value, TransformError> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let s = clean::text(value)?;

    let coded = s
        .split_once(',')
        .and_then(|(code, msg)| code.trim().parse::<i64>().ok().map(|c| (c, msg)));

    Ok(match coded {
        Some((code, msg)) => json!({ "name": tag, "code": code, "msg": msg }),
        None => json!({ "name": tag, "msg": s }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referer_drops_blank_query_values() {
        let out = referer(json!("https://Video.Example.com/watch?v=1&t=&v=2")).unwrap();
        assert_eq!(out["host"], json!("video.example.com"));
        assert_eq!(out["site"], json!("example.com"));
        assert_eq!(out["query"], json!({"v": ["1", "2"]}));
    }

    #[test]
    fn referer_handles_bare_hosts() {
        let out = referer(json!("localhost")).unwrap();
        assert_eq!(out["scheme"], json!("undef"));
        assert_eq!(out["host"], json!("localhost"));
        assert_eq!(out["host_reversed"], json!("localhost"));
        assert_eq!(out["site"], json!("localhost"));
    }

    #[test]
    fn referer_keeps_unparseable_text_as_path() {
        let out = referer(json!("[::bad")).unwrap();
        assert_eq!(out["scheme"], json!("undef"));
        assert_eq!(out["host"], json!(""));
        assert_eq!(out["path"], json!("[::bad"));
        assert_eq!(out["query"], json!({}));
    }

    #[test]
    fn referer_keeps_unicode_host_and_path_as_given() {
        let with_scheme = referer(json!("http://Пример.рф/путь?q=1")).unwrap();
        let bare = referer(json!("пример.рф/путь")).unwrap();
        for out in [&with_scheme, &bare] {
            assert_eq!(out["host"], json!("пример.рф"));
            assert_eq!(out["host_reversed"], json!("рф.пример"));
            assert_eq!(out["site"], json!("пример.рф"));
            assert_eq!(out["path"], json!("/путь"));
        }
        assert_eq!(with_scheme["scheme"], json!("http"));
        assert_eq!(with_scheme["query"], json!({"q": ["1"]}));
        assert_eq!(bare["scheme"], json!("undef"));
    }

    #[test]
    fn referer_strips_userinfo_port_and_fragment() {
        let out = referer(json!("HTTPS://user:pw@A.ru:8080/x?k=v#top")).unwrap();
        assert_eq!(out["scheme"], json!("https"));
        assert_eq!(out["host"], json!("a.ru"));
        assert_eq!(out["path"], json!("/x"));
        assert_eq!(out["query"], json!({"k": ["v"]}));

        let out = referer(json!("host.ru:80/x")).unwrap();
        assert_eq!(out["scheme"], json!("undef"));
        assert_eq!(out["host"], json!("host.ru"));
        assert_eq!(out["path"], json!("/x"));
    }

    #[test]
    fn error_record_without_comma() {
        assert_eq!(
            error_record(json!("42"), "ad").unwrap(),
            json!({"name": "ad", "msg": "42"})
        );
    }
}
