// src/parse/tagged.rs

use regex::Regex;
use std::sync::LazyLock;

use super::{LineParser, LogFormat, RawFields, POSITIONAL_FIELDS};
use crate::error::RowError;
use crate::transform::url_decode;

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\|([A-Za-z0-9_-]{0,32}):([^|]*)").expect("tag pattern compiles"));

/// Every `name:value` segment that directly follows a `|`.
fn extract(text: &str) -> Vec<(String, String)> {
    let prefixed = format!("|{text}");
    TAG_RE
        .captures_iter(&prefixed)
        .map(|c| (c[1].to_lowercase(), c[2].to_string()))
        .collect()
}

/// Parser for `rts|ip|name:value|name:value...` lines.
///
/// Values are URL-decoded once and re-scanned, so tags hidden inside an
/// encoded value (`ad:x%7Cpos%3A3`) surface as fields of their own.
#[derive(Debug, Clone, Default)]
pub struct TaggedParser {
    mandatory: Vec<String>,
}

impl TaggedParser {
    pub fn new(mandatory: Vec<String>) -> Self {
        Self { mandatory }
    }
}

impl LineParser for TaggedParser {
    fn parse(&self, line: &str) -> Result<RawFields, RowError> {
        let mut fields = RawFields::new();
        for (name, value) in POSITIONAL_FIELDS.iter().zip(line.split('|')) {
            fields.insert(*name, value);
        }

        for (name, value) in extract(line) {
            let rescanned = format!("{name}:{}", url_decode(&value));
            for (name, value) in extract(&rescanned) {
                if POSITIONAL_FIELDS.contains(&name.as_str()) {
                    continue;
                }
                fields.insert(name, value);
            }
        }

        fields.require(&self.mandatory)?;
        Ok(fields)
    }

    fn format(&self) -> LogFormat {
        LogFormat::Tagged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_tags_after_pipes() {
        let p = TaggedParser::default();
        let f = p
            .parse("1489616704.137|46.38.48.106|CID:123|ev:play|pos:3")
            .unwrap();
        let got: Vec<_> = f.iter().collect();
        assert_eq!(
            got,
            vec![
                ("rts", "1489616704.137"),
                ("ip", "46.38.48.106"),
                ("cid", "123"),
                ("ev", "play"),
                ("pos", "3"),
            ]
        );
    }

    #[test]
    fn nested_tags_surface_after_decoding() {
        let p = TaggedParser::default();
        let f = p.parse("1|2.2.2.2|ad:x%7Cpos%3A3|url:http%3A%2F%2Fa.ru").unwrap();
        assert_eq!(f.get("ad"), Some("x"));
        assert_eq!(f.get("pos"), Some("3"));
        assert_eq!(f.get("url"), Some("http://a.ru"));
    }

    #[test]
    fn positional_fields_take_precedence() {
        let p = TaggedParser::default();
        let f = p.parse("1|2.2.2.2|ip:9.9.9.9|x:ip%3A8.8.8.8").unwrap();
        assert_eq!(f.get("ip"), Some("2.2.2.2"));
    }

    #[test]
    fn missing_mandatory_tag_fails() {
        let p = TaggedParser::new(vec!["cid".into()]);
        assert!(matches!(
            p.parse("1|2.2.2.2|ev:play"),
            Err(RowError::MissingMandatory { .. })
        ));
    }
}
