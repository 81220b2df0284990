// src/session/buffer.rs

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};

use crate::mapping::Fact;
use crate::store::StagedRow;

/// Fact member the session's time range is taken from.
pub const TS_FIELD: &str = "ts";

/// Anonymous temp file of `session_id \t fact-json` lines.
pub struct StagingBuffer {
    out: BufWriter<File>,
    rows: u64,
    ts_min: Option<i64>,
    ts_max: Option<i64>,
}

fn fact_ts(fact: &Fact) -> Option<i64> {
    match fact.get(TS_FIELD)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

impl StagingBuffer {
    pub fn new() -> Result<Self> {
        let file = tempfile::tempfile().context("creating staging buffer")?;
        Ok(Self {
            out: BufWriter::new(file),
            rows: 0,
            ts_min: None,
            ts_max: None,
        })
    }

    pub fn push(&mut self, session_id: i64, fact: &Fact) -> Result<()> {
        let json = serde_json::to_string(fact).context("serializing fact")?;
        writeln!(self.out, "{session_id}\t{json}").context("writing staging buffer")?;
        self.rows += 1;

        if let Some(ts) = fact_ts(fact) {
            self.ts_min = Some(self.ts_min.map_or(ts, |m| m.min(ts)));
            self.ts_max = Some(self.ts_max.map_or(ts, |m| m.max(ts)));
        }
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn ts_range(&self) -> (Option<i64>, Option<i64>) {
        (self.ts_min, self.ts_max)
    }

    /// Rewind and stream the buffered rows back.
    pub fn into_rows(self) -> Result<impl Iterator<Item = Result<StagedRow>>> {
        let mut file = self
            .out
            .into_inner()
            .map_err(|e| e.into_error())
            .context("flushing staging buffer")?;
        file.seek(SeekFrom::Start(0))
            .context("rewinding staging buffer")?;

        Ok(BufReader::new(file).lines().map(|line| -> Result<StagedRow> {
            let line = line.context("reading staging buffer")?;
            let (id, fact) = line
                .split_once('\t')
                .ok_or_else(|| anyhow!("malformed staging line: {line}"))?;
            Ok(StagedRow {
                session_id: id.parse().context("staging line session id")?,
                fact: fact.to_string(),
            })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fact(v: Value) -> Fact {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn rows_come_back_in_order() -> Result<()> {
        let mut buf = StagingBuffer::new()?;
        buf.push(7, &fact(json!({"ts": 20, "ua": "a\tb\nc"})))?;
        buf.push(7, &fact(json!({"ts": "10"})))?;
        buf.push(7, &fact(json!({"ts": null})))?;
        assert_eq!(buf.rows(), 3);
        assert_eq!(buf.ts_range(), (Some(10), Some(20)));

        let rows = buf.into_rows()?.collect::<Result<Vec<_>>>()?;
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].session_id, 7);
        let first: Value = serde_json::from_str(&rows[0].fact)?;
        assert_eq!(first["ua"], json!("a\tb\nc"));
        Ok(())
    }

    #[test]
    fn no_ts_means_no_range() -> Result<()> {
        let mut buf = StagingBuffer::new()?;
        buf.push(1, &fact(json!({"u": "x"})))?;
        assert_eq!(buf.ts_range(), (None, None));
        Ok(())
    }
}
