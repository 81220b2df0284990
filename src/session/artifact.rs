// src/session/artifact.rs

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::RowError;

/// `<source>.<session_id>.error`
pub fn error_file_path(source: &Path, session_id: i64) -> PathBuf {
    let mut name = OsString::from(source.as_os_str());
    name.push(format!(".{session_id}.error"));
    PathBuf::from(name)
}

/// Rejected lines of one file, kept next to the source until the session
/// commits.
pub struct ErrorArtifact {
    out: BufWriter<NamedTempFile>,
    rows: u64,
}

impl ErrorArtifact {
    /// Temp file in the directory of `source`, so the final rename stays on
    /// one filesystem.
    pub fn beside(source: &Path) -> Result<Self> {
        let dir = match source.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let file = NamedTempFile::new_in(dir)
            .with_context(|| format!("creating error file in {}", dir.display()))?;
        Ok(Self {
            out: BufWriter::new(file),
            rows: 0,
        })
    }

    pub fn record(&mut self, row: u64, err: &RowError, line: &str) -> Result<()> {
        writeln!(self.out, "# row {row}: {err}")
            .and_then(|_| writeln!(self.out, "{line}"))
            .context("writing error file")?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Keep the file at `target` if anything was recorded; otherwise delete it.
    pub fn persist(self, target: &Path) -> Result<Option<PathBuf>> {
        if self.rows == 0 {
            return Ok(None);
        }
        let file = self
            .out
            .into_inner()
            .map_err(|e| e.into_error())
            .context("flushing error file")?;
        file.persist(target)
            .with_context(|| format!("saving error file {}", target.display()))?;
        Ok(Some(target.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn empty_artifact_leaves_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("a.log");
        let artifact = ErrorArtifact::beside(&source)?;
        assert_eq!(artifact.persist(&error_file_path(&source, 3))?, None);
        assert_eq!(fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[test]
    fn recorded_rows_are_persisted() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("a.log");
        let mut artifact = ErrorArtifact::beside(&source)?;
        artifact.record(
            2,
            &RowError::TooFewTokens {
                tokens: 1,
                expected: 3,
            },
            "garbage",
        )?;
        let target = error_file_path(&source, 3);
        assert_eq!(artifact.persist(&target)?, Some(target.clone()));
        assert!(target.ends_with("a.log.3.error"));
        let text = fs::read_to_string(&target)?;
        assert_eq!(
            text,
            "# row 2: line split into 1 tokens, expected at least 3\ngarbage\n"
        );
        Ok(())
    }
}
