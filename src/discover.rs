// src/discover.rs

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Regular files in `dir` matching `mask`, sorted by path, at most `limit`.
pub fn find_log_files(dir: &Path, mask: &str, limit: usize) -> Result<Vec<PathBuf>> {
    let pattern = dir.join(mask);
    let pattern = pattern.to_string_lossy();
    let mut files = Vec::new();
    for entry in glob::glob(&pattern).with_context(|| format!("bad file mask {pattern}"))? {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(path) => debug!(path = %path.display(), "skipping non-file"),
            Err(e) => warn!(error = %e, "unreadable path while scanning"),
        }
    }
    files.sort();
    files.truncate(limit);
    Ok(files)
}
