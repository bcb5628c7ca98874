use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Timelike};
use log::debug;

const TIMESTAMP_FORMAT: &str = "%m/%d/%Y %I:%M:%S %p";

/// A failure block that references a staged input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEntry {
    pub timestamp: NaiveDateTime,
    pub text: String,
}

fn is_delimiter(line: &str) -> bool {
    let t = line.trim();
    t.len() >= 3 && t.chars().all(|c| c == '-')
}

/// Split log text into dash-delimited blocks, dropping empty ones
pub fn split_blocks(content: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current = Vec::new();

    for line in content.lines() {
        if is_delimiter(line) {
            if current.iter().any(|l: &&str| !l.trim().is_empty()) {
                blocks.push(current.join("\n"));
            }
            current.clear();
        } else {
            current.push(line);
        }
    }
    if current.iter().any(|l| !l.trim().is_empty()) {
        blocks.push(current.join("\n"));
    }
    blocks
}

/// Timestamp from the first line of `block` that starts with one
pub fn block_timestamp(block: &str) -> Option<NaiveDateTime> {
    block.lines().find_map(|line| {
        let tokens: Vec<&str> = line.split_whitespace().take(3).collect();
        if tokens.len() < 3 {
            return None;
        }
        NaiveDateTime::parse_from_str(&tokens.join(" "), TIMESTAMP_FORMAT).ok()
    })
}

fn references(block: &str, staged_input: &Path) -> bool {
    let haystack = block.to_lowercase();
    let full = staged_input.to_string_lossy().to_lowercase();
    if !full.is_empty() && haystack.contains(&full) {
        return true;
    }
    staged_input
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .map(|n| !n.is_empty() && haystack.contains(&n))
        .unwrap_or(false)
}

/// Find a block in `content` that references `staged_input` and is
/// timestamped at or after `since` (compared at whole-second precision).
///
/// Blocks without a parseable timestamp cannot be ordered against the stage
/// start and are ignored.
pub fn find_failure_in(content: &str, staged_input: &Path, since: NaiveDateTime) -> Option<ErrorEntry> {
    let since = since.with_nanosecond(0).unwrap_or(since);

    split_blocks(content).into_iter().find_map(|block| {
        let timestamp = block_timestamp(&block)?;
        if timestamp >= since && references(&block, staged_input) {
            Some(ErrorEntry { timestamp, text: block })
        } else {
            None
        }
    })
}

/// Handle on the encoder's error log file
#[derive(Debug, Clone)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Look for a failure of `staged_input` logged at or after `since`.
    ///
    /// A log that does not exist yet means no failure.
    pub fn find_failure(&self, staged_input: &Path, since: NaiveDateTime) -> Result<Option<ErrorEntry>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Encoder error log not present: {}", self.path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read encoder error log: {}", self.path.display()))
            }
        };
        let content = String::from_utf8_lossy(&bytes);
        Ok(find_failure_in(&content, staged_input, since))
    }
}
