//! Run and replicate identity types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier for one calibration run.
///
/// Format: `sbc-YYYYMMDD-HHMMSS-xxxxxx` (six lowercase hex characters).
/// Example: `sbc-20260115-143022-a7f03c`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new run ID.
    pub fn new() -> Self {
        let now = chrono::Utc::now();
        let suffix: String = uuid::Uuid::new_v4().simple().to_string()[..6].to_string();
        RunId(format!(
            "sbc-{}-{}-{}",
            now.format("%Y%m%d"),
            now.format("%H%M%S"),
            suffix
        ))
    }

    /// Parse an existing run ID string.
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != 26 || !s.starts_with("sbc-") {
            return None;
        }
        let bytes = s.as_bytes();
        if bytes[12] != b'-' || bytes[19] != b'-' {
            return None;
        }
        let date = &s[4..12];
        let time = &s[13..19];
        let suffix = &s[20..26];
        if !date.chars().all(|c| c.is_ascii_digit()) || !time.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        if !suffix.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')) {
            return None;
        }
        Some(RunId(s.to_string()))
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 1-based replicate index; the key of every persisted replicate record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicateIndex(pub u32);

impl ReplicateIndex {
    pub fn get(self) -> u32 {
        self.0
    }

    /// File stem used by the run store: `rep-000042`.
    pub fn file_stem(self) -> String {
        format!("rep-{:06}", self.0)
    }

    /// Inverse of [`ReplicateIndex::file_stem`].
    pub fn from_file_stem(stem: &str) -> Option<Self> {
        let digits = stem.strip_prefix("rep-")?;
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok().map(ReplicateIndex)
    }
}

impl fmt::Display for ReplicateIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ReplicateIndex {
    fn from(index: u32) -> Self {
        ReplicateIndex(index)
    }
}
