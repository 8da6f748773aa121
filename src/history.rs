use crate::config::Config;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryAction {
    Trash,
    Delete,
}

impl HistoryAction {
    fn as_str(self) -> &'static str {
        match self {
            HistoryAction::Trash => "TRASH",
            HistoryAction::Delete => "DELETE",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "TRASH" => Some(HistoryAction::Trash),
            "DELETE" => Some(HistoryAction::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub action: HistoryAction,
    pub path: PathBuf,
    pub size: Option<u64>,
}

impl HistoryEntry {
    pub fn new(action: HistoryAction, path: PathBuf) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            path,
            size: None,
        }
    }

    pub fn with_size(mut self, size: Option<u64>) -> Self {
        self.size = size;
        self
    }

    /// `<rfc3339> <ACTION> [size=<bytes>] <path>`; the path goes last since it may contain spaces.
    pub fn to_log_line(&self) -> String {
        let size_str = self
            .size
            .map(|s| format!("size={s} "))
            .unwrap_or_default();
        format!(
            "{} {} {}{}\n",
            self.timestamp.to_rfc3339(),
            self.action,
            size_str,
            self.path.display()
        )
    }

    fn parse_line(line: &str) -> Option<Self> {
        let (timestamp, rest) = line.split_once(' ')?;
        let (action, rest) = rest.split_once(' ')?;

        let timestamp = DateTime::parse_from_rfc3339(timestamp)
            .ok()?
            .with_timezone(&Utc);
        let action = HistoryAction::parse(action)?;

        let (size, path) = match rest.strip_prefix("size=").and_then(|r| r.split_once(' ')) {
            Some((size, path)) => (Some(size.parse::<u64>().ok()?), path),
            None => (None, rest),
        };
        if path.is_empty() {
            return None;
        }

        Some(Self {
            timestamp,
            action,
            path: PathBuf::from(path),
            size,
        })
    }
}

/// Append-only log of completed deletions.
#[derive(Debug, Clone)]
pub struct HistoryLogger {
    log_path: PathBuf,
}

impl HistoryLogger {
    pub fn new() -> Self {
        Self::at(Config::data_dir().join("history.log"))
    }

    pub fn at(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
        }
    }

    pub fn log(&self, entry: &HistoryEntry) -> Result<()> {
        if let Some(parent) = self.log_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;

        write!(file, "{}", entry.to_log_line())?;
        Ok(())
    }

    pub fn log_removal(&self, action: HistoryAction, path: &Path, size: Option<u64>) -> Result<()> {
        self.log(&HistoryEntry::new(action, path.to_path_buf()).with_size(size))
    }

    /// Newest entries first; malformed lines are skipped.
    pub fn read_history(&self, limit: Option<usize>) -> Result<Vec<HistoryEntry>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.log_path)?;
        let entries = content
            .lines()
            .filter_map(HistoryEntry::parse_line)
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .collect();

        Ok(entries)
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }
}

impl Default for HistoryLogger {
    fn default() -> Self {
        Self::new()
    }
}
