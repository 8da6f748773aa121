use crate::model::DirectoryInfo;
use crate::scanner::DiskCapacity;
use chrono::Local;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::Idle => write!(f, "idle"),
            SessionPhase::Running => write!(f, "running"),
            SessionPhase::Completed => write!(f, "completed"),
            SessionPhase::Cancelled => write!(f, "cancelled"),
            SessionPhase::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Event lines for display, oldest evicted first.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    capacity: usize,
    lines: VecDeque<String>,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            lines: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, line: String) {
        while self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.lines.iter()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

/// Progress and results of one analysis session.
///
/// Published as snapshots; readers may observe a slightly stale copy.
/// `analyzed_percent` is not clamped and always equals
/// `analyzed_size / used_size * 100` (0 while `used_size` is 0).
#[derive(Debug, Clone)]
pub struct AnalysisState {
    pub total_size: u64,
    pub used_size: u64,
    pub free_size: u64,
    pub analyzed_size: u64,
    pub analyzed_percent: f64,
    pub is_analyzing: bool,
    pub phase: SessionPhase,
    pub current_directory: Option<PathBuf>,
    pub directories: BTreeMap<PathBuf, DirectoryInfo>,
    pub logs: LogBuffer,
    pub error: Option<String>,
}

impl AnalysisState {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            total_size: 0,
            used_size: 0,
            free_size: 0,
            analyzed_size: 0,
            analyzed_percent: 0.0,
            is_analyzing: false,
            phase: SessionPhase::Idle,
            current_directory: None,
            directories: BTreeMap::new(),
            logs: LogBuffer::new(log_capacity),
            error: None,
        }
    }

    /// Clears every accumulator ahead of a new session.
    pub fn reset(&mut self) {
        let capacity = self.logs.capacity;
        *self = Self::new(capacity);
    }

    pub fn set_capacity(&mut self, capacity: DiskCapacity) {
        self.total_size = capacity.total;
        self.used_size = capacity.used;
        self.free_size = capacity.free;
        self.recompute_percent();
    }

    pub fn capacity(&self) -> DiskCapacity {
        DiskCapacity {
            total: self.total_size,
            used: self.used_size,
            free: self.free_size,
        }
    }

    pub fn add_analyzed(&mut self, bytes: u64) {
        self.analyzed_size = self.analyzed_size.saturating_add(bytes);
        self.recompute_percent();
    }

    fn recompute_percent(&mut self) {
        self.analyzed_percent = if self.used_size == 0 {
            0.0
        } else {
            self.analyzed_size as f64 / self.used_size as f64 * 100.0
        };
    }

    pub fn display_percent(&self) -> f64 {
        self.analyzed_percent.clamp(0.0, 100.0)
    }

    /// Appends a timestamped line and emits it as a tracing event.
    pub fn log(&mut self, level: LogLevel, message: impl AsRef<str>) {
        let message = message.as_ref();
        match level {
            LogLevel::Info => info!("{message}"),
            LogLevel::Warn => warn!("{message}"),
            LogLevel::Error => error!("{message}"),
        }
        self.push_line(message);
    }

    /// Appends a line that has already been traced elsewhere.
    pub fn push_line(&mut self, message: &str) {
        self.logs
            .push(format!("[{}] {message}", Local::now().format("%H:%M:%S")));
    }
}

impl Default for AnalysisState {
    fn default() -> Self {
        Self::new(300)
    }
}
