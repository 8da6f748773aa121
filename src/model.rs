use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::scanner::capacity::DiskCapacity;

/// Aggregated size information for one scanned path.
///
/// `size` is a lower bound whenever `truncated` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryInfo {
    pub path: PathBuf,
    pub size: u64,
    pub file_count: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subdirectories: Vec<DirectoryInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub largest_files: Vec<FileInfo>,
}

impl DirectoryInfo {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            size: 0,
            file_count: 0,
            subdirectories: Vec::new(),
            last_modified: None,
            truncated: false,
            largest_files: Vec::new(),
        }
    }

    /// Zero-valued placeholder for a root that could not be scanned in full.
    pub fn incomplete(path: impl Into<PathBuf>) -> Self {
        Self::new(path).with_truncated(true)
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_file_count(mut self, count: u64) -> Self {
        self.file_count = count;
        self
    }

    #[cfg(test)]
    pub fn with_subdirectories(mut self, subdirectories: Vec<DirectoryInfo>) -> Self {
        self.subdirectories = subdirectories;
        self
    }

    pub fn with_last_modified(mut self, dt: Option<DateTime<Utc>>) -> Self {
        self.last_modified = dt;
        self
    }

    pub fn with_truncated(mut self, truncated: bool) -> Self {
        self.truncated = truncated;
        self
    }

    pub fn with_largest_files(mut self, files: Vec<FileInfo>) -> Self {
        self.largest_files = files;
        self
    }

    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: PathBuf,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupCategory {
    Cache,
    Logs,
    Downloads,
    Duplicates,
    Temporary,
    OldFiles,
    Applications,
    Other,
}

impl std::fmt::Display for CleanupCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CleanupCategory::Cache => write!(f, "Cache"),
            CleanupCategory::Logs => write!(f, "Logs"),
            CleanupCategory::Downloads => write!(f, "Downloads"),
            CleanupCategory::Duplicates => write!(f, "Duplicates"),
            CleanupCategory::Temporary => write!(f, "Temporary"),
            CleanupCategory::OldFiles => write!(f, "Old files"),
            CleanupCategory::Applications => write!(f, "Applications"),
            CleanupCategory::Other => write!(f, "Other"),
        }
    }
}

/// Ordered from least to most cautious.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Safe,
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Safe => write!(f, "safe"),
            RiskLevel::Low => write!(f, "low risk"),
            RiskLevel::Medium => write!(f, "medium risk"),
            RiskLevel::High => write!(f, "high risk"),
            RiskLevel::Critical => write!(f, "do not delete"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupRecommendation {
    pub path: PathBuf,
    pub size: u64,
    pub is_deletable: bool,
    pub reason: String,
    pub category: CleanupCategory,
    pub risk: RiskLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub path: PathBuf,
    pub name: String,
    pub total_size: u64,
    pub used_size: u64,
    pub free_size: u64,
    pub is_removable: bool,
    #[serde(default)]
    pub directories: Vec<DirectoryInfo>,
}

impl VolumeInfo {
    pub fn new(path: impl Into<PathBuf>, capacity: DiskCapacity, is_removable: bool) -> Self {
        let path = path.into();
        let name = volume_name(&path);
        Self {
            path,
            name,
            total_size: capacity.total,
            used_size: capacity.used,
            free_size: capacity.free,
            is_removable,
            directories: Vec::new(),
        }
    }

    pub fn with_directories(mut self, directories: &BTreeMap<PathBuf, DirectoryInfo>) -> Self {
        self.directories = directories.values().cloned().collect();
        self
    }

    pub fn analyzed_size(&self) -> u64 {
        self.directories.iter().map(|d| d.size).sum()
    }
}

fn volume_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "Macintosh HD".to_string())
}
