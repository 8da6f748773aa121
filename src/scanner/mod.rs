pub mod aggregator;
pub mod capacity;
pub mod sampler;

pub use aggregator::DirectoryAggregator;
pub use capacity::{CapacitySource, DiskCapacity, SystemCapacity};

use crate::error::ScanError;
use crate::model::DirectoryInfo;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::fs;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};
use walkdir::WalkDir;

/// Directory extensions treated as a single opaque item.
const BUNDLE_EXTENSIONS: &[&str] = &[
    "app",
    "appex",
    "bundle",
    "framework",
    "kext",
    "mdimporter",
    "musiclibrary",
    "photoslibrary",
    "pkg",
    "plugin",
    "prefpane",
    "qlgenerator",
    "saver",
    "tvlibrary",
    "xcarchive",
    "xpc",
];

/// Cooperative stop flag for one root, linked to the session-wide cancel flag.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    session: Arc<AtomicBool>,
    local: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn linked(session: Arc<AtomicBool>) -> Self {
        Self {
            session,
            local: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn trigger(&self) {
        self.local.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.session.load(Ordering::SeqCst) || self.local.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    patterns: Vec<glob::Pattern>,
}

impl ExclusionSet {
    pub fn new(patterns: &[String]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|p| match glob::Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!("ignoring invalid exclusion pattern {p:?}: {e}");
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        self.patterns.iter().any(|p| p.matches_path(path))
    }
}

#[derive(Clone)]
pub struct ScanPolicy {
    pub max_depth: usize,
    pub max_entries: usize,
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub track_largest: usize,
    pub excluded: ExclusionSet,
    pub stop: StopSignal,
    pub progress_callback: Option<Arc<dyn Fn(u64) + Send + Sync>>,
    pub warning_callback: Option<Arc<dyn Fn(&str) + Send + Sync>>,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self {
            max_depth: 4,
            max_entries: 100_000,
            batch_size: 100,
            batch_delay: Duration::from_millis(10),
            track_largest: 0,
            excluded: ExclusionSet::default(),
            stop: StopSignal::new(),
            progress_callback: None,
            warning_callback: None,
        }
    }
}

impl ScanPolicy {
    pub fn report_batch(&self, bytes: u64) {
        if let Some(cb) = &self.progress_callback {
            cb(bytes);
        }
    }

    pub fn report_warning(&self, message: &str) {
        warn!("{message}");
        if let Some(cb) = &self.warning_callback {
            cb(message);
        }
    }
}

/// Produces the aggregate for one root. The orchestrator races it against a timer.
pub trait RootScanner: Send + Sync {
    fn scan_root(
        &self,
        root: &Path,
        policy: &ScanPolicy,
    ) -> impl Future<Output = Result<DirectoryInfo, ScanError>> + Send;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Tally {
    pub size: u64,
    pub files: u64,
    pub visited: usize,
    pub truncated: bool,
    pub interrupted: bool,
}

pub(crate) fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

pub(crate) fn is_bundle(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            BUNDLE_EXTENSIONS
                .iter()
                .any(|b| b.eq_ignore_ascii_case(e))
        })
        .unwrap_or(false)
}

/// Sums every regular file beneath `dir`, visiting at most `max_entries` entries.
pub(crate) fn tally_tree(
    dir: &Path,
    max_entries: usize,
    excluded: &ExclusionSet,
    stop: Option<&StopSignal>,
) -> Tally {
    let mut tally = Tally::default();
    let mut walker = WalkDir::new(dir).min_depth(1).follow_links(false).into_iter();

    while let Some(next) = walker.next() {
        if stop.map(StopSignal::is_set).unwrap_or(false) {
            tally.interrupted = true;
            break;
        }

        let entry = match next {
            Ok(entry) => entry,
            Err(e) => {
                trace!("skipping unreadable entry under {}: {e}", dir.display());
                continue;
            }
        };

        let is_dir = entry.file_type().is_dir();
        if is_hidden(entry.path()) || excluded.is_excluded(entry.path()) {
            if is_dir {
                walker.skip_current_dir();
            }
            continue;
        }

        if tally.visited >= max_entries {
            tally.truncated = true;
            break;
        }
        tally.visited += 1;

        if entry.file_type().is_file() {
            if let Ok(metadata) = entry.metadata() {
                tally.size += metadata.len();
                tally.files += 1;
            }
        }
    }

    tally
}

pub fn get_last_modified(path: &Path) -> Option<DateTime<Utc>> {
    path.symlink_metadata()
        .ok()
        .and_then(|m| m.modified().ok())
        .map(|t| t.into())
}

/// Days since last modification; reads the filesystem when `info` has no timestamp.
pub fn age_in_days(info: &DirectoryInfo, now: DateTime<Utc>) -> Option<i64> {
    info.last_modified
        .or_else(|| get_last_modified(&info.path))
        .map(|modified| (now - modified).num_days())
}

pub fn format_age(days: i64) -> String {
    if days < 30 {
        format!("{days} d")
    } else if days < 365 {
        format!("{} mo", days / 30)
    } else {
        let years = days / 365;
        let months = (days % 365) / 30;
        if months > 0 {
            format!("{years} y {months} mo")
        } else {
            format!("{years} y")
        }
    }
}

/// Expands `path` by exactly one level: every visible child directory with its
/// bounded size, file count and modification time, largest first.
pub fn scan_children(
    path: &Path,
    max_entries: usize,
    excluded: &ExclusionSet,
) -> Vec<DirectoryInfo> {
    let entries: Vec<_> = match fs::read_dir(path) {
        Ok(read_dir) => read_dir
            .flatten()
            .map(|e| e.path())
            .filter(|p| !is_hidden(p) && !excluded.is_excluded(p))
            .filter(|p| {
                p.symlink_metadata()
                    .map(|m| m.is_dir())
                    .unwrap_or(false)
            })
            .collect(),
        Err(e) => {
            trace!("cannot list {}: {e}", path.display());
            return Vec::new();
        }
    };

    let mut children: Vec<DirectoryInfo> = entries
        .par_iter()
        .map(|child| {
            let tally = tally_tree(child, max_entries, excluded, None);
            DirectoryInfo::new(child.clone())
                .with_size(tally.size)
                .with_file_count(tally.files)
                .with_last_modified(get_last_modified(child))
                .with_truncated(tally.truncated)
        })
        .collect();

    children.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.path.cmp(&b.path)));
    children
}
