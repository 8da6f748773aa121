pub mod apps;
mod families;

use apps::{AppCatalog, InstalledApps};

use crate::model::{DirectoryInfo, RiskLevel};
use crate::scanner::{scan_children, ExclusionSet};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const DEFAULT_CHILD_ENTRY_LIMIT: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisCoverage {
    Complete,
    /// A recognized family, but no children could be listed or scanned.
    NoData,
    /// No family rules apply to this path.
    Unrecognized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderFamily {
    RootLibrary,
    Caches,
    Logs,
    ApplicationSupport,
    Containers,
    PrivateVar,
    Usr,
    Other,
}

impl FolderFamily {
    pub fn detect(path: &Path) -> Self {
        let lower = path.to_string_lossy().to_lowercase();
        let lower = lower.trim_end_matches('/');

        if lower == "/library" {
            FolderFamily::RootLibrary
        } else if lower.contains("/library/caches") {
            FolderFamily::Caches
        } else if lower.contains("/library/logs") {
            FolderFamily::Logs
        } else if lower.contains("/library/application support") {
            FolderFamily::ApplicationSupport
        } else if lower.contains("/library/containers") {
            FolderFamily::Containers
        } else if lower.starts_with("/private/var") {
            FolderFamily::PrivateVar
        } else if lower == "/usr" || lower.starts_with("/usr/") {
            FolderFamily::Usr
        } else {
            FolderFamily::Other
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailedRecommendation {
    pub title: String,
    pub path: PathBuf,
    pub size: u64,
    pub is_deletable: bool,
    pub risk: RiskLevel,
    pub group: String,
    /// Share of `size` counted toward the reclaimable estimate.
    pub deletable_percent: u8,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_days: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemFolderAnalysis {
    pub path: PathBuf,
    pub total_size: u64,
    pub deletable_size: u64,
    pub breakdown: BTreeMap<String, u64>,
    pub recommendations: Vec<DetailedRecommendation>,
    pub summary: String,
    pub coverage: AnalysisCoverage,
}

impl SystemFolderAnalysis {
    pub fn deletable_percent(&self) -> f64 {
        if self.total_size == 0 {
            0.0
        } else {
            self.deletable_size as f64 / self.total_size as f64 * 100.0
        }
    }
}

/// One child's verdict before it is folded into the analysis.
struct Item {
    title: String,
    group: &'static str,
    percent: u8,
    is_deletable: bool,
    risk: RiskLevel,
    description: String,
    age_days: Option<i64>,
}

impl Item {
    fn new(title: String, group: &'static str, percent: u8) -> Self {
        Self {
            title,
            group,
            percent,
            is_deletable: false,
            risk: RiskLevel::Medium,
            description: String::new(),
            age_days: None,
        }
    }

    fn deletable(mut self, risk: RiskLevel) -> Self {
        self.is_deletable = true;
        self.risk = risk;
        self
    }

    fn kept(mut self, risk: RiskLevel) -> Self {
        self.is_deletable = false;
        self.risk = risk;
        self
    }

    fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    fn aged(mut self, age_days: Option<i64>) -> Self {
        self.age_days = age_days;
        self
    }
}

#[derive(Default)]
struct Accumulator {
    deletable: u64,
    breakdown: BTreeMap<String, u64>,
    recommendations: Vec<DetailedRecommendation>,
}

impl Accumulator {
    fn add(&mut self, child: &DirectoryInfo, item: Item) {
        *self.breakdown.entry(item.group.to_string()).or_insert(0) += child.size;
        self.deletable += (u128::from(child.size) * u128::from(item.percent) / 100) as u64;
        self.recommendations.push(DetailedRecommendation {
            title: item.title,
            path: child.path.clone(),
            size: child.size,
            is_deletable: item.is_deletable,
            risk: item.risk,
            group: item.group.to_string(),
            deletable_percent: item.percent,
            description: item.description,
            age_days: item.age_days,
        });
    }

    fn finish(
        self,
        path: &Path,
        total_size: u64,
        summary: String,
        coverage: AnalysisCoverage,
    ) -> SystemFolderAnalysis {
        SystemFolderAnalysis {
            path: path.to_path_buf(),
            total_size,
            deletable_size: self.deletable,
            breakdown: self.breakdown,
            recommendations: self.recommendations,
            summary,
            coverage,
        }
    }
}

/// Family-specific breakdown of well-known system folders.
pub struct SystemFolderAnalyzer {
    catalog: AppCatalog,
    child_entry_limit: usize,
    excluded: ExclusionSet,
}

impl SystemFolderAnalyzer {
    pub fn new() -> Self {
        Self {
            catalog: AppCatalog::new(),
            child_entry_limit: DEFAULT_CHILD_ENTRY_LIMIT,
            excluded: ExclusionSet::default(),
        }
    }

    #[cfg(test)]
    pub fn with_catalog(mut self, catalog: AppCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_child_entry_limit(mut self, limit: usize) -> Self {
        self.child_entry_limit = limit;
        self
    }

    pub fn with_excluded(mut self, excluded: ExclusionSet) -> Self {
        self.excluded = excluded;
        self
    }

    /// Discards the cached installed-application list and rebuilds it.
    pub fn refresh_apps(&self) -> Arc<InstalledApps> {
        self.catalog.invalidate();
        self.catalog.snapshot()
    }

    pub fn analyze(&self, path: &Path, info: &DirectoryInfo) -> SystemFolderAnalysis {
        self.analyze_at(path, info, Utc::now())
    }

    pub fn analyze_at(
        &self,
        path: &Path,
        info: &DirectoryInfo,
        now: DateTime<Utc>,
    ) -> SystemFolderAnalysis {
        let family = FolderFamily::detect(path);
        let mut acc = Accumulator::default();

        match family {
            FolderFamily::Other => {
                return acc.finish(
                    path,
                    info.size,
                    "No detailed rules exist for this directory.".to_string(),
                    AnalysisCoverage::Unrecognized,
                );
            }
            FolderFamily::Usr => {
                acc.add(
                    info,
                    Item::new("/usr (system directory)".to_string(), "System files", 0)
                        .kept(RiskLevel::Critical)
                        .describe("Executables, libraries and tools the system depends on. Do not delete."),
                );
                return acc.finish(
                    path,
                    info.size,
                    "System binaries and libraries. Changes can leave the system unusable."
                        .to_string(),
                    AnalysisCoverage::Complete,
                );
            }
            _ => {}
        }

        let children = self.children(path, info);
        if children.is_empty() {
            debug!("{}: no children to analyze", path.display());
            return acc.finish(
                path,
                info.size,
                format!("No subdirectory data is available for {}.", path.display()),
                AnalysisCoverage::NoData,
            );
        }

        let summary = match family {
            FolderFamily::RootLibrary => families::root_library(&children, &mut acc),
            FolderFamily::Caches => families::caches(&children, &mut acc),
            FolderFamily::Logs => families::logs(&children, now, &mut acc),
            FolderFamily::ApplicationSupport => {
                let apps = self.catalog.snapshot();
                families::application_support(&children, &apps, now, &mut acc)
            }
            FolderFamily::Containers => {
                let apps = self.catalog.snapshot();
                families::containers(&children, &apps, &mut acc)
            }
            FolderFamily::PrivateVar => families::private_var(&children, &mut acc),
            FolderFamily::Usr | FolderFamily::Other => String::new(),
        };

        let children_total: u64 = children.iter().map(|c| c.size).sum();
        acc.finish(
            path,
            info.size.max(children_total),
            summary,
            AnalysisCoverage::Complete,
        )
    }

    /// Expanded children from `info`, or a fresh one-level scan when it has none.
    fn children(&self, path: &Path, info: &DirectoryInfo) -> Vec<DirectoryInfo> {
        if !info.subdirectories.is_empty() {
            return info.subdirectories.clone();
        }
        scan_children(path, self.child_entry_limit, &self.excluded)
    }
}

impl Default for SystemFolderAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
