//! Path-pattern rules that turn a scanned directory into cleanup recommendations.
//!
//! Rules are evaluated in table order and the first match wins. All matching is
//! done against the lowercased absolute path.

use crate::model::{CleanupCategory, CleanupRecommendation, DirectoryInfo, RiskLevel};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const LARGE_FILE_BYTES: u64 = 1_000_000_000;
const STALE_DOWNLOAD_DAYS: i64 = 30;

struct RuleInput<'a> {
    info: &'a DirectoryInfo,
    lower: String,
    now: DateTime<Utc>,
}

impl RuleInput<'_> {
    fn has(&self, needle: &str) -> bool {
        self.lower.contains(needle)
    }

    fn under(&self, prefix: &str) -> bool {
        Path::new(&self.lower).starts_with(prefix)
    }
}

struct Verdict {
    is_deletable: bool,
    category: CleanupCategory,
    risk: RiskLevel,
    reason: &'static str,
}

impl Verdict {
    const fn new(
        is_deletable: bool,
        category: CleanupCategory,
        risk: RiskLevel,
        reason: &'static str,
    ) -> Self {
        Self {
            is_deletable,
            category,
            risk,
            reason,
        }
    }
}

struct Rule {
    name: &'static str,
    matches: fn(&RuleInput) -> bool,
    verdict: fn(&RuleInput) -> Verdict,
}

const RULES: &[Rule] = &[
    Rule {
        name: "os-root",
        matches: |i| i.under("/system") || i.under("/usr"),
        verdict: |_| {
            Verdict::new(
                false,
                CleanupCategory::Other,
                RiskLevel::Critical,
                "Operating system files. Do not delete.",
            )
        },
    },
    Rule {
        name: "cache",
        matches: |i| i.has("/caches") || i.has("/cache"),
        verdict: |_| {
            Verdict::new(
                true,
                CleanupCategory::Cache,
                RiskLevel::Safe,
                "Cache files are safe to delete. Applications recreate them when needed.",
            )
        },
    },
    Rule {
        name: "logs",
        matches: |i| i.has("/logs") || i.lower.ends_with(".log"),
        verdict: |_| {
            Verdict::new(
                true,
                CleanupCategory::Logs,
                RiskLevel::Safe,
                "Old log files can be removed to free space.",
            )
        },
    },
    Rule {
        name: "downloads",
        matches: |i| i.has("/downloads"),
        verdict: |i| {
            if is_older_than(i.info, i.now, STALE_DOWNLOAD_DAYS) {
                Verdict::new(
                    true,
                    CleanupCategory::Downloads,
                    RiskLevel::Low,
                    "Downloads untouched for over 30 days. Review before deleting.",
                )
            } else {
                Verdict::new(
                    false,
                    CleanupCategory::Downloads,
                    RiskLevel::Medium,
                    "Recent downloads. Review manually.",
                )
            }
        },
    },
    Rule {
        name: "temporary",
        matches: |i| i.has("/tmp") || i.has("/temp") || i.has("/.trash"),
        verdict: |_| {
            Verdict::new(
                true,
                CleanupCategory::Temporary,
                RiskLevel::Safe,
                "Temporary files and trash can be removed.",
            )
        },
    },
    Rule {
        name: "derived-data",
        matches: |i| i.has("/deriveddata"),
        verdict: |_| {
            Verdict::new(
                true,
                CleanupCategory::Cache,
                RiskLevel::Safe,
                "Xcode DerivedData is rebuilt on the next build.",
            )
        },
    },
    Rule {
        name: "node-modules",
        matches: |i| i.has("/node_modules"),
        verdict: |_| {
            Verdict::new(
                true,
                CleanupCategory::Cache,
                RiskLevel::Low,
                "node_modules can be restored with `npm install`.",
            )
        },
    },
    Rule {
        name: "cocoapods",
        matches: |i| i.has("/pods") && !i.has("podcast"),
        verdict: |_| {
            Verdict::new(
                true,
                CleanupCategory::Cache,
                RiskLevel::Low,
                "CocoaPods can be restored with `pod install`.",
            )
        },
    },
    Rule {
        name: "simulator-devices",
        matches: |i| i.has("/devices") && i.has("/coresimulator"),
        verdict: |_| {
            Verdict::new(
                true,
                CleanupCategory::Cache,
                RiskLevel::Safe,
                "iOS simulator data. Old devices can be removed from Xcode.",
            )
        },
    },
    Rule {
        name: "safari",
        matches: |i| i.has("/safari") && (i.has("/cache") || i.has("/history")),
        verdict: |_| {
            Verdict::new(
                true,
                CleanupCategory::Cache,
                RiskLevel::Low,
                "Safari history and cache can be cleared.",
            )
        },
    },
    Rule {
        name: "mail-attachments",
        matches: |i| i.has("/mail") && i.has("/attachments"),
        verdict: |_| {
            Verdict::new(
                false,
                CleanupCategory::Other,
                RiskLevel::High,
                "Mail attachments. Review manually before deleting.",
            )
        },
    },
    Rule {
        name: "application-support",
        matches: |i| i.has("/application support"),
        verdict: |i| {
            if i.has("/cache") || i.has("/logs") {
                Verdict::new(
                    true,
                    CleanupCategory::Cache,
                    RiskLevel::Safe,
                    "Application cache can be deleted.",
                )
            } else {
                Verdict::new(
                    false,
                    CleanupCategory::Other,
                    RiskLevel::High,
                    "Application data. Deleting it may lose settings.",
                )
            }
        },
    },
    Rule {
        name: "system-library",
        matches: |i| i.under("/library"),
        verdict: |_| {
            Verdict::new(
                false,
                CleanupCategory::Other,
                RiskLevel::Critical,
                "System files. Do not delete.",
            )
        },
    },
    Rule {
        name: "personal",
        matches: |i| i.has("/desktop") || i.has("/documents") || i.has("/pictures"),
        verdict: |_| {
            Verdict::new(
                false,
                CleanupCategory::Other,
                RiskLevel::Critical,
                "Personal files. Manage them manually.",
            )
        },
    },
    Rule {
        name: "large-file",
        matches: |i| i.info.file_count == 1 && i.info.size > LARGE_FILE_BYTES,
        verdict: |_| {
            Verdict::new(
                false,
                CleanupCategory::OldFiles,
                RiskLevel::Medium,
                "Large file (over 1 GB). Check whether it is still needed.",
            )
        },
    },
];

const FALLBACK: Verdict = Verdict::new(
    false,
    CleanupCategory::Other,
    RiskLevel::Medium,
    "Review the contents manually.",
);

fn is_older_than(info: &DirectoryInfo, now: DateTime<Utc>, days: i64) -> bool {
    info.last_modified
        .map(|modified| modified < now - Duration::days(days))
        .unwrap_or(false)
}

fn evaluate(info: &DirectoryInfo, now: DateTime<Utc>) -> (&'static str, Verdict) {
    let input = RuleInput {
        info,
        lower: info.path.to_string_lossy().to_lowercase(),
        now,
    };
    RULES
        .iter()
        .find(|rule| (rule.matches)(&input))
        .map(|rule| (rule.name, (rule.verdict)(&input)))
        .unwrap_or(("fallback", FALLBACK))
}

pub fn classify(info: &DirectoryInfo) -> Vec<CleanupRecommendation> {
    classify_at(info, Utc::now())
}

/// Classifies against a fixed clock. Always returns at least one recommendation.
pub fn classify_at(info: &DirectoryInfo, now: DateTime<Utc>) -> Vec<CleanupRecommendation> {
    let (_, verdict) = evaluate(info, now);
    vec![CleanupRecommendation {
        path: info.path.clone(),
        size: info.size,
        is_deletable: verdict.is_deletable,
        reason: verdict.reason.to_string(),
        category: verdict.category,
        risk: verdict.risk,
    }]
}

/// Name of the rule that decides `info`, for diagnostics.
pub fn matched_rule(info: &DirectoryInfo, now: DateTime<Utc>) -> &'static str {
    evaluate(info, now).0
}

/// The `n` largest directories, largest first. Equal sizes keep path order.
pub fn top_directories(
    directories: &BTreeMap<PathBuf, DirectoryInfo>,
    n: usize,
) -> Vec<&DirectoryInfo> {
    let mut ranked: Vec<&DirectoryInfo> = directories.values().collect();
    ranked.sort_by(|a, b| b.size.cmp(&a.size));
    ranked.truncate(n);
    ranked
}

pub fn recommend_top(
    directories: &BTreeMap<PathBuf, DirectoryInfo>,
    n: usize,
    now: DateTime<Utc>,
) -> Vec<CleanupRecommendation> {
    top_directories(directories, n)
        .into_iter()
        .flat_map(|info| classify_at(info, now))
        .collect()
}
