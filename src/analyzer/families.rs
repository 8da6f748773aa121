use super::apps::InstalledApps;
use super::{Accumulator, Item};
use crate::model::{DirectoryInfo, RiskLevel};
use crate::scanner::{age_in_days, format_age};
use crate::utils::format_size;
use chrono::{DateTime, Utc};
use tracing::debug;

const OLD_LOG_DAYS: i64 = 7;
const VERY_OLD_LOG_DAYS: i64 = 30;
const STALE_APP_DATA_DAYS: i64 = 365;

/// Only the largest Application Support children are examined.
pub const APP_SUPPORT_CHILD_LIMIT: usize = 50;

struct LibraryEntry {
    names: &'static [&'static str],
    group: &'static str,
    percent: u8,
    deletable: bool,
    risk: RiskLevel,
    description: &'static str,
}

const ROOT_LIBRARY: &[LibraryEntry] = &[
    LibraryEntry {
        names: &["caches"],
        group: "Cache files",
        percent: 95,
        deletable: true,
        risk: RiskLevel::Safe,
        description: "System cache files. Recreated by the system when needed.",
    },
    LibraryEntry {
        names: &["logs"],
        group: "System logs",
        percent: 80,
        deletable: true,
        risk: RiskLevel::Low,
        description: "System and application logs. Older logs can be removed.",
    },
    LibraryEntry {
        names: &["application support"],
        group: "Application data",
        percent: 20,
        deletable: false,
        risk: RiskLevel::Medium,
        description: "Shared application data. Only the cache portion is reclaimable.",
    },
    LibraryEntry {
        names: &["containers"],
        group: "Application containers",
        percent: 30,
        deletable: false,
        risk: RiskLevel::Medium,
        description: "Sandboxed application data. Containers of removed apps are reclaimable.",
    },
    LibraryEntry {
        names: &["frameworks"],
        group: "System frameworks",
        percent: 0,
        deletable: false,
        risk: RiskLevel::Critical,
        description: "Shared frameworks. Do not delete.",
    },
    LibraryEntry {
        names: &["extensions"],
        group: "System extensions",
        percent: 0,
        deletable: false,
        risk: RiskLevel::High,
        description: "Kernel and system extensions. Removing them can break hardware support.",
    },
    LibraryEntry {
        names: &["launchdaemons", "launchagents"],
        group: "Launch services",
        percent: 0,
        deletable: false,
        risk: RiskLevel::Critical,
        description: "Background services started by the system. Do not delete.",
    },
    LibraryEntry {
        names: &["preferences"],
        group: "System preferences",
        percent: 0,
        deletable: false,
        risk: RiskLevel::High,
        description: "System-wide settings.",
    },
    LibraryEntry {
        names: &["printers"],
        group: "Printer drivers",
        percent: 50,
        deletable: false,
        risk: RiskLevel::Medium,
        description: "Printer drivers. Drivers for printers no longer in use are reclaimable.",
    },
    LibraryEntry {
        names: &["fonts"],
        group: "System fonts",
        percent: 0,
        deletable: false,
        risk: RiskLevel::Medium,
        description: "Fonts installed for all users.",
    },
    LibraryEntry {
        names: &["keychains"],
        group: "Keychains",
        percent: 0,
        deletable: false,
        risk: RiskLevel::Critical,
        description: "System keychains with passwords and certificates. Do not delete.",
    },
    LibraryEntry {
        names: &["internet plug-ins"],
        group: "Internet plug-ins",
        percent: 60,
        deletable: false,
        risk: RiskLevel::Medium,
        description: "Browser plug-ins. Most are obsolete.",
    },
    LibraryEntry {
        names: &["spotlight"],
        group: "Spotlight indexes",
        percent: 70,
        deletable: true,
        risk: RiskLevel::Low,
        description: "Spotlight importers and indexes. Rebuilt automatically.",
    },
];

const ROOT_LIBRARY_OTHER: LibraryEntry = LibraryEntry {
    names: &[],
    group: "Other system files",
    percent: 0,
    deletable: false,
    risk: RiskLevel::Medium,
    description: "System directory. Needs expert review before deleting.",
};

fn lower_name(child: &DirectoryInfo) -> String {
    child.display_name().to_lowercase()
}

fn age_suffix(age: Option<i64>) -> String {
    age.map(|days| format!(" Last modified {} ago.", format_age(days)))
        .unwrap_or_default()
}

pub(super) fn root_library(children: &[DirectoryInfo], acc: &mut Accumulator) -> String {
    for child in children {
        let name = lower_name(child);
        let entry = ROOT_LIBRARY
            .iter()
            .find(|e| e.names.contains(&name.as_str()))
            .unwrap_or(&ROOT_LIBRARY_OTHER);

        acc.add(
            child,
            Item {
                title: child.display_name(),
                group: entry.group,
                percent: entry.percent,
                is_deletable: entry.deletable,
                risk: entry.risk,
                description: entry.description.to_string(),
                age_days: None,
            },
        );
    }

    "The system Library holds caches and logs (reclaimable), application data and \
     containers (review first), and frameworks, extensions, launch services and \
     keychains (never delete)."
        .to_string()
}

pub(super) fn caches(children: &[DirectoryInfo], acc: &mut Accumulator) -> String {
    for child in children {
        let name = lower_name(child);
        let display = child.display_name();

        let item = if ["chrome", "safari", "firefox"].iter().any(|b| name.contains(b)) {
            Item::new(format!("Browser cache: {display}"), "Browser caches", 100)
                .deletable(RiskLevel::Low)
                .describe("Temporary browser files. The browser recreates them as needed.")
        } else if name.contains("xcode") || name.contains("deriveddata") {
            Item::new(format!("Xcode: {display}"), "Xcode caches", 100)
                .deletable(RiskLevel::Low)
                .describe("DerivedData and Xcode caches. Projects are rebuilt on demand.")
        } else if name.contains("spotify") || name.contains("apple music") {
            Item::new(format!("Music cache: {display}"), "Music and streaming caches", 80)
                .deletable(RiskLevel::Medium)
                .describe("Cached music. Tracks will need to be downloaded again.")
        } else {
            Item::new(display, "Other caches", 90)
                .deletable(RiskLevel::Low)
                .describe("Application cache. Usually safe to delete.")
        };
        acc.add(child, item);
    }

    "Caches speed applications up and are rebuilt on demand. Deleting them is safe \
     but may slow the next launch."
        .to_string()
}

pub(super) fn logs(
    children: &[DirectoryInfo],
    now: DateTime<Utc>,
    acc: &mut Accumulator,
) -> String {
    let mut old = 0u64;
    let mut very_old = 0u64;

    for child in children {
        let name = lower_name(child);
        let display = child.display_name();
        let age = age_in_days(child, now);
        let days = age.unwrap_or(0);

        if days >= VERY_OLD_LOG_DAYS {
            very_old += child.size;
        } else if days >= OLD_LOG_DAYS {
            old += child.size;
        }

        let item = if name.contains("diagnostic") || name.contains("crash") {
            Item::new(format!("Crash reports: {display}"), "Crash reports", 90)
                .deletable(RiskLevel::Safe)
                .describe(format!(
                    "Application crash reports.{} Safe to delete if nothing is being investigated.",
                    age_suffix(age)
                ))
        } else {
            Item::new(display, "System logs", 80)
                .deletable(RiskLevel::Low)
                .describe(format!(
                    "System or application logs.{} Old logs can be removed.",
                    age_suffix(age)
                ))
        };
        acc.add(child, item.aged(age));
    }

    let mut summary =
        String::from("Logs record system and application activity and only matter when debugging.");
    if old > 0 {
        summary.push_str(&format!(" Older than 7 days: {}.", format_size(old)));
    }
    if very_old > 0 {
        summary.push_str(&format!(" Older than 30 days: {}.", format_size(very_old)));
    }
    summary
}

pub(super) fn application_support(
    children: &[DirectoryInfo],
    apps: &InstalledApps,
    now: DateTime<Utc>,
    acc: &mut Accumulator,
) -> String {
    let mut ranked: Vec<&DirectoryInfo> = children.iter().collect();
    ranked.sort_by(|a, b| b.size.cmp(&a.size));
    ranked.truncate(APP_SUPPORT_CHILD_LIMIT);
    debug!(
        "application support: examining {} of {} children",
        ranked.len(),
        children.len()
    );

    let mut orphaned = 0u64;
    let mut stale = 0u64;

    for child in ranked {
        let name = lower_name(child);
        let display = child.display_name();
        let age = age_in_days(child, now);
        let is_stale = age.unwrap_or(0) >= STALE_APP_DATA_DAYS;

        let item = if name.contains("cache") {
            Item::new(display, "Caches in Application Support", 100)
                .deletable(RiskLevel::Safe)
                .describe(format!("Application cache. Safe to delete.{}", age_suffix(age)))
        } else if name.contains("backup") || name.contains("archive") {
            Item::new(display, "Backups", 0)
                .kept(RiskLevel::High)
                .describe(format!(
                    "Backup data.{} Check the contents before deleting.",
                    age_suffix(age)
                ))
        } else if apps.is_orphaned(&display) {
            orphaned += child.size;
            if is_stale {
                stale += child.size;
            }
            Item::new(display, "Orphaned application data", 100)
                .deletable(RiskLevel::Low)
                .describe(format!(
                    "No installed application owns this folder.{} Safe to delete.",
                    age_suffix(age)
                ))
        } else if is_stale {
            stale += child.size;
            Item::new(display, "Old application data", 0)
                .kept(RiskLevel::Medium)
                .describe(format!(
                    "Data of an installed application.{} The application may no longer be used.",
                    age_suffix(age)
                ))
        } else {
            Item::new(display, "Installed application data", 0)
                .kept(RiskLevel::Medium)
                .describe("Data of an installed application. Deleting it may lose settings.")
        };
        acc.add(child, item.aged(age));
    }

    let mut summary = format!(
        "Application data, settings and plug-ins. Checked against {} installed application names.",
        apps.len()
    );
    if orphaned > 0 {
        summary.push_str(&format!(
            " Data of removed applications: {}.",
            format_size(orphaned)
        ));
    }
    if stale > 0 {
        summary.push_str(&format!(
            " Untouched for over a year: {}.",
            format_size(stale)
        ));
    }
    summary
}

pub(super) fn containers(
    children: &[DirectoryInfo],
    apps: &InstalledApps,
    acc: &mut Accumulator,
) -> String {
    let mut orphaned = 0u64;

    for child in children {
        let display = child.display_name();
        let item = if lower_name(child).starts_with("com.apple") {
            Item::new(display, "System containers", 0)
                .kept(RiskLevel::Critical)
                .describe("Apple system container. Do not delete.")
        } else if apps.is_orphaned(&display) {
            orphaned += child.size;
            Item::new(display, "Containers of removed applications", 100)
                .deletable(RiskLevel::Low)
                .describe("No installed application owns this container. Safe to delete.")
        } else {
            Item::new(display, "Active containers", 0)
                .kept(RiskLevel::Medium)
                .describe("Sandbox of an installed application. Holds its data.")
        };
        acc.add(child, item);
    }

    let mut summary = format!(
        "Sandboxed application data. Checked against {} installed application names.",
        apps.len()
    );
    if orphaned > 0 {
        summary.push_str(&format!(
            " Containers of removed applications: {}.",
            format_size(orphaned)
        ));
    }
    summary
}

pub(super) fn private_var(children: &[DirectoryInfo], acc: &mut Accumulator) -> String {
    for child in children {
        let item = match lower_name(child).as_str() {
            "log" => Item::new("System logs /var/log".to_string(), "System logs", 70)
                .deletable(RiskLevel::Low)
                .describe("System logs. Old logs can be removed with administrator rights."),
            "tmp" => Item::new("Temporary files /var/tmp".to_string(), "Temporary files", 100)
                .deletable(RiskLevel::Safe)
                .describe("Temporary files. Safe to delete."),
            "folders" => Item::new("/var/folders".to_string(), "System folders", 0)
                .kept(RiskLevel::Critical)
                .describe("Per-user temporary system data. Never delete by hand."),
            _ => Item::new(child.display_name(), "Other system data", 0)
                .kept(RiskLevel::High)
                .describe("System directory. Needs expert review."),
        };
        acc.add(child, item);
    }

    "System directory with temporary files and logs. Changes need administrator rights \
     and can break the system."
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_root_library_name_is_lowercase() {
        for entry in ROOT_LIBRARY {
            for name in entry.names {
                assert_eq!(*name, name.to_lowercase());
            }
            assert!(entry.percent <= 100);
        }
    }

    #[test]
    fn age_suffix_is_empty_without_age() {
        assert_eq!(age_suffix(None), "");
        assert_eq!(age_suffix(Some(45)), " Last modified 1 mo ago.");
    }
}
