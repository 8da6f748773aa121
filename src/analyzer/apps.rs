use anyhow::Result;
use plist::Value;
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;
use walkdir::WalkDir;

/// Reverse-DNS tokens that say nothing about which application owns a folder.
const GENERIC_TOKENS: &[&str] = &["com", "org", "net", "io", "co", "app"];
const MIN_TOKEN_LEN: usize = 3;

/// Lowercased application names and bundle identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstalledApps {
    names: HashSet<String>,
}

impl InstalledApps {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names
                .into_iter()
                .map(|n| n.as_ref().to_lowercase())
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    #[cfg(test)]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&name.to_lowercase())
    }

    /// True when `directory_name` belongs to no installed application.
    ///
    /// Apple-owned names are never orphaned. Otherwise the name matches when it
    /// equals a known name, or when one of its dot-separated tokens and a known
    /// name contain each other.
    pub fn is_orphaned(&self, directory_name: &str) -> bool {
        let name = directory_name.to_lowercase();

        if name.starts_with("com.apple.") || name.starts_with("apple") {
            return false;
        }
        if self.names.contains(&name) {
            return false;
        }

        let owned = name
            .split('.')
            .filter(|token| token.len() >= MIN_TOKEN_LEN && !GENERIC_TOKENS.contains(token))
            .any(|token| {
                self.names.iter().any(|app| {
                    app.contains(token) || (app.len() >= MIN_TOKEN_LEN && token.contains(app.as_str()))
                })
            });
        !owned
    }
}

/// Installed-application snapshot, built on first use and kept until invalidated.
#[derive(Debug)]
pub struct AppCatalog {
    search_dirs: Vec<PathBuf>,
    snapshot: RwLock<Option<Arc<InstalledApps>>>,
}

impl AppCatalog {
    pub fn new() -> Self {
        let mut search_dirs = vec![PathBuf::from("/Applications")];
        if let Some(home) = dirs::home_dir() {
            search_dirs.push(home.join("Applications"));
        }
        search_dirs.push(PathBuf::from("/System/Applications"));
        Self::with_search_dirs(search_dirs)
    }

    pub fn with_search_dirs(search_dirs: Vec<PathBuf>) -> Self {
        Self {
            search_dirs,
            snapshot: RwLock::new(None),
        }
    }

    /// A catalog preloaded with `apps` that never touches the filesystem.
    #[cfg(test)]
    pub fn fixed(apps: InstalledApps) -> Self {
        Self {
            search_dirs: Vec::new(),
            snapshot: RwLock::new(Some(Arc::new(apps))),
        }
    }

    pub fn snapshot(&self) -> Arc<InstalledApps> {
        if let Some(apps) = self
            .snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Arc::clone(apps);
        }

        let mut guard = self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(apps) = guard.as_ref() {
            return Arc::clone(apps);
        }

        let apps = Arc::new(scan_installed_apps(&self.search_dirs));
        debug!("installed application snapshot: {} names", apps.len());
        *guard = Some(Arc::clone(&apps));
        apps
    }

    /// Drops the snapshot; the next call to `snapshot` rebuilds it.
    pub fn invalidate(&self) {
        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl Default for AppCatalog {
    fn default() -> Self {
        Self::new()
    }
}

fn scan_installed_apps(search_dirs: &[PathBuf]) -> InstalledApps {
    let mut bundles = Vec::new();

    for dir in search_dirs {
        if !dir.exists() {
            continue;
        }
        let mut walker = WalkDir::new(dir).min_depth(1).max_depth(3).into_iter();
        while let Some(entry) = walker.next() {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            if entry.file_type().is_dir() && path.extension().map(|e| e == "app").unwrap_or(false) {
                bundles.push(path.to_path_buf());
                walker.skip_current_dir();
            }
        }
    }

    let names: Vec<String> = bundles
        .par_iter()
        .flat_map_iter(|bundle| {
            let name = bundle
                .file_stem()
                .map(|s| s.to_string_lossy().to_string());
            let bundle_id = read_bundle_id(bundle).ok().flatten();
            name.into_iter().chain(bundle_id)
        })
        .collect();

    InstalledApps::from_names(names)
}

fn read_bundle_id(bundle: &Path) -> Result<Option<String>> {
    let content = fs::read(bundle.join("Contents/Info.plist"))?;
    let plist = Value::from_reader(Cursor::new(content))?;

    Ok(plist
        .as_dictionary()
        .and_then(|d| d.get("CFBundleIdentifier"))
        .and_then(|v| v.as_string())
        .map(str::to_string))
}
