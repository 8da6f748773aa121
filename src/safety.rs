use std::env;
use std::ffi::OsStr;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Paths under these roots are never deleted.
const PROTECTED_ROOTS: &[&str] = &[
    "/System",
    "/usr",
    "/bin",
    "/sbin",
    "/etc",
    "/private/etc",
    "/private/var/db",
    "/var/db",
];

/// Component sequences that mark credential and core-service stores anywhere in a path.
const PROTECTED_SEGMENTS: &[&[&str]] = &[
    &["Library", "Keychains"],
    &["Library", "Security"],
    &["Library", "CoreServices"],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyLevel {
    Safe,
    /// Hidden entries; allowed, but worth a second look.
    Caution,
    Protected,
}

pub struct SafetyChecker {
    protected_roots: Vec<&'static str>,
}

impl SafetyChecker {
    pub fn new() -> Self {
        Self {
            protected_roots: PROTECTED_ROOTS.to_vec(),
        }
    }

    /// Checks the path as written with `.` and `..` folded away, and again at
    /// the real location of its parent. The last component is not followed, so
    /// a symlink can still be removed without touching its target.
    pub fn check_path(&self, path: &Path) -> SafetyLevel {
        let lexical = normalize(path);
        if lexical.parent().is_none() || self.is_protected(&lexical) {
            return SafetyLevel::Protected;
        }
        if let Some(real) = resolve_parent(&lexical) {
            if real.parent().is_none() || self.is_protected(&real) {
                return SafetyLevel::Protected;
            }
        }

        if self.is_hidden_system(&lexical) {
            return SafetyLevel::Caution;
        }

        SafetyLevel::Safe
    }

    fn is_protected(&self, path: &Path) -> bool {
        if self
            .protected_roots
            .iter()
            .any(|root| path.starts_with(root))
        {
            return true;
        }

        let names: Vec<&str> = path
            .components()
            .filter_map(|c| match c {
                Component::Normal(name) => name.to_str(),
                _ => None,
            })
            .collect();
        PROTECTED_SEGMENTS
            .iter()
            .any(|segment| names.windows(segment.len()).any(|w| w == *segment))
    }

    fn is_hidden_system(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('.') && !n.starts_with(".."))
            .unwrap_or(false)
    }

    pub fn is_safe_to_delete(&self, path: &Path) -> bool {
        self.check_path(path) != SafetyLevel::Protected
    }
}

impl Default for SafetyChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// Makes `path` absolute and folds `.` and `..` without touching the disk.
fn normalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalizes the deepest existing ancestor of the parent and re-attaches
/// the remaining names, so symlinked directories resolve to where they point.
fn resolve_parent(path: &Path) -> Option<PathBuf> {
    let mut tail: Vec<&OsStr> = vec![path.file_name()?];
    let mut cursor = path.parent()?;
    loop {
        if let Ok(real) = fs::canonicalize(cursor) {
            return Some(tail.iter().rev().fold(real, |acc, name| acc.join(name)));
        }
        tail.push(cursor.file_name()?);
        cursor = cursor.parent()?;
    }
}
