use crate::config::CleanConfig;
use crate::error::DeleteError;
use crate::history::{HistoryAction, HistoryLogger};
use crate::safety::SafetyChecker;
use crate::scanner::{tally_tree, ExclusionSet};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Bound on the entries visited to size a directory for the history log.
const HISTORY_SIZE_ENTRY_LIMIT: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Moved to the trash and recoverable.
    Trashed,
    Removed,
    DryRun,
}

pub struct Deleter {
    use_trash: bool,
    dry_run: bool,
    history: Option<HistoryLogger>,
    safety: SafetyChecker,
}

impl Deleter {
    pub fn new() -> Self {
        Self {
            use_trash: true,
            dry_run: false,
            history: None,
            safety: SafetyChecker::new(),
        }
    }

    pub fn from_config(config: &CleanConfig) -> Self {
        Self::new()
            .with_trash(config.use_trash)
            .with_history(config.log_history.then(HistoryLogger::new))
    }

    pub fn with_trash(mut self, use_trash: bool) -> Self {
        self.use_trash = use_trash;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_history(mut self, history: Option<HistoryLogger>) -> Self {
        self.history = history;
        self
    }

    /// Removes `path`, preferring the trash when enabled and available.
    pub fn delete(&self, path: &Path) -> Result<DeleteOutcome, DeleteError> {
        if !self.safety.is_safe_to_delete(path) {
            return Err(DeleteError::Protected(path.to_path_buf()));
        }

        let metadata = path
            .symlink_metadata()
            .map_err(|e| DeleteError::from_io(path.to_path_buf(), e))?;

        if self.dry_run {
            info!("dry run: would delete {}", path.display());
            return Ok(DeleteOutcome::DryRun);
        }

        let size = self.history.as_ref().map(|_| {
            if metadata.is_dir() {
                tally_tree(path, HISTORY_SIZE_ENTRY_LIMIT, &ExclusionSet::default(), None).size
            } else {
                metadata.len()
            }
        });

        let outcome = if self.use_trash {
            match trash::delete(path) {
                Ok(()) => DeleteOutcome::Trashed,
                Err(e) => {
                    warn!("cannot move {} to trash, removing it: {e}", path.display());
                    remove(path, metadata.is_dir())?
                }
            }
        } else {
            remove(path, metadata.is_dir())?
        };
        debug!("{outcome:?}: {}", path.display());

        if let Some(history) = &self.history {
            let action = match outcome {
                DeleteOutcome::Trashed => HistoryAction::Trash,
                _ => HistoryAction::Delete,
            };
            if let Err(e) = history.log_removal(action, path, size) {
                warn!("cannot write deletion history: {e:#}");
            }
        }

        Ok(outcome)
    }
}

impl Default for Deleter {
    fn default() -> Self {
        Self::new()
    }
}

fn remove(path: &Path, is_dir: bool) -> Result<DeleteOutcome, DeleteError> {
    let result = if is_dir {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result
        .map(|()| DeleteOutcome::Removed)
        .map_err(|e| DeleteError::from_io(path.to_path_buf(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn direct() -> Deleter {
        Deleter::new().with_trash(false)
    }

    #[test]
    fn removes_files_and_directories() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("a.log");
        let dir = tmp.path().join("cache");
        fs::write(&file, b"x").unwrap();
        fs::create_dir_all(dir.join("nested")).unwrap();
        fs::write(dir.join("nested/b.bin"), vec![0u8; 10]).unwrap();

        assert_eq!(direct().delete(&file).unwrap(), DeleteOutcome::Removed);
        assert_eq!(direct().delete(&dir).unwrap(), DeleteOutcome::Removed);
        assert!(!file.exists());
        assert!(!dir.exists());
    }

    #[test]
    fn missing_path_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = direct().delete(&tmp.path().join("gone")).unwrap_err();
        assert!(matches!(err, DeleteError::NotFound(_)));
        assert!(!err.needs_elevation());
    }

    #[test]
    fn protected_paths_are_refused() {
        let err = direct().delete(Path::new("/System/Library")).unwrap_err();
        assert!(matches!(err, DeleteError::Protected(_)));
    }

    #[test]
    fn parent_segments_do_not_bypass_protection() {
        let tmp = TempDir::new().unwrap();
        let depth = tmp.path().components().count();
        let escape = tmp.path().join("../".repeat(depth)).join("usr/lib");

        let err = direct().with_dry_run(true).delete(&escape).unwrap_err();
        assert!(matches!(err, DeleteError::Protected(_)));

        let err = direct()
            .with_dry_run(true)
            .delete(Path::new("/private/etc/hosts"))
            .unwrap_err();
        assert!(matches!(err, DeleteError::Protected(_)));
    }

    #[test]
    fn dry_run_leaves_the_path() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("keep.txt");
        fs::write(&file, b"x").unwrap();

        let outcome = direct().with_dry_run(true).delete(&file).unwrap();
        assert_eq!(outcome, DeleteOutcome::DryRun);
        assert!(file.exists());
    }

    #[test]
    fn removal_is_recorded_in_history() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("old");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("blob"), vec![0u8; 64]).unwrap();
        let logger = HistoryLogger::at(tmp.path().join("history.log"));

        direct()
            .with_history(Some(logger.clone()))
            .delete(&dir)
            .unwrap();

        let entries = logger.read_history(None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, HistoryAction::Delete);
        assert_eq!(entries[0].size, Some(64));
        assert_eq!(entries[0].path, dir);
    }
}
