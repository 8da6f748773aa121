use super::{is_bundle, is_hidden, tally_tree, ExclusionSet, StopSignal, Tally};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::trace;
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq)]
pub enum EntryKind {
    File {
        size: u64,
        modified: Option<DateTime<Utc>>,
    },
    /// The walker enumerates this directory's contents itself.
    Directory,
    /// A bundle or a directory at the depth ceiling; its contents are never walked.
    OpaqueDirectory,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampledEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
}

#[derive(Debug, PartialEq)]
pub enum Batch {
    Entries(Vec<SampledEntry>),
    /// Enumeration finished, either naturally or at the entry ceiling.
    Exhausted,
    /// The stop signal fired; any partially collected batch was dropped.
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Truncation {
    pub limit: usize,
}

/// Lazily enumerates the visible entries beneath one root.
pub struct FileSystemSampler {
    root: PathBuf,
    walker: walkdir::IntoIter,
    max_depth: usize,
    max_entries: usize,
    visited: usize,
    excluded: ExclusionSet,
    stop: StopSignal,
    truncation: Option<Truncation>,
    finished: bool,
}

impl FileSystemSampler {
    pub fn new(root: impl Into<PathBuf>, max_depth: usize, max_entries: usize) -> Self {
        let root = root.into();
        let max_depth = max_depth.max(1);
        let walker = WalkDir::new(&root)
            .min_depth(1)
            .max_depth(max_depth)
            .follow_links(false)
            .into_iter();

        Self {
            root,
            walker,
            max_depth,
            max_entries,
            visited: 0,
            excluded: ExclusionSet::default(),
            stop: StopSignal::new(),
            truncation: None,
            finished: false,
        }
    }

    pub fn with_excluded(mut self, excluded: ExclusionSet) -> Self {
        self.excluded = excluded;
        self
    }

    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn visited(&self) -> usize {
        self.visited
    }

    pub fn truncation(&self) -> Option<Truncation> {
        self.truncation
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_set()
    }

    fn remaining(&self) -> usize {
        self.max_entries.saturating_sub(self.visited)
    }

    fn mark_truncated(&mut self) {
        self.truncation = Some(Truncation {
            limit: self.max_entries,
        });
        self.finished = true;
    }

    /// Collects up to `max` entries.
    pub fn next_batch(&mut self, max: usize) -> Batch {
        let mut entries = Vec::with_capacity(max);

        while entries.len() < max {
            if self.stop.is_set() {
                return Batch::Interrupted;
            }
            if self.finished {
                break;
            }

            match self.next_entry() {
                Some(_) if self.remaining() == 0 => {
                    self.mark_truncated();
                    break;
                }
                Some(entry) => {
                    self.visited += 1;
                    entries.push(entry);
                }
                None => self.finished = true,
            }
        }

        if entries.is_empty() {
            Batch::Exhausted
        } else {
            Batch::Entries(entries)
        }
    }

    fn next_entry(&mut self) -> Option<SampledEntry> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    trace!("skipping unreadable entry under {}: {e}", self.root.display());
                    continue;
                }
            };

            let file_type = entry.file_type();
            let path = entry.path();

            if is_hidden(path) || self.excluded.is_excluded(path) {
                if file_type.is_dir() {
                    self.walker.skip_current_dir();
                }
                continue;
            }

            if file_type.is_dir() {
                let opaque = is_bundle(path) || entry.depth() >= self.max_depth;
                if opaque && entry.depth() < self.max_depth {
                    self.walker.skip_current_dir();
                }
                let kind = if opaque {
                    EntryKind::OpaqueDirectory
                } else {
                    EntryKind::Directory
                };
                return Some(SampledEntry {
                    path: entry.into_path(),
                    kind,
                });
            }

            if file_type.is_file() {
                match entry.metadata() {
                    Ok(metadata) => {
                        let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
                        return Some(SampledEntry {
                            path: entry.into_path(),
                            kind: EntryKind::File {
                                size: metadata.len(),
                                modified,
                            },
                        });
                    }
                    Err(e) => {
                        trace!("skipping {}: {e}", path.display());
                        continue;
                    }
                }
            }

            // Symlinks and special files carry no countable bytes.
        }
    }

    /// Sums the contents of an opaque directory against the remaining entry budget.
    pub(crate) fn sum_opaque(&mut self, dir: &Path) -> Tally {
        let tally = tally_tree(dir, self.remaining(), &self.excluded, Some(&self.stop));
        self.visited += tally.visited;
        if tally.truncated {
            self.mark_truncated();
        }
        tally
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, len: usize) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![0u8; len]).unwrap();
    }

    fn drain(sampler: &mut FileSystemSampler) -> Vec<SampledEntry> {
        let mut all = Vec::new();
        while let Batch::Entries(batch) = sampler.next_batch(3) {
            all.extend(batch);
        }
        all
    }

    fn names(entries: &[SampledEntry]) -> Vec<String> {
        let mut names: Vec<_> = entries
            .iter()
            .map(|e| e.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn hidden_entries_are_skipped() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "visible.txt", 10);
        write(tmp.path(), ".DS_Store", 10);
        write(tmp.path(), ".git/objects/abc", 10);

        let mut sampler = FileSystemSampler::new(tmp.path(), 4, 1_000);
        let entries = drain(&mut sampler);

        assert_eq!(names(&entries), vec!["visible.txt"]);
        assert!(sampler.truncation().is_none());
    }

    #[test]
    fn bundles_are_yielded_without_their_contents() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "Tool.app/Contents/MacOS/tool", 500);
        write(tmp.path(), "Tool.app/Contents/Info.plist", 20);
        write(tmp.path(), "notes.txt", 5);

        let mut sampler = FileSystemSampler::new(tmp.path(), 4, 1_000);
        let entries = drain(&mut sampler);

        assert_eq!(names(&entries), vec!["Tool.app", "notes.txt"]);
        let bundle = entries.iter().find(|e| e.path.ends_with("Tool.app")).unwrap();
        assert_eq!(bundle.kind, EntryKind::OpaqueDirectory);
    }

    #[test]
    fn directories_at_depth_ceiling_are_opaque() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a/b/c.txt", 5);

        let mut sampler = FileSystemSampler::new(tmp.path(), 1, 1_000);
        let entries = drain(&mut sampler);

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, EntryKind::OpaqueDirectory);
    }

    #[test]
    fn entry_ceiling_truncates_instead_of_failing() {
        let tmp = TempDir::new().unwrap();
        for i in 0..25 {
            write(tmp.path(), &format!("f{i:02}"), 1);
        }

        let mut sampler = FileSystemSampler::new(tmp.path(), 2, 10);
        let entries = drain(&mut sampler);

        assert_eq!(entries.len(), 10);
        assert_eq!(sampler.truncation(), Some(Truncation { limit: 10 }));
        assert_eq!(sampler.next_batch(3), Batch::Exhausted);
    }

    #[test]
    fn tree_exactly_at_ceiling_is_complete() {
        let tmp = TempDir::new().unwrap();
        for i in 0..6 {
            write(tmp.path(), &format!("f{i}"), 1);
        }

        let mut sampler = FileSystemSampler::new(tmp.path(), 2, 6);
        assert_eq!(drain(&mut sampler).len(), 6);
        assert!(sampler.truncation().is_none());
    }

    #[test]
    fn stop_signal_interrupts_enumeration() {
        let tmp = TempDir::new().unwrap();
        for i in 0..10 {
            write(tmp.path(), &format!("f{i}"), 1);
        }

        let stop = StopSignal::new();
        let mut sampler = FileSystemSampler::new(tmp.path(), 2, 1_000).with_stop(stop.clone());
        assert!(matches!(sampler.next_batch(2), Batch::Entries(_)));

        stop.trigger();
        assert_eq!(sampler.next_batch(2), Batch::Interrupted);
    }

    #[test]
    fn opaque_sums_consume_the_shared_budget() {
        let tmp = TempDir::new().unwrap();
        for i in 0..8 {
            write(tmp.path(), &format!("Big.app/Contents/f{i}"), 10);
        }

        let mut sampler = FileSystemSampler::new(tmp.path(), 4, 5);
        let Batch::Entries(batch) = sampler.next_batch(10) else {
            panic!("expected the bundle entry");
        };
        assert_eq!(batch.len(), 1);

        let tally = sampler.sum_opaque(&batch[0].path);
        assert!(tally.truncated);
        assert_eq!(sampler.visited(), 5);
        assert!(sampler.truncation().is_some());
    }
}
