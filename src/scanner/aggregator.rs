use super::sampler::{Batch, EntryKind, FileSystemSampler};
use super::{RootScanner, ScanPolicy};
use crate::error::ScanError;
use crate::model::{DirectoryInfo, FileInfo};
use chrono::{DateTime, Utc};
use std::io;
use std::path::Path;
use std::time::Instant;
use tracing::debug;

/// Turns sampled entries into a `DirectoryInfo`, one batch at a time.
///
/// Each batch does its filesystem work on the blocking pool. Between batches the
/// aggregator reports the batch's bytes through the policy, yields to the runtime
/// and sleeps the configured pacing delay. Those are the only suspension points.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryAggregator;

#[derive(Debug, Default)]
struct BatchTally {
    size: u64,
    files: u64,
    seen: Vec<FileInfo>,
}

#[derive(Debug)]
enum BatchOutcome {
    Processed(BatchTally),
    Exhausted,
    Abandoned,
}

impl DirectoryAggregator {
    pub fn new() -> Self {
        Self
    }

    pub async fn aggregate(
        &self,
        root: &Path,
        policy: &ScanPolicy,
    ) -> Result<DirectoryInfo, ScanError> {
        let unreadable = |source: io::Error| ScanError::Unreadable {
            path: root.to_path_buf(),
            source,
        };
        let link = tokio::fs::symlink_metadata(root).await.map_err(unreadable)?;
        let walk_root = if link.file_type().is_symlink() {
            let target = tokio::fs::canonicalize(root).await.map_err(unreadable)?;
            debug!("{} resolves to {}", root.display(), target.display());
            target
        } else {
            root.to_path_buf()
        };
        let metadata = tokio::fs::metadata(&walk_root).await.map_err(unreadable)?;

        if !metadata.is_dir() {
            let size = if metadata.is_file() { metadata.len() } else { 0 };
            policy.report_batch(size);
            return Ok(DirectoryInfo::new(root)
                .with_size(size)
                .with_file_count(u64::from(metadata.is_file()))
                .with_last_modified(metadata.modified().ok().map(DateTime::<Utc>::from)));
        }

        let start = Instant::now();
        let batch_size = policy.batch_size.max(1);
        let track = policy.track_largest;
        let mut sampler = FileSystemSampler::new(&walk_root, policy.max_depth, policy.max_entries)
            .with_excluded(policy.excluded.clone())
            .with_stop(policy.stop.clone());

        let mut size = 0u64;
        let mut files = 0u64;
        let mut largest: Vec<FileInfo> = Vec::new();
        let mut batches = 0usize;
        let mut interrupted = false;

        loop {
            let (returned, outcome) = tokio::task::spawn_blocking(move || {
                let outcome = process_next_batch(&mut sampler, batch_size, track);
                (sampler, outcome)
            })
            .await?;
            sampler = returned;

            match outcome {
                BatchOutcome::Processed(tally) => {
                    size += tally.size;
                    files += tally.files;
                    batches += 1;
                    if track > 0 {
                        largest.extend(tally.seen);
                        keep_largest(&mut largest, track);
                    }
                    policy.report_batch(tally.size);

                    if batches % 2 == 0 {
                        debug!(
                            "{}: {files} files, {size} bytes after {batches} batches",
                            root.display()
                        );
                    }

                    tokio::task::yield_now().await;
                    if !policy.batch_delay.is_zero() {
                        tokio::time::sleep(policy.batch_delay).await;
                    }
                }
                BatchOutcome::Exhausted => break,
                BatchOutcome::Abandoned => {
                    interrupted = true;
                    break;
                }
            }
        }

        let mut truncated = interrupted;
        if let Some(truncation) = sampler.truncation() {
            policy.report_warning(&format!(
                "Entry limit of {} reached in {}; size is a lower bound",
                truncation.limit,
                root.display()
            ));
            truncated = true;
        }
        if interrupted {
            debug!("{}: stopped after {batches} batches", root.display());
        }

        debug!(
            "{}: {files} files, {size} bytes, {} entries in {:.2}s",
            root.display(),
            sampler.visited(),
            start.elapsed().as_secs_f64()
        );

        Ok(DirectoryInfo::new(root)
            .with_size(size)
            .with_file_count(files)
            .with_truncated(truncated)
            .with_largest_files(largest))
    }
}

impl RootScanner for DirectoryAggregator {
    async fn scan_root(&self, root: &Path, policy: &ScanPolicy) -> Result<DirectoryInfo, ScanError> {
        self.aggregate(root, policy).await
    }
}

fn process_next_batch(
    sampler: &mut FileSystemSampler,
    batch_size: usize,
    track: usize,
) -> BatchOutcome {
    let entries = match sampler.next_batch(batch_size) {
        Batch::Entries(entries) => entries,
        Batch::Exhausted => return BatchOutcome::Exhausted,
        Batch::Interrupted => return BatchOutcome::Abandoned,
    };

    let mut tally = BatchTally::default();
    for entry in entries {
        match entry.kind {
            EntryKind::File { size, modified } => {
                tally.size += size;
                tally.files += 1;
                if track > 0 {
                    tally.seen.push(FileInfo {
                        path: entry.path,
                        size,
                        last_modified: modified,
                    });
                }
            }
            EntryKind::OpaqueDirectory => {
                let nested = sampler.sum_opaque(&entry.path);
                if nested.interrupted {
                    return BatchOutcome::Abandoned;
                }
                tally.size += nested.size;
                tally.files += nested.files;
            }
            EntryKind::Directory => {}
        }

        if sampler.is_stopped() {
            return BatchOutcome::Abandoned;
        }
    }

    if track > 0 {
        keep_largest(&mut tally.seen, track);
    }
    BatchOutcome::Processed(tally)
}

fn keep_largest(files: &mut Vec<FileInfo>, limit: usize) {
    files.sort_by(|a, b| b.size.cmp(&a.size));
    files.truncate(limit);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::StopSignal;
    use std::fs;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, len: usize) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![0u8; len]).unwrap();
    }

    fn policy(max_depth: usize, max_entries: usize) -> ScanPolicy {
        ScanPolicy {
            max_depth,
            max_entries,
            batch_size: 4,
            batch_delay: Duration::ZERO,
            ..ScanPolicy::default()
        }
    }

    fn fixture() -> (TempDir, u64) {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "top.bin", 1_000);
        write(tmp.path(), "a/one.bin", 200);
        write(tmp.path(), "a/b/two.bin", 30);
        write(tmp.path(), "a/b/c/d/three.bin", 4);
        write(tmp.path(), "Editor.app/Contents/MacOS/editor", 5_000);
        write(tmp.path(), "Editor.app/Contents/Info.plist", 50);
        write(tmp.path(), "many/x1", 1);
        write(tmp.path(), "many/x2", 1);
        write(tmp.path(), "many/x3", 1);
        (tmp, 1_000 + 200 + 30 + 4 + 5_000 + 50 + 3)
    }

    #[tokio::test]
    async fn size_is_exact_within_limits() {
        let (tmp, expected) = fixture();

        let info = DirectoryAggregator::new()
            .aggregate(tmp.path(), &policy(4, 10_000))
            .await
            .unwrap();

        assert_eq!(info.size, expected);
        assert_eq!(info.file_count, 9);
        assert!(!info.truncated);
        assert!(info.last_modified.is_none());
    }

    #[tokio::test]
    async fn shallow_depth_counts_nested_contents_once() {
        let (tmp, expected) = fixture();

        for depth in [1, 2, 3] {
            let info = DirectoryAggregator::new()
                .aggregate(tmp.path(), &policy(depth, 10_000))
                .await
                .unwrap();
            assert_eq!(info.size, expected, "depth {depth}");
            assert_eq!(info.file_count, 9, "depth {depth}");
        }
    }

    #[tokio::test]
    async fn empty_directory_is_zero() {
        let tmp = TempDir::new().unwrap();

        let info = DirectoryAggregator::new()
            .aggregate(tmp.path(), &policy(4, 100))
            .await
            .unwrap();

        assert_eq!((info.size, info.file_count), (0, 0));
        assert!(!info.truncated);
    }

    #[tokio::test]
    async fn entry_ceiling_is_flagged() {
        let tmp = TempDir::new().unwrap();
        for i in 0..30 {
            write(tmp.path(), &format!("f{i:02}"), 10);
        }
        let warnings = Arc::new(AtomicUsize::new(0));
        let counter = warnings.clone();
        let mut policy = policy(2, 10);
        policy.warning_callback = Some(Arc::new(move |_: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let info = DirectoryAggregator::new()
            .aggregate(tmp.path(), &policy)
            .await
            .unwrap();

        assert!(info.truncated);
        assert_eq!(info.file_count, 10);
        assert_eq!(info.size, 100);
        assert_eq!(warnings.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn batches_report_every_byte() {
        let (tmp, expected) = fixture();
        let reported = Arc::new(AtomicU64::new(0));
        let sink = reported.clone();
        let mut policy = policy(3, 10_000);
        policy.progress_callback = Some(Arc::new(move |bytes| {
            sink.fetch_add(bytes, Ordering::SeqCst);
        }));

        let info = DirectoryAggregator::new()
            .aggregate(tmp.path(), &policy)
            .await
            .unwrap();

        assert_eq!(info.size, expected);
        assert_eq!(reported.load(Ordering::SeqCst), expected);
    }

    #[tokio::test]
    async fn largest_files_are_tracked() {
        let (tmp, _) = fixture();
        let mut policy = policy(4, 10_000);
        policy.track_largest = 2;

        let info = DirectoryAggregator::new()
            .aggregate(tmp.path(), &policy)
            .await
            .unwrap();

        let sizes: Vec<u64> = info.largest_files.iter().map(|f| f.size).collect();
        assert_eq!(sizes, vec![1_000, 200]);
    }

    #[tokio::test]
    async fn stopped_scan_keeps_nothing_from_abandoned_batch() {
        let (tmp, _) = fixture();
        let stop = StopSignal::new();
        stop.trigger();
        let mut policy = policy(4, 10_000);
        policy.stop = stop;

        let info = DirectoryAggregator::new()
            .aggregate(tmp.path(), &policy)
            .await
            .unwrap();

        assert!(info.truncated);
        assert_eq!(info.size, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_during_a_batch_returns_promptly() {
        let tmp = TempDir::new().unwrap();
        for dir in 0..50 {
            for file in 0..100 {
                write(tmp.path(), &format!("d{dir:02}/f{file:03}"), 10);
            }
        }
        let total = 50 * 100 * 10;
        let stop = StopSignal::new();
        let mut policy = policy(4, 1_000_000);
        policy.batch_size = 1_000_000;
        policy.stop = stop.clone();
        let root = tmp.path().to_path_buf();

        let scan = tokio::spawn(async move {
            DirectoryAggregator::new().aggregate(&root, &policy).await
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        stop.trigger();

        let info = tokio::time::timeout(Duration::from_secs(5), scan)
            .await
            .expect("aggregate did not return after stop")
            .unwrap()
            .unwrap();

        assert!(info.truncated);
        assert!(info.size < total);
    }

    #[tokio::test]
    async fn file_root_reports_its_own_size() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "movie.mov", 777);

        let info = DirectoryAggregator::new()
            .aggregate(&tmp.path().join("movie.mov"), &policy(4, 100))
            .await
            .unwrap();

        assert_eq!((info.size, info.file_count), (777, 1));
        assert!(info.last_modified.is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinked_root_is_followed() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "real/data.bin", 5_000);
        let link = tmp.path().join("link");
        std::os::unix::fs::symlink(tmp.path().join("real"), &link).unwrap();

        for depth in [1, 4] {
            let info = DirectoryAggregator::new()
                .aggregate(&link, &policy(depth, 100))
                .await
                .unwrap();

            assert_eq!((info.size, info.file_count), (5_000, 1), "depth {depth}");
            assert_eq!(info.path, link);
            assert!(!info.truncated);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dangling_root_link_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let link = tmp.path().join("link");
        std::os::unix::fs::symlink(tmp.path().join("nowhere"), &link).unwrap();

        let result = DirectoryAggregator::new()
            .aggregate(&link, &policy(4, 100))
            .await;

        assert!(matches!(result, Err(ScanError::Unreadable { .. })));
    }

    #[tokio::test]
    async fn missing_root_is_an_error() {
        let tmp = TempDir::new().unwrap();

        let result = DirectoryAggregator::new()
            .aggregate(&tmp.path().join("gone"), &policy(4, 100))
            .await;

        assert!(matches!(result, Err(ScanError::Unreadable { .. })));
    }
}
