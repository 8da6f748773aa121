pub mod state;

pub use state::{AnalysisState, LogLevel, SessionPhase};

use crate::config::ScanConfig;
use crate::model::DirectoryInfo;
use crate::scanner::{
    CapacitySource, DirectoryAggregator, ExclusionSet, RootScanner, ScanPolicy, StopSignal,
    SystemCapacity,
};
use crate::utils::format_size;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanLimits {
    pub max_depth: usize,
    pub max_entries: usize,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub roots: Vec<PathBuf>,
    /// Roots under this directory get the deep limits.
    pub home: PathBuf,
    pub deep: ScanLimits,
    pub shallow: ScanLimits,
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub root_delay: Duration,
    pub log_capacity: usize,
    pub track_largest: usize,
    pub excluded: Vec<String>,
    /// Path whose volume supplies the capacity snapshot.
    pub volume: PathBuf,
}

impl SessionSettings {
    pub fn from_config(config: &ScanConfig, home: &Path) -> Self {
        Self {
            roots: config.resolved_roots(home),
            home: home.to_path_buf(),
            deep: ScanLimits {
                max_depth: config.max_depth.max(1),
                max_entries: config.max_entries_deep,
                timeout: config.deep_timeout(),
            },
            shallow: ScanLimits {
                max_depth: 1,
                max_entries: config.max_entries_shallow,
                timeout: config.shallow_timeout(),
            },
            batch_size: config.batch_size,
            batch_delay: config.batch_delay(),
            root_delay: config.root_delay(),
            log_capacity: config.log_capacity,
            track_largest: config.track_largest_files,
            excluded: config.excluded_paths.clone(),
            volume: PathBuf::from("/"),
        }
    }

    pub fn limits_for(&self, root: &Path) -> ScanLimits {
        if root.starts_with(&self.home) {
            self.deep
        } else {
            self.shallow
        }
    }
}

/// Cloneable trigger for the session-wide cancellation flag.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Drives one analysis session at a time across an ordered list of roots.
///
/// Roots are scanned one after another. Each root runs under its own timeout and
/// stop flag; the session-wide cancel flag is checked before every root and by
/// the sampler between entries. Progress is published through a `watch` channel
/// of [`AnalysisState`] snapshots.
pub struct ScanOrchestrator<S: RootScanner = DirectoryAggregator> {
    scanner: S,
    capacity: Box<dyn CapacitySource>,
    settings: SessionSettings,
    excluded: ExclusionSet,
    state: Arc<watch::Sender<AnalysisState>>,
    cancel: Arc<AtomicBool>,
    running: AtomicBool,
    overage_warned: Arc<AtomicBool>,
}

impl ScanOrchestrator<DirectoryAggregator> {
    pub fn new(config: &ScanConfig) -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
        Self::with_parts(
            SessionSettings::from_config(config, &home),
            DirectoryAggregator::new(),
            SystemCapacity::new(),
        )
    }
}

impl<S: RootScanner> ScanOrchestrator<S> {
    pub fn with_parts(
        settings: SessionSettings,
        scanner: S,
        capacity: impl CapacitySource + 'static,
    ) -> Self {
        let (state, _) = watch::channel(AnalysisState::new(settings.log_capacity));
        Self {
            scanner,
            capacity: Box::new(capacity),
            excluded: ExclusionSet::new(&settings.excluded),
            settings,
            state: Arc::new(state),
            cancel: Arc::new(AtomicBool::new(false)),
            running: AtomicBool::new(false),
            overage_warned: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> watch::Receiver<AnalysisState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> AnalysisState {
        self.state.borrow().clone()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancel))
    }

    /// Requests cancellation. A request made while no session is running is
    /// honored by the next `start_analysis` call.
    pub fn cancel_analysis(&self) {
        self.cancel_handle().cancel();
        if self.running.load(Ordering::SeqCst) {
            self.state
                .send_modify(|s| s.log(LogLevel::Warn, "Cancellation requested"));
        }
    }

    /// Runs a full session and returns its terminal phase.
    ///
    /// A call made while another session is running does nothing and returns
    /// `SessionPhase::Running`.
    pub async fn start_analysis(&self) -> SessionPhase {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("analysis already running");
            return SessionPhase::Running;
        }
        let _session = SessionGuard {
            running: &self.running,
            cancel: &self.cancel,
            state: &self.state,
        };
        self.overage_warned.store(false, Ordering::SeqCst);

        self.state.send_modify(|s| {
            s.reset();
            s.phase = SessionPhase::Running;
            s.is_analyzing = true;
            s.log(LogLevel::Info, "Starting disk analysis");
        });

        let capacity = match self.capacity.snapshot(&self.settings.volume) {
            Ok(capacity) => capacity,
            Err(e) => {
                self.finish(SessionPhase::Failed, Some(e.to_string()));
                return SessionPhase::Failed;
            }
        };
        self.state.send_modify(|s| {
            s.set_capacity(capacity);
            s.log(
                LogLevel::Info,
                format!(
                    "Disk: {} total, {} used, {} free",
                    format_size(capacity.total),
                    format_size(capacity.used),
                    format_size(capacity.free)
                ),
            );
        });

        let mut phase = SessionPhase::Completed;
        for (index, root) in self.settings.roots.iter().enumerate() {
            if index > 0 && !self.settings.root_delay.is_zero() {
                tokio::time::sleep(self.settings.root_delay).await;
            }
            if self.cancel.load(Ordering::SeqCst) {
                phase = SessionPhase::Cancelled;
                break;
            }
            self.scan_one(root).await;
        }
        if self.cancel.load(Ordering::SeqCst) {
            phase = SessionPhase::Cancelled;
        }

        self.finish(phase, None);
        phase
    }

    async fn scan_one(&self, root: &Path) {
        if !tokio::fs::try_exists(root).await.unwrap_or(false) {
            self.state.send_modify(|s| {
                s.log(
                    LogLevel::Warn,
                    format!("Skipping {}: path does not exist", root.display()),
                )
            });
            return;
        }

        let limits = self.settings.limits_for(root);
        self.state.send_modify(|s| {
            s.current_directory = Some(root.to_path_buf());
            s.log(
                LogLevel::Info,
                format!(
                    "Scanning {} (depth {}, up to {} entries)",
                    root.display(),
                    limits.max_depth,
                    limits.max_entries
                ),
            );
        });

        let stop = StopSignal::linked(Arc::clone(&self.cancel));
        let policy = self.policy(&limits, stop.clone());
        let started = Instant::now();

        let info = match tokio::time::timeout(limits.timeout, self.scanner.scan_root(root, &policy))
            .await
        {
            Ok(Ok(info)) => {
                let elapsed = started.elapsed().as_secs_f64();
                let cancelled = self.cancel.load(Ordering::SeqCst);
                self.state.send_modify(|s| {
                    if cancelled {
                        s.log(
                            LogLevel::Warn,
                            format!(
                                "Cancelled while scanning {}; keeping {} counted so far",
                                root.display(),
                                format_size(info.size)
                            ),
                        );
                    } else {
                        s.log(
                            LogLevel::Info,
                            format!(
                                "Finished {} in {elapsed:.1}s: {} in {} files{}",
                                root.display(),
                                format_size(info.size),
                                info.file_count,
                                if info.truncated { " (incomplete)" } else { "" }
                            ),
                        );
                    }
                });
                info
            }
            Ok(Err(e)) => {
                stop.trigger();
                self.state.send_modify(|s| {
                    s.log(
                        LogLevel::Warn,
                        format!("Could not scan {}: {e}", root.display()),
                    )
                });
                DirectoryInfo::incomplete(root)
            }
            Err(_) => {
                stop.trigger();
                self.state.send_modify(|s| {
                    s.log(
                        LogLevel::Warn,
                        format!(
                            "Timed out after {}s scanning {}; recorded as incomplete",
                            limits.timeout.as_secs_f64(),
                            root.display()
                        ),
                    )
                });
                DirectoryInfo::incomplete(root)
            }
        };

        self.state.send_modify(|s| {
            s.directories.insert(root.to_path_buf(), info);
        });
    }

    fn policy(&self, limits: &ScanLimits, stop: StopSignal) -> ScanPolicy {
        let progress_state = Arc::clone(&self.state);
        let warned = Arc::clone(&self.overage_warned);
        let warning_state = Arc::clone(&self.state);

        ScanPolicy {
            max_depth: limits.max_depth,
            max_entries: limits.max_entries,
            batch_size: self.settings.batch_size,
            batch_delay: self.settings.batch_delay,
            track_largest: self.settings.track_largest,
            excluded: self.excluded.clone(),
            stop,
            progress_callback: Some(Arc::new(move |bytes| {
                progress_state.send_modify(|s| {
                    s.add_analyzed(bytes);
                    if s.analyzed_percent > 100.0 && !warned.swap(true, Ordering::SeqCst) {
                        s.log(
                            LogLevel::Warn,
                            "Analyzed size exceeds used disk space; some bytes may be counted twice",
                        );
                    }
                });
            })),
            warning_callback: Some(Arc::new(move |message: &str| {
                warning_state.send_modify(|s| s.push_line(message));
            })),
        }
    }

    fn finish(&self, phase: SessionPhase, error: Option<String>) {
        self.state.send_modify(|s| {
            s.phase = phase;
            s.is_analyzing = false;
            s.current_directory = None;
            match phase {
                SessionPhase::Failed => {
                    let message = error.unwrap_or_else(|| "unknown error".to_string());
                    s.log(LogLevel::Error, format!("Analysis failed: {message}"));
                    s.error = Some(message);
                }
                SessionPhase::Cancelled => s.log(
                    LogLevel::Warn,
                    format!(
                        "Analysis cancelled after {} roots; {} analyzed",
                        s.directories.len(),
                        format_size(s.analyzed_size)
                    ),
                ),
                _ => s.log(
                    LogLevel::Info,
                    format!(
                        "Analysis complete: {} analyzed ({:.1}% of used space)",
                        format_size(s.analyzed_size),
                        s.analyzed_percent
                    ),
                ),
            }
        });
        debug!("session finished: {phase}");
    }
}

/// Frees the session slot and clears the cancel flag when a session ends,
/// including when the `start_analysis` future is dropped part way through.
struct SessionGuard<'a> {
    running: &'a AtomicBool,
    cancel: &'a AtomicBool,
    state: &'a watch::Sender<AnalysisState>,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.state.send_if_modified(|s| {
            if !s.is_analyzing {
                return false;
            }
            s.phase = SessionPhase::Cancelled;
            s.is_analyzing = false;
            s.current_directory = None;
            s.log(LogLevel::Warn, "Analysis abandoned before it finished");
            true
        });
        self.cancel.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScanError;
    use crate::scanner::capacity::FixedCapacity;
    use crate::scanner::DiskCapacity;
    use std::collections::HashMap;
    use std::io;
    use std::sync::{Mutex, OnceLock};
    use tempfile::TempDir;

    const GB: u64 = 1_000_000_000;

    #[derive(Clone)]
    enum Behavior {
        /// Reports each chunk as a batch, then completes.
        Bytes(Vec<u64>),
        Stall,
        Fail,
        /// Reports the bytes, then cancels the session mid-root.
        CancelAfter(u64),
    }

    #[derive(Default)]
    struct FakeScanner {
        roots: HashMap<PathBuf, Behavior>,
        depths: Mutex<Vec<(PathBuf, usize)>>,
        cancel: Arc<OnceLock<CancelHandle>>,
    }

    impl FakeScanner {
        fn with(mut self, root: &Path, behavior: Behavior) -> Self {
            self.roots.insert(root.to_path_buf(), behavior);
            self
        }
    }

    impl RootScanner for FakeScanner {
        async fn scan_root(
            &self,
            root: &Path,
            policy: &ScanPolicy,
        ) -> Result<DirectoryInfo, ScanError> {
            self.depths
                .lock()
                .unwrap()
                .push((root.to_path_buf(), policy.max_depth));

            match self.roots.get(root).cloned() {
                Some(Behavior::Bytes(chunks)) => {
                    for chunk in &chunks {
                        policy.report_batch(*chunk);
                        tokio::task::yield_now().await;
                    }
                    Ok(DirectoryInfo::new(root).with_size(chunks.iter().sum()))
                }
                Some(Behavior::Stall) => {
                    tokio::time::sleep(Duration::from_secs(3_600)).await;
                    Ok(DirectoryInfo::new(root))
                }
                Some(Behavior::Fail) | None => Err(ScanError::Unreadable {
                    path: root.to_path_buf(),
                    source: io::Error::from(io::ErrorKind::PermissionDenied),
                }),
                Some(Behavior::CancelAfter(bytes)) => {
                    policy.report_batch(bytes);
                    if let Some(handle) = self.cancel.get() {
                        handle.cancel();
                    }
                    Ok(DirectoryInfo::new(root)
                        .with_size(bytes)
                        .with_truncated(policy.stop.is_set()))
                }
            }
        }
    }

    struct Fixture {
        _home: TempDir,
        _outside: TempDir,
        home: PathBuf,
        outside: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let home = TempDir::new().unwrap();
            let outside = TempDir::new().unwrap();
            for name in ["Documents", "Downloads", "Library", "Stall"] {
                std::fs::create_dir_all(home.path().join(name)).unwrap();
            }
            Self {
                home: home.path().to_path_buf(),
                outside: outside.path().to_path_buf(),
                _home: home,
                _outside: outside,
            }
        }

        fn settings(&self, roots: Vec<PathBuf>) -> SessionSettings {
            let mut settings = SessionSettings::from_config(&ScanConfig::default(), &self.home);
            settings.roots = roots;
            settings.batch_delay = Duration::ZERO;
            settings.root_delay = Duration::ZERO;
            settings.deep.timeout = Duration::from_millis(50);
            settings.shallow.timeout = Duration::from_millis(50);
            settings
        }
    }

    fn used(bytes: u64) -> FixedCapacity {
        FixedCapacity(Some(DiskCapacity::from_total_and_free(bytes * 2, bytes)))
    }

    #[tokio::test]
    async fn totals_and_percent_follow_used_space() {
        let fx = Fixture::new();
        let docs = fx.home.join("Documents");
        let downloads = fx.home.join("Downloads");
        let scanner = FakeScanner::default()
            .with(&docs, Behavior::Bytes(vec![20 * GB, 30 * GB]))
            .with(&downloads, Behavior::Bytes(vec![30 * GB]));

        let orchestrator = ScanOrchestrator::with_parts(
            fx.settings(vec![docs.clone(), downloads.clone()]),
            scanner,
            used(200 * GB),
        );
        let phase = orchestrator.start_analysis().await;
        let state = orchestrator.snapshot();

        assert_eq!(phase, SessionPhase::Completed);
        assert_eq!(state.analyzed_size, 80 * GB);
        assert!((state.analyzed_percent - 40.0).abs() < 1e-9);
        assert_eq!(state.directories[&docs].size, 50 * GB);
        assert_eq!(state.directories[&downloads].size, 30 * GB);
        assert!(!state.is_analyzing);
        assert!(state.current_directory.is_none());
    }

    #[tokio::test]
    async fn depth_follows_home_membership() {
        let fx = Fixture::new();
        let docs = fx.home.join("Documents");
        let scanner = FakeScanner::default()
            .with(&docs, Behavior::Bytes(vec![1]))
            .with(&fx.outside, Behavior::Bytes(vec![1]));

        let orchestrator = ScanOrchestrator::with_parts(
            fx.settings(vec![docs.clone(), fx.outside.clone()]),
            scanner,
            used(100),
        );
        orchestrator.start_analysis().await;

        let depths = orchestrator.scanner.depths.lock().unwrap().clone();
        assert_eq!(depths, vec![(docs, 4), (fx.outside.clone(), 1)]);
    }

    #[tokio::test]
    async fn timed_out_root_is_recorded_and_scan_continues() {
        let fx = Fixture::new();
        let stall = fx.home.join("Stall");
        let docs = fx.home.join("Documents");
        let scanner = FakeScanner::default()
            .with(&stall, Behavior::Stall)
            .with(&docs, Behavior::Bytes(vec![7]));

        let orchestrator = ScanOrchestrator::with_parts(
            fx.settings(vec![stall.clone(), docs.clone()]),
            scanner,
            used(100),
        );
        let started = Instant::now();
        let phase = orchestrator.start_analysis().await;
        let state = orchestrator.snapshot();

        assert!(started.elapsed() < Duration::from_secs(30));
        assert_eq!(phase, SessionPhase::Completed);
        assert_eq!(state.directories[&stall].size, 0);
        assert!(state.directories[&stall].truncated);
        assert_eq!(state.directories[&docs].size, 7);
        assert!(state.logs.iter().any(|l| l.contains("Timed out")));
    }

    #[tokio::test]
    async fn cancellation_keeps_completed_roots() {
        let fx = Fixture::new();
        let docs = fx.home.join("Documents");
        let downloads = fx.home.join("Downloads");
        let library = fx.home.join("Library");
        let scanner = FakeScanner::default()
            .with(&docs, Behavior::Bytes(vec![50]))
            .with(&downloads, Behavior::CancelAfter(30))
            .with(&library, Behavior::Bytes(vec![10]));
        let cancel_slot = Arc::clone(&scanner.cancel);

        let orchestrator = ScanOrchestrator::with_parts(
            fx.settings(vec![docs.clone(), downloads.clone(), library.clone()]),
            scanner,
            used(1_000),
        );
        cancel_slot.set(orchestrator.cancel_handle()).unwrap();

        let phase = orchestrator.start_analysis().await;
        let state = orchestrator.snapshot();

        assert_eq!(phase, SessionPhase::Cancelled);
        assert_eq!(state.phase, SessionPhase::Cancelled);
        assert!(!state.is_analyzing);
        assert_eq!(state.directories[&docs].size, 50);
        assert!(state.directories[&downloads].truncated);
        assert!(!state.directories.contains_key(&library));
        assert_eq!(state.analyzed_size, 80);
    }

    #[tokio::test]
    async fn missing_and_failing_roots_do_not_stop_the_session() {
        let fx = Fixture::new();
        let missing = fx.home.join("Nope");
        let library = fx.home.join("Library");
        let docs = fx.home.join("Documents");
        let scanner = FakeScanner::default()
            .with(&library, Behavior::Fail)
            .with(&docs, Behavior::Bytes(vec![5]));

        let orchestrator = ScanOrchestrator::with_parts(
            fx.settings(vec![missing.clone(), library.clone(), docs.clone()]),
            scanner,
            used(100),
        );
        let phase = orchestrator.start_analysis().await;
        let state = orchestrator.snapshot();

        assert_eq!(phase, SessionPhase::Completed);
        assert!(!state.directories.contains_key(&missing));
        assert!(state.directories[&library].truncated);
        assert_eq!(state.directories[&docs].size, 5);
        assert!(state.logs.iter().any(|l| l.contains("does not exist")));
    }

    #[tokio::test]
    async fn capacity_failure_fails_the_session() {
        let fx = Fixture::new();
        let docs = fx.home.join("Documents");
        let scanner = FakeScanner::default().with(&docs, Behavior::Bytes(vec![5]));

        let orchestrator = ScanOrchestrator::with_parts(
            fx.settings(vec![docs]),
            scanner,
            FixedCapacity(None),
        );
        let phase = orchestrator.start_analysis().await;
        let state = orchestrator.snapshot();

        assert_eq!(phase, SessionPhase::Failed);
        assert!(!state.is_analyzing);
        assert!(state.error.is_some());
        assert!(state.directories.is_empty());
    }

    #[tokio::test]
    async fn observed_progress_never_decreases() {
        let fx = Fixture::new();
        let docs = fx.home.join("Documents");
        let downloads = fx.home.join("Downloads");
        let scanner = FakeScanner::default()
            .with(&docs, Behavior::Bytes(vec![10, 20, 30, 40]))
            .with(&downloads, Behavior::Bytes(vec![5, 5, 5]));

        let orchestrator = ScanOrchestrator::with_parts(
            fx.settings(vec![docs, downloads]),
            scanner,
            used(500),
        );
        let mut rx = orchestrator.subscribe();
        let watcher = tokio::spawn(async move {
            let mut seen = Vec::new();
            while rx.changed().await.is_ok() {
                let state = rx.borrow_and_update().clone();
                if state.used_size > 0 {
                    let expected = state.analyzed_size as f64 / state.used_size as f64 * 100.0;
                    assert!((state.analyzed_percent - expected).abs() < 1e-9);
                }
                seen.push(state.analyzed_size);
            }
            seen
        });

        orchestrator.start_analysis().await;
        let final_size = orchestrator.snapshot().analyzed_size;
        drop(orchestrator);
        let seen = watcher.await.unwrap();

        assert_eq!(final_size, 115);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn cancel_before_start_is_honored_once() {
        let fx = Fixture::new();
        let docs = fx.home.join("Documents");
        let scanner = FakeScanner::default().with(&docs, Behavior::Bytes(vec![5]));

        let orchestrator =
            ScanOrchestrator::with_parts(fx.settings(vec![docs.clone()]), scanner, used(100));
        orchestrator.cancel_analysis();

        let phase = orchestrator.start_analysis().await;
        let state = orchestrator.snapshot();
        assert_eq!(phase, SessionPhase::Cancelled);
        assert!(state.directories.is_empty());
        assert_eq!(state.analyzed_size, 0);
        assert!(orchestrator.scanner.depths.lock().unwrap().is_empty());

        let phase = orchestrator.start_analysis().await;
        assert_eq!(phase, SessionPhase::Completed);
        assert_eq!(orchestrator.snapshot().directories[&docs].size, 5);
    }

    #[tokio::test]
    async fn dropped_session_frees_the_slot() {
        let fx = Fixture::new();
        let stall = fx.home.join("Stall");
        let scanner = FakeScanner::default().with(&stall, Behavior::Stall);
        let mut settings = fx.settings(vec![stall.clone()]);
        settings.deep.timeout = Duration::from_millis(200);

        let orchestrator = ScanOrchestrator::with_parts(settings, scanner, used(100));
        let abandoned =
            tokio::time::timeout(Duration::from_millis(20), orchestrator.start_analysis()).await;
        assert!(abandoned.is_err());

        let state = orchestrator.snapshot();
        assert!(!state.is_analyzing);
        assert_eq!(state.phase, SessionPhase::Cancelled);
        assert!(state.logs.iter().any(|l| l.contains("abandoned")));

        let phase = orchestrator.start_analysis().await;
        assert_eq!(phase, SessionPhase::Completed);
        assert!(orchestrator.snapshot().directories[&stall].truncated);
    }

    #[tokio::test]
    async fn a_new_session_resets_previous_results() {
        let fx = Fixture::new();
        let docs = fx.home.join("Documents");
        let scanner = FakeScanner::default().with(&docs, Behavior::Bytes(vec![9]));

        let orchestrator =
            ScanOrchestrator::with_parts(fx.settings(vec![docs]), scanner, used(100));
        orchestrator.start_analysis().await;
        orchestrator.start_analysis().await;

        assert_eq!(orchestrator.snapshot().analyzed_size, 9);
    }
}
