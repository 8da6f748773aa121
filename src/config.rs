use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub clean: CleanConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default)]
    pub roots: Vec<String>,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_entries_shallow")]
    pub max_entries_shallow: usize,
    #[serde(default = "default_max_entries_deep")]
    pub max_entries_deep: usize,
    #[serde(default = "default_shallow_timeout")]
    pub shallow_timeout_secs: u64,
    #[serde(default = "default_deep_timeout")]
    pub deep_timeout_secs: u64,
    #[serde(default = "default_batch_delay")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_root_delay")]
    pub root_delay_ms: u64,
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_track_largest")]
    pub track_largest_files: usize,
    #[serde(default)]
    pub excluded_paths: Vec<String>,
}

fn default_max_depth() -> usize {
    4
}

fn default_batch_size() -> usize {
    100
}

fn default_max_entries_shallow() -> usize {
    10_000
}

fn default_max_entries_deep() -> usize {
    100_000
}

fn default_shallow_timeout() -> u64 {
    60
}

fn default_deep_timeout() -> u64 {
    120
}

fn default_batch_delay() -> u64 {
    10
}

fn default_root_delay() -> u64 {
    100
}

fn default_log_capacity() -> usize {
    300
}

fn default_top_n() -> usize {
    10
}

fn default_track_largest() -> usize {
    20
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            max_depth: default_max_depth(),
            batch_size: default_batch_size(),
            max_entries_shallow: default_max_entries_shallow(),
            max_entries_deep: default_max_entries_deep(),
            shallow_timeout_secs: default_shallow_timeout(),
            deep_timeout_secs: default_deep_timeout(),
            batch_delay_ms: default_batch_delay(),
            root_delay_ms: default_root_delay(),
            log_capacity: default_log_capacity(),
            top_n: default_top_n(),
            track_largest_files: default_track_largest(),
            excluded_paths: Vec::new(),
        }
    }
}

impl ScanConfig {
    /// Configured roots, or the built-in list when none are set.
    pub fn resolved_roots(&self, home: &Path) -> Vec<PathBuf> {
        if !self.roots.is_empty() {
            return self.roots.iter().map(|r| expand_home(r, home)).collect();
        }
        default_roots(home)
    }

    pub fn shallow_timeout(&self) -> Duration {
        Duration::from_secs(self.shallow_timeout_secs)
    }

    pub fn deep_timeout(&self) -> Duration {
        Duration::from_secs(self.deep_timeout_secs)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn root_delay(&self) -> Duration {
        Duration::from_millis(self.root_delay_ms)
    }
}

/// User roots first (deep scans), then shared system roots (shallow scans).
pub fn default_roots(home: &Path) -> Vec<PathBuf> {
    let user = [
        "Desktop",
        "Documents",
        "Downloads",
        "Pictures",
        "Movies",
        "Music",
        "Library/Caches",
        "Library/Application Support",
        "Library/Logs",
        "Library/Containers",
        "Library/Safari",
        "Library/Mail",
        "Applications",
    ];
    let system = [
        "/Applications",
        "/Library",
        "/usr",
        "/opt",
        "/private/var",
        "/Users/Shared",
    ];

    user.iter()
        .map(|p| home.join(p))
        .chain(system.iter().map(PathBuf::from))
        .collect()
}

fn expand_home(path: &str, home: &Path) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home.join(rest),
        None if path == "~" => home.to_path_buf(),
        None => PathBuf::from(path),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanConfig {
    #[serde(default = "default_true")]
    pub use_trash: bool,
    #[serde(default = "default_true")]
    pub log_history: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            use_trash: true,
            log_history: true,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&config_path, content)?;
        Ok(())
    }

    fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("diskscope")
            .join("config.toml")
    }

    pub fn add_excluded_path(&mut self, pattern: String) {
        if !self.scan.excluded_paths.contains(&pattern) {
            self.scan.excluded_paths.push(pattern);
        }
    }

    pub fn add_root(&mut self, root: String) {
        if !self.scan.roots.contains(&root) {
            self.scan.roots.push(root);
        }
    }

    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("diskscope")
    }
}
