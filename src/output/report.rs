use crate::classifier::recommend_top;
use crate::model::{CleanupRecommendation, DirectoryInfo, VolumeInfo};
use crate::session::{AnalysisState, SessionPhase};
use crate::utils::{format_number, format_size};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write;
use std::path::Path;

const REPORT_VERSION: &str = "1.0";

/// Serializable result of one finished analysis session.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: SessionPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub volume: VolumeInfo,
    pub analyzed_size_bytes: u64,
    pub analyzed_percent: f64,
    pub recommendations: Vec<CleanupRecommendation>,
    pub logs: Vec<String>,
}

impl AnalysisReport {
    pub fn from_state(
        state: &AnalysisState,
        volume: &Path,
        top_n: usize,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            version: REPORT_VERSION.to_string(),
            timestamp: now,
            outcome: state.phase,
            error: state.error.clone(),
            volume: VolumeInfo::new(volume, state.capacity(), false)
                .with_directories(&state.directories),
            analyzed_size_bytes: state.analyzed_size,
            analyzed_percent: state.analyzed_percent,
            recommendations: recommend_top(&state.directories, top_n, now),
            logs: state.logs.to_vec(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn render_human(&self) -> String {
        let mut out = String::new();
        let volume = &self.volume;

        let _ = writeln!(out, "Analysis {}", self.outcome);
        if let Some(error) = &self.error {
            let _ = writeln!(out, "  Error: {error}");
        }
        let _ = writeln!(
            out,
            "  Volume {}: {} used of {} ({} free)",
            volume.name,
            format_size(volume.used_size),
            format_size(volume.total_size),
            format_size(volume.free_size)
        );
        let _ = writeln!(
            out,
            "  Analyzed: {} ({:.1}% of used space)",
            format_size(self.analyzed_size_bytes),
            self.analyzed_percent.clamp(0.0, 100.0)
        );

        let mut directories: Vec<&DirectoryInfo> = volume.directories.iter().collect();
        directories.sort_by(|a, b| b.size.cmp(&a.size));
        if !directories.is_empty() {
            let _ = writeln!(
                out,
                "\nDirectories ({} recorded):",
                format_size(volume.analyzed_size())
            );
            for dir in directories {
                let marker = if dir.truncated { " (partial)" } else { "" };
                let _ = writeln!(
                    out,
                    "  {:>10}  {:>12} files  {}{}",
                    format_size(dir.size),
                    format_number(dir.file_count),
                    dir.path.display(),
                    marker
                );
            }
        }

        if !self.recommendations.is_empty() {
            let _ = writeln!(out, "\nRecommendations:");
            for rec in &self.recommendations {
                let verdict = if rec.is_deletable { "deletable" } else { "keep" };
                let _ = writeln!(
                    out,
                    "  [{verdict}, {}] {} ({}, {})",
                    rec.risk,
                    rec.path.display(),
                    format_size(rec.size),
                    rec.category
                );
                let _ = writeln!(out, "      {}", rec.reason);
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::DiskCapacity;
    use std::path::PathBuf;

    fn finished_state() -> AnalysisState {
        let mut state = AnalysisState::new(10);
        state.set_capacity(DiskCapacity::from_total_and_free(1_000_000, 400_000));
        state.add_analyzed(300_000);
        for (path, size) in [
            ("/Users/a/Library/Caches", 200_000u64),
            ("/Users/a/Documents", 90_000),
            ("/usr", 10_000),
        ] {
            state
                .directories
                .insert(PathBuf::from(path), DirectoryInfo::new(path).with_size(size));
        }
        state.log(crate::session::LogLevel::Info, "done");
        state.phase = SessionPhase::Completed;
        state
    }

    #[test]
    fn report_ranks_recommendations_by_size() {
        let report = AnalysisReport::from_state(&finished_state(), Path::new("/"), 2, Utc::now());

        assert_eq!(report.recommendations.len(), 2);
        assert_eq!(
            report.recommendations[0].path,
            PathBuf::from("/Users/a/Library/Caches")
        );
        assert!(report.recommendations[0].is_deletable);
        assert!(!report.recommendations[1].is_deletable);
        assert_eq!(report.volume.analyzed_size(), 300_000);
        assert_eq!(report.logs.len(), 1);
    }

    #[test]
    fn json_carries_outcome_and_version() {
        let report = AnalysisReport::from_state(&finished_state(), Path::new("/"), 10, Utc::now());
        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();

        assert_eq!(value["version"], REPORT_VERSION);
        assert_eq!(value["outcome"], "completed");
        assert_eq!(value["volume"]["used_size"], 600_000);
        assert!(value.get("error").is_none());
        assert_eq!(value["recommendations"][2]["risk"], "critical");
    }

    #[test]
    fn human_summary_lists_directories() {
        let report = AnalysisReport::from_state(&finished_state(), Path::new("/"), 10, Utc::now());
        let text = report.render_human();

        assert!(text.starts_with("Analysis completed"));
        assert!(text.contains("/Users/a/Documents"));
        assert!(text.contains(&format!("Directories ({} recorded):", format_size(300_000))));
        assert!(text.contains("Recommendations:"));
    }
}
