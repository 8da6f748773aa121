mod report;

pub use report::AnalysisReport;
