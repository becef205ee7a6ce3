//! Detection core for the MAITRI monitor.
//!
//! This module contains:
//! - Rolling per-modality history of observations
//! - Pattern detectors evaluated over that history
//! - Issue aggregation with deduplication and escalation
//! - On-demand well-being reports

pub mod aggregator;
pub mod detectors;
pub mod history;
pub mod issue;
pub mod report;

// Re-export commonly used types
pub use aggregator::{Disposition, IssueAggregator};
pub use detectors::{check_retention, DetectionWindow, Detector, Trigger};
pub use history::RollingHistory;
pub use issue::{CriticalIssue, IssueCandidate, IssueType, Severity, TimeWindow};
pub use report::{
    render_issue_report, ModalitySummary, ReportGenerator, ReportStatus, Trend, TrendDirection,
    WellBeingReport, PRODUCER_NAME, REPORT_VERSION,
};
