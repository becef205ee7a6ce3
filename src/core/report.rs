//! Well-being report generation.
//!
//! A report is a point-in-time snapshot over a time range: per-modality
//! emotion distribution, an overall trend and the issues whose windows
//! intersect the range. Reports are computed on demand and never stored by
//! the core.

use crate::core::history::RollingHistory;
use crate::core::issue::{CriticalIssue, TimeWindow};
use crate::error::{MonitorError, MonitorResult};
use crate::ingest::types::{EmotionLabel, Modality, Observation};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use uuid::Uuid;

/// The current report format version.
pub const REPORT_VERSION: &str = "1.0";

/// The name of this producer.
pub const PRODUCER_NAME: &str = "maitri-monitor";

/// Direction of negative affect across the range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    /// Negative fraction fell
    Improving,
    Stable,
    /// Negative fraction rose
    Declining,
    /// One half of the range has no observations
    InsufficientData,
}

/// First-half vs second-half comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trend {
    pub direction: TrendDirection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_half_negative: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub second_half_negative: Option<f64>,
}

/// How much of the report is backed by data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// Every modality has observations in range
    Complete,
    /// Some modalities have no observations in range
    Partial,
    /// No modality has observations in range
    NoData,
}

/// Label distribution for one modality.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Distribution {
    pub observations: usize,
    pub counts: BTreeMap<EmotionLabel, usize>,
    pub fractions: BTreeMap<EmotionLabel, f64>,
    pub dominant: EmotionLabel,
    pub negative_fraction: f64,
    pub mean_confidence: f64,
    /// Sample standard deviation; absent with fewer than two observations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_std_dev: Option<f64>,
}

/// Per-modality section of a report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModalitySummary {
    NoData,
    Observed(Distribution),
}

/// Producer metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportProducer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Point-in-time well-being summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WellBeingReport {
    pub report_version: String,
    pub report_id: Uuid,
    pub producer: ReportProducer,
    pub generated_at: DateTime<Utc>,
    pub range: TimeWindow,
    pub status: ReportStatus,
    pub modalities: BTreeMap<Modality, ModalitySummary>,
    pub trend: Trend,
    pub issues: Vec<CriticalIssue>,
}

impl WellBeingReport {
    pub fn has_data(&self) -> bool {
        self.status != ReportStatus::NoData
    }

    /// Render the report as text for ground control.
    pub fn render_text(&self, tz: Tz) -> String {
        let fmt = |ts: DateTime<Utc>| ts.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S %Z").to_string();
        let mut out = String::new();
        let rule = "=".repeat(60);

        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "WELL-BEING REPORT");
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "Range: {} -> {}", fmt(self.range.start), fmt(self.range.end));
        let _ = writeln!(out, "Generated: {}", fmt(self.generated_at));
        let _ = writeln!(out);

        if !self.has_data() {
            let _ = writeln!(out, "No data: no observations were recorded in this range.");
        } else {
            for (modality, summary) in &self.modalities {
                match summary {
                    ModalitySummary::NoData => {
                        let _ = writeln!(out, "{modality}: no data");
                    }
                    ModalitySummary::Observed(d) => {
                        let _ = writeln!(
                            out,
                            "{modality}: {} observations, dominant {}, {:.0}% negative, mean confidence {:.2}",
                            d.observations,
                            d.dominant,
                            d.negative_fraction * 100.0,
                            d.mean_confidence
                        );
                    }
                }
            }
            let _ = writeln!(out);
            let _ = writeln!(out, "Emotion Trend: {}", trend_label(self.trend.direction));
        }

        let _ = writeln!(out);
        if self.issues.is_empty() {
            let _ = writeln!(out, "No critical issues detected");
        } else {
            let _ = writeln!(out, "Critical Issues: {}", self.issues.len());
            for issue in &self.issues {
                let _ = writeln!(
                    out,
                    "  - {} ({}){}",
                    issue.issue_type,
                    issue.severity,
                    if issue.acknowledged { " [acknowledged]" } else { "" }
                );
            }
        }
        let _ = writeln!(out, "{rule}");
        out
    }
}

fn trend_label(direction: TrendDirection) -> &'static str {
    match direction {
        TrendDirection::Improving => "improving",
        TrendDirection::Stable => "stable",
        TrendDirection::Declining => "declining",
        TrendDirection::InsufficientData => "insufficient data",
    }
}

/// Render issues as a ground-control alert report.
pub fn render_issue_report(issues: &[CriticalIssue], generated_at: DateTime<Utc>, tz: Tz) -> String {
    if issues.is_empty() {
        return "No critical issues detected. All systems normal.".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "CRITICAL ISSUE REPORT - {}",
        generated_at.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S")
    );
    let _ = writeln!(out, "{}", "=".repeat(50));
    let _ = writeln!(out);

    for (i, issue) in issues.iter().enumerate() {
        let _ = writeln!(out, "Issue #{}: {}", i + 1, title_case(issue.issue_type.as_str()));
        let _ = writeln!(out, "Severity: {}", issue.severity.as_str().to_uppercase());
        let _ = writeln!(out, "Details: {}", issue.summary);
        let _ = writeln!(out, "Occurrences: {}", issue.occurrences);
        let _ = writeln!(out, "Recommendation: {}", issue.recommendation);
        let _ = writeln!(out);
    }
    out
}

fn title_case(snake: &str) -> String {
    snake
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Builds reports from history and the issue log.
pub struct ReportGenerator {
    instance_id: Uuid,
    session_id: Option<String>,
    trend_threshold: f64,
}

impl ReportGenerator {
    /// Create a generator with a unique instance ID.
    pub fn new(trend_threshold: f64) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            session_id: None,
            trend_threshold,
        }
    }

    /// Set the session ID recorded in generated reports.
    pub fn with_session_id(mut self, session_id: String) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Get the instance ID.
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Build a report for `range`.
    ///
    /// Fails with `EmptyHistory` if no modality has an observation in range.
    /// Modalities without observations are marked [`ModalitySummary::NoData`].
    pub fn generate(
        &self,
        history: &RollingHistory,
        issues: &[CriticalIssue],
        range: TimeWindow,
        generated_at: DateTime<Utc>,
    ) -> MonitorResult<WellBeingReport> {
        let mut modalities = BTreeMap::new();
        let mut pooled: Vec<&Observation> = Vec::new();
        let mut observed = 0;

        for modality in Modality::ALL {
            let in_range: Vec<&Observation> = history.window(modality, range.start, range.end).collect();
            let summary = match distribution(&in_range) {
                Some(d) => {
                    observed += 1;
                    ModalitySummary::Observed(d)
                }
                None => ModalitySummary::NoData,
            };
            pooled.extend(in_range);
            modalities.insert(modality, summary);
        }

        if observed == 0 {
            return Err(MonitorError::EmptyHistory);
        }

        pooled.sort_by_key(|o| o.timestamp());
        let status = if observed == Modality::ALL.len() {
            ReportStatus::Complete
        } else {
            ReportStatus::Partial
        };

        Ok(WellBeingReport {
            report_version: REPORT_VERSION.to_string(),
            report_id: Uuid::new_v4(),
            producer: self.producer(),
            generated_at,
            range,
            status,
            modalities,
            trend: self.trend(&pooled, range),
            issues: in_range_issues(issues, &range),
        })
    }

    /// Explicit no-data report: every modality marked, no distribution.
    pub fn no_data(
        &self,
        issues: &[CriticalIssue],
        range: TimeWindow,
        generated_at: DateTime<Utc>,
    ) -> WellBeingReport {
        WellBeingReport {
            report_version: REPORT_VERSION.to_string(),
            report_id: Uuid::new_v4(),
            producer: self.producer(),
            generated_at,
            range,
            status: ReportStatus::NoData,
            modalities: Modality::ALL
                .into_iter()
                .map(|m| (m, ModalitySummary::NoData))
                .collect(),
            trend: Trend {
                direction: TrendDirection::InsufficientData,
                first_half_negative: None,
                second_half_negative: None,
            },
            issues: in_range_issues(issues, &range),
        }
    }

    /// Build and serialize a report to JSON.
    pub fn build_json(&self, report: &WellBeingReport) -> String {
        serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string())
    }

    fn producer(&self) -> ReportProducer {
        ReportProducer {
            name: PRODUCER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            instance_id: self.instance_id.to_string(),
            session_id: self.session_id.clone(),
        }
    }

    /// Compare the negative fraction of the first and second half of `range`.
    fn trend(&self, pooled: &[&Observation], range: TimeWindow) -> Trend {
        let midpoint = range.start + range.duration() / 2;
        let split = pooled.partition_point(|o| o.timestamp() < midpoint);
        let first = negative_fraction(&pooled[..split]);
        let second = negative_fraction(&pooled[split..]);

        let direction = match (first, second) {
            (Some(a), Some(b)) if b - a > self.trend_threshold => TrendDirection::Declining,
            (Some(a), Some(b)) if a - b > self.trend_threshold => TrendDirection::Improving,
            (Some(_), Some(_)) => TrendDirection::Stable,
            _ => TrendDirection::InsufficientData,
        };

        Trend {
            direction,
            first_half_negative: first,
            second_half_negative: second,
        }
    }
}

impl Default for ReportGenerator {
    fn default() -> Self {
        Self::new(0.1)
    }
}

fn in_range_issues(issues: &[CriticalIssue], range: &TimeWindow) -> Vec<CriticalIssue> {
    issues
        .iter()
        .filter(|i| i.window.overlaps(range))
        .cloned()
        .collect()
}

fn negative_fraction(observations: &[&Observation]) -> Option<f64> {
    if observations.is_empty() {
        return None;
    }
    let negative = observations.iter().filter(|o| o.label().is_negative()).count();
    Some(negative as f64 / observations.len() as f64)
}

fn distribution(observations: &[&Observation]) -> Option<Distribution> {
    if observations.is_empty() {
        return None;
    }

    let total = observations.len();
    let mut counts: BTreeMap<EmotionLabel, usize> = BTreeMap::new();
    for o in observations {
        *counts.entry(o.label()).or_insert(0) += 1;
    }

    // Ties go to the label declared first
    let dominant = counts
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(label, _)| *label)?;

    let fractions = counts
        .iter()
        .map(|(label, count)| (*label, *count as f64 / total as f64))
        .collect();

    let confidences: Vec<f64> = observations.iter().map(|o| o.confidence()).collect();
    let mean_confidence = confidences.iter().mean();
    let std_dev = confidences.iter().std_dev();

    Some(Distribution {
        observations: total,
        counts,
        fractions,
        dominant,
        negative_fraction: negative_fraction(observations).unwrap_or(0.0),
        mean_confidence,
        confidence_std_dev: if std_dev.is_finite() { Some(std_dev) } else { None },
    })
}
