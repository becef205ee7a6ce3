//! Critical issue records and their classification.

use crate::ingest::types::{Modality, Observation};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Maximum evidence observations retained on a single issue.
pub const MAX_EVIDENCE: usize = 256;

/// Critical pattern an issue was raised for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    SustainedNegative,
    RapidSwing,
    ExtremeEmotion,
    CommunicationGap,
}

impl IssueType {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueType::SustainedNegative => "sustained_negative",
            IssueType::RapidSwing => "rapid_swing",
            IssueType::ExtremeEmotion => "extreme_emotion",
            IssueType::CommunicationGap => "communication_gap",
        }
    }

    /// Lowest severity an issue of this type may carry.
    pub fn severity_floor(self) -> Severity {
        match self {
            IssueType::ExtremeEmotion | IssueType::CommunicationGap => Severity::High,
            IssueType::SustainedNegative | IssueType::RapidSwing => Severity::Low,
        }
    }

    /// Guidance shown to ground control alongside the issue.
    pub fn recommendation(self) -> &'static str {
        match self {
            IssueType::SustainedNegative => {
                "Immediate psychological support recommended. Consider ground control notification."
            }
            IssueType::RapidSwing => "Monitor closely. May indicate stress or instability.",
            IssueType::ExtremeEmotion => {
                "Immediate attention required. Consider ground control notification."
            }
            IssueType::CommunicationGap => {
                "Attempt to re-establish communication. If unsuccessful, notify ground control."
            }
        }
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordinal severity, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Map a detector intensity in [0, 1] onto the ordinal scale.
    pub fn from_intensity(intensity: f64) -> Self {
        let intensity = if intensity.is_finite() {
            intensity.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if intensity >= 0.8 {
            Severity::Critical
        } else if intensity >= 0.5 {
            Severity::High
        } else if intensity >= 0.25 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed time interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    pub fn instant(at: DateTime<Utc>) -> Self {
        Self { start: at, end: at }
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }

    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }
}

/// What a detector hands to the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssueCandidate {
    pub issue_type: IssueType,
    /// Detector-specific strength in [0, 1]
    pub intensity: f64,
    /// Modality the pattern was seen in; `None` for cross-modality patterns
    pub modality: Option<Modality>,
    pub window: TimeWindow,
    /// Copies of the observations that triggered the candidate
    pub evidence: Vec<Observation>,
    pub detected_at: DateTime<Utc>,
    /// Human-readable account of what was measured
    pub summary: String,
}

/// A raised issue, kept for the lifetime of the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriticalIssue {
    pub id: Uuid,
    pub issue_type: IssueType,
    pub severity: Severity,
    pub modality: Option<Modality>,
    pub window: TimeWindow,
    pub evidence: Vec<Observation>,
    /// First detection
    pub detected_at: DateTime<Utc>,
    /// Most recent merged detection
    pub last_detected_at: DateTime<Utc>,
    /// Number of candidates merged into this issue
    pub occurrences: u32,
    pub summary: String,
    pub recommendation: String,
    pub reported: bool,
    pub acknowledged: bool,
}

impl CriticalIssue {
    pub fn is_open(&self) -> bool {
        !self.acknowledged
    }
}
