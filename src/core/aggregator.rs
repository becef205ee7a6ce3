//! Issue aggregation and deduplication.
//!
//! The aggregator owns the issue log. Candidates of the same type whose
//! windows overlap an open issue, or that are detected within the cool-down
//! of its latest detection, are merged into that issue instead of creating a
//! new record. Issues are never removed.

use crate::core::issue::{CriticalIssue, IssueCandidate, Severity, TimeWindow, MAX_EVIDENCE};
use crate::error::{MonitorError, MonitorResult};
use crate::ingest::types::Observation;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Result of folding one candidate into the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Created,
    Escalated,
    Merged,
}

/// Single-writer owner of the issue log.
#[derive(Debug, Clone)]
pub struct IssueAggregator {
    cool_down: Duration,
    issues: Vec<CriticalIssue>,
}

impl IssueAggregator {
    pub fn new(cool_down: Duration) -> Self {
        Self {
            cool_down,
            issues: Vec::new(),
        }
    }

    /// Severity for a candidate: intensity on the ordinal scale, raised to
    /// the floor of its issue type.
    pub fn severity_for(candidate: &IssueCandidate) -> Severity {
        Severity::from_intensity(candidate.intensity).max(candidate.issue_type.severity_floor())
    }

    /// Fold candidates into the log. Returns the issues that were created or
    /// escalated, i.e. the ones the reporting sink should hear about.
    pub fn aggregate<I>(&mut self, candidates: I) -> Vec<CriticalIssue>
    where
        I: IntoIterator<Item = IssueCandidate>,
    {
        let mut emitted = Vec::new();
        for candidate in candidates {
            let (idx, disposition) = self.fold(candidate);
            match disposition {
                Disposition::Created | Disposition::Escalated => {
                    emitted.push(self.issues[idx].clone());
                }
                Disposition::Merged => {}
            }
        }
        emitted
    }

    /// Fold a single candidate; returns the index of the affected issue.
    pub fn fold(&mut self, candidate: IssueCandidate) -> (usize, Disposition) {
        let severity = Self::severity_for(&candidate);

        if let Some(idx) = self.find_mergeable(&candidate) {
            let issue = &mut self.issues[idx];
            let escalated = severity > issue.severity;
            merge_into(issue, candidate);
            if escalated {
                tracing::warn!(
                    issue_id = %issue.id,
                    issue_type = %issue.issue_type,
                    from = %issue.severity,
                    to = %severity,
                    "issue escalated"
                );
                issue.severity = severity;
                issue.reported = false;
                return (idx, Disposition::Escalated);
            }
            return (idx, Disposition::Merged);
        }

        let mut evidence = candidate.evidence;
        cap_evidence(&mut evidence);
        let issue = CriticalIssue {
            id: Uuid::new_v4(),
            issue_type: candidate.issue_type,
            severity,
            modality: candidate.modality,
            window: candidate.window,
            evidence,
            detected_at: candidate.detected_at,
            last_detected_at: candidate.detected_at,
            occurrences: 1,
            summary: candidate.summary,
            recommendation: candidate.issue_type.recommendation().to_string(),
            reported: false,
            acknowledged: false,
        };
        tracing::info!(
            issue_id = %issue.id,
            issue_type = %issue.issue_type,
            severity = %issue.severity,
            "critical issue raised"
        );
        self.issues.push(issue);
        (self.issues.len() - 1, Disposition::Created)
    }

    /// Most recent open issue of the same type that the candidate belongs to.
    fn find_mergeable(&self, candidate: &IssueCandidate) -> Option<usize> {
        self.issues
            .iter()
            .enumerate()
            .rev()
            .find(|(_, issue)| {
                let since_last = candidate.detected_at - issue.last_detected_at;
                let within_cool_down = since_last <= self.cool_down && -since_last <= self.cool_down;
                issue.is_open()
                    && issue.issue_type == candidate.issue_type
                    && (issue.window.overlaps(&candidate.window) || within_cool_down)
            })
            .map(|(idx, _)| idx)
    }

    /// Every issue ever raised, in creation order.
    pub fn issues(&self) -> &[CriticalIssue] {
        &self.issues
    }

    pub fn get(&self, id: Uuid) -> Option<&CriticalIssue> {
        self.issues.iter().find(|i| i.id == id)
    }

    /// Issues not yet acknowledged.
    pub fn open_issues(&self) -> Vec<CriticalIssue> {
        self.issues.iter().filter(|i| i.is_open()).cloned().collect()
    }

    /// Issues whose window intersects `range`.
    pub fn issues_in_range(&self, range: &TimeWindow) -> Vec<CriticalIssue> {
        self.issues
            .iter()
            .filter(|i| i.window.overlaps(range))
            .cloned()
            .collect()
    }

    /// Issues last detected at or after `since`.
    pub fn history_since(&self, since: DateTime<Utc>) -> Vec<CriticalIssue> {
        self.issues
            .iter()
            .filter(|i| i.last_detected_at >= since)
            .cloned()
            .collect()
    }

    pub fn acknowledge(&mut self, id: Uuid) -> MonitorResult<()> {
        let issue = self
            .issues
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or(MonitorError::UnknownIssue(id))?;
        issue.acknowledged = true;
        Ok(())
    }

    /// Record the outcome of a sink delivery.
    pub fn mark_reported(&mut self, id: Uuid, reported: bool) -> MonitorResult<()> {
        let issue = self
            .issues
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or(MonitorError::UnknownIssue(id))?;
        issue.reported = reported;
        Ok(())
    }

    /// Issues the sink has not confirmed.
    pub fn unreported(&self) -> Vec<CriticalIssue> {
        self.issues.iter().filter(|i| !i.reported).cloned().collect()
    }
}

fn merge_into(issue: &mut CriticalIssue, candidate: IssueCandidate) {
    // An issue fed by several modalities belongs to none of them
    if issue.modality != candidate.modality {
        issue.modality = None;
    }
    issue.window = TimeWindow::new(
        issue.window.start.min(candidate.window.start),
        issue.window.end.max(candidate.window.end),
    );

    if candidate.detected_at > issue.last_detected_at {
        issue.last_detected_at = candidate.detected_at;
        issue.occurrences += 1;
        issue.summary = candidate.summary;
    }

    for observation in candidate.evidence {
        if !issue.evidence.contains(&observation) {
            issue.evidence.push(observation);
        }
    }
    issue.evidence.sort_by_key(Observation::timestamp);
    cap_evidence(&mut issue.evidence);
}

/// Keep only the most recent evidence.
fn cap_evidence(evidence: &mut Vec<Observation>) {
    let excess = evidence.len().saturating_sub(MAX_EVIDENCE);
    evidence.drain(..excess);
}
