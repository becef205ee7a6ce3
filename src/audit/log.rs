//! Counter-based audit log.
//!
//! Only counts are kept here. Labels, confidences and evidence never leave
//! the session through this log.

use crate::ingest::types::Modality;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Session-wide monitoring counters.
#[derive(Debug)]
pub struct AuditLog {
    /// Accepted observations, indexed by [`Modality::index`]
    accepted: [AtomicU64; 3],
    /// Observations rejected at ingestion
    rejected: AtomicU64,
    issues_raised: AtomicU64,
    issues_escalated: AtomicU64,
    /// Detector evaluations that panicked and were skipped
    detector_faults: AtomicU64,
    alerts_delivered: AtomicU64,
    alerts_failed: AtomicU64,
    /// Alerts discarded because the outbound queue was full
    alerts_dropped: AtomicU64,
    session_start: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            accepted: Default::default(),
            rejected: AtomicU64::new(0),
            issues_raised: AtomicU64::new(0),
            issues_escalated: AtomicU64::new(0),
            detector_faults: AtomicU64::new(0),
            alerts_delivered: AtomicU64::new(0),
            alerts_failed: AtomicU64::new(0),
            alerts_dropped: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create an audit log that persists to `path`, resuming from any
    /// counters already stored there.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            tracing::warn!(error = %e, "could not load previous audit counters");
        }

        log
    }

    pub fn record_accepted(&self, modality: Modality) {
        self.accepted[modality.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_issue_raised(&self) {
        self.issues_raised.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_issue_escalated(&self) {
        self.issues_escalated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_detector_fault(&self) {
        self.detector_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert_delivered(&self) {
        self.alerts_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert_failed(&self) {
        self.alerts_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert_dropped(&self) {
        self.alerts_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> AuditStats {
        let accepted = |m: Modality| self.accepted[m.index()].load(Ordering::Relaxed);
        AuditStats {
            facial_observations: accepted(Modality::Facial),
            audio_observations: accepted(Modality::Audio),
            text_observations: accepted(Modality::Text),
            rejected_observations: self.rejected.load(Ordering::Relaxed),
            issues_raised: self.issues_raised.load(Ordering::Relaxed),
            issues_escalated: self.issues_escalated.load(Ordering::Relaxed),
            detector_faults: self.detector_faults.load(Ordering::Relaxed),
            alerts_delivered: self.alerts_delivered.load(Ordering::Relaxed),
            alerts_failed: self.alerts_failed.load(Ordering::Relaxed),
            alerts_dropped: self.alerts_dropped.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Monitoring Statistics:\n\
             - Facial observations: {}\n\
             - Audio observations: {}\n\
             - Text observations: {}\n\
             - Rejected observations: {}\n\
             - Issues raised: {} ({} escalations)\n\
             - Alerts delivered: {} (failed {}, dropped {})\n\
             - Detector faults: {}\n\
             - Session duration: {} seconds",
            stats.facial_observations,
            stats.audio_observations,
            stats.text_observations,
            stats.rejected_observations,
            stats.issues_raised,
            stats.issues_escalated,
            stats.alerts_delivered,
            stats.alerts_failed,
            stats.alerts_dropped,
            stats.detector_faults,
            stats.session_duration_secs
        )
    }

    /// Save counters to disk. A log without a persistence path is a no-op.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let Some(path) = self.persist_path.as_ref() else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let persisted = PersistedCounters::from_stats(&self.stats());
        let json = serde_json::to_string_pretty(&persisted)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        let Some(path) = self.persist_path.as_ref() else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }

        let content = std::fs::read_to_string(path)?;
        let persisted: PersistedCounters = serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        for (slot, value) in self.accepted.iter().zip(persisted.accepted) {
            slot.store(value, Ordering::Relaxed);
        }
        self.rejected.store(persisted.rejected, Ordering::Relaxed);
        self.issues_raised.store(persisted.issues_raised, Ordering::Relaxed);
        self.issues_escalated
            .store(persisted.issues_escalated, Ordering::Relaxed);
        self.detector_faults
            .store(persisted.detector_faults, Ordering::Relaxed);
        self.alerts_delivered
            .store(persisted.alerts_delivered, Ordering::Relaxed);
        self.alerts_failed.store(persisted.alerts_failed, Ordering::Relaxed);
        self.alerts_dropped
            .store(persisted.alerts_dropped, Ordering::Relaxed);
        Ok(())
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of audit counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStats {
    pub facial_observations: u64,
    pub audio_observations: u64,
    pub text_observations: u64,
    pub rejected_observations: u64,
    pub issues_raised: u64,
    pub issues_escalated: u64,
    pub detector_faults: u64,
    pub alerts_delivered: u64,
    pub alerts_failed: u64,
    pub alerts_dropped: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

impl AuditStats {
    pub fn total_observations(&self) -> u64 {
        self.facial_observations + self.audio_observations + self.text_observations
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedCounters {
    accepted: [u64; 3],
    rejected: u64,
    issues_raised: u64,
    issues_escalated: u64,
    #[serde(default)]
    detector_faults: u64,
    alerts_delivered: u64,
    alerts_failed: u64,
    alerts_dropped: u64,
    last_updated: DateTime<Utc>,
}

impl PersistedCounters {
    fn from_stats(stats: &AuditStats) -> Self {
        Self {
            accepted: [
                stats.facial_observations,
                stats.audio_observations,
                stats.text_observations,
            ],
            rejected: stats.rejected_observations,
            issues_raised: stats.issues_raised,
            issues_escalated: stats.issues_escalated,
            detector_faults: stats.detector_faults,
            alerts_delivered: stats.alerts_delivered,
            alerts_failed: stats.alerts_failed,
            alerts_dropped: stats.alerts_dropped,
            last_updated: Utc::now(),
        }
    }
}

/// Thread-safe shared audit log.
pub type SharedAuditLog = Arc<AuditLog>;

pub fn create_shared_audit() -> SharedAuditLog {
    Arc::new(AuditLog::new())
}

pub fn create_shared_audit_with_persistence(path: PathBuf) -> SharedAuditLog {
    Arc::new(AuditLog::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_counting() {
        let log = AuditLog::new();
        log.record_accepted(Modality::Facial);
        log.record_accepted(Modality::Facial);
        log.record_accepted(Modality::Text);
        log.record_rejected();
        log.record_issue_raised();
        log.record_alert_dropped();

        let stats = log.stats();
        assert_eq!(stats.facial_observations, 2);
        assert_eq!(stats.audio_observations, 0);
        assert_eq!(stats.text_observations, 1);
        assert_eq!(stats.total_observations(), 3);
        assert_eq!(stats.rejected_observations, 1);
        assert_eq!(stats.issues_raised, 1);
        assert_eq!(stats.alerts_dropped, 1);
    }

    #[test]
    fn test_summary_format() {
        let summary = AuditLog::new().summary();
        assert!(summary.contains("Facial observations"));
        assert!(summary.contains("Issues raised"));
        assert!(summary.contains("Alerts delivered"));
    }

    #[test]
    fn test_persistence_roundtrip() {
        let path = std::env::temp_dir()
            .join(format!("maitri-audit-{}", uuid::Uuid::new_v4()))
            .join("audit.json");

        let log = AuditLog::with_persistence(path.clone());
        log.record_accepted(Modality::Audio);
        log.record_issue_escalated();
        log.record_alert_delivered();
        log.save().unwrap();

        let restored = AuditLog::with_persistence(path.clone());
        let stats = restored.stats();
        assert_eq!(stats.audio_observations, 1);
        assert_eq!(stats.issues_escalated, 1);
        assert_eq!(stats.alerts_delivered, 1);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_save_without_path_is_noop() {
        assert!(AuditLog::new().save().is_ok());
    }
}
