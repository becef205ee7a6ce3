//! MAITRI Monitor - critical-issue detection for crew emotional well-being.
//!
//! This library watches the stream of emotion observations produced by the
//! facial, audio and text classifiers and decides, in near real time,
//! whether the pattern is critical enough to report to ground control.
//!
//! # What It Watches For
//!
//! - **Sustained negative affect**: mostly sad, angry, fearful or disgusted
//!   observations over a trailing window
//! - **Rapid swings**: repeated positive/negative flips in a short window
//! - **Extreme emotion**: a single high-confidence negative observation
//! - **Communication gap**: no observation from any modality for too long
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       MAITRI Monitor                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │   Ingest    │──▶│   Rolling   │──▶│  Detectors  │       │
//! │  │ (validate)  │   │   History   │   │ (4 rules)   │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │                           │                 │   ▲ gap tick  │
//! │                           ▼                 ▼   │           │
//! │                    ┌─────────────┐   ┌─────────────┐       │
//! │                    │   Report    │◀──│ Aggregator  │──▶ sink│
//! │                    │  Generator  │   │  (dedup)    │       │
//! │                    └─────────────┘   └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use maitri_monitor::{Config, LogSink, Modality, MonitorSession};
//! use std::sync::Arc;
//!
//! let session = MonitorSession::new(Config::default(), Arc::new(LogSink))
//!     .expect("valid default config");
//! session.start().expect("Failed to start session");
//!
//! session.ingest("fear", 0.92, Modality::Facial, None).unwrap();
//! for issue in session.get_open_issues() {
//!     println!("{} ({})", issue.issue_type, issue.severity);
//! }
//! session.stop();
//! ```

pub mod alert;
pub mod audit;
pub mod config;
pub mod core;
pub mod error;
pub mod ingest;
pub mod session;

#[cfg(feature = "gateway")]
pub mod gateway;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use alert::{LogSink, ReportSink, SinkError};
pub use audit::{AuditLog, AuditStats, SharedAuditLog};
pub use config::{Config, ConfigError, DetectorConfig};
pub use core::{
    CriticalIssue, IssueType, ReportGenerator, Severity, TimeWindow, TrendDirection,
    WellBeingReport,
};
pub use error::{MonitorError, MonitorResult};
pub use ingest::{ClassifierFeed, EmotionLabel, Modality, Observation, Polarity, RawObservation};
pub use session::MonitorSession;

// Gateway re-exports (when enabled)
#[cfg(feature = "gateway")]
pub use gateway::{
    BlockingGroundControlClient, GatewayError, GroundControlClient, GroundControlConfig,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Notice shown to the crew when monitoring starts.
pub const MONITORING_NOTICE: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║               MAITRI WELL-BEING MONITOR - NOTICE                 ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  This monitor watches emotion estimates for signs of distress.   ║
║                                                                  ║
║  ✓ WHAT IT USES:                                                 ║
║    • Emotion labels and confidences from the classifiers         ║
║    • When each observation was made                              ║
║                                                                  ║
║  ✗ WHAT IT NEVER KEEPS:                                          ║
║    • Camera frames or audio recordings                           ║
║    • Conversation content                                        ║
║    • Observations older than the retention horizon               ║
║                                                                  ║
║  Only critical issues are sent to ground control. Each one       ║
║  can be reviewed and acknowledged on board with:                 ║
║    maitri-monitor status                                         ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitoring_notice_contents() {
        assert!(MONITORING_NOTICE.contains("NOTICE"));
        assert!(MONITORING_NOTICE.contains("NEVER KEEPS"));
        assert!(MONITORING_NOTICE.contains("ground control"));
    }
}
