//! Audit trail for the monitoring session.
//!
//! Counts what the monitor has accepted, rejected, raised and delivered so
//! operators can check its behavior without reading crew data.

pub mod log;

// Re-export commonly used types
pub use log::{create_shared_audit, create_shared_audit_with_persistence, AuditLog, AuditStats, SharedAuditLog};
