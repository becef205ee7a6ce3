//! Error taxonomy for the monitoring core.

use crate::ingest::types::Modality;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Root error type for the detection engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MonitorError {
    /// Label is not part of the vocabulary accepted for the modality.
    #[error("invalid label '{label}' for {modality} modality")]
    InvalidLabel { label: String, modality: Modality },

    /// Confidence is NaN or outside [0, 1].
    #[error("invalid confidence {0}: must be within [0, 1]")]
    InvalidConfidence(f64),

    /// Observation timestamp precedes the latest one in its modality.
    #[error("out-of-order {modality} observation at {timestamp} (latest is {latest})")]
    OutOfOrderObservation {
        modality: Modality,
        timestamp: DateTime<Utc>,
        latest: DateTime<Utc>,
    },

    /// A detector looks further back than the history retains.
    #[error("retention horizon {horizon_secs}s is shorter than {detector} lookback {lookback_secs}s")]
    RetentionTooShort {
        detector: &'static str,
        lookback_secs: i64,
        horizon_secs: i64,
    },

    /// Configuration rejected at validation time.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Report range holds no observations in any modality.
    #[error("no observations in the requested range")]
    EmptyHistory,

    /// Acknowledgement for an issue the session never raised.
    #[error("unknown issue {0}")]
    UnknownIssue(Uuid),

    /// The session has not been started, or has been stopped.
    #[error("monitoring session is not active")]
    SessionInactive,

    /// A background thread could not be spawned.
    #[error("failed to spawn {thread} thread: {message}")]
    WorkerSpawn { thread: &'static str, message: String },
}

pub type MonitorResult<T> = Result<T, MonitorError>;
