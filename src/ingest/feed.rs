//! Classifier feed: the channel independent classifier pipelines push into.
//!
//! Facial and audio classifiers run on their own threads and produce raw
//! `(label, confidence, modality, timestamp)` tuples. The feed is a bounded
//! channel with cloneable senders; the monitoring loop is its single consumer.

use crate::ingest::types::Modality;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::time::Duration;

/// Default number of raw observations buffered between producers and the loop.
pub const DEFAULT_FEED_CAPACITY: usize = 1_024;

/// Raw classifier output, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub label: String,
    pub confidence: f64,
    pub modality: Modality,
    /// Defaults to ingest time when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl RawObservation {
    pub fn new(label: impl Into<String>, confidence: f64, modality: Modality) -> Self {
        Self {
            label: label.into(),
            confidence,
            modality,
            timestamp: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Errors raised by the feed itself (not by validation).
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("classifier feed is full")]
    Full,
    #[error("classifier feed is closed")]
    Closed,
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("read error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bounded multi-producer channel of raw observations.
pub struct ClassifierFeed {
    sender: Sender<RawObservation>,
    receiver: Receiver<RawObservation>,
}

impl ClassifierFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self { sender, receiver }
    }

    /// A producer handle; clone one per classifier pipeline.
    pub fn sender(&self) -> Sender<RawObservation> {
        self.sender.clone()
    }

    /// Get the receiver for raw observations.
    pub fn receiver(&self) -> &Receiver<RawObservation> {
        &self.receiver
    }

    /// Push without blocking; a full feed is reported rather than waited on.
    pub fn try_push(&self, raw: RawObservation) -> Result<(), FeedError> {
        self.sender.try_send(raw).map_err(|e| match e {
            TrySendError::Full(_) => FeedError::Full,
            TrySendError::Disconnected(_) => FeedError::Closed,
        })
    }

    /// Wait up to `timeout` for the next raw observation.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<RawObservation>, FeedError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(raw) => Ok(Some(raw)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(FeedError::Closed),
        }
    }

    /// Try to receive a raw observation without blocking.
    pub fn try_recv(&self) -> Option<RawObservation> {
        self.receiver.try_recv().ok()
    }
}

impl Default for ClassifierFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

/// Parse one JSON object per line. Blank lines and `#` comments are skipped.
pub fn parse_json_lines<R: BufRead>(reader: R) -> Result<Vec<RawObservation>, FeedError> {
    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let raw: RawObservation = serde_json::from_str(trimmed).map_err(|e| FeedError::Parse {
            line: idx + 1,
            message: e.to_string(),
        })?;
        out.push(raw);
    }
    Ok(out)
}

/// Stream JSON lines from `reader` into a feed sender until EOF.
///
/// Malformed lines are logged and skipped so one bad record does not stop a
/// live pipeline. Returns the number of records forwarded.
pub fn forward_json_lines<R: BufRead>(
    reader: R,
    sender: &Sender<RawObservation>,
) -> Result<usize, FeedError> {
    let mut forwarded = 0;
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match serde_json::from_str::<RawObservation>(trimmed) {
            Ok(raw) => {
                sender.send(raw).map_err(|_| FeedError::Closed)?;
                forwarded += 1;
            }
            Err(e) => tracing::warn!(line = idx + 1, error = %e, "skipping malformed feed line"),
        }
    }
    Ok(forwarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_feed_multiple_producers() {
        let feed = ClassifierFeed::new(8);
        let facial = feed.sender();
        let audio = feed.sender();

        facial
            .send(RawObservation::new("happy", 0.9, Modality::Facial))
            .unwrap();
        audio
            .send(RawObservation::new("calm", 0.6, Modality::Audio))
            .unwrap();

        let first = feed.try_recv().unwrap();
        let second = feed.try_recv().unwrap();
        assert_eq!(first.modality, Modality::Facial);
        assert_eq!(second.modality, Modality::Audio);
        assert!(feed.try_recv().is_none());
    }

    #[test]
    fn test_feed_full_is_reported() {
        let feed = ClassifierFeed::new(1);
        feed.try_push(RawObservation::new("sad", 0.5, Modality::Text))
            .unwrap();
        assert!(matches!(
            feed.try_push(RawObservation::new("sad", 0.5, Modality::Text)),
            Err(FeedError::Full)
        ));
    }

    #[test]
    fn test_parse_json_lines() {
        let input = r#"
# facial stream
{"label":"sad","confidence":0.8,"modality":"facial","timestamp":"2025-03-01T08:00:00Z"}

{"label":"calm","confidence":0.4,"modality":"audio"}
"#;
        let parsed = parse_json_lines(Cursor::new(input)).unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(parsed[0].timestamp.is_some());
        assert!(parsed[1].timestamp.is_none());
    }

    #[test]
    fn test_parse_json_lines_reports_line_number() {
        let input = "{\"label\":\"sad\",\"confidence\":0.8,\"modality\":\"facial\"}\nnot json\n";
        match parse_json_lines(Cursor::new(input)) {
            Err(FeedError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_forward_skips_malformed() {
        let feed = ClassifierFeed::new(8);
        let input = "{\"label\":\"sad\",\"confidence\":0.8,\"modality\":\"facial\"}\n{oops\n";
        let forwarded = forward_json_lines(Cursor::new(input), &feed.sender()).unwrap();
        assert_eq!(forwarded, 1);
    }
}
