//! Rolling, per-modality history of observations.
//!
//! Each modality has its own append-only log ordered by timestamp. Entries
//! age out once they fall behind the retention horizon, measured from the
//! newest observation in that modality, or when the per-modality entry bound
//! is exceeded.

use crate::error::{MonitorError, MonitorResult};
use crate::ingest::types::{Modality, Observation};
use chrono::{DateTime, Duration, Utc};
use std::collections::vec_deque;
use std::collections::VecDeque;

/// Ordered log for a single modality.
#[derive(Debug, Clone, Default)]
pub struct ModalityLog {
    entries: VecDeque<Observation>,
}

impl ModalityLog {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn newest(&self) -> Option<&Observation> {
        self.entries.back()
    }

    /// Observations with `since <= timestamp <= until`, oldest first.
    pub fn range(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> vec_deque::Iter<'_, Observation> {
        if since > until {
            return self.entries.range(0..0);
        }
        let start = self.entries.partition_point(|o| o.timestamp() < since);
        let end = self.entries.partition_point(|o| o.timestamp() <= until);
        self.entries.range(start..end.max(start))
    }

    fn push(&mut self, observation: Observation) -> MonitorResult<()> {
        if let Some(latest) = self.entries.back() {
            if observation.timestamp() < latest.timestamp() {
                return Err(MonitorError::OutOfOrderObservation {
                    modality: observation.modality(),
                    timestamp: observation.timestamp(),
                    latest: latest.timestamp(),
                });
            }
        }
        self.entries.push_back(observation);
        Ok(())
    }

    fn evict_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let stale = self.entries.partition_point(|o| o.timestamp() < cutoff);
        self.entries.drain(..stale);
        stale
    }

    fn trim_to(&mut self, max_entries: usize) -> usize {
        let excess = self.entries.len().saturating_sub(max_entries);
        self.entries.drain(..excess);
        excess
    }
}

/// Time-bounded history partitioned by modality.
#[derive(Debug, Clone)]
pub struct RollingHistory {
    logs: [ModalityLog; 3],
    horizon: Duration,
    max_entries: usize,
}

impl RollingHistory {
    /// Create a history that keeps `horizon` worth of observations, at most
    /// `max_entries` per modality.
    pub fn new(horizon: Duration, max_entries: usize) -> Self {
        Self {
            logs: Default::default(),
            horizon,
            max_entries: max_entries.max(1),
        }
    }

    pub fn horizon(&self) -> Duration {
        self.horizon
    }

    /// Append an observation to its modality's log.
    ///
    /// Fails with `OutOfOrderObservation` if the timestamp precedes the newest
    /// entry of the same modality. Entries that fall out of the horizon as a
    /// result are evicted eagerly.
    pub fn append(&mut self, observation: Observation) -> MonitorResult<()> {
        let cutoff = saturating_sub(observation.timestamp(), self.horizon);
        let log = &mut self.logs[observation.modality().index()];
        log.push(observation)?;

        let evicted = log.evict_before(cutoff) + log.trim_to(self.max_entries);
        if evicted > 0 {
            tracing::trace!(evicted, "aged out observations");
        }
        Ok(())
    }

    /// Observations of `modality` with `since <= timestamp <= until`, in
    /// timestamp order. The iterator is lazy and can be cloned to restart.
    pub fn window(
        &self,
        modality: Modality,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> vec_deque::Iter<'_, Observation> {
        self.logs[modality.index()].range(since, until)
    }

    /// The `n` most recent observations of `modality`, oldest first.
    pub fn latest(&self, modality: Modality, n: usize) -> vec_deque::Iter<'_, Observation> {
        let entries = &self.logs[modality.index()].entries;
        let skip = entries.len().saturating_sub(n);
        entries.range(skip..)
    }

    /// Drop every observation strictly older than `cutoff`, in all modalities.
    pub fn evict_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        self.logs.iter_mut().map(|log| log.evict_before(cutoff)).sum()
    }

    /// Drop observations of one modality strictly older than `cutoff`.
    pub fn evict_modality_before(&mut self, modality: Modality, cutoff: DateTime<Utc>) -> usize {
        self.logs[modality.index()].evict_before(cutoff)
    }

    /// Timestamp of the newest observation across all modalities.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.logs
            .iter()
            .filter_map(|log| log.newest().map(Observation::timestamp))
            .max()
    }

    pub fn len(&self, modality: Modality) -> usize {
        self.logs[modality.index()].len()
    }

    pub fn total_len(&self) -> usize {
        self.logs.iter().map(ModalityLog::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.iter().all(ModalityLog::is_empty)
    }
}

/// `at - span`, clamped to the earliest representable instant.
pub(crate) fn saturating_sub(at: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    at.checked_sub_signed(span).unwrap_or(DateTime::<Utc>::MIN_UTC)
}
