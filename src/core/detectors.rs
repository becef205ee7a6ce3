//! Pattern detectors over rolling history.
//!
//! Every detector is a pure function of a [`DetectionWindow`]: given the same
//! window and thresholds it returns the same candidate. Detectors never read
//! the wall clock; "now" is part of the window.

use crate::config::{seconds, DetectorConfig};
use crate::core::history::saturating_sub;
use crate::core::issue::{IssueCandidate, IssueType, TimeWindow};
use crate::error::{MonitorError, MonitorResult};
use crate::ingest::types::{Modality, Observation, Polarity};
use chrono::{DateTime, Duration, Utc};

/// Slice of history a detector evaluates.
#[derive(Debug, Clone, Copy)]
pub struct DetectionWindow<'a> {
    /// Modality the observations belong to; `None` for cross-modality checks
    pub modality: Option<Modality>,
    /// Evaluation instant
    pub now: DateTime<Utc>,
    /// Observations up to `now`, oldest first. May reach back further than a
    /// detector's lookback; each detector trims to its own window.
    pub observations: &'a [Observation],
    /// Most recent activity in any modality (or session start if none)
    pub last_activity: Option<DateTime<Utc>>,
}

impl<'a> DetectionWindow<'a> {
    /// Observations in `[now - lookback, now]`.
    fn trailing(&self, lookback: Duration) -> &'a [Observation] {
        let since = saturating_sub(self.now, lookback);
        let start = self.observations.partition_point(|o| o.timestamp() < since);
        let end = self.observations.partition_point(|o| o.timestamp() <= self.now);
        &self.observations[start..end.max(start)]
    }
}

/// What drives a detector's evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Evaluated after every accepted observation
    Observation,
    /// Evaluated on the watchdog tick
    Tick,
}

/// Fraction of negative observations over a trailing window.
#[derive(Debug, Clone, PartialEq)]
pub struct SustainedNegative {
    pub window: Duration,
    pub threshold: f64,
    pub min_samples: usize,
}

/// Polarity transitions over a short trailing window.
#[derive(Debug, Clone, PartialEq)]
pub struct RapidSwing {
    pub window: Duration,
    pub min_swings: usize,
}

/// A single high-confidence negative observation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtremeEmotion {
    pub min_confidence: f64,
}

/// Silence across all modalities.
#[derive(Debug, Clone, PartialEq)]
pub struct CommunicationGap {
    pub threshold: Duration,
}

/// The detector set, one variant per critical pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum Detector {
    SustainedNegative(SustainedNegative),
    RapidSwing(RapidSwing),
    ExtremeEmotion(ExtremeEmotion),
    CommunicationGap(CommunicationGap),
}

impl Detector {
    /// Build all four detectors from configuration.
    pub fn from_config(config: &DetectorConfig) -> Vec<Detector> {
        vec![
            Detector::SustainedNegative(SustainedNegative {
                window: seconds(config.sustained_window_secs),
                threshold: config.sustained_fraction,
                min_samples: config.min_samples,
            }),
            Detector::RapidSwing(RapidSwing {
                window: seconds(config.swing_window_secs),
                min_swings: config.min_swings,
            }),
            Detector::ExtremeEmotion(ExtremeEmotion {
                min_confidence: config.extreme_confidence,
            }),
            Detector::CommunicationGap(CommunicationGap {
                threshold: seconds(config.gap_threshold_secs),
            }),
        ]
    }

    pub fn name(&self) -> &'static str {
        self.issue_type().as_str()
    }

    pub fn issue_type(&self) -> IssueType {
        match self {
            Detector::SustainedNegative(_) => IssueType::SustainedNegative,
            Detector::RapidSwing(_) => IssueType::RapidSwing,
            Detector::ExtremeEmotion(_) => IssueType::ExtremeEmotion,
            Detector::CommunicationGap(_) => IssueType::CommunicationGap,
        }
    }

    pub fn trigger(&self) -> Trigger {
        match self {
            Detector::CommunicationGap(_) => Trigger::Tick,
            _ => Trigger::Observation,
        }
    }

    /// How much history the detector reads.
    ///
    /// The gap detector works from the last-activity timestamp, which the
    /// session tracks independently of retention, so it needs none.
    pub fn lookback(&self) -> Duration {
        match self {
            Detector::SustainedNegative(d) => d.window,
            Detector::RapidSwing(d) => d.window,
            Detector::ExtremeEmotion(_) | Detector::CommunicationGap(_) => Duration::zero(),
        }
    }

    pub fn evaluate(&self, window: &DetectionWindow<'_>) -> Option<IssueCandidate> {
        match self {
            Detector::SustainedNegative(d) => d.evaluate(window),
            Detector::RapidSwing(d) => d.evaluate(window),
            Detector::ExtremeEmotion(d) => d.evaluate(window),
            Detector::CommunicationGap(d) => d.evaluate(window),
        }
    }
}

/// Fail with `RetentionTooShort` if any detector looks back past the horizon.
pub fn check_retention(detectors: &[Detector], horizon: Duration) -> MonitorResult<()> {
    for detector in detectors {
        if detector.lookback() > horizon {
            return Err(MonitorError::RetentionTooShort {
                detector: detector.name(),
                lookback_secs: detector.lookback().num_seconds(),
                horizon_secs: horizon.num_seconds(),
            });
        }
    }
    Ok(())
}

impl SustainedNegative {
    pub fn evaluate(&self, window: &DetectionWindow<'_>) -> Option<IssueCandidate> {
        let recent = window.trailing(self.window);
        if recent.is_empty() || recent.len() < self.min_samples {
            return None;
        }

        let negatives: Vec<Observation> = recent
            .iter()
            .filter(|o| o.label().is_negative())
            .cloned()
            .collect();
        let fraction = negatives.len() as f64 / recent.len() as f64;
        if fraction <= self.threshold {
            return None;
        }

        // Severity grows with how far past the threshold the fraction is and
        // with how much of the window the samples actually span.
        let excess = if self.threshold >= 1.0 {
            1.0
        } else {
            (fraction - self.threshold) / (1.0 - self.threshold)
        };
        let span = recent[recent.len() - 1].timestamp() - recent[0].timestamp();
        let coverage = ratio(span, self.window);
        let intensity = (0.5 * excess + 0.5 * coverage).clamp(0.0, 1.0);

        Some(IssueCandidate {
            issue_type: IssueType::SustainedNegative,
            intensity,
            modality: window.modality,
            window: TimeWindow::new(recent[0].timestamp(), window.now),
            evidence: negatives,
            detected_at: window.now,
            summary: format!(
                "{:.0}% negative affect across {} observations over {} min",
                fraction * 100.0,
                recent.len(),
                span.num_minutes()
            ),
        })
    }
}

impl RapidSwing {
    pub fn evaluate(&self, window: &DetectionWindow<'_>) -> Option<IssueCandidate> {
        let recent = window.trailing(self.window);
        let polar: Vec<&Observation> = recent
            .iter()
            .filter(|o| o.label().polarity() != Polarity::Ambiguous)
            .collect();

        let swings = count_swings(&polar);
        if swings == 0 || swings < self.min_swings {
            return None;
        }

        let intensity = (swings as f64 / self.min_swings as f64 * 0.3).min(1.0);
        let first = polar[0].timestamp();

        Some(IssueCandidate {
            issue_type: IssueType::RapidSwing,
            intensity,
            modality: window.modality,
            window: TimeWindow::new(first, window.now),
            evidence: polar.into_iter().cloned().collect(),
            detected_at: window.now,
            summary: format!(
                "{swings} polarity swings within {} min",
                self.window.num_minutes()
            ),
        })
    }
}

/// Count transitions between opposite polarities. Callers pass observations
/// with ambiguous polarity already removed.
fn count_swings(sequence: &[&Observation]) -> usize {
    sequence
        .windows(2)
        .filter(|pair| {
            pair[0].label() != pair[1].label()
                && pair[0].label().polarity() != pair[1].label().polarity()
        })
        .count()
}

impl ExtremeEmotion {
    pub fn evaluate(&self, window: &DetectionWindow<'_>) -> Option<IssueCandidate> {
        let latest = window.trailing(Duration::zero()).last()?;
        if !latest.label().is_negative() || latest.confidence() < self.min_confidence {
            return None;
        }

        let headroom = 1.0 - self.min_confidence;
        let intensity = if headroom <= f64::EPSILON {
            1.0
        } else {
            0.5 + 0.5 * ((latest.confidence() - self.min_confidence) / headroom)
        };

        Some(IssueCandidate {
            issue_type: IssueType::ExtremeEmotion,
            intensity: intensity.clamp(0.0, 1.0),
            modality: window.modality,
            window: TimeWindow::instant(latest.timestamp()),
            evidence: vec![latest.clone()],
            detected_at: window.now,
            summary: format!(
                "{} detected with confidence {:.2}",
                latest.label(),
                latest.confidence()
            ),
        })
    }
}

impl CommunicationGap {
    pub fn evaluate(&self, window: &DetectionWindow<'_>) -> Option<IssueCandidate> {
        let last_activity = window.last_activity?;
        let silence = window.now - last_activity;
        if silence < self.threshold {
            return None;
        }

        let overrun = ratio(silence - self.threshold, self.threshold);
        let evidence = window
            .observations
            .iter()
            .filter(|o| o.timestamp() <= window.now)
            .max_by_key(|o| o.timestamp())
            .cloned()
            .into_iter()
            .collect();

        Some(IssueCandidate {
            issue_type: IssueType::CommunicationGap,
            intensity: (0.5 + 0.5 * overrun).clamp(0.0, 1.0),
            modality: None,
            window: TimeWindow::new(last_activity, window.now),
            evidence,
            detected_at: window.now,
            summary: format!("no observations for {} min", silence.num_minutes()),
        })
    }
}

/// `part / whole`, clamped to [0, 1].
fn ratio(part: Duration, whole: Duration) -> f64 {
    let whole_ms = whole.num_milliseconds();
    if whole_ms <= 0 {
        return 1.0;
    }
    (part.num_milliseconds() as f64 / whole_ms as f64).clamp(0.0, 1.0)
}
