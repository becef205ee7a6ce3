//! Emotion observation types for the monitoring core.
//!
//! An [`Observation`] is the canonical form of one classifier output. It can
//! only be built through validation, so anything stored in history is known
//! to carry a vocabulary label and a confidence within [0, 1].

use crate::error::{MonitorError, MonitorResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Input channel an observation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Facial,
    Audio,
    Text,
}

impl Modality {
    /// All modalities, in history partition order.
    pub const ALL: [Modality; 3] = [Modality::Facial, Modality::Audio, Modality::Text];

    /// Partition index used by the history store.
    pub fn index(self) -> usize {
        match self {
            Modality::Facial => 0,
            Modality::Audio => 1,
            Modality::Text => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Modality::Facial => "facial",
            Modality::Audio => "audio",
            Modality::Text => "text",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "facial" | "face" | "video" => Ok(Modality::Facial),
            "audio" | "voice" => Ok(Modality::Audio),
            "text" => Ok(Modality::Text),
            other => Err(format!("unknown modality '{other}'")),
        }
    }
}

/// Coarse grouping of labels used for swing detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// Positive or neutral affect
    Positive,
    /// Negative affect
    Negative,
    /// Neither side; skipped when counting swings
    Ambiguous,
}

/// Closed emotion vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionLabel {
    Happy,
    Sad,
    Angry,
    Fear,
    Surprise,
    Disgust,
    Neutral,
    /// Audio-only extension
    Calm,
}

impl EmotionLabel {
    /// Labels every modality accepts.
    pub const CORE: [EmotionLabel; 7] = [
        EmotionLabel::Happy,
        EmotionLabel::Sad,
        EmotionLabel::Angry,
        EmotionLabel::Fear,
        EmotionLabel::Surprise,
        EmotionLabel::Disgust,
        EmotionLabel::Neutral,
    ];

    /// Parse a raw classifier label against the vocabulary of a modality.
    pub fn parse(raw: &str, modality: Modality) -> MonitorResult<Self> {
        let normalized = raw.trim().to_lowercase();
        let label = match (normalized.as_str(), modality) {
            ("happy", _) => Some(EmotionLabel::Happy),
            ("sad", _) => Some(EmotionLabel::Sad),
            ("angry", _) => Some(EmotionLabel::Angry),
            ("fear", _) => Some(EmotionLabel::Fear),
            ("surprise", _) => Some(EmotionLabel::Surprise),
            ("disgust", _) => Some(EmotionLabel::Disgust),
            ("neutral", _) => Some(EmotionLabel::Neutral),
            // The voice classifier reports these spellings
            ("fearful", Modality::Audio | Modality::Text) => Some(EmotionLabel::Fear),
            ("surprised", Modality::Audio | Modality::Text) => Some(EmotionLabel::Surprise),
            ("calm", Modality::Audio) => Some(EmotionLabel::Calm),
            _ => None,
        };

        label.ok_or_else(|| MonitorError::InvalidLabel {
            label: raw.to_string(),
            modality,
        })
    }

    pub fn polarity(self) -> Polarity {
        match self {
            EmotionLabel::Happy | EmotionLabel::Neutral | EmotionLabel::Calm => Polarity::Positive,
            EmotionLabel::Sad | EmotionLabel::Angry | EmotionLabel::Fear | EmotionLabel::Disgust => {
                Polarity::Negative
            }
            EmotionLabel::Surprise => Polarity::Ambiguous,
        }
    }

    pub fn is_negative(self) -> bool {
        self.polarity() == Polarity::Negative
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EmotionLabel::Happy => "happy",
            EmotionLabel::Sad => "sad",
            EmotionLabel::Angry => "angry",
            EmotionLabel::Fear => "fear",
            EmotionLabel::Surprise => "surprise",
            EmotionLabel::Disgust => "disgust",
            EmotionLabel::Neutral => "neutral",
            EmotionLabel::Calm => "calm",
        }
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One validated emotion observation.
///
/// Fields are private: the only way to obtain an observation is through
/// [`Observation::from_raw`], which rejects unknown labels and confidences
/// outside [0, 1]. Issues copy observations as evidence, so an observation
/// outlives its eviction from history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    timestamp: DateTime<Utc>,
    modality: Modality,
    label: EmotionLabel,
    confidence: f64,
}

impl Observation {
    /// Normalize raw classifier output into an observation.
    pub fn from_raw(
        raw_label: &str,
        confidence: f64,
        modality: Modality,
        timestamp: DateTime<Utc>,
    ) -> MonitorResult<Self> {
        let label = EmotionLabel::parse(raw_label, modality)?;
        Self::new(label, confidence, modality, timestamp)
    }

    /// Build an observation from an already-parsed label.
    pub fn new(
        label: EmotionLabel,
        confidence: f64,
        modality: Modality,
        timestamp: DateTime<Utc>,
    ) -> MonitorResult<Self> {
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(MonitorError::InvalidConfidence(confidence));
        }
        if label == EmotionLabel::Calm && modality != Modality::Audio {
            return Err(MonitorError::InvalidLabel {
                label: label.to_string(),
                modality,
            });
        }

        Ok(Self {
            timestamp,
            modality,
            label,
            confidence,
        })
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    pub fn label(&self) -> EmotionLabel {
        self.label
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }
}
