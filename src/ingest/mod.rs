//! Observation ingest for the monitoring core.
//!
//! Raw classifier output enters through the [`feed`] channel and is
//! normalized into validated [`Observation`]s before it can reach history.

pub mod feed;
pub mod types;

// Re-export commonly used types
pub use feed::{
    forward_json_lines, parse_json_lines, ClassifierFeed, FeedError, RawObservation,
    DEFAULT_FEED_CAPACITY,
};
pub use types::{EmotionLabel, Modality, Observation, Polarity};
