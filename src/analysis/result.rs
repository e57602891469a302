//! Tracking result types

use serde::{Deserialize, Serialize};

use crate::tracking::BeatEvent;

/// Beat grid derived from the event log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeatGrid {
    /// Downbeat times in seconds
    pub downbeats: Vec<f64>,

    /// Times of every beat (downbeats included) in seconds
    pub beats: Vec<f64>,
}

impl BeatGrid {
    /// Split an event log into beat and downbeat times
    pub fn from_events(events: &[BeatEvent]) -> Self {
        Self {
            downbeats: events
                .iter()
                .filter(|e| e.is_downbeat())
                .map(|e| e.timestamp)
                .collect(),
            beats: events.iter().map(|e| e.timestamp).collect(),
        }
    }
}

/// Session metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingMetadata {
    /// Audio processed, in seconds (frames / fps)
    pub duration_seconds: f64,

    /// Input sample rate
    pub sample_rate: u32,

    /// Frame rate of the activations
    pub fps: f32,

    /// Frames processed
    pub frame_count: u64,

    /// Wall-clock time spent inside the session, in milliseconds
    pub processing_time_ms: f32,

    /// Crate version that produced the result
    pub algorithm_version: String,
}

/// Final state of a tracking session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingResult {
    /// Particle filter tempo (0 if no frame was processed)
    pub bpm: f32,

    /// Autocorrelation tempo over the last activations (0 with too little data)
    pub autocorr_bpm: f32,

    /// Most probable beats per bar
    pub beats_per_bar: u32,

    /// Every beat and downbeat, in order
    pub events: Vec<BeatEvent>,

    /// Event times split by kind
    pub beat_grid: BeatGrid,

    /// Session metadata
    pub metadata: TrackingMetadata,
}

impl TrackingResult {
    /// Number of downbeat events
    pub fn downbeat_count(&self) -> usize {
        self.beat_grid.downbeats.len()
    }
}
