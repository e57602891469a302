//! # Stratum Beat
//!
//! Causal, streaming beat, downbeat and tempo tracking for live audio. Every
//! decision for a frame is made from samples up to that frame, with a fixed
//! latency of one analysis window.
//!
//! ## Features
//!
//! - **Spectral features**: windowed FFT, logarithmic triangular filterbank,
//!   log compression and positive temporal difference
//! - **Emission model**: small convolutional recurrent network giving
//!   per-frame beat / downbeat / no-beat probabilities
//! - **Particle cascade**: a beat-phase/tempo particle filter whose beat
//!   decisions drive a bar-position particle filter
//! - **Autocorrelation tempo**: a second, filter-independent BPM reading over
//!   the last ten seconds of activations
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use stratum_beat::{EmissionParams, EmissionShape, Tracker, TrackerConfig};
//!
//! let params = Arc::new(EmissionParams::from_safetensors(
//!     "beat_model.safetensors",
//!     EmissionShape::default(),
//! )?);
//! let mut tracker = Tracker::new(TrackerConfig::default(), params)?;
//!
//! // Mono f32 audio at 22050 Hz, in chunks of any size
//! let chunk = vec![0.0f32; 512];
//! for event in tracker.step(&chunk) {
//!     println!("{:?} at {:.3}s", event.kind, event.timestamp);
//! }
//! println!("BPM: {:.1}", tracker.bpm());
//! # Ok::<(), stratum_beat::TrackerError>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Audio chunk → FeatureExtractor → EmissionModel → BeatFilter → DownbeatFilter → events
//!                                              └→ ActivationBuffer → autocorrelation BPM
//! ```
//!
//! The reference configuration runs at 22050 Hz with a hop of 441 samples,
//! i.e. 50 frames per second.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod analysis;
pub mod config;
pub mod error;
pub mod features;
pub mod ml;
pub mod tracker;
pub mod tracking;

use std::sync::Arc;

// Re-export main types
pub use analysis::result::{BeatGrid, TrackingMetadata, TrackingResult};
pub use config::{FeatureConfig, FilterConfig, TrackerConfig};
pub use error::TrackerError;
pub use ml::{Activation, EmissionModel, EmissionParams, EmissionShape, RecurrentState};
pub use tracker::Tracker;
pub use tracking::{BeatEvent, EventKind, ObservationProfile};

/// Track a whole buffer in one call
///
/// Runs a fresh session over `samples` and returns its final result. This is
/// the same computation as feeding the buffer through [`Tracker::step`] in
/// any number of chunks.
///
/// # Arguments
///
/// * `samples` - Mono audio at `config.features.sample_rate`
/// * `params` - Emission model parameters
/// * `config` - Tracker configuration
///
/// # Errors
///
/// Returns `TrackerError::InvalidInput` for an empty buffer, and any error
/// [`Tracker::new`] reports.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use stratum_beat::{track_audio, EmissionParams, EmissionShape, TrackerConfig};
///
/// let params = Arc::new(EmissionParams::from_safetensors(
///     "beat_model.safetensors",
///     EmissionShape::default(),
/// )?);
/// let samples = vec![0.0f32; 22050 * 30];
/// let result = track_audio(&samples, params, TrackerConfig::default())?;
/// println!("{:.1} BPM, {} beats", result.bpm, result.events.len());
/// # Ok::<(), stratum_beat::TrackerError>(())
/// ```
pub fn track_audio(
    samples: &[f32],
    params: Arc<EmissionParams>,
    config: TrackerConfig,
) -> Result<TrackingResult, TrackerError> {
    if samples.is_empty() {
        return Err(TrackerError::InvalidInput("Empty audio samples".to_string()));
    }

    log::debug!(
        "Tracking {} samples at {} Hz",
        samples.len(),
        config.features.sample_rate
    );

    let mut tracker = Tracker::new(config, params)?;
    tracker.step(samples);
    Ok(tracker.finish())
}
