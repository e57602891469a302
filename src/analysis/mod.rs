//! Session-level analysis
//!
//! - Autocorrelation tempo over the recent activations
//! - Result types returned when a session finishes

pub mod autocorr;
pub mod result;

pub use autocorr::{ActivationBuffer, AutocorrBpmEstimator};
pub use result::{BeatGrid, TrackingMetadata, TrackingResult};
