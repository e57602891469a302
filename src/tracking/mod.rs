//! Sequential Monte Carlo beat, downbeat and tempo tracking
//!
//! Two coupled particle filters consume the emission activations frame by
//! frame:
//! - [`beat_filter`] tracks beat phase and tempo on every frame
//! - [`downbeat_filter`] tracks the position in the bar, advanced only on
//!   declared beats
//!
//! [`cascade`] couples them and produces the event stream.

pub mod beat_filter;
pub mod cascade;
pub mod downbeat_filter;
pub mod observation;
pub mod resample;

pub use cascade::ParticleCascade;
pub use observation::ObservationProfile;

use serde::{Deserialize, Serialize};

/// Kind of a detected event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A beat that does not start a bar
    Beat,
    /// The first beat of a bar
    Downbeat,
}

/// A beat or downbeat marker
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatEvent {
    /// Index of the frame the event was declared on
    pub frame_index: u64,

    /// Frame time in seconds (`frame_index / fps`)
    pub timestamp: f64,

    /// Beat or downbeat
    pub kind: EventKind,
}

impl BeatEvent {
    /// Whether this event starts a bar
    pub fn is_downbeat(&self) -> bool {
        self.kind == EventKind::Downbeat
    }
}
