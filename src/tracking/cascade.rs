//! Beat → downbeat filter cascade
//!
//! Every activation advances the beat filter. When it declares a beat, the
//! downbeat filter is advanced with the strongest downbeat activation seen
//! since the previous beat and decides whether the beat starts a bar.

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::FilterConfig;
use crate::error::TrackerError;
use crate::ml::Activation;
use crate::tracking::beat_filter::BeatFilter;
use crate::tracking::downbeat_filter::DownbeatFilter;
use crate::tracking::{BeatEvent, EventKind};

/// Evidence is kept this far away from 0 and 1 so no likelihood vanishes
const EVIDENCE_MARGIN: f32 = 1e-3;

#[inline]
fn clamp_evidence(a: f32) -> f32 {
    if a.is_nan() {
        return EVIDENCE_MARGIN;
    }
    a.clamp(EVIDENCE_MARGIN, 1.0 - EVIDENCE_MARGIN)
}

/// Both particle filters plus the session's random stream and event log
#[derive(Debug, Clone)]
pub struct ParticleCascade {
    beat: BeatFilter,
    downbeat: DownbeatFilter,
    rng: StdRng,
    seed: u64,
    fps: f32,
    frames: u64,
    downbeat_since_beat: f32,
    events: Vec<BeatEvent>,
}

impl ParticleCascade {
    /// Build both filters and draw their priors
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::InvalidConfig` for unknown observation profiles.
    pub fn new(config: &FilterConfig, fps: f32) -> Result<Self, TrackerError> {
        let mut cascade = Self {
            beat: BeatFilter::new(config, fps)?,
            downbeat: DownbeatFilter::new(config)?,
            rng: StdRng::seed_from_u64(config.seed),
            seed: config.seed,
            fps,
            frames: 0,
            downbeat_since_beat: 0.0,
            events: Vec::new(),
        };
        cascade.start();
        Ok(cascade)
    }

    /// Reseed the random stream and redraw both priors, clearing the event log
    pub fn start(&mut self) {
        self.rng = StdRng::seed_from_u64(self.seed);
        self.beat.init(&mut self.rng);
        self.downbeat.init(&mut self.rng);
        self.frames = 0;
        self.downbeat_since_beat = 0.0;
        self.events.clear();
    }

    /// Consume one activation, returning the event declared on this frame
    pub fn process(&mut self, activation: &Activation) -> Option<BeatEvent> {
        let frame_index = self.frames;
        self.frames += 1;

        if activation.downbeat > self.downbeat_since_beat {
            self.downbeat_since_beat = activation.downbeat;
        }

        let beat_evidence = clamp_evidence(activation.any_beat());
        if !self.beat.update(beat_evidence, &mut self.rng) {
            return None;
        }

        let downbeat_evidence = clamp_evidence(self.downbeat_since_beat);
        self.downbeat_since_beat = 0.0;
        let kind = if self.downbeat.on_beat(downbeat_evidence, &mut self.rng) {
            EventKind::Downbeat
        } else {
            EventKind::Beat
        };

        let event = BeatEvent {
            frame_index,
            timestamp: frame_index as f64 / self.fps as f64,
            kind,
        };
        log::trace!("{:?} at frame {} ({:.3}s)", kind, frame_index, event.timestamp);
        self.events.push(event);
        Some(event)
    }

    /// Current tempo estimate; 0 until the first frame has been processed
    pub fn bpm(&self) -> f32 {
        if self.frames == 0 {
            0.0
        } else {
            self.beat.bpm()
        }
    }

    /// Most probable number of beats per bar
    pub fn beats_per_bar(&self) -> u32 {
        self.downbeat.beats_per_bar()
    }

    /// All events since [`ParticleCascade::start`], in order
    pub fn events(&self) -> &[BeatEvent] {
        &self.events
    }

    /// Frames processed since [`ParticleCascade::start`]
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Frame rate the filters run at
    pub fn fps(&self) -> f32 {
        self.fps
    }

    /// Beat-phase / tempo filter
    pub fn beat_filter(&self) -> &BeatFilter {
        &self.beat
    }

    /// Bar-position filter
    pub fn downbeat_filter(&self) -> &DownbeatFilter {
        &self.downbeat
    }
}
