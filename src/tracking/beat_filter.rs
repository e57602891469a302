//! Beat-phase / tempo particle filter
//!
//! Each particle carries a phase `θ ∈ [0, 1)` through the current beat and
//! the beat interval `τ` in frames. Every frame:
//!
//! 1. **Propagate** - `θ += 1/τ`; when the phase wraps the particle has
//!    reached a beat and its interval takes a random-walk step
//!    `τ += N(0, τ / lambda_b)`, clamped into the tempo range
//! 2. **Weight** - by the beat evidence through the observation profile,
//!    using the particle's distance in frames to its nearest beat
//! 3. **Normalize**, and **resample** systematically when the effective
//!    sample size drops below `resample_threshold · N`
//!
//! A beat is declared once half of the probability mass has reached its
//! beat: particles that wrapped since the previous beat and are still in the
//! first half of their cycle, plus particles less than half a frame away
//! from wrapping. Beats closer together than half the minimum interval are
//! suppressed.

use rand::Rng;
use rand_distr::StandardNormal;

use crate::config::FilterConfig;
use crate::error::TrackerError;
use crate::tracking::observation::ObservationProfile;
use crate::tracking::resample::{apply_indices, effective_sample_size, normalize, systematic_indices, weighted_median};

/// Spread of the initial intervals around a tempo hint, relative to the hinted interval
const HINT_SPREAD: f32 = 0.02;

/// Fraction of the probability mass that must reach its beat
const BEAT_MASS: f32 = 0.5;

/// One tempo/phase hypothesis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatParticle {
    /// Position within the current beat, `[0, 1)`
    pub phase: f32,
    /// Beat interval in frames
    pub interval: f32,
    /// Wrapped since the last declared beat
    pub wrapped: bool,
}

impl BeatParticle {
    /// Circular distance in frames to the nearest beat
    #[inline]
    pub fn beat_distance(&self) -> f32 {
        self.phase.min(1.0 - self.phase) * self.interval
    }
}

/// Beat-phase / tempo filter
#[derive(Debug, Clone)]
pub struct BeatFilter {
    particles: Vec<BeatParticle>,
    weights: Vec<f32>,
    size: usize,
    profile: ObservationProfile,
    fps: f32,
    min_bpm: f32,
    max_bpm: f32,
    num_tempi: usize,
    min_interval: f32,
    max_interval: f32,
    lambda_b: f32,
    resample_threshold: f32,
    initial_bpm: Option<f32>,
    /// Minimum frames between two declared beats
    refractory: f32,
    frames_since_beat: f32,
    indices: Vec<usize>,
    scratch: Vec<BeatParticle>,
}

impl BeatFilter {
    /// Build an (uninitialized) filter; call [`BeatFilter::init`] before use
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::InvalidConfig` for an unknown observation profile.
    pub fn new(config: &FilterConfig, fps: f32) -> Result<Self, TrackerError> {
        let profile = config.beat_profile()?;
        let min_interval = config.min_interval(fps);

        Ok(Self {
            particles: Vec::with_capacity(config.particle_size),
            weights: Vec::with_capacity(config.particle_size),
            size: config.particle_size,
            profile,
            fps,
            min_bpm: config.min_bpm,
            max_bpm: config.max_bpm,
            num_tempi: config.num_tempi.max(1),
            min_interval,
            max_interval: config.max_interval(fps),
            lambda_b: config.lambda_b,
            resample_threshold: config.resample_threshold,
            initial_bpm: config.initial_bpm,
            refractory: min_interval / 2.0,
            frames_since_beat: f32::INFINITY,
            indices: Vec::with_capacity(config.particle_size),
            scratch: Vec::with_capacity(config.particle_size),
        })
    }

    /// Draw the prior population
    ///
    /// Without a hint, particle `j` takes the `j mod num_tempi`-th tempo of an
    /// even BPM grid over the tempo range and a uniform random phase. With a
    /// hint, intervals are drawn around the hinted interval.
    pub fn init<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let n = self.size;
        self.particles.clear();

        let span = self.max_bpm - self.min_bpm;
        let denom = (self.num_tempi.saturating_sub(1)).max(1) as f32;

        for j in 0..n {
            let interval = match self.initial_bpm {
                Some(bpm) => {
                    let centre = self.bpm_to_interval(bpm);
                    let z: f32 = rng.sample(StandardNormal);
                    centre + z * HINT_SPREAD * centre
                }
                None => {
                    let k = (j % self.num_tempi) as f32;
                    self.bpm_to_interval(self.min_bpm + k * span / denom)
                }
            };
            self.particles.push(BeatParticle {
                phase: rng.gen::<f32>(),
                interval: interval.clamp(self.min_interval, self.max_interval),
                wrapped: false,
            });
        }

        self.weights.clear();
        self.weights.resize(n, 1.0 / n as f32);
        self.frames_since_beat = f32::INFINITY;

        log::debug!(
            "Beat filter initialized: {} particles, {:.1}-{:.1} frames per beat{}",
            n,
            self.min_interval,
            self.max_interval,
            self.initial_bpm
                .map(|bpm| format!(", hint {:.1} BPM", bpm))
                .unwrap_or_default()
        );
    }

    /// Advance one frame with beat evidence `evidence ∈ (0, 1)`
    ///
    /// Returns `true` when a beat is declared on this frame.
    pub fn update<R: Rng + ?Sized>(&mut self, evidence: f32, rng: &mut R) -> bool {
        self.frames_since_beat += 1.0;
        let flag_wraps = self.frames_since_beat >= self.refractory;

        self.propagate(flag_wraps, rng);
        self.weight(evidence);

        if !normalize(&mut self.weights) {
            log::warn!(
                "Beat particle weights collapsed at evidence {:.3}, restarting from the prior",
                evidence
            );
            self.init(rng);
            return false;
        }

        let beat = flag_wraps && self.beat_mass() >= BEAT_MASS;

        if effective_sample_size(&self.weights) < self.resample_threshold * self.particles.len() as f32 {
            self.resample(rng);
        }

        if beat {
            for p in self.particles.iter_mut() {
                p.wrapped = false;
            }
            self.frames_since_beat = 0.0;
        }
        beat
    }

    fn propagate<R: Rng + ?Sized>(&mut self, flag_wraps: bool, rng: &mut R) {
        for p in self.particles.iter_mut() {
            p.phase += 1.0 / p.interval;
            if p.phase >= 1.0 {
                p.phase -= p.phase.floor();
                // Wraps inside the refractory window belong to the beat just declared
                if flag_wraps {
                    p.wrapped = true;
                }
                let z: f32 = rng.sample(StandardNormal);
                p.interval = (p.interval + z * p.interval / self.lambda_b).clamp(self.min_interval, self.max_interval);
            }
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn weight(&mut self, evidence: f32) {
        let profile = self.profile;
        for (w, p) in self.weights.iter_mut().zip(&self.particles) {
            *w *= profile.likelihood(p.beat_distance(), evidence);
        }
    }

    #[cfg(feature = "parallel")]
    fn weight(&mut self, evidence: f32) {
        use rayon::prelude::*;

        let profile = self.profile;
        self.weights
            .par_iter_mut()
            .zip(self.particles.par_iter())
            .for_each(|(w, p)| *w *= profile.likelihood(p.beat_distance(), evidence));
    }

    /// Probability mass that has reached its beat
    fn beat_mass(&self) -> f32 {
        self.particles
            .iter()
            .zip(&self.weights)
            .filter(|(p, _)| (p.wrapped && p.phase < 0.5) || (1.0 - p.phase) * p.interval <= 0.5)
            .map(|(_, &w)| w)
            .sum()
    }

    fn resample<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        systematic_indices(&self.weights, rng, &mut self.indices);
        apply_indices(&mut self.particles, &self.indices, &mut self.scratch);
        let n = self.particles.len();
        self.weights.fill(1.0 / n as f32);
        log::trace!("Beat particles resampled");
    }

    fn bpm_to_interval(&self, bpm: f32) -> f32 {
        self.fps * 60.0 / bpm
    }

    /// Current tempo: `60 · fps / weighted median interval`
    pub fn bpm(&self) -> f32 {
        self.interval_estimate()
            .map(|tau| self.fps * 60.0 / tau)
            .unwrap_or(0.0)
    }

    /// Weighted median beat interval in frames
    pub fn interval_estimate(&self) -> Option<f32> {
        let intervals: Vec<f32> = self.particles.iter().map(|p| p.interval).collect();
        weighted_median(&intervals, &self.weights)
    }

    /// Current particles
    pub fn particles(&self) -> &[BeatParticle] {
        &self.particles
    }

    /// Current normalized weights
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    /// Shortest and longest admissible beat intervals in frames
    pub fn interval_range(&self) -> (f32, f32) {
        (self.min_interval, self.max_interval)
    }
}
