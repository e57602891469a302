//! Downbeat / bar-position particle filter
//!
//! Advanced once per declared beat. Each particle is a `(position, meter)`
//! pair; position 0 is the downbeat. On every beat the position steps forward
//! (wrapping at the meter), a fraction `lambda_d` of the particles is redrawn
//! from the prior, and the population is weighted with the strongest downbeat
//! activation seen since the previous beat.
//!
//! The beat is reported as a downbeat when the probability mass `q` at
//! position 0 is a majority and its information gain `1 - H₂(q)` reaches the
//! configured threshold.

use rand::Rng;

use crate::config::FilterConfig;
use crate::error::TrackerError;
use crate::tracking::observation::ObservationProfile;
use crate::tracking::resample::{apply_indices, effective_sample_size, normalize, systematic_indices};

/// One bar-position hypothesis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarParticle {
    /// Beat index within the bar, `0` is the downbeat
    pub position: u32,
    /// Beats per bar
    pub meter: u32,
}

impl BarParticle {
    /// Distance in beats to the nearest bar start
    #[inline]
    pub fn bar_distance(&self) -> f32 {
        self.position.min(self.meter - self.position) as f32
    }
}

/// Binary entropy in bits
pub fn binary_entropy(q: f32) -> f32 {
    if q <= 0.0 || q >= 1.0 {
        return 0.0;
    }
    -(q * q.log2() + (1.0 - q) * (1.0 - q).log2())
}

/// Downbeat / bar-position filter
#[derive(Debug, Clone)]
pub struct DownbeatFilter {
    particles: Vec<BarParticle>,
    weights: Vec<f32>,
    size: usize,
    profile: ObservationProfile,
    min_meter: u32,
    max_meter: u32,
    lambda_d: f32,
    ig_threshold: f32,
    resample_threshold: f32,
    last_downbeat_mass: f32,
    indices: Vec<usize>,
    scratch: Vec<BarParticle>,
}

impl DownbeatFilter {
    /// Build an (uninitialized) filter; call [`DownbeatFilter::init`] before use
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::InvalidConfig` for an unknown observation profile.
    pub fn new(config: &FilterConfig) -> Result<Self, TrackerError> {
        Ok(Self {
            particles: Vec::with_capacity(config.down_particle_size),
            weights: Vec::with_capacity(config.down_particle_size),
            size: config.down_particle_size,
            profile: config.downbeat_profile()?,
            min_meter: config.min_beats_per_bar,
            max_meter: config.max_beats_per_bar,
            lambda_d: config.lambda_d,
            ig_threshold: config.ig_threshold,
            resample_threshold: config.resample_threshold,
            last_downbeat_mass: 0.0,
            indices: Vec::with_capacity(config.down_particle_size),
            scratch: Vec::with_capacity(config.down_particle_size),
        })
    }

    fn draw_prior<R: Rng + ?Sized>(&self, rng: &mut R) -> BarParticle {
        let meter = rng.gen_range(self.min_meter..=self.max_meter);
        BarParticle {
            position: rng.gen_range(0..meter),
            meter,
        }
    }

    /// Draw the prior: uniform over meters, then over positions
    pub fn init<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.particles.clear();
        for _ in 0..self.size {
            let particle = self.draw_prior(rng);
            self.particles.push(particle);
        }
        self.weights.clear();
        self.weights.resize(self.size, 1.0 / self.size as f32);
        self.last_downbeat_mass = 0.0;

        log::debug!(
            "Downbeat filter initialized: {} particles, {}-{} beats per bar",
            self.size,
            self.min_meter,
            self.max_meter
        );
    }

    /// Advance one beat with downbeat evidence `evidence ∈ (0, 1)`
    ///
    /// Returns `true` when this beat is a downbeat.
    pub fn on_beat<R: Rng + ?Sized>(&mut self, evidence: f32, rng: &mut R) -> bool {
        for i in 0..self.particles.len() {
            let p = &mut self.particles[i];
            p.position = (p.position + 1) % p.meter;
            if rng.gen::<f32>() < self.lambda_d {
                let fresh = self.draw_prior(rng);
                self.particles[i] = fresh;
            }
        }

        let profile = self.profile;
        for (w, p) in self.weights.iter_mut().zip(&self.particles) {
            *w *= profile.likelihood(p.bar_distance(), evidence);
        }

        if !normalize(&mut self.weights) {
            log::warn!(
                "Bar particle weights collapsed at evidence {:.3}, restarting from the prior",
                evidence
            );
            self.init(rng);
            return false;
        }

        let q = self.downbeat_mass();
        self.last_downbeat_mass = q;
        let downbeat = q > 0.5 && 1.0 - binary_entropy(q) >= self.ig_threshold;

        if effective_sample_size(&self.weights) < self.resample_threshold * self.particles.len() as f32 {
            systematic_indices(&self.weights, rng, &mut self.indices);
            apply_indices(&mut self.particles, &self.indices, &mut self.scratch);
            let n = self.particles.len();
            self.weights.fill(1.0 / n as f32);
        }

        downbeat
    }

    /// Probability mass at bar position 0
    pub fn downbeat_mass(&self) -> f32 {
        self.particles
            .iter()
            .zip(&self.weights)
            .filter(|(p, _)| p.position == 0)
            .map(|(_, &w)| w)
            .sum()
    }

    /// Downbeat mass measured on the most recent beat
    pub fn last_downbeat_mass(&self) -> f32 {
        self.last_downbeat_mass
    }

    /// Most probable meter (ties go to the smaller meter)
    pub fn beats_per_bar(&self) -> u32 {
        (self.min_meter..=self.max_meter)
            .map(|m| {
                let mass: f32 = self
                    .particles
                    .iter()
                    .zip(&self.weights)
                    .filter(|(p, _)| p.meter == m)
                    .map(|(_, &w)| w)
                    .sum();
                (m, mass)
            })
            .fold((self.min_meter, f32::MIN), |best, (m, mass)| if mass > best.1 { (m, mass) } else { best })
            .0
    }

    /// Current particles
    pub fn particles(&self) -> &[BarParticle] {
        &self.particles
    }

    /// Current normalized weights
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }
}
