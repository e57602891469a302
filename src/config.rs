//! Configuration parameters for beat tracking
//!
//! Defaults reproduce the reference pipeline: 22050 Hz input, 1411-sample
//! windows every 441 samples (50 frames per second), a 24 bands-per-octave
//! logarithmic filterbank between 30 Hz and 17 kHz, and a cascade of 2500 beat
//! particles and 400 bar particles.

use serde::{Deserialize, Serialize};

use crate::error::TrackerError;
use crate::features::spectrum::WindowFunction;
use crate::tracking::observation::ObservationProfile;

/// Complete tracker configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Feature extraction parameters
    pub features: FeatureConfig,

    /// Particle filter parameters
    pub filter: FilterConfig,
}

/// Feature extraction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Input sample rate in Hz (default: 22050)
    pub sample_rate: u32,

    /// Analysis window and FFT length in samples (default: 1411)
    pub fft_size: usize,

    /// Samples between successive frames (default: 441)
    pub hop_size: usize,

    /// Filterbank bands per octave (default: 24)
    pub num_bands: usize,

    /// Lowest filterbank centre frequency in Hz (default: 30.0)
    pub fmin: f32,

    /// Highest filterbank centre frequency in Hz (default: 17000.0)
    pub fmax: f32,

    /// Analysis window applied before the FFT (default: Hann)
    pub window: WindowFunction,

    /// Centre frame `t` on sample `t * hop_size` by padding the stream start
    /// with `fft_size / 2` zeros (default: true)
    pub centered: bool,

    /// Multiplier inside the log compression `log10(mul * x + add)` (default: 1.0)
    pub log_mul: f32,

    /// Offset inside the log compression (default: 1.0)
    pub log_add: f32,

    /// Window level used to derive the difference lag in frames (default: 0.5)
    pub diff_ratio: f32,

    /// Scale applied to the temporal difference (default: 1.0)
    pub diff_scale: f32,

    /// Keep only positive differences (default: true)
    pub positive_diffs: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 22050,
            fft_size: 1411,
            hop_size: 441,
            num_bands: 24,
            fmin: 30.0,
            fmax: 17000.0,
            window: WindowFunction::Hann,
            centered: true,
            log_mul: 1.0,
            log_add: 1.0,
            diff_ratio: 0.5,
            diff_scale: 1.0,
            positive_diffs: true,
        }
    }
}

impl FeatureConfig {
    /// Frames per second produced by the extractor
    pub fn fps(&self) -> f32 {
        self.sample_rate as f32 / self.hop_size as f32
    }
}

/// Particle filter cascade parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Slowest tracked tempo (default: 55.0)
    pub min_bpm: f32,

    /// Fastest tracked tempo (default: 215.0)
    pub max_bpm: f32,

    /// Number of tempo hypotheses covered by the initial beat particles (default: 300)
    pub num_tempi: usize,

    /// Beat-phase/tempo particles (default: 2500)
    pub particle_size: usize,

    /// Bar-position particles (default: 400)
    pub down_particle_size: usize,

    /// Smallest meter hypothesis (default: 2)
    pub min_beats_per_bar: u32,

    /// Largest meter hypothesis (default: 4)
    pub max_beats_per_bar: u32,

    /// Tempo transition stiffness; the interval random walk has standard
    /// deviation `interval / lambda_b` per beat (default: 100.0)
    pub lambda_b: f32,

    /// Probability per beat that a bar particle is redrawn from the prior (default: 0.1)
    pub lambda_d: f32,

    /// Minimum information gain (bits) before a downbeat is reported (default: 0.4)
    pub ig_threshold: f32,

    /// Beat observation profile name (default: "B56")
    pub observation_lambda_b: String,

    /// Downbeat observation profile name (default: "B56")
    pub observation_lambda_d: String,

    /// Resample when the effective sample size falls below this fraction of
    /// the population; 1.0 resamples every update (default: 0.5)
    pub resample_threshold: f32,

    /// Seed of the per-session random stream (default: 1)
    pub seed: u64,

    /// Optional tempo hint concentrating the initial beat particles
    pub initial_bpm: Option<f32>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_bpm: 55.0,
            max_bpm: 215.0,
            num_tempi: 300,
            particle_size: 2500,
            down_particle_size: 400,
            min_beats_per_bar: 2,
            max_beats_per_bar: 4,
            lambda_b: 100.0,
            lambda_d: 0.1,
            ig_threshold: 0.4,
            observation_lambda_b: "B56".to_string(),
            observation_lambda_d: "B56".to_string(),
            resample_threshold: 0.5,
            seed: 1,
            initial_bpm: None,
        }
    }
}

impl FilterConfig {
    /// Shortest beat interval in frames at the given frame rate
    pub fn min_interval(&self, fps: f32) -> f32 {
        fps * 60.0 / self.max_bpm
    }

    /// Longest beat interval in frames at the given frame rate
    pub fn max_interval(&self, fps: f32) -> f32 {
        fps * 60.0 / self.min_bpm
    }

    /// Parsed beat observation profile
    pub fn beat_profile(&self) -> Result<ObservationProfile, TrackerError> {
        self.observation_lambda_b.parse()
    }

    /// Parsed downbeat observation profile
    pub fn downbeat_profile(&self) -> Result<ObservationProfile, TrackerError> {
        self.observation_lambda_d.parse()
    }
}

impl TrackerConfig {
    /// Frames per second of the whole pipeline
    pub fn fps(&self) -> f32 {
        self.features.fps()
    }

    /// Check every parameter, failing fast on the first malformed one
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::InvalidConfig` naming the offending field.
    pub fn validate(&self) -> Result<(), TrackerError> {
        let f = &self.features;
        let p = &self.filter;

        let fail = |msg: String| Err(TrackerError::InvalidConfig(msg));

        if f.sample_rate == 0 {
            return fail("sample_rate must be > 0".to_string());
        }
        if f.hop_size == 0 {
            return fail("hop_size must be > 0".to_string());
        }
        if f.fft_size < 2 {
            return fail(format!("fft_size must be >= 2, got {}", f.fft_size));
        }
        if f.fft_size < f.hop_size {
            return fail(format!(
                "fft_size ({}) must not be smaller than hop_size ({})",
                f.fft_size, f.hop_size
            ));
        }
        if f.num_bands == 0 {
            return fail("num_bands must be > 0".to_string());
        }
        if !(f.fmin > 0.0 && f.fmin < f.fmax) {
            return fail(format!(
                "fmin ({}) must be positive and below fmax ({})",
                f.fmin, f.fmax
            ));
        }
        if !(f.log_mul > 0.0 && f.log_add > 0.0) {
            return fail("log_mul and log_add must be > 0".to_string());
        }
        if !(f.diff_ratio > 0.0 && f.diff_ratio < 1.0) {
            return fail(format!("diff_ratio must be in (0, 1), got {}", f.diff_ratio));
        }
        if !f.diff_scale.is_finite() {
            return fail("diff_scale must be finite".to_string());
        }

        if !(p.min_bpm > 0.0 && p.min_bpm < p.max_bpm) {
            return fail(format!(
                "min_bpm ({}) must be positive and below max_bpm ({})",
                p.min_bpm, p.max_bpm
            ));
        }
        if p.num_tempi == 0 {
            return fail("num_tempi must be > 0".to_string());
        }
        if p.particle_size == 0 || p.down_particle_size == 0 {
            return fail(format!(
                "particle counts must be > 0 (particle_size={}, down_particle_size={})",
                p.particle_size, p.down_particle_size
            ));
        }
        if p.min_beats_per_bar < 1 || p.min_beats_per_bar > p.max_beats_per_bar {
            return fail(format!(
                "beats-per-bar range [{}, {}] is empty",
                p.min_beats_per_bar, p.max_beats_per_bar
            ));
        }
        if !(p.lambda_b > 0.0) {
            return fail(format!("lambda_b must be > 0, got {}", p.lambda_b));
        }
        if !(0.0..=1.0).contains(&p.lambda_d) {
            return fail(format!("lambda_d must be in [0, 1], got {}", p.lambda_d));
        }
        if !(0.0..=1.0).contains(&p.ig_threshold) {
            return fail(format!("ig_threshold must be in [0, 1], got {}", p.ig_threshold));
        }
        if !(p.resample_threshold > 0.0 && p.resample_threshold <= 1.0) {
            return fail(format!(
                "resample_threshold must be in (0, 1], got {}",
                p.resample_threshold
            ));
        }
        if let Some(bpm) = p.initial_bpm {
            if !(bpm >= p.min_bpm && bpm <= p.max_bpm) {
                return fail(format!(
                    "initial_bpm {} outside [{}, {}]",
                    bpm, p.min_bpm, p.max_bpm
                ));
            }
        }
        p.beat_profile()
            .and_then(|_| p.downbeat_profile())
            .map_err(|e| TrackerError::InvalidConfig(e.to_string()))?;

        // At least one frame per beat is needed for the phase walk
        if p.min_interval(f.fps()) < 1.0 {
            return fail(format!(
                "max_bpm {} exceeds the frame rate ({:.1} fps)",
                p.max_bpm,
                f.fps()
            ));
        }

        Ok(())
    }
}
