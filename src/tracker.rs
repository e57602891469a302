//! Tracking session
//!
//! A [`Tracker`] owns everything one stream needs: the feature extractor and
//! its sample ring, the emission model's recurrent state, both particle
//! filters with their random stream, and the rolling activation buffer for
//! the autocorrelation tempo. Filterbank and model parameters are shared
//! read-only through `Arc`s, so many sessions can run side by side.
//!
//! ```text
//! step(samples) → FeatureExtractor → EmissionModel → ParticleCascade → events
//!                                               └→ ActivationBuffer → autocorr BPM
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::analysis::autocorr::{ActivationBuffer, AutocorrBpmEstimator};
use crate::analysis::result::{BeatGrid, TrackingMetadata, TrackingResult};
use crate::config::TrackerConfig;
use crate::error::TrackerError;
use crate::features::{FeatureExtractor, LogFilterbank};
use crate::ml::{Activation, EmissionModel, EmissionParams, RecurrentState};
use crate::tracking::{BeatEvent, ParticleCascade};

/// Streaming beat / downbeat / tempo tracking session
#[derive(Debug)]
pub struct Tracker {
    config: TrackerConfig,
    extractor: FeatureExtractor,
    model: EmissionModel,
    state: RecurrentState,
    cascade: ParticleCascade,
    activations: ActivationBuffer,
    last_activation: Activation,
    processing_time: Duration,
}

impl Tracker {
    /// Validate the configuration and build a ready-to-run session
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::InvalidConfig` for a malformed configuration or
    /// when the feature width does not match the model input, and
    /// `TrackerError::ModelError` for an inconsistent parameter set, and
    /// `TrackerError::NumericalError` for parameters holding NaN or infinity.
    pub fn new(config: TrackerConfig, params: Arc<EmissionParams>) -> Result<Self, TrackerError> {
        config.validate()?;
        let extractor = FeatureExtractor::new(&config.features)?;
        Self::assemble(config, params, extractor)
    }

    /// Like [`Tracker::new`], reusing a filterbank shared with other sessions
    ///
    /// # Errors
    ///
    /// Same as [`Tracker::new`].
    pub fn with_filterbank(
        config: TrackerConfig,
        params: Arc<EmissionParams>,
        filterbank: Arc<LogFilterbank>,
    ) -> Result<Self, TrackerError> {
        config.validate()?;
        let extractor = FeatureExtractor::with_filterbank(&config.features, filterbank);
        Self::assemble(config, params, extractor)
    }

    fn assemble(
        config: TrackerConfig,
        params: Arc<EmissionParams>,
        extractor: FeatureExtractor,
    ) -> Result<Self, TrackerError> {
        params.validate()?;
        if extractor.feature_dim() != params.shape.input_dim {
            return Err(TrackerError::InvalidConfig(format!(
                "features are {} wide but the emission model expects {}",
                extractor.feature_dim(),
                params.shape.input_dim
            )));
        }

        let fps = config.fps();
        let cascade = ParticleCascade::new(&config.filter, fps)?;
        let estimator = AutocorrBpmEstimator::new(fps, config.filter.min_bpm, config.filter.max_bpm);
        let model = EmissionModel::new(params);
        let state = model.initial_state();

        log::debug!(
            "Tracker ready: {} Hz, {} fps, {} feature bands, {}+{} particles",
            config.features.sample_rate,
            fps,
            extractor.filterbank().num_bands(),
            config.filter.particle_size,
            config.filter.down_particle_size
        );

        Ok(Self {
            extractor,
            model,
            state,
            cascade,
            activations: ActivationBuffer::new(estimator),
            last_activation: Activation::default(),
            processing_time: Duration::ZERO,
            config,
        })
    }

    /// Begin a new session
    ///
    /// Clears the sample ring and difference history, zeroes the recurrent
    /// state, reseeds the random stream and redraws both particle priors.
    pub fn start(&mut self) {
        self.extractor.reset();
        self.state.reset();
        self.cascade.start();
        self.activations.clear();
        self.last_activation = Activation::default();
        self.processing_time = Duration::ZERO;
        log::debug!("Tracking session started (seed {})", self.config.filter.seed);
    }

    /// Prime the model with `frames` silent frames, then restore a zero state
    ///
    /// Filters and extractor are untouched.
    pub fn warm_up(&mut self, frames: usize) {
        let silence = vec![0.0f32; self.model.input_dim()];
        for _ in 0..frames {
            self.model.infer_in_place(&silence, &mut self.state);
        }
        self.state.reset();
        log::debug!("Emission model warmed up with {} frames", frames);
    }

    /// Push a chunk of mono samples, returning the events it produced
    ///
    /// Chunks of any size are accepted; the result does not depend on how the
    /// stream is split.
    pub fn step(&mut self, samples: &[f32]) -> Vec<BeatEvent> {
        let started = Instant::now();
        let mut events = Vec::new();

        let Self {
            extractor,
            model,
            state,
            cascade,
            activations,
            last_activation,
            ..
        } = self;

        extractor.push_with(samples, |feature| {
            let activation = model.infer_in_place(feature, state);
            *last_activation = activation;
            if let Some(event) = track(cascade, activations, &activation) {
                events.push(event);
            }
        });

        self.processing_time += started.elapsed();
        events
    }

    /// Feed one precomputed feature vector, bypassing the extractor
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::InvalidInput` if the vector has the wrong width.
    pub fn process_features(&mut self, feature: &[f32]) -> Result<Option<BeatEvent>, TrackerError> {
        if feature.len() != self.model.input_dim() {
            return Err(TrackerError::InvalidInput(format!(
                "feature vector has {} values, expected {}",
                feature.len(),
                self.model.input_dim()
            )));
        }
        let activation = self.model.infer_in_place(feature, &mut self.state);
        self.last_activation = activation;
        Ok(track(&mut self.cascade, &mut self.activations, &activation))
    }

    /// Feed one activation, bypassing extractor and model
    ///
    /// The activation goes through the same repair as model output, so NaN
    /// or unnormalised values never reach the filters or the tempo buffer.
    pub fn process_activation(&mut self, activation: Activation) -> Option<BeatEvent> {
        let (activation, repaired) = Activation::from_raw(activation.to_array());
        if repaired {
            log::warn!("Repaired host activation to {:?}", activation);
        }
        self.last_activation = activation;
        track(&mut self.cascade, &mut self.activations, &activation)
    }

    /// Finish the session, returning the final tempo and the full event log
    ///
    /// The autocorrelation tempo is recomputed over the buffered frames. The
    /// session keeps its state; call [`Tracker::start`] to begin another.
    pub fn finish(&mut self) -> TrackingResult {
        let autocorr_bpm = self.activations.recompute();
        let frame_count = self.cascade.frame_count();
        let fps = self.config.fps();
        let events = self.cascade.events().to_vec();

        let result = TrackingResult {
            bpm: self.cascade.bpm(),
            autocorr_bpm,
            beats_per_bar: self.cascade.beats_per_bar(),
            beat_grid: BeatGrid::from_events(&events),
            events,
            metadata: TrackingMetadata {
                duration_seconds: frame_count as f64 / fps as f64,
                sample_rate: self.config.features.sample_rate,
                fps,
                frame_count,
                processing_time_ms: self.processing_time.as_secs_f32() * 1000.0,
                algorithm_version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        log::debug!(
            "Tracking session finished: {} frames, {:.1} BPM (autocorrelation {:.0}), {} beats, {} downbeats",
            frame_count,
            result.bpm,
            result.autocorr_bpm,
            result.beat_grid.beats.len(),
            result.downbeat_count()
        );
        result
    }

    /// Current particle filter tempo; 0 before the first frame
    pub fn bpm(&self) -> f32 {
        self.cascade.bpm()
    }

    /// Last autocorrelation tempo; 0 until about two seconds have been seen
    pub fn autocorr_bpm(&self) -> f32 {
        self.activations.bpm()
    }

    /// Events since [`Tracker::start`], in order
    pub fn events(&self) -> &[BeatEvent] {
        self.cascade.events()
    }

    /// Frames processed since [`Tracker::start`]
    pub fn frame_count(&self) -> u64 {
        self.cascade.frame_count()
    }

    /// Most probable beats per bar
    pub fn beats_per_bar(&self) -> u32 {
        self.cascade.beats_per_bar()
    }

    /// Activation of the most recent frame
    pub fn last_activation(&self) -> Activation {
        self.last_activation
    }

    /// Current recurrent state of the emission model
    pub fn recurrent_state(&self) -> &RecurrentState {
        &self.state
    }

    /// Session configuration
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }
}

/// Hand one activation to the filters and the tempo buffer
fn track(cascade: &mut ParticleCascade, activations: &mut ActivationBuffer, activation: &Activation) -> Option<BeatEvent> {
    activations.push(activation.beat, activation.downbeat);
    cascade.process(activation)
}
