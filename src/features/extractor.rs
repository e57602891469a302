//! Streaming feature extractor
//!
//! Owns the trailing sample window and emits one feature vector every
//! `hop_size` samples:
//!
//! ```text
//! samples → window ring → Hann + FFT → |X| → log filterbank → log10(1 + x)
//!                                                        └→ positive diff ┘→ [bands, diff]
//! ```
//!
//! In centred mode the stream is preceded by `fft_size / 2` virtual zeros, so
//! frame `t` is centred on sample `t * hop_size` and the first frame appears
//! after `fft_size - fft_size / 2` samples.
//!
//! The output depends only on the sample sequence, never on how it is split
//! across [`FeatureExtractor::push`] calls.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::config::FeatureConfig;
use crate::error::TrackerError;
use crate::features::filterbank::LogFilterbank;
use crate::features::log_spec::{diff_frames, LogCompressor, SpectralDifference};
use crate::features::spectrum::SpectralFrontEnd;

/// Streaming feature extractor
#[derive(Debug)]
pub struct FeatureExtractor {
    frontend: SpectralFrontEnd,
    filterbank: Arc<LogFilterbank>,
    compressor: LogCompressor,
    difference: SpectralDifference,
    fft_size: usize,
    hop_size: usize,
    padding: usize,
    ring: VecDeque<f32>,
    samples_until_frame: usize,
    frames_emitted: u64,
    frame: Vec<f32>,
    magnitude: Vec<f32>,
}

impl FeatureExtractor {
    /// Build an extractor and its filterbank from the configuration
    ///
    /// # Errors
    ///
    /// Returns `TrackerError` if the filterbank parameters are degenerate.
    pub fn new(config: &FeatureConfig) -> Result<Self, TrackerError> {
        let filterbank = LogFilterbank::new(
            config.sample_rate,
            config.fft_size,
            config.num_bands,
            config.fmin,
            config.fmax,
            true,
        )?;
        Ok(Self::with_filterbank(config, Arc::new(filterbank)))
    }

    /// Build an extractor around an already computed (shared) filterbank
    pub fn with_filterbank(config: &FeatureConfig, filterbank: Arc<LogFilterbank>) -> Self {
        let lag = diff_frames(config.diff_ratio, config.hop_size, config.fft_size, config.window);
        let padding = if config.centered { config.fft_size / 2 } else { 0 };

        let mut extractor = Self {
            frontend: SpectralFrontEnd::new(config.fft_size, config.window),
            compressor: LogCompressor::new(config.log_mul, config.log_add),
            difference: SpectralDifference::new(lag, config.diff_scale, config.positive_diffs),
            fft_size: config.fft_size,
            hop_size: config.hop_size,
            padding,
            ring: VecDeque::with_capacity(config.fft_size),
            samples_until_frame: 0,
            frames_emitted: 0,
            frame: vec![0.0; config.fft_size],
            magnitude: vec![0.0; config.fft_size / 2 + 1],
            filterbank,
        };
        extractor.reset();
        extractor
    }

    /// Length of each feature vector (`2 * num_bands`)
    pub fn feature_dim(&self) -> usize {
        2 * self.filterbank.num_bands()
    }

    /// Shared filterbank
    pub fn filterbank(&self) -> &Arc<LogFilterbank> {
        &self.filterbank
    }

    /// Frames produced since the last reset
    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    /// Return to the initial state (padding restored, difference history cleared)
    pub fn reset(&mut self) {
        self.ring.clear();
        self.ring.extend(std::iter::repeat(0.0).take(self.padding));
        self.samples_until_frame = self.fft_size - self.padding;
        self.frames_emitted = 0;
        self.difference.reset();
    }

    /// Push samples, returning every feature vector that became available
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut features = Vec::with_capacity(samples.len() / self.hop_size + 1);
        self.push_with(samples, |f| features.push(f.to_vec()));
        features
    }

    /// Push samples, handing each new feature vector to `sink` in order
    pub fn push_with<F: FnMut(&[f32])>(&mut self, samples: &[f32], mut sink: F) {
        let mut feature = vec![0.0f32; self.feature_dim()];

        for &sample in samples {
            if self.ring.len() == self.fft_size {
                self.ring.pop_front();
            }
            self.ring.push_back(sample);
            self.samples_until_frame -= 1;

            if self.samples_until_frame == 0 {
                self.process_window(&mut feature);
                sink(&feature);
                self.samples_until_frame = self.hop_size;
            }
        }
    }

    fn process_window(&mut self, feature: &mut [f32]) {
        debug_assert_eq!(self.ring.len(), self.fft_size);

        let (head, tail) = self.ring.as_slices();
        self.frame[..head.len()].copy_from_slice(head);
        self.frame[head.len()..].copy_from_slice(tail);

        self.frontend.magnitude_into(&self.frame, &mut self.magnitude);

        let num_bands = self.filterbank.num_bands();
        let (bands, diff) = feature.split_at_mut(num_bands);
        self.filterbank.project(&self.magnitude, bands);
        self.compressor.compress(bands);
        self.difference.process(bands, diff);

        self.frames_emitted += 1;
        log::trace!("Feature frame {} ready", self.frames_emitted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noise(n: usize, seed: u32) -> Vec<f32> {
        // xorshift keeps the test signal deterministic and dependency-free
        let mut state = seed.max(1);
        (0..n)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state as f32 / u32::MAX as f32) * 2.0 - 1.0
            })
            .collect()
    }

    #[test]
    fn test_no_frames_until_window_is_filled() {
        let mut ex = FeatureExtractor::new(&FeatureConfig::default()).unwrap();
        assert!(ex.push(&vec![0.1; 705]).is_empty());
        assert_eq!(ex.push(&[0.1]).len(), 1);
        // Next frame one hop later
        assert!(ex.push(&vec![0.1; 440]).is_empty());
        assert_eq!(ex.push(&[0.1]).len(), 1);
    }

    #[test]
    fn test_uncentered_first_frame_needs_full_window() {
        let config = FeatureConfig {
            centered: false,
            ..FeatureConfig::default()
        };
        let mut ex = FeatureExtractor::new(&config).unwrap();
        assert!(ex.push(&vec![0.1; 1410]).is_empty());
        assert_eq!(ex.push(&[0.1]).len(), 1);
    }

    #[test]
    fn test_feature_layout() {
        let mut ex = FeatureExtractor::new(&FeatureConfig::default()).unwrap();
        assert_eq!(ex.feature_dim(), 272);

        let frames = ex.push(&noise(22050, 7));
        assert_eq!(frames.len(), 49);
        assert!(frames.iter().all(|f| f.len() == 272));

        // First frame carries no difference
        assert!(frames[0][136..].iter().all(|&d| d == 0.0));
        // Compressed energies and rectified differences are non-negative
        assert!(frames.iter().flatten().all(|&v| v >= 0.0 && v.is_finite()));
    }

    #[test]
    fn test_silence_gives_zero_features() {
        let mut ex = FeatureExtractor::new(&FeatureConfig::default()).unwrap();
        let frames = ex.push(&vec![0.0; 4410]);
        assert_eq!(frames.len(), 9);
        assert!(frames.iter().flatten().all(|&v| v == 0.0));
    }

    #[test]
    fn test_chunking_does_not_change_output() {
        let signal = noise(22050 * 2, 42);

        let mut whole = FeatureExtractor::new(&FeatureConfig::default()).unwrap();
        let expected = whole.push(&signal);

        for chunk in [1usize, 7, 441, 1000, 4096] {
            let mut ex = FeatureExtractor::new(&FeatureConfig::default()).unwrap();
            let mut got = Vec::new();
            for piece in signal.chunks(chunk) {
                got.extend(ex.push(piece));
            }
            assert_eq!(got.len(), expected.len(), "chunk size {}", chunk);
            for (a, b) in got.iter().zip(&expected) {
                for (x, y) in a.iter().zip(b) {
                    assert!((x - y).abs() <= 1e-6, "chunk size {}", chunk);
                }
            }
        }
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let signal = noise(5000, 3);
        let mut ex = FeatureExtractor::new(&FeatureConfig::default()).unwrap();
        let first = ex.push(&signal);
        ex.reset();
        assert_eq!(ex.frames_emitted(), 0);
        let second = ex.push(&signal);
        assert_eq!(first, second);
    }
}
