//! Log compression and positive temporal difference
//!
//! `compress` maps filterbank energies through `log10(mul * x + add)`;
//! [`SpectralDifference`] keeps the last few compressed frames and emits the
//! (optionally half-wave rectified) difference to the frame `diff_frames`
//! hops back.

use std::collections::VecDeque;

use crate::features::spectrum::WindowFunction;

/// Elementwise `log10(mul * x + add)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogCompressor {
    /// Multiplier applied before the log
    pub mul: f32,
    /// Offset added before the log (keeps `log(0)` finite)
    pub add: f32,
}

impl LogCompressor {
    /// Create a compressor
    pub fn new(mul: f32, add: f32) -> Self {
        Self { mul, add }
    }

    /// Compress `values` in place
    pub fn compress(&self, values: &mut [f32]) {
        for v in values.iter_mut() {
            *v = (self.mul * *v + self.add).log10();
        }
    }
}

/// Number of frames between the two spectra being differenced
///
/// The lag is the distance (in hops) from the window centre to the first
/// sample where the window exceeds `diff_ratio` of its maximum, rounded, and
/// never less than one frame.
pub fn diff_frames(diff_ratio: f32, hop_size: usize, fft_size: usize, window: WindowFunction) -> usize {
    let coefficients = window.coefficients(fft_size);
    let max = coefficients.iter().copied().fold(f32::MIN, f32::max);
    let first = coefficients
        .iter()
        .position(|&w| w > diff_ratio * max)
        .unwrap_or(0);
    let diff_samples = fft_size as f64 / 2.0 - first as f64;
    ((diff_samples / hop_size as f64).round() as i64).max(1) as usize
}

/// Temporal difference against a short history of compressed frames
#[derive(Debug, Clone)]
pub struct SpectralDifference {
    lag: usize,
    scale: f32,
    positive_only: bool,
    history: VecDeque<Vec<f32>>,
}

impl SpectralDifference {
    /// Difference against the frame `lag` hops back
    pub fn new(lag: usize, scale: f32, positive_only: bool) -> Self {
        let lag = lag.max(1);
        Self {
            lag,
            scale,
            positive_only,
            history: VecDeque::with_capacity(lag + 1),
        }
    }

    /// Frames of history the difference looks back
    pub fn lag(&self) -> usize {
        self.lag
    }

    /// Write the difference of `current` into `out` and remember `current`
    ///
    /// Until `lag` frames have been seen the difference is all zero.
    pub fn process(&mut self, current: &[f32], out: &mut [f32]) {
        debug_assert_eq!(current.len(), out.len());

        if self.history.len() < self.lag {
            out.fill(0.0);
        } else {
            let previous = &self.history[self.history.len() - self.lag];
            for ((o, &c), &p) in out.iter_mut().zip(current).zip(previous) {
                let d = (c - p) * self.scale;
                *o = if self.positive_only { d.max(0.0) } else { d };
            }
        }

        // Recycle the oldest buffer once the history is full
        let mut slot = if self.history.len() == self.lag {
            self.history.pop_front().unwrap_or_default()
        } else {
            Vec::with_capacity(current.len())
        };
        slot.clear();
        slot.extend_from_slice(current);
        self.history.push_back(slot);
    }

    /// Forget all history
    pub fn reset(&mut self) {
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_reference() {
        let c = LogCompressor::new(1.0, 1.0);
        let mut v = vec![0.0, 9.0, 99.0];
        c.compress(&mut v);
        assert!(v[0].abs() < 1e-7);
        assert!((v[1] - 1.0).abs() < 1e-6);
        assert!((v[2] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_reference_lag_is_one_frame() {
        assert_eq!(diff_frames(0.5, 441, 1411, WindowFunction::Hann), 1);
        // Shorter hops stretch the lag
        assert_eq!(diff_frames(0.5, 100, 1411, WindowFunction::Hann), 4);
    }

    #[test]
    fn test_first_frame_difference_is_zero() {
        let mut diff = SpectralDifference::new(1, 1.0, true);
        let mut out = vec![1.0; 3];
        diff.process(&[1.0, 2.0, 3.0], &mut out);
        assert_eq!(out, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_positive_difference() {
        let mut diff = SpectralDifference::new(1, 1.0, true);
        let mut out = vec![0.0; 3];
        diff.process(&[1.0, 2.0, 3.0], &mut out);
        diff.process(&[2.0, 1.0, 3.5], &mut out);
        assert_eq!(out, vec![1.0, 0.0, 0.5]);
    }

    #[test]
    fn test_signed_and_scaled_difference() {
        let mut diff = SpectralDifference::new(1, 0.5, false);
        let mut out = vec![0.0; 2];
        diff.process(&[1.0, 1.0], &mut out);
        diff.process(&[3.0, 0.0], &mut out);
        assert_eq!(out, vec![1.0, -0.5]);
    }

    #[test]
    fn test_longer_lag() {
        let mut diff = SpectralDifference::new(2, 1.0, true);
        let mut out = vec![0.0; 1];
        diff.process(&[1.0], &mut out);
        diff.process(&[5.0], &mut out);
        assert_eq!(out, vec![0.0]);
        diff.process(&[4.0], &mut out);
        assert_eq!(out, vec![3.0]);
    }

    #[test]
    fn test_reset_clears_history() {
        let mut diff = SpectralDifference::new(1, 1.0, true);
        let mut out = vec![0.0; 1];
        diff.process(&[1.0], &mut out);
        diff.reset();
        diff.process(&[5.0], &mut out);
        assert_eq!(out, vec![0.0]);
    }
}
