//! Spectral front end
//!
//! Windows one analysis frame and computes its exact-length real FFT, keeping
//! the non-redundant half of the spectrum (bins `0..=fft_size/2`).
//!
//! The FFT runs at the frame length itself (1411 points in the reference
//! configuration, no zero padding), which rustfft handles through its
//! mixed-radix/Bluestein planners.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};

/// Analysis window applied before the FFT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowFunction {
    /// Symmetric Hann window, `0.5 * (1 - cos(2πi / (N - 1)))`
    Hann,
    /// Symmetric Hamming window, `0.54 - 0.46 * cos(2πi / (N - 1))`
    Hamming,
    /// No windowing
    Rectangular,
}

impl WindowFunction {
    /// Window coefficients for a frame of `length` samples
    pub fn coefficients(&self, length: usize) -> Vec<f32> {
        if length < 2 {
            return vec![1.0; length];
        }
        let denom = (length - 1) as f64;
        (0..length)
            .map(|i| {
                let phase = 2.0 * std::f64::consts::PI * i as f64 / denom;
                let w = match self {
                    WindowFunction::Hann => 0.5 * (1.0 - phase.cos()),
                    WindowFunction::Hamming => 0.54 - 0.46 * phase.cos(),
                    WindowFunction::Rectangular => 1.0,
                };
                w as f32
            })
            .collect()
    }
}

/// Windowed FFT for one fixed frame size
///
/// Holds the FFT plan and scratch buffers so the per-frame path does not
/// allocate. The result depends only on the input frame.
pub struct SpectralFrontEnd {
    fft_size: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl std::fmt::Debug for SpectralFrontEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralFrontEnd")
            .field("fft_size", &self.fft_size)
            .finish()
    }
}

impl SpectralFrontEnd {
    /// Plan an `fft_size`-point transform with the given window
    pub fn new(fft_size: usize, window: WindowFunction) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        Self {
            fft_size,
            window: window.coefficients(fft_size),
            fft,
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
            scratch,
        }
    }

    /// FFT length in samples
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of non-redundant bins, `fft_size / 2 + 1`
    pub fn num_bins(&self) -> usize {
        self.fft_size / 2 + 1
    }

    /// Compute the half spectrum of one frame
    ///
    /// # Panics
    ///
    /// Panics if `frame.len() != fft_size`.
    pub fn compute_spectrum(&mut self, frame: &[f32]) -> &[Complex<f32>] {
        assert_eq!(
            frame.len(),
            self.fft_size,
            "frame length must equal the FFT size"
        );

        for ((dst, &x), &w) in self.buffer.iter_mut().zip(frame).zip(&self.window) {
            *dst = Complex::new(x * w, 0.0);
        }
        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        &self.buffer[..self.fft_size / 2 + 1]
    }

    /// Magnitudes of the half spectrum, written into `out`
    ///
    /// `out` may be shorter than the half spectrum; only its length is filled.
    pub fn magnitude_into(&mut self, frame: &[f32], out: &mut [f32]) {
        let spectrum = self.compute_spectrum(frame);
        for (o, c) in out.iter_mut().zip(spectrum) {
            *o = c.norm();
        }
    }
}
