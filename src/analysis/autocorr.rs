//! Autocorrelation tempo estimate over recent activations
//!
//! A second, filter-independent tempo reading: the summed beat and downbeat
//! activations of the last few seconds are autocorrelated and the strongest
//! lag in the tempo range is converted to BPM.
//!
//! # Algorithm
//!
//! 1. Signal = `beat + downbeat` activation per frame
//! 2. `ACF = IFFT(|FFT(signal)|²)` with zero padding to at least `2n`
//!    (linear, not circular), normalized by `ACF[0]`
//! 3. Highest ACF value over the lags of `[min_bpm, max_bpm]`
//! 4. Parabolic interpolation around the peak for sub-frame precision
//! 5. `BPM = round(60 · fps / lag)`, optionally folded by one octave into the
//!    75-165 BPM range

use std::collections::VecDeque;

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

/// Lower edge of the octave-correction range
pub const OCTAVE_MIN_BPM: f32 = 75.0;

/// Upper edge of the octave-correction range
pub const OCTAVE_MAX_BPM: f32 = 165.0;

/// Frames kept by [`ActivationBuffer`] (about ten seconds at 50 fps)
pub const DEFAULT_BUFFER_FRAMES: usize = 512;

/// Frames needed before a tempo is reported (about two seconds)
pub const MIN_FRAMES_FOR_BPM: usize = 100;

/// Frames between two automatic recomputations
pub const RECOMPUTE_INTERVAL: usize = 25;

const EPSILON: f32 = 1e-8;

/// Autocorrelation BPM estimator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutocorrBpmEstimator {
    /// Activation frame rate
    pub fps: f32,
    /// Slowest tempo searched
    pub min_bpm: f32,
    /// Fastest tempo searched
    pub max_bpm: f32,
    /// Fold half/double-time results into 75-165 BPM
    pub octave_correction: bool,
}

impl AutocorrBpmEstimator {
    /// Estimator over `[min_bpm, max_bpm]` with octave correction enabled
    ///
    /// The lag search covers the given range; sessions pass the particle
    /// filter's tempo range (55-215 BPM by default), which is wider than the
    /// 75-165 BPM octave-correction band applied afterwards.
    pub fn new(fps: f32, min_bpm: f32, max_bpm: f32) -> Self {
        Self {
            fps,
            min_bpm,
            max_bpm,
            octave_correction: true,
        }
    }

    /// Estimate the tempo of a signal, 0 when there is too little data
    ///
    /// Fewer than one second of frames, or a lag range that does not fit in
    /// the signal, yields 0.
    pub fn estimate(&self, signal: &[f32]) -> f32 {
        let n = signal.len();
        if n < self.fps as usize || n < 3 {
            return 0.0;
        }

        let acf = autocorrelation(signal);

        let min_lag = (self.fps * 60.0 / self.max_bpm) as usize;
        let max_lag = ((self.fps * 60.0 / self.min_bpm) as usize).min(n - 1);
        if min_lag == 0 || min_lag >= max_lag {
            return 0.0;
        }

        let mut peak = min_lag;
        for lag in min_lag + 1..max_lag {
            if acf[lag] > acf[peak] {
                peak = lag;
            }
        }

        let lag = refine_peak(&acf, peak);
        let mut bpm = (60.0 * self.fps / lag).round();

        if self.octave_correction && bpm > 0.0 {
            bpm = fold_octave(bpm);
        }

        log::trace!("Autocorrelation peak at lag {:.2} -> {:.0} BPM", lag, bpm);
        bpm
    }
}

/// Fold a tempo by one octave into the correction range when that lands inside it
pub fn fold_octave(bpm: f32) -> f32 {
    let doubled = bpm * 2.0;
    let halved = bpm / 2.0;
    if bpm < OCTAVE_MIN_BPM && (OCTAVE_MIN_BPM..=OCTAVE_MAX_BPM).contains(&doubled) {
        doubled
    } else if bpm > OCTAVE_MAX_BPM && (OCTAVE_MIN_BPM..=OCTAVE_MAX_BPM).contains(&halved) {
        halved
    } else {
        bpm
    }
}

/// Parabolic interpolation of a local maximum
fn refine_peak(acf: &[f32], peak: usize) -> f32 {
    if peak == 0 || peak + 1 >= acf.len() {
        return peak as f32;
    }
    let (y0, y1, y2) = (acf[peak - 1], acf[peak], acf[peak + 1]);
    if y1 > y0 && y1 > y2 {
        let denom = y0 - 2.0 * y1 + y2;
        if denom.abs() > EPSILON {
            return peak as f32 + 0.5 * (y0 - y2) / denom;
        }
    }
    peak as f32
}

/// Linear autocorrelation via FFT, normalized so that lag 0 is ~1
///
/// Uses the identity `ACF = IFFT(|FFT(signal)|²)`.
pub fn autocorrelation(signal: &[f32]) -> Vec<f32> {
    let n = signal.len();
    let fft_size = (2 * n).next_power_of_two();

    let mut buffer: Vec<Complex<f32>> = signal.iter().map(|&x| Complex::new(x, 0.0)).collect();
    buffer.resize(fft_size, Complex::new(0.0, 0.0));

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(fft_size);
    fft.process(&mut buffer);

    for x in &mut buffer {
        *x = Complex::new(x.norm_sqr(), 0.0);
    }

    let ifft = planner.plan_fft_inverse(fft_size);
    ifft.process(&mut buffer);

    let scale = 1.0 / fft_size as f32;
    let norm = buffer[0].re * scale + EPSILON;
    buffer[..n].iter().map(|x| x.re * scale / norm).collect()
}

/// Rolling window of activations with a periodically refreshed tempo
#[derive(Debug, Clone)]
pub struct ActivationBuffer {
    signal: VecDeque<f32>,
    capacity: usize,
    estimator: AutocorrBpmEstimator,
    frames_since_compute: usize,
    cached_bpm: f32,
}

impl ActivationBuffer {
    /// Buffer of [`DEFAULT_BUFFER_FRAMES`] frames
    pub fn new(estimator: AutocorrBpmEstimator) -> Self {
        Self::with_capacity(estimator, DEFAULT_BUFFER_FRAMES)
    }

    /// Buffer of `capacity` frames
    pub fn with_capacity(estimator: AutocorrBpmEstimator, capacity: usize) -> Self {
        Self {
            signal: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            estimator,
            frames_since_compute: 0,
            cached_bpm: 0.0,
        }
    }

    /// Append one frame; the tempo is recomputed every
    /// [`RECOMPUTE_INTERVAL`] frames once [`MIN_FRAMES_FOR_BPM`] are held
    pub fn push(&mut self, beat: f32, downbeat: f32) {
        if self.signal.len() == self.capacity {
            self.signal.pop_front();
        }
        self.signal.push_back(beat + downbeat);
        self.frames_since_compute += 1;

        if self.signal.len() >= MIN_FRAMES_FOR_BPM && self.frames_since_compute >= RECOMPUTE_INTERVAL {
            self.recompute();
        }
    }

    /// Recompute now, regardless of the schedule
    pub fn recompute(&mut self) -> f32 {
        if self.signal.len() < MIN_FRAMES_FOR_BPM {
            return 0.0;
        }
        let (head, tail) = self.signal.as_slices();
        self.cached_bpm = if tail.is_empty() {
            self.estimator.estimate(head)
        } else {
            let ordered: Vec<f32> = self.signal.iter().copied().collect();
            self.estimator.estimate(&ordered)
        };
        self.frames_since_compute = 0;
        self.cached_bpm
    }

    /// Last computed tempo, 0 until enough frames have been seen
    pub fn bpm(&self) -> f32 {
        self.cached_bpm
    }

    /// Frames currently held
    pub fn len(&self) -> usize {
        self.signal.len()
    }

    /// Whether no frame is held
    pub fn is_empty(&self) -> bool {
        self.signal.is_empty()
    }

    /// Drop all frames and the cached tempo
    pub fn clear(&mut self) {
        self.signal.clear();
        self.frames_since_compute = 0;
        self.cached_bpm = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pulses(n: usize, period: usize) -> Vec<f32> {
        (0..n).map(|i| if i % period == 0 { 0.9 } else { 0.05 }).collect()
    }

    #[test]
    fn test_autocorrelation_of_impulse_train() {
        let acf = autocorrelation(&pulses(200, 20));
        assert!((acf[0] - 1.0).abs() < 1e-3);
        assert!(acf[20] > acf[10]);
        assert!(acf[20] > acf[19] && acf[20] > acf[21]);
    }

    #[test]
    fn test_estimates_120_bpm() {
        let estimator = AutocorrBpmEstimator::new(50.0, 55.0, 215.0);
        assert_eq!(estimator.estimate(&pulses(512, 25)), 120.0);
    }

    #[test]
    fn test_octave_correction() {
        let mut estimator = AutocorrBpmEstimator::new(50.0, 55.0, 215.0);
        // 200 BPM pulses fold down to 100
        assert_eq!(estimator.estimate(&pulses(512, 15)), 100.0);

        estimator.octave_correction = false;
        assert_eq!(estimator.estimate(&pulses(512, 15)), 200.0);

        assert_eq!(fold_octave(60.0), 120.0);
        assert_eq!(fold_octave(170.0), 85.0);
        assert_eq!(fold_octave(128.0), 128.0);
        assert_eq!(fold_octave(40.0), 80.0);
        // Doubled or halved, still outside 75-165
        assert_eq!(fold_octave(30.0), 30.0);
        assert_eq!(fold_octave(400.0), 400.0);
    }

    #[test]
    fn test_too_short_signal() {
        let estimator = AutocorrBpmEstimator::new(50.0, 55.0, 215.0);
        assert_eq!(estimator.estimate(&pulses(30, 25)), 0.0);
    }

    #[test]
    fn test_buffer_schedule() {
        let mut buffer = ActivationBuffer::new(AutocorrBpmEstimator::new(50.0, 55.0, 215.0));
        for i in 0..99 {
            buffer.push(if i % 25 == 0 { 0.9 } else { 0.05 }, 0.0);
        }
        assert_eq!(buffer.bpm(), 0.0);
        buffer.push(0.05, 0.0);
        assert_eq!(buffer.bpm(), 120.0);

        for i in 100..1000 {
            buffer.push(if i % 25 == 0 { 0.9 } else { 0.05 }, 0.0);
        }
        assert_eq!(buffer.len(), DEFAULT_BUFFER_FRAMES);
        assert_eq!(buffer.recompute(), 120.0);

        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.bpm(), 0.0);
    }
}
