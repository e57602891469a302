//! Logarithmic triangular filterbank
//!
//! Maps FFT magnitude bins onto bands spaced at a constant number of bands per
//! octave, referenced to A4 = 440 Hz.
//!
//! # Algorithm
//!
//! 1. Centre frequencies `440 * 2^(k / bands_per_octave)` for every integer `k`
//!    whose frequency lies in `[fmin, fmax]`
//! 2. Each centre frequency is snapped to its nearest FFT bin; duplicate bins
//!    are dropped so every band is at least one bin apart
//! 3. Consecutive bin triplets `(start, centre, stop)` form overlapping
//!    triangles; a triplet spanning fewer than two bins collapses to the single
//!    bin `start`
//! 4. Every triangle is normalised to unit sum
//!
//! The bin frequency grid deliberately excludes the Nyquist bin and uses
//! `i * sample_rate / (2 * (fft_size / 2))`, which is how the feature
//! pipeline the emission model was trained on lays out its bins. For the
//! reference configuration (22050 Hz, 1411-point FFT, 24 bands per octave,
//! 30 Hz - 17 kHz) this yields 136 bands.

use crate::error::TrackerError;

/// Reference frequency for the logarithmic spacing (A4)
const F_REF: f64 = 440.0;

/// One triangular band stored as a dense run of weights starting at `start`
#[derive(Debug, Clone, PartialEq)]
pub struct FilterBand {
    /// First FFT bin covered by the band
    pub start: usize,

    /// Weights for bins `start..start + weights.len()`
    pub weights: Vec<f32>,
}

impl FilterBand {
    /// Bin range covered by the band (exclusive end)
    pub fn bin_range(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.weights.len()
    }
}

/// Precomputed logarithmic filterbank
///
/// Immutable after construction; share it between sessions through an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct LogFilterbank {
    num_bins: usize,
    bands: Vec<FilterBand>,
}

impl LogFilterbank {
    /// Build the filterbank for a given sample rate and FFT size
    ///
    /// # Arguments
    ///
    /// * `sample_rate` - Sample rate in Hz
    /// * `fft_size` - FFT length in samples
    /// * `bands_per_octave` - Logarithmic resolution (reference: 24)
    /// * `fmin` / `fmax` - Centre frequency limits in Hz
    /// * `normalize` - Scale each band to unit sum
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::InvalidInput` if the parameters leave fewer than
    /// three distinct bins (no band can be formed).
    pub fn new(
        sample_rate: u32,
        fft_size: usize,
        bands_per_octave: usize,
        fmin: f32,
        fmax: f32,
        normalize: bool,
    ) -> Result<Self, TrackerError> {
        let num_bins = fft_size / 2;
        if num_bins < 3 || bands_per_octave == 0 || !(fmin > 0.0 && fmin < fmax) {
            return Err(TrackerError::InvalidInput(format!(
                "cannot build filterbank: fft_size={}, bands_per_octave={}, fmin={}, fmax={}",
                fft_size, bands_per_octave, fmin, fmax
            )));
        }

        let bin_frequencies: Vec<f64> = (0..num_bins)
            .map(|i| i as f64 * sample_rate as f64 / (num_bins * 2) as f64)
            .collect();

        let centres = log_frequencies(bands_per_octave, fmin as f64, fmax as f64);
        let bins = frequencies_to_bins(&centres, &bin_frequencies);

        if bins.len() < 3 {
            return Err(TrackerError::InvalidInput(format!(
                "filterbank range {}-{} Hz maps onto only {} distinct bins",
                fmin,
                fmax,
                bins.len()
            )));
        }

        let bands: Vec<FilterBand> = bins
            .windows(3)
            .map(|triplet| triangular_band(triplet[0], triplet[1], triplet[2], normalize))
            .collect();

        log::debug!(
            "Built logarithmic filterbank: {} bands over {} bins ({} bands/octave, {:.0}-{:.0} Hz)",
            bands.len(),
            num_bins,
            bands_per_octave,
            fmin,
            fmax
        );

        Ok(Self { num_bins, bands })
    }

    /// Number of output bands
    pub fn num_bands(&self) -> usize {
        self.bands.len()
    }

    /// Number of FFT bins consumed (Nyquist excluded)
    pub fn num_bins(&self) -> usize {
        self.num_bins
    }

    /// The sparse rows of the filterbank matrix
    pub fn bands(&self) -> &[FilterBand] {
        &self.bands
    }

    /// Project a magnitude spectrum onto the bands
    ///
    /// `magnitude` must hold at least `num_bins()` values; trailing bins (the
    /// Nyquist bin of a half spectrum) are ignored.
    pub fn project(&self, magnitude: &[f32], output: &mut [f32]) {
        debug_assert!(magnitude.len() >= self.num_bins);
        debug_assert_eq!(output.len(), self.bands.len());

        for (out, band) in output.iter_mut().zip(&self.bands) {
            let bins = &magnitude[band.bin_range()];
            *out = bins.iter().zip(&band.weights).map(|(m, w)| m * w).sum();
        }
    }
}

/// Logarithmically spaced centre frequencies within `[fmin, fmax]`
fn log_frequencies(bands_per_octave: usize, fmin: f64, fmax: f64) -> Vec<f64> {
    let bpo = bands_per_octave as f64;
    let left = ((fmin / F_REF).log2() * bpo).floor() as i64;
    let right = ((fmax / F_REF).log2() * bpo).ceil() as i64;

    (left..right)
        .map(|k| F_REF * 2f64.powf(k as f64 / bpo))
        .filter(|&f| f >= fmin && f <= fmax)
        .collect()
}

/// Snap frequencies to their closest bins, dropping duplicates
fn frequencies_to_bins(frequencies: &[f64], bin_frequencies: &[f64]) -> Vec<usize> {
    let last = bin_frequencies.len() - 1;
    let mut bins: Vec<usize> = Vec::with_capacity(frequencies.len());

    for &freq in frequencies {
        // Insertion point, clipped so both neighbours exist
        let mut idx = bin_frequencies.partition_point(|&b| b < freq).clamp(1, last);
        let left = bin_frequencies[idx - 1];
        let right = bin_frequencies[idx];
        if freq - left < right - freq {
            idx -= 1;
        }
        if bins.last() != Some(&idx) {
            bins.push(idx);
        }
    }

    bins
}

/// One overlapping triangle over bins `[start, stop)` peaking at `centre`
fn triangular_band(start: usize, centre: usize, stop: usize, normalize: bool) -> FilterBand {
    let (centre, stop) = if stop - start < 2 {
        (start, start + 1)
    } else {
        (centre, stop)
    };

    let rise = centre - start;
    let fall = stop - centre;
    let mut weights = Vec::with_capacity(stop - start);
    weights.extend((0..rise).map(|k| k as f32 / rise as f32));
    weights.extend((0..fall).map(|k| 1.0 - k as f32 / fall as f32));

    if normalize {
        let sum: f32 = weights.iter().sum();
        if sum > 0.0 {
            weights.iter_mut().for_each(|w| *w /= sum);
        }
    }

    FilterBand { start, weights }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> LogFilterbank {
        LogFilterbank::new(22050, 1411, 24, 30.0, 17000.0, true).unwrap()
    }

    #[test]
    fn test_reference_shape() {
        let fb = reference();
        assert_eq!(fb.num_bins(), 705);
        assert_eq!(fb.num_bands(), 136);
    }

    #[test]
    fn test_reference_row_ranges() {
        let fb = reference();
        let bands = fb.bands();

        // Lowest band: bins 2..4, all weight on bin 3
        assert_eq!(bands[0].bin_range(), 2..4);
        assert_eq!(bands[0].weights, vec![0.0, 1.0]);
        assert_eq!(bands[1].bin_range(), 3..5);

        // Highest band: triplet (675, 694, 704)
        let last = &bands[135];
        assert_eq!(last.bin_range(), 675..704);
        let peak = last
            .weights
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| last.start + i)
            .unwrap();
        assert_eq!(peak, 694);
        assert!((last.weights[19] - 1.0 / 14.5).abs() < 1e-6);
    }

    #[test]
    fn test_rows_are_normalized_and_monotonic() {
        let fb = reference();
        let mut prev_start = 0;
        for band in fb.bands() {
            let sum: f32 = band.weights.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5, "band at {} sums to {}", band.start, sum);
            assert!(band.weights.iter().all(|&w| w >= 0.0));
            assert!(band.start >= prev_start);
            assert!(band.bin_range().end <= fb.num_bins());
            prev_start = band.start;
        }
    }

    #[test]
    fn test_independent_of_construction_order() {
        assert_eq!(reference(), reference());
    }

    #[test]
    fn test_project_flat_spectrum() {
        let fb = reference();
        let magnitude = vec![2.0f32; 706];
        let mut out = vec![0.0f32; fb.num_bands()];
        fb.project(&magnitude, &mut out);
        // Unit-sum rows map a flat spectrum onto itself
        assert!(out.iter().all(|&v| (v - 2.0).abs() < 1e-4));
    }

    #[test]
    fn test_collapsed_triangle() {
        let band = triangular_band(10, 10, 11, true);
        assert_eq!(band.bin_range(), 10..11);
        assert_eq!(band.weights, vec![1.0]);
    }

    #[test]
    fn test_degenerate_range_is_rejected() {
        assert!(LogFilterbank::new(22050, 1411, 24, 5000.0, 5010.0, true).is_err());
        assert!(LogFilterbank::new(22050, 4, 24, 30.0, 17000.0, true).is_err());
    }
}
