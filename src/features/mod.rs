//! Feature extraction modules
//!
//! The streaming front half of the pipeline:
//! - Windowed FFT (spectral front end)
//! - Logarithmic triangular filterbank
//! - Log compression and positive temporal difference
//! - Hop/window bookkeeping over a sample ring

pub mod extractor;
pub mod filterbank;
pub mod log_spec;
pub mod spectrum;

pub use extractor::FeatureExtractor;
pub use filterbank::LogFilterbank;
