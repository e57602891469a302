//! Recurrent emission model
//!
//! Loads the frozen parameter bundle and runs the convolution + LSTM network
//! frame by frame on the CPU.

pub mod lstm;
pub mod model;
pub mod ops;
pub mod params;

pub use lstm::RecurrentState;
pub use model::{Activation, EmissionModel};
pub use params::{EmissionParams, EmissionShape};
