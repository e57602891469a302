//! Frozen emission model parameters
//!
//! Parameters arrive as a safetensors bundle exported from the training
//! framework's state dict:
//!
//! | tensor | shape |
//! |---|---|
//! | `conv1.weight` | `[channels, 1, kernel]` |
//! | `conv1.bias` | `[channels]` |
//! | `linear0.weight` | `[projection, channels * pooled]` |
//! | `linear0.bias` | `[projection]` |
//! | `lstm.weight_ih_l{k}` | `[4 * hidden, input_k]` |
//! | `lstm.weight_hh_l{k}` | `[4 * hidden, hidden]` |
//! | `lstm.bias_ih_l{k}` / `lstm.bias_hh_l{k}` | `[4 * hidden]` |
//! | `linear.weight` | `[classes, hidden]` |
//! | `linear.bias` | `[classes]` |
//!
//! Every tensor is checked against an [`EmissionShape`] at load time, so the
//! per-frame path never has to.

use std::path::Path;

use memmap2::MmapOptions;
use safetensors::tensor::Dtype;
use safetensors::SafeTensors;
use serde::{Deserialize, Serialize};

use crate::error::TrackerError;

/// Architecture dimensions of the emission model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmissionShape {
    /// Feature vector length (reference: 272)
    pub input_dim: usize,
    /// Convolution output channels (reference: 2)
    pub conv_channels: usize,
    /// Convolution kernel length (reference: 10)
    pub kernel_size: usize,
    /// Max-pooling width and stride (reference: 2)
    pub pool_size: usize,
    /// Width of the projection feeding the recurrent stack (reference: 150)
    pub projection_dim: usize,
    /// Units per recurrent layer (reference: 150)
    pub hidden_size: usize,
    /// Recurrent layers (reference: 2)
    pub num_layers: usize,
    /// Output classes: beat, downbeat, none
    pub num_classes: usize,
}

impl Default for EmissionShape {
    fn default() -> Self {
        Self {
            input_dim: 272,
            conv_channels: 2,
            kernel_size: 10,
            pool_size: 2,
            projection_dim: 150,
            hidden_size: 150,
            num_layers: 2,
            num_classes: 3,
        }
    }
}

impl EmissionShape {
    /// Length of each convolution output channel
    pub fn conv_len(&self) -> usize {
        self.input_dim + 1 - self.kernel_size
    }

    /// Length of each channel after max pooling
    pub fn pooled_len(&self) -> usize {
        self.conv_len() / self.pool_size
    }

    /// Flattened width entering the projection
    pub fn flat_dim(&self) -> usize {
        self.conv_channels * self.pooled_len()
    }

    /// Input width of recurrent layer `layer`
    pub fn layer_input_dim(&self, layer: usize) -> usize {
        if layer == 0 {
            self.projection_dim
        } else {
            self.hidden_size
        }
    }

    fn check(&self) -> Result<(), TrackerError> {
        if self.kernel_size == 0
            || self.kernel_size > self.input_dim
            || self.pool_size == 0
            || self.pooled_len() == 0
            || self.conv_channels == 0
            || self.projection_dim == 0
            || self.hidden_size == 0
            || self.num_layers == 0
            || self.num_classes != 3
        {
            return Err(TrackerError::ModelError(format!(
                "unsupported emission architecture: {:?}",
                self
            )));
        }
        Ok(())
    }
}

/// Weights of one recurrent layer, gates stacked as input, forget, cell, output
#[derive(Debug, Clone, PartialEq)]
pub struct LstmLayerParams {
    /// Input weights `[4 * hidden, input]`
    pub weight_ih: Vec<f32>,
    /// Recurrent weights `[4 * hidden, hidden]`
    pub weight_hh: Vec<f32>,
    /// Input bias `[4 * hidden]`
    pub bias_ih: Vec<f32>,
    /// Recurrent bias `[4 * hidden]`
    pub bias_hh: Vec<f32>,
}

/// Complete frozen parameter set
#[derive(Debug, Clone, PartialEq)]
pub struct EmissionParams {
    /// Architecture the tensors were checked against
    pub shape: EmissionShape,
    /// Convolution kernels `[channels, kernel]`
    pub conv_weight: Vec<f32>,
    /// Convolution bias `[channels]`
    pub conv_bias: Vec<f32>,
    /// Projection weights `[projection, flat]`
    pub proj_weight: Vec<f32>,
    /// Projection bias `[projection]`
    pub proj_bias: Vec<f32>,
    /// Recurrent layers, bottom first
    pub layers: Vec<LstmLayerParams>,
    /// Classifier weights `[classes, hidden]`
    pub out_weight: Vec<f32>,
    /// Classifier bias `[classes]`
    pub out_bias: Vec<f32>,
}

impl EmissionParams {
    /// All-zero parameters; the model then predicts a uniform distribution
    pub fn zeros(shape: EmissionShape) -> Self {
        let h4 = 4 * shape.hidden_size;
        Self {
            shape,
            conv_weight: vec![0.0; shape.conv_channels * shape.kernel_size],
            conv_bias: vec![0.0; shape.conv_channels],
            proj_weight: vec![0.0; shape.projection_dim * shape.flat_dim()],
            proj_bias: vec![0.0; shape.projection_dim],
            layers: (0..shape.num_layers)
                .map(|l| LstmLayerParams {
                    weight_ih: vec![0.0; h4 * shape.layer_input_dim(l)],
                    weight_hh: vec![0.0; h4 * shape.hidden_size],
                    bias_ih: vec![0.0; h4],
                    bias_hh: vec![0.0; h4],
                })
                .collect(),
            out_weight: vec![0.0; shape.num_classes * shape.hidden_size],
            out_bias: vec![0.0; shape.num_classes],
        }
    }

    /// Check every tensor length against `self.shape`, and every value for NaN/inf
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::ModelError` naming the first mismatching tensor,
    /// or `TrackerError::NumericalError` for a tensor holding non-finite values.
    pub fn validate(&self) -> Result<(), TrackerError> {
        let s = &self.shape;
        s.check()?;

        let h4 = 4 * s.hidden_size;
        check_tensor("conv1.weight", &self.conv_weight, s.conv_channels * s.kernel_size)?;
        check_tensor("conv1.bias", &self.conv_bias, s.conv_channels)?;
        check_tensor("linear0.weight", &self.proj_weight, s.projection_dim * s.flat_dim())?;
        check_tensor("linear0.bias", &self.proj_bias, s.projection_dim)?;

        if self.layers.len() != s.num_layers {
            return Err(TrackerError::ModelError(format!(
                "expected {} recurrent layers, got {}",
                s.num_layers,
                self.layers.len()
            )));
        }
        for (l, layer) in self.layers.iter().enumerate() {
            check_tensor(&format!("lstm.weight_ih_l{}", l), &layer.weight_ih, h4 * s.layer_input_dim(l))?;
            check_tensor(&format!("lstm.weight_hh_l{}", l), &layer.weight_hh, h4 * s.hidden_size)?;
            check_tensor(&format!("lstm.bias_ih_l{}", l), &layer.bias_ih, h4)?;
            check_tensor(&format!("lstm.bias_hh_l{}", l), &layer.bias_hh, h4)?;
        }

        check_tensor("linear.weight", &self.out_weight, s.num_classes * s.hidden_size)?;
        check_tensor("linear.bias", &self.out_bias, s.num_classes)?;
        Ok(())
    }

    /// Load a bundle from a safetensors file
    ///
    /// The file is memory-mapped read-only for the duration of the load.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Io` if the file cannot be opened and
    /// `TrackerError::ModelError` for missing or mis-shaped tensors.
    pub fn from_safetensors(path: impl AsRef<Path>, shape: EmissionShape) -> Result<Self, TrackerError> {
        let path = path.as_ref();
        log::debug!("Loading emission parameters from {}", path.display());

        let file = std::fs::File::open(path)?;
        // SAFETY: read-only mapping, dropped before returning.
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Self::from_safetensors_bytes(&mmap, shape)
    }

    /// Load a bundle already held in memory
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::ModelError` for malformed bundles.
    pub fn from_safetensors_bytes(bytes: &[u8], shape: EmissionShape) -> Result<Self, TrackerError> {
        shape.check()?;
        let st = SafeTensors::deserialize(bytes)?;
        let h4 = 4 * shape.hidden_size;

        let mut layers = Vec::with_capacity(shape.num_layers);
        for l in 0..shape.num_layers {
            layers.push(LstmLayerParams {
                weight_ih: read_tensor(
                    &st,
                    &format!("lstm.weight_ih_l{}", l),
                    &[h4, shape.layer_input_dim(l)],
                )?,
                weight_hh: read_tensor(&st, &format!("lstm.weight_hh_l{}", l), &[h4, shape.hidden_size])?,
                bias_ih: read_tensor(&st, &format!("lstm.bias_ih_l{}", l), &[h4])?,
                bias_hh: read_tensor(&st, &format!("lstm.bias_hh_l{}", l), &[h4])?,
            });
        }

        let params = Self {
            shape,
            conv_weight: read_tensor(&st, "conv1.weight", &[shape.conv_channels, 1, shape.kernel_size])?,
            conv_bias: read_tensor(&st, "conv1.bias", &[shape.conv_channels])?,
            proj_weight: read_tensor(&st, "linear0.weight", &[shape.projection_dim, shape.flat_dim()])?,
            proj_bias: read_tensor(&st, "linear0.bias", &[shape.projection_dim])?,
            layers,
            out_weight: read_tensor(&st, "linear.weight", &[shape.num_classes, shape.hidden_size])?,
            out_bias: read_tensor(&st, "linear.bias", &[shape.num_classes])?,
        };
        params.validate()?;

        log::debug!(
            "Loaded emission parameters: {} recurrent layers x {} units, input {}",
            shape.num_layers,
            shape.hidden_size,
            shape.input_dim
        );
        Ok(params)
    }
}

/// Length must match and every value must be finite
fn check_tensor(name: &str, data: &[f32], expected: usize) -> Result<(), TrackerError> {
    if data.len() != expected {
        return Err(TrackerError::ModelError(format!(
            "{}: expected {} values, got {}",
            name,
            expected,
            data.len()
        )));
    }
    if let Some(i) = data.iter().position(|v| !v.is_finite()) {
        return Err(TrackerError::NumericalError(format!(
            "{}: non-finite value {} at index {}",
            name, data[i], i
        )));
    }
    Ok(())
}

/// Read one tensor as f32, checking its shape
fn read_tensor(st: &SafeTensors<'_>, name: &str, shape: &[usize]) -> Result<Vec<f32>, TrackerError> {
    let view = st
        .tensor(name)
        .map_err(|_| TrackerError::ModelError(format!("missing tensor {}", name)))?;

    if view.shape() != shape {
        return Err(TrackerError::ModelError(format!(
            "{}: expected shape {:?}, got {:?}",
            name,
            shape,
            view.shape()
        )));
    }

    let raw = view.data();
    let data = match view.dtype() {
        Dtype::F32 => raw
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        Dtype::BF16 => raw
            .chunks_exact(2)
            .map(|c| f32::from_bits((u16::from_le_bytes([c[0], c[1]]) as u32) << 16))
            .collect(),
        Dtype::F16 => raw
            .chunks_exact(2)
            .map(|c| f16_to_f32(u16::from_le_bytes([c[0], c[1]])))
            .collect(),
        other => {
            return Err(TrackerError::ModelError(format!(
                "{}: unsupported dtype {:?}",
                name, other
            )))
        }
    };
    Ok(data)
}

/// Widen an IEEE 754 half-precision value
fn f16_to_f32(bits: u16) -> f32 {
    let sign = ((bits >> 15) as u32) << 31;
    let exp = ((bits >> 10) & 0x1f) as u32;
    let mant = (bits & 0x3ff) as u32;

    let magnitude = match exp {
        0 => {
            // Subnormal: mant * 2^-24
            return if sign == 0 {
                mant as f32 * 2f32.powi(-24)
            } else {
                -(mant as f32 * 2f32.powi(-24))
            };
        }
        0x1f => 0x7f80_0000 | (mant << 13),
        _ => ((exp + 112) << 23) | (mant << 13),
    };
    f32::from_bits(sign | magnitude)
}
