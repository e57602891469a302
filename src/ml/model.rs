//! Recurrent emission model
//!
//! Maps one feature vector to a `(beat, downbeat, none)` distribution:
//!
//! ```text
//! feature[272] → conv(1→2, k=10) → relu → maxpool(2) → flatten[262]
//!              → linear[150] → lstm × 2 [150] → linear[3] → softmax
//! ```
//!
//! The model itself is stateless apart from scratch buffers; recurrent state
//! is a [`RecurrentState`] value threaded through every call by the caller.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ml::lstm::{lstm_step, RecurrentState};
use crate::ml::ops::{conv1d_single_input, linear_into, linear_rows, max_pool1d, relu_inplace, softmax_inplace};
use crate::ml::params::EmissionParams;

/// Tolerance on the distribution sum before renormalising
const SUM_TOLERANCE: f32 = 1e-5;

/// Per-frame class probabilities
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Activation {
    /// Probability of a (non-down) beat
    pub beat: f32,
    /// Probability of a downbeat
    pub downbeat: f32,
    /// Probability of no beat
    pub none: f32,
}

impl Default for Activation {
    fn default() -> Self {
        Self {
            beat: 0.0,
            downbeat: 0.0,
            none: 1.0,
        }
    }
}

impl Activation {
    /// Build an activation from raw class scores, repairing it into a valid
    /// distribution
    ///
    /// NaN and negative entries become 0, a vector whose sum is off by more
    /// than 1e-5 is renormalised, and an all-zero vector becomes `(0, 0, 1)`.
    /// Returns the activation and whether any repair was applied.
    pub fn from_raw(raw: [f32; 3]) -> (Self, bool) {
        let mut repaired = false;
        let mut v = raw;
        for x in v.iter_mut() {
            if x.is_nan() || *x < 0.0 {
                *x = 0.0;
                repaired = true;
            }
        }

        let sum: f32 = v.iter().sum();
        if !(sum > 0.0) || !sum.is_finite() {
            return (Self::default(), true);
        }
        if (sum - 1.0).abs() > SUM_TOLERANCE {
            v.iter_mut().for_each(|x| *x /= sum);
            repaired = true;
        }

        (
            Self {
                beat: v[0],
                downbeat: v[1],
                none: v[2],
            },
            repaired,
        )
    }

    /// Probability that the frame carries any beat
    pub fn any_beat(&self) -> f32 {
        self.beat.max(self.downbeat)
    }

    /// `[beat, downbeat, none]`
    pub fn to_array(&self) -> [f32; 3] {
        [self.beat, self.downbeat, self.none]
    }
}

/// Working buffers for one forward pass
#[derive(Debug, Clone)]
struct Scratch {
    conv: Vec<f32>,
    flat: Vec<f32>,
    proj: Vec<f32>,
    gates: Vec<f32>,
    recurrent: Vec<f32>,
    logits: [f32; 3],
}

impl Scratch {
    fn new(params: &EmissionParams) -> Self {
        let s = &params.shape;
        Self {
            conv: vec![0.0; s.conv_channels * s.conv_len()],
            flat: vec![0.0; s.flat_dim()],
            proj: vec![0.0; s.projection_dim],
            gates: vec![0.0; 4 * s.hidden_size],
            recurrent: vec![0.0; 4 * s.hidden_size],
            logits: [0.0; 3],
        }
    }
}

/// Emission model over shared frozen parameters
#[derive(Debug, Clone)]
pub struct EmissionModel {
    params: Arc<EmissionParams>,
    scratch: Scratch,
}

impl EmissionModel {
    /// Wrap a validated parameter set
    pub fn new(params: Arc<EmissionParams>) -> Self {
        let scratch = Scratch::new(&params);
        Self { params, scratch }
    }

    /// Shared parameters
    pub fn params(&self) -> &Arc<EmissionParams> {
        &self.params
    }

    /// Feature length the model expects
    pub fn input_dim(&self) -> usize {
        self.params.shape.input_dim
    }

    /// Fresh zero state for this model
    pub fn initial_state(&self) -> RecurrentState {
        RecurrentState::for_shape(&self.params.shape)
    }

    /// Run one frame, returning the activation and the successor state
    ///
    /// `state` is left untouched.
    pub fn infer(&self, feature: &[f32], state: &RecurrentState) -> (Activation, RecurrentState) {
        let mut next = state.clone();
        let mut scratch = Scratch::new(&self.params);
        let activation = forward(&self.params, &mut scratch, feature, &mut next);
        (activation, next)
    }

    /// Run one frame, advancing `state` in place without allocating
    pub fn infer_in_place(&mut self, feature: &[f32], state: &mut RecurrentState) -> Activation {
        forward(&self.params, &mut self.scratch, feature, state)
    }

    /// Run `N` consecutive frames
    ///
    /// The convolution, the projection and the recurrent input projections are
    /// batched over frames; the result is identical to `N` calls of
    /// [`EmissionModel::infer`] threading the state through.
    pub fn infer_batch<F: AsRef<[f32]>>(
        &self,
        features: &[F],
        state: &RecurrentState,
    ) -> (Vec<Activation>, RecurrentState) {
        let p = &*self.params;
        let s = &p.shape;
        let n = features.len();
        let mut next = state.clone();
        if n == 0 {
            return (Vec::new(), next);
        }

        let mut scratch = Scratch::new(p);
        let mut flat = vec![0.0f32; n * s.flat_dim()];
        for (feature, row) in features.iter().zip(flat.chunks_exact_mut(s.flat_dim())) {
            frontend(p, &mut scratch, feature.as_ref());
            row.copy_from_slice(&scratch.flat);
        }

        let mut layer_input = vec![0.0f32; n * s.projection_dim];
        linear_rows(&mut layer_input, &flat, s.flat_dim(), &p.proj_weight, &p.proj_bias);

        let h4 = 4 * s.hidden_size;
        let mut gates = vec![0.0f32; n * h4];
        for (l, layer) in p.layers.iter().enumerate() {
            let in_dim = s.layer_input_dim(l);
            linear_rows(&mut gates, &layer_input, in_dim, &layer.weight_ih, &layer.bias_ih);

            let mut outputs = vec![0.0f32; n * s.hidden_size];
            let (hidden, cell) = next.layer_mut(l);
            for (g, out) in gates.chunks_exact(h4).zip(outputs.chunks_exact_mut(s.hidden_size)) {
                lstm_step(layer, g, hidden, cell, &mut scratch.recurrent);
                out.copy_from_slice(hidden);
            }
            layer_input = outputs;
        }

        let activations = layer_input
            .chunks_exact(s.hidden_size)
            .map(|h| classify(p, &mut scratch, h))
            .collect();
        (activations, next)
    }
}

/// Convolution front end into `scratch.flat`
fn frontend(p: &EmissionParams, scratch: &mut Scratch, feature: &[f32]) {
    let s = &p.shape;
    assert_eq!(
        feature.len(),
        s.input_dim,
        "feature length {} does not match model input {}",
        feature.len(),
        s.input_dim
    );

    conv1d_single_input(&mut scratch.conv, feature, &p.conv_weight, &p.conv_bias, s.kernel_size);
    relu_inplace(&mut scratch.conv);
    max_pool1d(&mut scratch.flat, &scratch.conv, s.conv_channels, s.pool_size);
}

/// Output layer, softmax and repair
fn classify(p: &EmissionParams, scratch: &mut Scratch, hidden: &[f32]) -> Activation {
    linear_into(&mut scratch.logits, hidden, &p.out_weight, &p.out_bias);
    softmax_inplace(&mut scratch.logits);

    let (activation, repaired) = Activation::from_raw(scratch.logits);
    if repaired {
        log::warn!("Repaired emission output {:?} -> {:?}", scratch.logits, activation);
    }
    activation
}

fn forward(p: &EmissionParams, scratch: &mut Scratch, feature: &[f32], state: &mut RecurrentState) -> Activation {
    frontend(p, scratch, feature);
    linear_into(&mut scratch.proj, &scratch.flat, &p.proj_weight, &p.proj_bias);

    for (l, layer) in p.layers.iter().enumerate() {
        if l == 0 {
            linear_into(&mut scratch.gates, &scratch.proj, &layer.weight_ih, &layer.bias_ih);
        } else {
            // Input is the layer below, already advanced this step
            linear_into(&mut scratch.gates, state.layer_hidden(l - 1), &layer.weight_ih, &layer.bias_ih);
        }
        let (hidden, cell) = state.layer_mut(l);
        lstm_step(layer, &scratch.gates, hidden, cell, &mut scratch.recurrent);
    }

    classify(p, scratch, state.top_hidden())
}
